//! Telemetry read from a JSON snapshot file.
//!
//! The file is re-read on every call, so whatever refreshes it (a cron job,
//! an exporter sidecar) is picked up by the next tick:
//!
//! ```json
//! {
//!   "totals": { "calls_24h": 52000, "errors_24h": 3100, "p95_ms": 640.0 },
//!   "anomalies": [
//!     { "ts": "2026-10-14T09:00:00Z", "severity": "high", "metric": "error_rate", "score": 4.2 }
//!   ],
//!   "components": [ { "name": "checkout-fn", "error_rate": 0.09 } ],
//!   "forecast_trend": 0.3
//! }
//! ```

use async_trait::async_trait;
use remedy_core::{
    AnomalyEvent, ComponentHealth, Error, ForecastSource, Result, TelemetrySource, TelemetryTotals,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryFile {
    #[serde(default)]
    pub totals: TelemetryTotals,
    #[serde(default)]
    pub anomalies: Vec<AnomalyEvent>,
    #[serde(default)]
    pub components: Vec<ComponentHealth>,
    #[serde(default)]
    pub forecast_trend: Option<f64>,
}

/// Telemetry source backed by an optional snapshot file. Without a file
/// every read fails, which the engine degrades to empty telemetry.
#[derive(Debug, Clone)]
pub struct FileTelemetrySource {
    path: Option<PathBuf>,
}

impl FileTelemetrySource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    async fn read(&self) -> Result<TelemetryFile> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| {
                Error::Telemetry("no telemetry file configured (--telemetry)".to_string())
            })?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Telemetry(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Telemetry(format!("invalid telemetry file {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl TelemetrySource for FileTelemetrySource {
    async fn totals(&self) -> Result<TelemetryTotals> {
        Ok(self.read().await?.totals)
    }

    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let mut anomalies = self.read().await?.anomalies;
        anomalies.sort_by(|a, b| b.ts.cmp(&a.ts));
        anomalies.truncate(limit);
        Ok(anomalies)
    }

    async fn component_health(&self) -> Result<Vec<ComponentHealth>> {
        Ok(self.read().await?.components)
    }
}

#[async_trait]
impl ForecastSource for FileTelemetrySource {
    async fn trend(&self) -> Result<f64> {
        self.read()
            .await?
            .forecast_trend
            .ok_or_else(|| Error::Telemetry("telemetry file has no forecast_trend".to_string()))
    }
}
