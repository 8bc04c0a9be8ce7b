//! Telemetry inputs consumed by the decision engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 24h aggregate totals from the telemetry store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryTotals {
    #[serde(default)]
    pub calls_24h: u64,
    #[serde(default)]
    pub errors_24h: u64,
    /// p95 latency in milliseconds.
    #[serde(default)]
    pub p95_ms: f64,
}

impl TelemetryTotals {
    /// Error rate with a floor denominator of one call.
    pub fn error_rate(&self) -> f64 {
        (self.errors_24h as f64 / (self.calls_24h.max(1)) as f64).clamp(0.0, 1.0)
    }

    /// Point-in-time snapshot used for pre/post execution comparison.
    pub fn snapshot(&self, captured_at: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            error_rate: self.error_rate(),
            p95_ms: sanitize(self.p95_ms),
            throughput: self.calls_24h as f64,
            captured_at,
        }
    }
}

/// Anomaly severity as reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

/// A recent anomaly event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub ts: DateTime<Utc>,
    pub severity: AnomalySeverity,
    pub metric: String,
    #[serde(default)]
    pub score: f64,
}

/// Error rate of a single component, used for target resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub error_rate: f64,
}

/// Telemetry captured immediately before or some time after an action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub error_rate: f64,
    pub p95_ms: f64,
    pub throughput: f64,
    pub captured_at: DateTime<Utc>,
}

/// Read side of the telemetry aggregation store.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// 24h totals.
    async fn totals(&self) -> Result<TelemetryTotals>;

    /// Most recent anomalies, newest first, at most `limit`.
    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>>;

    /// Per-component error rates. Sources without a breakdown return nothing.
    async fn component_health(&self) -> Result<Vec<ComponentHealth>> {
        Ok(Vec::new())
    }
}

/// External forecaster supplying the trend signal.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Forecast trend, roughly in [-1, 1]; positive means worsening load.
    async fn trend(&self) -> Result<f64>;
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate_guards_zero_calls() {
        let totals = TelemetryTotals {
            calls_24h: 0,
            errors_24h: 5,
            p95_ms: 10.0,
        };
        assert_eq!(totals.error_rate(), 1.0);
        assert_eq!(TelemetryTotals::default().error_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_from_totals() {
        let totals = TelemetryTotals {
            calls_24h: 1000,
            errors_24h: 80,
            p95_ms: f64::NAN,
        };
        let snap = totals.snapshot(Utc::now());
        assert!((snap.error_rate - 0.08).abs() < 1e-12);
        assert_eq!(snap.p95_ms, 0.0);
        assert_eq!(snap.throughput, 1000.0);
    }
}
