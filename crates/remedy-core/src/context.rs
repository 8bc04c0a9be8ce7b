//! Context builder: telemetry in, bounded signals and feature vector out.
//!
//! The feature layout is fixed for the lifetime of a [`Policy`](crate::Policy):
//!
//! | idx | feature | normalization |
//! |---|---|---|
//! | 0 | error rate | already in [0,1] |
//! | 1 | error spike | / 2 |
//! | 2 | p95 normalized | / 2 |
//! | 3 | latency spike | / 2 |
//! | 4 | traffic normalized | already in [0,1] |
//! | 5 | traffic spike | / 1.5 |
//! | 6 | anomaly severity | already in [0,1] |
//! | 7 | anomaly count | / 10, capped at 1 |
//! | 8 | hour of day | / 23 |
//! | 9 | day of week | / 6 |
//! | 10 | forecast trend | clamped to [-1,1] |
//! | 11 | bias | constant 1.0 |

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{AnomalyEvent, AnomalySeverity, TelemetryTotals};

/// Dimensionality of the feature vector.
pub const FEATURE_DIM: usize = 12;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "error_rate",
    "error_spike",
    "p95_normalized",
    "latency_spike",
    "traffic_normalized",
    "traffic_spike",
    "anomaly_severity",
    "anomaly_count",
    "hour_of_day",
    "day_of_week",
    "forecast_trend",
    "bias",
];

/// Fixed-length ordered feature vector.
pub type FeatureVector = [f64; FEATURE_DIM];

/// Point-in-time operating context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub error_rate: f64,
    pub error_spike: f64,
    pub p95_normalized: f64,
    pub latency_spike: f64,
    pub traffic_normalized: f64,
    pub traffic_spike: f64,
    pub anomaly_severity: f64,
    pub anomaly_count: u32,
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub forecast_trend: f64,
}

impl Context {
    /// Map the context to its feature vector.
    pub fn features(&self) -> FeatureVector {
        [
            finite(self.error_rate),
            finite(self.error_spike) / 2.0,
            finite(self.p95_normalized) / 2.0,
            finite(self.latency_spike) / 2.0,
            finite(self.traffic_normalized),
            finite(self.traffic_spike) / 1.5,
            finite(self.anomaly_severity),
            (self.anomaly_count as f64 / 10.0).min(1.0),
            self.hour_of_day.min(23) as f64 / 23.0,
            self.day_of_week.min(6) as f64 / 6.0,
            finite(self.forecast_trend).clamp(-1.0, 1.0),
            1.0,
        ]
    }
}

/// Build a context from raw telemetry.
///
/// Pure; missing inputs are zero/empty and never cause failure.
pub fn build_context(
    totals: &TelemetryTotals,
    anomalies: &[AnomalyEvent],
    forecast_trend: Option<f64>,
    now: DateTime<Utc>,
) -> Context {
    let error_rate = totals.error_rate();
    let error_spike = if error_rate > 0.05 {
        2.0
    } else if error_rate > 0.02 {
        1.0
    } else {
        0.0
    };

    let p95 = if totals.p95_ms.is_finite() { totals.p95_ms.max(0.0) } else { 0.0 };
    let latency_spike = if p95 > 1000.0 {
        2.0
    } else if p95 > 500.0 {
        1.0
    } else {
        0.0
    };

    let traffic_raw = totals.calls_24h as f64 / 100_000.0;
    let traffic_spike = if traffic_raw > 1.0 {
        1.5
    } else if traffic_raw > 0.5 {
        0.5
    } else {
        0.0
    };

    let anomaly_severity = if anomalies.iter().any(|a| a.severity == AnomalySeverity::High) {
        1.0
    } else if anomalies.len() > 2 {
        0.5
    } else {
        0.2
    };

    Context {
        error_rate,
        error_spike,
        p95_normalized: (p95 / 1000.0).clamp(0.0, 2.0),
        latency_spike,
        traffic_normalized: traffic_raw.clamp(0.0, 1.0),
        traffic_spike,
        anomaly_severity,
        anomaly_count: anomalies.len() as u32,
        hour_of_day: now.hour(),
        day_of_week: now.weekday().num_days_from_sunday(),
        forecast_trend: forecast_trend.filter(|t| t.is_finite()).unwrap_or(0.0),
    }
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anomaly(severity: AnomalySeverity) -> AnomalyEvent {
        AnomalyEvent {
            ts: Utc::now(),
            severity,
            metric: "error_rate".to_string(),
            score: 3.0,
        }
    }

    #[test]
    fn test_build_context_thresholds() {
        let totals = TelemetryTotals {
            calls_24h: 120_000,
            errors_24h: 7_200,
            p95_ms: 1_250.0,
        };
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let ctx = build_context(&totals, &[anomaly(AnomalySeverity::High)], Some(0.4), now);

        assert!((ctx.error_rate - 0.06).abs() < 1e-12);
        assert_eq!(ctx.error_spike, 2.0);
        assert_eq!(ctx.p95_normalized, 1.25);
        assert_eq!(ctx.latency_spike, 2.0);
        assert_eq!(ctx.traffic_normalized, 1.0);
        assert_eq!(ctx.traffic_spike, 1.5);
        assert_eq!(ctx.anomaly_severity, 1.0);
        assert_eq!(ctx.anomaly_count, 1);
        assert_eq!(ctx.hour_of_day, 9);
        // 2026-10-14 is a Wednesday.
        assert_eq!(ctx.day_of_week, 3);
        assert_eq!(ctx.forecast_trend, 0.4);
    }

    #[test]
    fn test_build_context_middle_bands() {
        let totals = TelemetryTotals {
            calls_24h: 60_000,
            errors_24h: 1_800,
            p95_ms: 700.0,
        };
        let anomalies = vec![
            anomaly(AnomalySeverity::Low),
            anomaly(AnomalySeverity::Medium),
            anomaly(AnomalySeverity::Low),
        ];
        let ctx = build_context(&totals, &anomalies, None, Utc::now());
        assert_eq!(ctx.error_spike, 1.0);
        assert_eq!(ctx.latency_spike, 1.0);
        assert_eq!(ctx.traffic_spike, 0.5);
        assert_eq!(ctx.anomaly_severity, 0.5);
        assert_eq!(ctx.forecast_trend, 0.0);
    }

    #[test]
    fn test_build_context_from_empty_inputs() {
        let ctx = build_context(&TelemetryTotals::default(), &[], None, Utc::now());
        assert_eq!(ctx.error_rate, 0.0);
        assert_eq!(ctx.error_spike, 0.0);
        assert_eq!(ctx.p95_normalized, 0.0);
        assert_eq!(ctx.traffic_normalized, 0.0);
        assert_eq!(ctx.anomaly_severity, 0.2);
        assert_eq!(ctx.anomaly_count, 0);
    }

    #[test]
    fn test_p95_clamped_to_two() {
        let totals = TelemetryTotals {
            calls_24h: 10,
            errors_24h: 0,
            p95_ms: 9_000.0,
        };
        let ctx = build_context(&totals, &[], None, Utc::now());
        assert_eq!(ctx.p95_normalized, 2.0);
    }

    #[test]
    fn test_features_layout() {
        let ctx = Context {
            error_rate: 1.0,
            ..Default::default()
        };
        let x = ctx.features();
        assert_eq!(x.len(), FEATURE_DIM);
        assert_eq!(x[0], 1.0);
        assert_eq!(x[FEATURE_DIM - 1], 1.0);
        assert!(x[1..FEATURE_DIM - 1].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_features_are_bounded() {
        let ctx = Context {
            error_rate: 1.0,
            error_spike: 2.0,
            p95_normalized: 2.0,
            latency_spike: 2.0,
            traffic_normalized: 1.0,
            traffic_spike: 1.5,
            anomaly_severity: 1.0,
            anomaly_count: 500,
            hour_of_day: 23,
            day_of_week: 6,
            forecast_trend: 9.0,
        };
        for v in ctx.features() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
