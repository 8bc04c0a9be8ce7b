//! Reward shaping and side-effect detection.

use serde::{Deserialize, Serialize};

use crate::action::RiskLevel;
use crate::telemetry::TelemetrySnapshot;

/// Percentage changes between the pre- and post-execution snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDeltas {
    /// Positive when the error rate went down.
    pub error_improvement_pct: f64,
    /// Positive when p95 latency went down.
    pub latency_improvement_pct: f64,
    /// Positive when throughput went up.
    pub throughput_change_pct: f64,
}

impl MetricDeltas {
    pub fn between(pre: &TelemetrySnapshot, post: &TelemetrySnapshot) -> Self {
        Self {
            error_improvement_pct: (pre.error_rate - post.error_rate) / pre.error_rate.max(0.001)
                * 100.0,
            latency_improvement_pct: (pre.p95_ms - post.p95_ms) / pre.p95_ms.max(0.001) * 100.0,
            throughput_change_pct: (post.throughput - pre.throughput) / pre.throughput.max(1.0)
                * 100.0,
        }
    }
}

/// Reward components and their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub error_reward: f64,
    pub latency_reward: f64,
    pub side_effect_penalty: f64,
    pub risk_penalty: f64,
    pub total_reward: f64,
}

fn error_reward(improvement_pct: f64) -> f64 {
    if improvement_pct >= 20.0 {
        1.0
    } else if improvement_pct >= 10.0 {
        0.5
    } else if improvement_pct < -20.0 {
        -1.0
    } else if improvement_pct < -10.0 {
        -0.5
    } else {
        0.0
    }
}

fn latency_reward(improvement_pct: f64) -> f64 {
    if improvement_pct >= 15.0 {
        0.5
    } else if improvement_pct >= 5.0 {
        0.25
    } else if improvement_pct < -15.0 {
        -0.5
    } else {
        0.0
    }
}

fn side_effect_penalty(throughput_change_pct: f64) -> f64 {
    if throughput_change_pct < -20.0 {
        -0.5
    } else if throughput_change_pct < -10.0 {
        -0.25
    } else {
        0.0
    }
}

/// Risky actions must earn their keep: the penalty applies when the reward
/// accumulated before it (error, latency and side-effect components) falls
/// short of the tier's bar.
fn risk_penalty(risk: RiskLevel, earned: f64) -> f64 {
    match risk {
        RiskLevel::High if earned < 1.0 => -0.3,
        RiskLevel::Medium if earned < 0.5 => -0.1,
        _ => 0.0,
    }
}

/// Compute the shaped reward for one executed decision.
pub fn compute_reward(deltas: &MetricDeltas, risk: RiskLevel) -> RewardBreakdown {
    let error_reward = error_reward(deltas.error_improvement_pct);
    let latency_reward = latency_reward(deltas.latency_improvement_pct);
    let side_effect_penalty = side_effect_penalty(deltas.throughput_change_pct);
    let earned = error_reward + latency_reward + side_effect_penalty;
    let risk_penalty = risk_penalty(risk, earned);

    RewardBreakdown {
        error_reward,
        latency_reward,
        side_effect_penalty,
        risk_penalty,
        total_reward: earned + risk_penalty,
    }
}

/// Describe regressions worth an operator's attention.
pub fn detect_side_effects(pre: &TelemetrySnapshot, post: &TelemetrySnapshot) -> Vec<String> {
    let mut effects = Vec::new();
    let deltas = MetricDeltas::between(pre, post);

    if deltas.throughput_change_pct < -20.0 {
        effects.push(format!(
            "Throughput dropped {:.1}% ({:.0} -> {:.0})",
            -deltas.throughput_change_pct, pre.throughput, post.throughput
        ));
    }
    if post.error_rate > pre.error_rate * 1.5 {
        effects.push(format!(
            "Error rate increased from {:.4} to {:.4}",
            pre.error_rate, post.error_rate
        ));
    }
    if post.p95_ms > pre.p95_ms * 1.3 {
        effects.push(format!(
            "p95 latency increased from {:.0}ms to {:.0}ms",
            pre.p95_ms, post.p95_ms
        ));
    }

    effects
}
