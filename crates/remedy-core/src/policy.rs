//! Learned bandit policy: diagonal-UCB action selection and online updates.
//!
//! Each action keeps a weight vector and a per-dimension confidence vector
//! (a diagonal stand-in for the LinUCB covariance). Scoring is
//!
//! `score[a] = w_a · x + alpha * sqrt(sum_i x_i^2 * c_a,i)`
//!
//! and the first action with the strictly greatest score wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::action::{Action, ACTION_COUNT};
use crate::context::{Context, FeatureVector, FEATURE_DIM, FEATURE_NAMES};

/// Weights are clipped to `[-WEIGHT_BOUND, WEIGHT_BOUND]`.
pub const WEIGHT_BOUND: f64 = 10.0;

/// Confidence values never fall below this floor.
pub const CONFIDENCE_FLOOR: f64 = 0.1;

/// Number of contributing factors surfaced by [`explain_action`].
pub const TOP_FACTORS: usize = 3;

/// Learned parameters for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmParams {
    pub weights: Vec<f64>,
    pub confidence: Vec<f64>,
}

impl ArmParams {
    pub fn cold() -> Self {
        Self {
            weights: vec![0.0; FEATURE_DIM],
            confidence: vec![1.0; FEATURE_DIM],
        }
    }

    fn expected(&self, x: &FeatureVector) -> f64 {
        self.weights.iter().zip(x.iter()).map(|(w, xi)| w * xi).sum()
    }

    fn bonus(&self, x: &FeatureVector, exploration_rate: f64) -> f64 {
        let spread: f64 = self
            .confidence
            .iter()
            .zip(x.iter())
            .map(|(c, xi)| xi * xi * c)
            .sum();
        exploration_rate * spread.max(0.0).sqrt()
    }

    fn confidence_norm(&self) -> f64 {
        self.confidence.iter().map(|c| c * c).sum::<f64>().sqrt()
    }
}

/// The single live bandit policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Incremented on every successful persist.
    pub version: u64,
    /// Number of rewards folded into the weights.
    pub trained_samples: u64,
    pub updated_at: DateTime<Utc>,
    /// Feature dimension the policy was trained with.
    pub feature_dim: usize,
    pub arms: BTreeMap<Action, ArmParams>,
}

impl Policy {
    /// Fresh policy: all weights 0, all confidence 1.0.
    pub fn cold_start(now: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            trained_samples: 0,
            updated_at: now,
            feature_dim: FEATURE_DIM,
            arms: Action::ALL.iter().map(|a| (*a, ArmParams::cold())).collect(),
        }
    }

    /// Whether a stored policy still matches the compiled action set and
    /// feature layout.
    pub fn is_compatible(&self) -> bool {
        self.feature_dim == FEATURE_DIM
            && self.arms.len() == ACTION_COUNT
            && Action::ALL.iter().all(|a| {
                self.arms
                    .get(a)
                    .map(|p| p.weights.len() == FEATURE_DIM && p.confidence.len() == FEATURE_DIM)
                    .unwrap_or(false)
            })
    }

    pub fn arm(&self, action: Action) -> Option<&ArmParams> {
        self.arms.get(&action)
    }
}

/// Result of scoring every action against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub action: Action,
    /// UCB score of the chosen action ("expected gain").
    pub score: f64,
    /// `1 - ||confidence[action]||_2 / 10`, clamped to [0,1].
    pub confidence: f64,
    /// Score of every action, for observability.
    pub scores: BTreeMap<Action, f64>,
}

/// Score every action and pick the best one.
///
/// Ties resolve to the earliest action in [`Action::ALL`], so a cold policy
/// always selects [`Action::DoNothing`]. Arms missing from the policy score as
/// cold arms.
pub fn select_action(context: &Context, policy: &Policy, exploration_rate: f64) -> Selection {
    let x = context.features();
    let alpha = if exploration_rate.is_finite() { exploration_rate.max(0.0) } else { 0.0 };
    let cold = ArmParams::cold();

    let mut scores = BTreeMap::new();
    let mut best: Option<(Action, f64)> = None;

    for action in Action::ALL {
        let arm = policy.arm(action).unwrap_or(&cold);
        let score = arm.expected(&x) + arm.bonus(&x, alpha);
        let score = if score.is_finite() { score } else { f64::NEG_INFINITY };
        scores.insert(action, score);

        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((action, score)),
        }
    }

    let (action, score) = best.unwrap_or((Action::DoNothing, 0.0));
    let confidence =
        (1.0 - policy.arm(action).unwrap_or(&cold).confidence_norm() / 10.0).clamp(0.0, 1.0);

    Selection {
        action,
        score,
        confidence,
        scores,
    }
}

/// Fold one reward into the policy, returning the updated copy.
///
/// `w_i += lr * reward * x_i` clipped to ±[`WEIGHT_BOUND`], then
/// `c_i *= decay` floored at [`CONFIDENCE_FLOOR`].
pub fn update_policy(
    policy: &Policy,
    action: Action,
    context: &Context,
    reward: f64,
    learning_rate: f64,
    confidence_decay: f64,
    now: DateTime<Utc>,
) -> Policy {
    let x = context.features();
    let reward = if reward.is_finite() { reward } else { 0.0 };
    let mut next = policy.clone();
    let arm = next.arms.entry(action).or_insert_with(ArmParams::cold);
    arm.weights.resize(FEATURE_DIM, 0.0);
    arm.confidence.resize(FEATURE_DIM, 1.0);

    for (i, xi) in x.iter().enumerate() {
        let w = arm.weights[i] + learning_rate * reward * xi;
        arm.weights[i] = if w.is_finite() { w.clamp(-WEIGHT_BOUND, WEIGHT_BOUND) } else { 0.0 };

        let c = arm.confidence[i] * confidence_decay;
        arm.confidence[i] = if c.is_finite() { c.max(CONFIDENCE_FLOOR) } else { CONFIDENCE_FLOOR };
    }

    next.trained_samples += 1;
    next.updated_at = now;
    next
}

/// One feature's contribution to an action's expected score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub feature: String,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Human-readable account of why an action scored as it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub top_factors: Vec<Factor>,
}

/// Explain the chosen action by its top contributing features.
pub fn explain_action(action: Action, context: &Context, policy: &Policy) -> Explanation {
    let x = context.features();
    let cold = ArmParams::cold();
    let arm = policy.arm(action).unwrap_or(&cold);

    let mut factors: Vec<Factor> = FEATURE_NAMES
        .iter()
        .zip(x.iter())
        .zip(arm.weights.iter())
        .map(|((name, value), weight)| Factor {
            feature: (*name).to_string(),
            value: *value,
            weight: *weight,
            contribution: weight * value,
        })
        .collect();
    // Stable sort keeps feature order among equal contributions.
    factors.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    factors.truncate(TOP_FACTORS);

    let parts: Vec<String> = factors
        .iter()
        .map(|f| format!("{} ({:+.3})", f.feature, f.contribution))
        .collect();
    let summary = if factors.iter().all(|f| f.contribution == 0.0) {
        format!("Chose {} on exploration; no learned signal yet", action)
    } else {
        format!("Chose {} driven by {}", action, parts.join(", "))
    };

    Explanation {
        summary,
        top_factors: factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_ctx() -> Context {
        Context {
            error_rate: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_cold_start_selects_do_nothing() {
        let policy = Policy::cold_start(Utc::now());
        let contexts = [
            Context::default(),
            error_ctx(),
            Context {
                error_rate: 0.3,
                error_spike: 2.0,
                p95_normalized: 1.8,
                latency_spike: 2.0,
                traffic_normalized: 0.9,
                traffic_spike: 0.5,
                anomaly_severity: 1.0,
                anomaly_count: 7,
                hour_of_day: 17,
                day_of_week: 5,
                forecast_trend: -0.6,
            },
        ];
        for ctx in contexts {
            let sel = select_action(&ctx, &policy, 0.5);
            assert_eq!(sel.action, Action::DoNothing);
            assert_eq!(sel.scores.len(), ACTION_COUNT);
        }
    }

    #[test]
    fn test_learning_moves_the_needle() {
        let now = Utc::now();
        let policy = Policy::cold_start(now);
        let ctx = error_ctx();
        let policy = update_policy(&policy, Action::RestartFn, &ctx, 1.0, 0.05, 0.95, now);

        let sel = select_action(&ctx, &policy, 0.5);
        assert_eq!(sel.action, Action::RestartFn);
        assert!((sel.score - 0.7892).abs() < 1e-3, "score was {}", sel.score);
        let noop = sel.scores[&Action::DoNothing];
        assert!((noop - 0.7071).abs() < 1e-3, "noop score was {}", noop);
        assert_eq!(policy.trained_samples, 1);
    }

    #[test]
    fn test_update_returns_copy() {
        let now = Utc::now();
        let policy = Policy::cold_start(now);
        let next = update_policy(&policy, Action::ScaleUp, &error_ctx(), 1.0, 0.05, 0.95, now);
        assert_eq!(policy.arm(Action::ScaleUp).unwrap().weights[0], 0.0);
        assert!((next.arm(Action::ScaleUp).unwrap().weights[0] - 0.05).abs() < 1e-12);
        assert_eq!(next.arm(Action::DoNothing), policy.arm(Action::DoNothing));
    }

    #[test]
    fn test_weights_clip_and_confidence_floor() {
        let now = Utc::now();
        let mut policy = Policy::cold_start(now);
        for _ in 0..200 {
            policy = update_policy(&policy, Action::RestartFn, &error_ctx(), 50.0, 1.0, 0.5, now);
        }
        let arm = policy.arm(Action::RestartFn).unwrap();
        assert_eq!(arm.weights[0], WEIGHT_BOUND);
        assert!(arm.confidence.iter().all(|c| *c == CONFIDENCE_FLOOR));
    }

    #[test]
    fn test_confidence_derivation() {
        let policy = Policy::cold_start(Utc::now());
        let sel = select_action(&Context::default(), &policy, 0.5);
        let expected = 1.0 - (FEATURE_DIM as f64).sqrt() / 10.0;
        assert!((sel.confidence - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_exploration_ties_to_noop() {
        let policy = Policy::cold_start(Utc::now());
        let sel = select_action(&error_ctx(), &policy, 0.0);
        assert_eq!(sel.action, Action::DoNothing);
        assert_eq!(sel.score, 0.0);
    }

    #[test]
    fn test_explain_action_top_factors() {
        let now = Utc::now();
        let ctx = Context {
            error_rate: 0.5,
            traffic_normalized: 1.0,
            anomaly_severity: 0.2,
            ..Default::default()
        };
        let mut policy = Policy::cold_start(now);
        let arm = policy.arms.get_mut(&Action::ReduceRate).unwrap();
        arm.weights[0] = 2.0; // 1.0
        arm.weights[4] = -3.0; // -3.0
        arm.weights[6] = 0.5; // 0.1
        arm.weights[11] = 0.4; // 0.4

        let explanation = explain_action(Action::ReduceRate, &ctx, &policy);
        let names: Vec<&str> = explanation
            .top_factors
            .iter()
            .map(|f| f.feature.as_str())
            .collect();
        assert_eq!(names, vec!["traffic_normalized", "error_rate", "bias"]);
        assert!(explanation.summary.contains("reduce_rate"));
    }

    #[test]
    fn test_explain_cold_policy() {
        let policy = Policy::cold_start(Utc::now());
        let explanation = explain_action(Action::DoNothing, &error_ctx(), &policy);
        assert_eq!(explanation.top_factors.len(), TOP_FACTORS);
        assert!(explanation.summary.contains("exploration"));
    }

    #[test]
    fn test_compatibility_check() {
        let mut policy = Policy::cold_start(Utc::now());
        assert!(policy.is_compatible());
        policy.arms.remove(&Action::ClearCache);
        assert!(!policy.is_compatible());

        let mut policy = Policy::cold_start(Utc::now());
        policy.feature_dim = 8;
        assert!(!policy.is_compatible());
    }

    #[test]
    fn test_policy_serde_round_trip() {
        let policy = Policy::cold_start(Utc::now());
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"restart_fn\""));
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
