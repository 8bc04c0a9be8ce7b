//! Additive risk scoring.

use crate::action::{Action, RiskLevel};
use crate::context::Context;

/// Protected-name substrings used when none are configured.
pub const DEFAULT_PROTECTED_TARGETS: [&str; 4] = ["prod", "payment", "auth", "billing"];

/// Whether `target` contains any of the protected substrings.
pub fn is_protected<S: AsRef<str>>(target: Option<&str>, protected: &[S]) -> bool {
    match target {
        Some(t) => protected.iter().any(|p| {
            let p = p.as_ref();
            !p.is_empty() && t.contains(p)
        }),
        None => false,
    }
}

/// Classify an action/target/context combination.
///
/// Score = action class (1..=3) + 2 if the target is protected
/// + 1 if anomaly severity > 0.7 + 1 if traffic > 0.7.
/// `>= 5` is high, `>= 3` is medium, anything else low.
pub fn assess_risk<S: AsRef<str>>(
    action: Action,
    context: &Context,
    target: Option<&str>,
    protected: &[S],
) -> RiskLevel {
    let mut score = action.class().risk_points();
    if is_protected(target, protected) {
        score += 2;
    }
    if context.anomaly_severity > 0.7 {
        score += 1;
    }
    if context.traffic_normalized > 0.7 {
        score += 1;
    }

    if score >= 5 {
        RiskLevel::High
    } else if score >= 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
