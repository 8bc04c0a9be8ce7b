//! Decision and Outcome records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::action::{Action, RiskLevel};
use crate::context::Context;
use crate::policy::Explanation;
use crate::reward::{MetricDeltas, RewardBreakdown};
use crate::telemetry::TelemetrySnapshot;

/// Approval state of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    AutoApproved,
    Pending,
    Rejected,
    Approved,
    Expired,
    /// Cleared for execution, but the hand-off never happened.
    Failed,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::AutoApproved => "auto_approved",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Failed => "failed",
        }
    }

    /// Whether a decision in this state may be handed off for execution.
    pub fn is_executable(&self) -> bool {
        matches!(self, ApprovalStatus::AutoApproved | ApprovalStatus::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One orchestrator tick that chose a real action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub context: Context,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Bandit score of the chosen action.
    pub expected_gain: f64,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub approval_status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub matched_guardrails: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_impact_percentage: Option<f64>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_snapshot: Option<TelemetrySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_snapshot: Option<TelemetrySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default)]
    pub side_effects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
    pub explanation: Explanation,
}

impl Decision {
    /// Build a decision record for a freshly selected action. Approval fields
    /// are filled in by the caller after guardrails run.
    pub fn new(
        context: Context,
        action: Action,
        target: Option<String>,
        expected_gain: f64,
        confidence: f64,
        risk: RiskLevel,
        explanation: Explanation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            context,
            action,
            target,
            expected_gain,
            confidence,
            risk,
            approval_status: ApprovalStatus::Pending,
            approval_reason: None,
            approval_expires_at: None,
            resolved_by: None,
            matched_guardrails: Vec::new(),
            max_impact_percentage: None,
            executed: false,
            executed_at: None,
            job_id: None,
            pre_snapshot: None,
            post_snapshot: None,
            reward: None,
            side_effects: Vec::new(),
            evaluated_at: None,
            explanation,
        }
    }

    /// Executed, not yet rewarded.
    pub fn awaiting_evaluation(&self) -> bool {
        self.executed && self.reward.is_none() && self.evaluated_at.is_none()
    }

    /// Pending with an expiry at or before `now`.
    pub fn approval_expired(&self, now: DateTime<Utc>) -> bool {
        self.approval_status == ApprovalStatus::Pending
            && self.approval_expires_at.is_some_and(|t| t <= now)
    }
}

/// Partial update applied to a stored decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionPatch {
    pub approval_status: Option<ApprovalStatus>,
    pub approval_reason: Option<String>,
    pub resolved_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub job_id: Option<String>,
    pub pre_snapshot: Option<TelemetrySnapshot>,
    pub post_snapshot: Option<TelemetrySnapshot>,
    pub reward: Option<f64>,
    pub side_effects: Option<Vec<String>>,
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl DecisionPatch {
    /// Mark the decision as handed off.
    pub fn executed(at: DateTime<Utc>, job_id: String, pre_snapshot: TelemetrySnapshot) -> Self {
        Self {
            executed_at: Some(at),
            job_id: Some(job_id),
            pre_snapshot: Some(pre_snapshot),
            ..Default::default()
        }
    }

    /// Stamp the evaluation results.
    pub fn evaluated(
        at: DateTime<Utc>,
        post_snapshot: TelemetrySnapshot,
        reward: f64,
        side_effects: Vec<String>,
    ) -> Self {
        Self {
            post_snapshot: Some(post_snapshot),
            reward: Some(reward),
            side_effects: Some(side_effects),
            evaluated_at: Some(at),
            ..Default::default()
        }
    }

    /// Change the approval state.
    pub fn status(
        status: ApprovalStatus,
        reason: Option<String>,
        resolved_by: Option<String>,
    ) -> Self {
        Self {
            approval_status: Some(status),
            approval_reason: reason,
            resolved_by,
            ..Default::default()
        }
    }

    /// Apply the patch. A decision that already has a reward keeps it.
    pub fn apply(self, decision: &mut Decision) {
        if let Some(status) = self.approval_status {
            decision.approval_status = status;
        }
        if self.approval_reason.is_some() {
            decision.approval_reason = self.approval_reason;
        }
        if self.resolved_by.is_some() {
            decision.resolved_by = self.resolved_by;
        }
        if let Some(at) = self.executed_at {
            decision.executed = true;
            decision.executed_at = Some(at);
        }
        if self.job_id.is_some() {
            decision.job_id = self.job_id;
        }
        if self.pre_snapshot.is_some() {
            decision.pre_snapshot = self.pre_snapshot;
        }
        if decision.reward.is_none() {
            if self.post_snapshot.is_some() {
                decision.post_snapshot = self.post_snapshot;
            }
            if let Some(effects) = self.side_effects {
                decision.side_effects = effects;
            }
            if self.evaluated_at.is_some() {
                decision.evaluated_at = self.evaluated_at;
            }
            decision.reward = self.reward;
        }
    }
}

/// Append-only evaluation record for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub decision_id: String,
    pub action: Action,
    pub risk: RiskLevel,
    pub deltas: MetricDeltas,
    pub reward: RewardBreakdown,
    pub side_effects: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{explain_action, Policy};

    fn decision() -> Decision {
        let now = Utc::now();
        let ctx = Context::default();
        let policy = Policy::cold_start(now);
        Decision::new(
            ctx,
            Action::RestartFn,
            Some("api-handler".to_string()),
            0.7,
            0.65,
            RiskLevel::Medium,
            explain_action(Action::RestartFn, &ctx, &policy),
            now,
        )
    }

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            error_rate: 0.1,
            p95_ms: 400.0,
            throughput: 1000.0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_executed_patch() {
        let mut d = decision();
        assert!(!d.awaiting_evaluation());
        DecisionPatch::executed(Utc::now(), "job-1".into(), snapshot()).apply(&mut d);
        assert!(d.executed);
        assert_eq!(d.job_id.as_deref(), Some("job-1"));
        assert!(d.awaiting_evaluation());
    }

    #[test]
    fn test_reward_is_written_once() {
        let mut d = decision();
        DecisionPatch::executed(Utc::now(), "job-1".into(), snapshot()).apply(&mut d);
        DecisionPatch::evaluated(Utc::now(), snapshot(), 0.75, vec![]).apply(&mut d);
        assert_eq!(d.reward, Some(0.75));
        assert!(!d.awaiting_evaluation());

        DecisionPatch::evaluated(Utc::now(), snapshot(), -1.0, vec!["late".into()]).apply(&mut d);
        assert_eq!(d.reward, Some(0.75));
        assert!(d.side_effects.is_empty());
    }

    #[test]
    fn test_approval_expiry() {
        let mut d = decision();
        let now = Utc::now();
        d.approval_expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(d.approval_expired(now));
        d.approval_status = ApprovalStatus::Approved;
        assert!(!d.approval_expired(now));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(ApprovalStatus::AutoApproved.to_string(), "auto_approved");
        assert!(ApprovalStatus::Approved.is_executable());
        assert!(!ApprovalStatus::Pending.is_executable());
        assert!(!ApprovalStatus::Failed.is_executable());
        assert_eq!(ApprovalStatus::Failed.to_string(), "failed");
    }
}
