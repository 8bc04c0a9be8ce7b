//! Explicit results of each tick kind.

use chrono::{DateTime, Utc};
use remedy_core::Action;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where in the decision pass a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    Lease,
    Policy,
    Persist,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// `do_nothing` won; no decision was recorded.
    Idle { scores: BTreeMap<Action, f64> },
    Executed { decision_id: String, job_id: String },
    PendingApproval { decision_id: String, expires_at: DateTime<Utc> },
    Rejected { decision_id: String, reason: String },
    /// Another runner holds the lease.
    Skipped { reason: String },
    Failed { stage: DecisionStage, cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTickReport {
    pub started_at: DateTime<Utc>,
    pub outcome: DecisionOutcome,
}

impl DecisionTickReport {
    pub fn decision_id(&self) -> Option<&str> {
        match &self.outcome {
            DecisionOutcome::Executed { decision_id, .. }
            | DecisionOutcome::PendingApproval { decision_id, .. }
            | DecisionOutcome::Rejected { decision_id, .. } => Some(decision_id),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, DecisionOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeTickStatus {
    NothingToDo,
    Completed,
    /// Some decisions failed; the rest were applied.
    Partial,
    Skipped { reason: String },
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeTickReport {
    pub started_at: DateTime<Utc>,
    /// Decisions scored and folded into the policy this tick.
    pub evaluated: Vec<String>,
    /// Decisions whose outcome already existed; stamped without a policy update.
    pub repaired: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Policy version after the tick, when one was loaded.
    pub policy_version: Option<u64>,
    pub status: OutcomeTickStatus,
}

impl OutcomeTickReport {
    pub(crate) fn new(started_at: DateTime<Utc>, status: OutcomeTickStatus) -> Self {
        Self {
            started_at,
            evaluated: Vec::new(),
            repaired: Vec::new(),
            failed: Vec::new(),
            policy_version: None,
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<(String, String)>,
    /// Set when the sweep did not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}
