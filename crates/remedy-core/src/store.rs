//! Persistence seams for policy, decisions, guardrails, outcomes and leases.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::decision::{ApprovalStatus, Decision, DecisionPatch, Outcome};
use crate::error::Result;
use crate::guardrail::Guardrail;
use crate::policy::Policy;

/// The single live policy document.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_policy(&self) -> Result<Option<Policy>>;

    /// Compare-and-swap write. `expected_version` is the version the caller
    /// read (`None` if no policy existed); a mismatch yields
    /// [`Error::Conflict`](crate::Error::Conflict).
    async fn save_policy(&self, policy: &Policy, expected_version: Option<u64>) -> Result<()>;
}

/// Query filter for decisions.
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub action: Option<Action>,
    pub approval_status: Option<ApprovalStatus>,
    pub executed: Option<bool>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Persist a new decision, returning its id.
    async fn create_decision(&self, decision: &Decision) -> Result<String>;

    async fn get_decision(&self, id: &str) -> Result<Option<Decision>>;

    /// Apply a patch; fails with `NotFound` for unknown ids.
    async fn update_decision(&self, id: &str, patch: DecisionPatch) -> Result<Decision>;

    /// Apply a patch only while the decision is still in `from`. A decision
    /// that has moved on yields `Validation`.
    async fn transition_decision(
        &self,
        id: &str,
        from: ApprovalStatus,
        patch: DecisionPatch,
    ) -> Result<Decision>;

    /// Executed decisions with `executed_at <= executed_before` and no
    /// reward, oldest `executed_at` first, at most `limit`.
    async fn query_executed_unevaluated(
        &self,
        executed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Decision>>;

    /// Most recent executed decision for `action` (and `target`, when given)
    /// with `executed_at >= since`.
    async fn find_recent_executed(
        &self,
        action: Action,
        target: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<Decision>>;

    /// Decisions matching the filter, newest first.
    async fn query_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>>;
}

#[async_trait]
pub trait GuardrailStore: Send + Sync {
    /// Enabled guardrails ordered by descending priority.
    async fn list_enabled_guardrails(&self) -> Result<Vec<Guardrail>>;
}

#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Append an outcome; a second outcome for the same decision is a
    /// `Conflict`.
    async fn record_outcome(&self, outcome: &Outcome) -> Result<()>;

    async fn get_outcome(&self, decision_id: &str) -> Result<Option<Outcome>>;
}

/// A short-lived exclusive token keyed by job name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(name: &str, holder: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `holder` may take this lease over at `now`.
    pub fn can_be_taken_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        self.holder == holder || self.is_expired(now)
    }
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the named lease, or `None` if someone else holds a live one.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>>;

    /// Release a lease; a no-op if it is no longer held by `lease.holder`.
    async fn release(&self, lease: &Lease) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_takeover_rules() {
        let now = Utc::now();
        let lease = Lease::new("outcome-tracker", "worker-a", Duration::seconds(60), now);
        assert!(lease.can_be_taken_by("worker-a", now));
        assert!(!lease.can_be_taken_by("worker-b", now));
        assert!(lease.can_be_taken_by("worker-b", now + Duration::seconds(60)));
    }
}
