//! Decision history storage and query API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{Action, ApprovalStatus, Decision, DecisionFilter, DecisionPatch, DecisionStore};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::{Error, Result};

// key = decision_id, value = Decision (JSON)
const DECISIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");

/// Decision store for persisting and querying remediation decisions.
pub struct RedbDecisionStore {
    db: Arc<Database>,
}

impl RedbDecisionStore {
    /// Open or create a decision store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(DECISIONS_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    /// Create a throwaway store for testing.
    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("decisions_test"))
    }

    /// Save a decision, replacing any record with the same id.
    pub fn save(&self, decision: &Decision) -> Result<()> {
        let value = serde_json::to_vec(decision)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DECISIONS_TABLE)?;
            table.insert(decision.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Decision>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DECISIONS_TABLE)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write in one transaction. `guard` sees the current record
    /// and may refuse the update.
    fn modify<F>(&self, id: &str, patch: DecisionPatch, guard: F) -> Result<Decision>
    where
        F: FnOnce(&Decision) -> Result<()>,
    {
        let write_txn = self.db.begin_write()?;
        let decision = {
            let mut table = write_txn.open_table(DECISIONS_TABLE)?;
            let mut decision: Decision = match table.get(id)? {
                Some(bytes) => serde_json::from_slice(bytes.value())?,
                None => return Err(Error::NotFound(format!("decision {}", id))),
            };
            guard(&decision)?;
            patch.apply(&mut decision);
            let value = serde_json::to_vec(&decision)?;
            table.insert(id, value.as_slice())?;
            decision
        };
        write_txn.commit()?;
        Ok(decision)
    }

    pub fn update(&self, id: &str, patch: DecisionPatch) -> Result<Decision> {
        self.modify(id, patch, |_| Ok(()))
    }

    /// Apply `patch` only while the decision's approval status is `from`.
    pub fn transition(
        &self,
        id: &str,
        from: ApprovalStatus,
        patch: DecisionPatch,
    ) -> Result<Decision> {
        self.modify(id, patch, |current| {
            if current.approval_status == from {
                Ok(())
            } else {
                Err(Error::InvalidInput(format!(
                    "decision {} is {}, expected {}",
                    id, current.approval_status, from
                )))
            }
        })
    }

    /// Full scan, keeping decisions for which `keep` returns true.
    fn scan<F>(&self, keep: F) -> Result<Vec<Decision>>
    where
        F: Fn(&Decision) -> bool,
    {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DECISIONS_TABLE)?;

        let mut decisions = Vec::new();
        for item in table.iter()? {
            let (_id, bytes) = item?;
            let decision: Decision = serde_json::from_slice(bytes.value())?;
            if keep(&decision) {
                decisions.push(decision);
            }
        }
        Ok(decisions)
    }

    pub fn executed_unevaluated(
        &self,
        executed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Decision>> {
        let mut decisions = self.scan(|d| {
            d.awaiting_evaluation() && d.executed_at.is_some_and(|t| t <= executed_before)
        })?;
        decisions.sort_by(|a, b| a.executed_at.cmp(&b.executed_at).then_with(|| a.id.cmp(&b.id)));
        decisions.truncate(limit);
        Ok(decisions)
    }

    pub fn recent_executed(
        &self,
        action: Action,
        target: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<Decision>> {
        let decisions = self.scan(|d| {
            d.executed
                && d.action == action
                && d.executed_at.is_some_and(|t| t >= since)
                && target.is_none_or(|t| d.target.as_deref() == Some(t))
        })?;
        Ok(decisions.into_iter().max_by_key(|d| d.executed_at))
    }

    pub fn query(&self, filter: &DecisionFilter) -> Result<Vec<Decision>> {
        let mut decisions = self.scan(|d| Self::matches_filter(d, filter))?;

        // Newest first
        decisions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            decisions.truncate(limit);
        }
        Ok(decisions)
    }

    /// Pending decisions, oldest first.
    pub fn pending_approvals(&self) -> Result<Vec<Decision>> {
        let mut decisions = self.scan(|d| d.approval_status == ApprovalStatus::Pending)?;
        decisions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(decisions)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DECISIONS_TABLE)?;
            table.remove(id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn matches_filter(decision: &Decision, filter: &DecisionFilter) -> bool {
        if let Some(action) = filter.action {
            if decision.action != action {
                return false;
            }
        }
        if let Some(status) = filter.approval_status {
            if decision.approval_status != status {
                return false;
            }
        }
        if let Some(executed) = filter.executed {
            if decision.executed != executed {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl DecisionStore for RedbDecisionStore {
    async fn create_decision(&self, decision: &Decision) -> remedy_core::Result<String> {
        if self.get(&decision.id)?.is_some() {
            return Err(remedy_core::Error::Validation(format!(
                "decision {} already exists",
                decision.id
            )));
        }
        self.save(decision)?;
        Ok(decision.id.clone())
    }

    async fn get_decision(&self, id: &str) -> remedy_core::Result<Option<Decision>> {
        Ok(self.get(id)?)
    }

    async fn update_decision(
        &self,
        id: &str,
        patch: DecisionPatch,
    ) -> remedy_core::Result<Decision> {
        Ok(self.update(id, patch)?)
    }

    async fn transition_decision(
        &self,
        id: &str,
        from: ApprovalStatus,
        patch: DecisionPatch,
    ) -> remedy_core::Result<Decision> {
        Ok(self.transition(id, from, patch)?)
    }

    async fn query_executed_unevaluated(
        &self,
        executed_before: DateTime<Utc>,
        limit: usize,
    ) -> remedy_core::Result<Vec<Decision>> {
        Ok(self.executed_unevaluated(executed_before, limit)?)
    }

    async fn find_recent_executed(
        &self,
        action: Action,
        target: Option<&str>,
        since: DateTime<Utc>,
    ) -> remedy_core::Result<Option<Decision>> {
        Ok(self.recent_executed(action, target, since)?)
    }

    async fn query_decisions(&self, filter: DecisionFilter) -> remedy_core::Result<Vec<Decision>> {
        Ok(self.query(&filter)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use remedy_core::{explain_action, Context, Policy, RiskLevel, TelemetrySnapshot};

    fn test_store() -> Arc<RedbDecisionStore> {
        RedbDecisionStore::memory().unwrap()
    }

    fn decision(action: Action, target: &str, created_at: DateTime<Utc>) -> Decision {
        let ctx = Context::default();
        let policy = Policy::cold_start(created_at);
        Decision::new(
            ctx,
            action,
            Some(target.to_string()),
            0.5,
            0.6,
            RiskLevel::Medium,
            explain_action(action, &ctx, &policy),
            created_at,
        )
    }

    fn snapshot(at: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            error_rate: 0.06,
            p95_ms: 640.0,
            throughput: 50_000.0,
            captured_at: at,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = test_store();
        let d = decision(Action::RestartFn, "api-handler", Utc::now());

        let id = store.create_decision(&d).await.unwrap();
        assert_eq!(id, d.id);
        assert!(store.create_decision(&d).await.is_err());

        let loaded = store.get_decision(&id).await.unwrap().unwrap();
        assert_eq!(loaded, d);
        assert!(store.get_decision("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let store = test_store();
        let err = store
            .update_decision("nope", DecisionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, remedy_core::Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_executed_unevaluated_ordering_and_dwell() {
        let store = test_store();
        let now = Utc::now();

        let mut ids = Vec::new();
        for minutes_ago in [20, 40, 5] {
            let d = decision(Action::ScaleUp, "worker-pool", now);
            store.create_decision(&d).await.unwrap();
            let at = now - Duration::minutes(minutes_ago);
            store
                .update_decision(&d.id, DecisionPatch::executed(at, "job".into(), snapshot(at)))
                .await
                .unwrap();
            ids.push(d.id);
        }
        // Never executed
        store
            .create_decision(&decision(Action::ScaleUp, "worker-pool", now))
            .await
            .unwrap();

        let due = store
            .query_executed_unevaluated(now - Duration::minutes(15), 10)
            .await
            .unwrap();
        let due_ids: Vec<_> = due.iter().map(|d| d.id.clone()).collect();
        assert_eq!(due_ids, vec![ids[1].clone(), ids[0].clone()]);

        let limited = store
            .query_executed_unevaluated(now - Duration::minutes(15), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, ids[1]);

        // Evaluated decisions drop out
        store
            .update_decision(&ids[1], DecisionPatch::evaluated(now, snapshot(now), 0.4, vec![]))
            .await
            .unwrap();
        let due = store
            .query_executed_unevaluated(now - Duration::minutes(15), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_find_recent_executed() {
        let store = test_store();
        let now = Utc::now();

        let d = decision(Action::RestartFn, "api-handler", now);
        store.create_decision(&d).await.unwrap();
        let at = now - Duration::minutes(10);
        store
            .update_decision(&d.id, DecisionPatch::executed(at, "job".into(), snapshot(at)))
            .await
            .unwrap();

        let since = now - Duration::minutes(30);
        let found = store
            .find_recent_executed(Action::RestartFn, Some("api-handler"), since)
            .await
            .unwrap();
        assert_eq!(found.map(|d| d.id), Some(d.id.clone()));

        assert!(store
            .find_recent_executed(Action::RestartFn, Some("other"), since)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_recent_executed(Action::RestartFn, None, since)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_recent_executed(Action::RestartFn, None, now - Duration::minutes(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let store = test_store();
        let d = decision(Action::Reroute, "primary-route", Utc::now());
        store.create_decision(&d).await.unwrap();

        let rejected = store
            .transition_decision(
                &d.id,
                ApprovalStatus::Pending,
                DecisionPatch::status(
                    ApprovalStatus::Rejected,
                    Some("no".into()),
                    Some("ops".into()),
                ),
            )
            .await
            .unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);

        let err = store
            .transition_decision(
                &d.id,
                ApprovalStatus::Pending,
                DecisionPatch::status(ApprovalStatus::Approved, None, None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, remedy_core::Error::Validation(_)));
        assert_eq!(
            store.get(&d.id).unwrap().unwrap().approval_status,
            ApprovalStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let store = test_store();
        let now = Utc::now();

        for i in 0..5 {
            let action = if i % 2 == 0 { Action::ScaleUp } else { Action::ClearCache };
            let mut d = decision(action, "x", now + Duration::seconds(i));
            if i < 2 {
                d.approval_status = ApprovalStatus::AutoApproved;
            }
            store.create_decision(&d).await.unwrap();
        }

        let all = store.query_decisions(DecisionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all[0].created_at > all[4].created_at);

        let scale = store
            .query_decisions(DecisionFilter {
                action: Some(Action::ScaleUp),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(scale.len(), 3);

        let pending = store.pending_approvals().unwrap();
        assert_eq!(pending.len(), 3);

        let limited = store
            .query_decisions(DecisionFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}
