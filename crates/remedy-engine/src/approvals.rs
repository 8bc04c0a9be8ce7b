//! Human approval of pending decisions, and expiry of stale ones.

use chrono::{DateTime, Utc};
use remedy_core::{
    ApprovalStatus, AuditEvent, AuditKind, Decision, DecisionFilter, DecisionPatch, EngineConfig,
    Error, Result,
};
use std::sync::Arc;

use crate::executor::Executor;
use crate::report::SweepReport;
use crate::{emit, leases, EngineDeps};

/// An approved and executed decision.
#[derive(Debug, Clone)]
pub struct Approval {
    pub decision: Decision,
    pub job_id: String,
}

pub struct ApprovalDesk {
    deps: EngineDeps,
    config: Arc<EngineConfig>,
    executor: Executor,
    holder: String,
}

impl ApprovalDesk {
    pub fn new(deps: EngineDeps, config: Arc<EngineConfig>, holder: String) -> Self {
        let executor = Executor::new(
            deps.telemetry.clone(),
            deps.queue.clone(),
            deps.decisions.clone(),
            deps.audit.clone(),
            config.requested_by.clone(),
        );
        Self {
            deps,
            config,
            executor,
            holder,
        }
    }

    async fn pending(&self, id: &str) -> Result<Decision> {
        let decision = self
            .deps
            .decisions
            .get_decision(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("decision {}", id)))?;
        if decision.approval_status != ApprovalStatus::Pending {
            return Err(Error::Validation(format!(
                "decision {} is {}, not pending",
                id, decision.approval_status
            )));
        }
        if decision.executed {
            return Err(Error::Validation(format!("decision {} was already executed", id)));
        }
        Ok(decision)
    }

    /// Approve and execute a pending decision.
    ///
    /// A decision past its approval window is marked expired instead and the
    /// call fails.
    pub async fn approve(&self, id: &str, approver: &str, now: DateTime<Utc>) -> Result<Approval> {
        let decision = self.pending(id).await?;

        if decision.approval_expired(now) {
            self.expire(&decision, now).await?;
            return Err(Error::Validation(format!(
                "approval window for decision {} closed at {}",
                id,
                decision
                    .approval_expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            )));
        }

        // Snapshot first so an unreadable telemetry store leaves the decision pending.
        let snapshot = self.executor.snapshot(now).await?;

        let approved = self
            .deps
            .decisions
            .transition_decision(
                id,
                ApprovalStatus::Pending,
                DecisionPatch::status(ApprovalStatus::Approved, None, Some(approver.to_string())),
            )
            .await?;

        tracing::info!(
            category = "approval",
            decision_id = %id,
            approver,
            action = %approved.action,
            "Decision approved"
        );
        emit(
            self.deps.audit.as_ref(),
            AuditEvent::new(
                AuditKind::ApprovalGranted,
                format!("{} approved by {}", approved.action, approver),
                now,
            )
            .for_decision(&approved),
        )
        .await;

        let (decision, job_id) = self.executor.execute(&approved, snapshot, now).await?;
        Ok(Approval { decision, job_id })
    }

    pub async fn reject(
        &self,
        id: &str,
        approver: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        self.pending(id).await?;
        let rejected = self
            .deps
            .decisions
            .transition_decision(
                id,
                ApprovalStatus::Pending,
                DecisionPatch::status(
                    ApprovalStatus::Rejected,
                    Some(reason.to_string()),
                    Some(approver.to_string()),
                ),
            )
            .await?;

        tracing::info!(
            category = "approval",
            decision_id = %id,
            approver,
            reason,
            "Decision rejected"
        );
        emit(
            self.deps.audit.as_ref(),
            AuditEvent::new(
                AuditKind::ApprovalRejected,
                format!("{} rejected by {}: {}", rejected.action, approver, reason),
                now,
            )
            .for_decision(&rejected),
        )
        .await;
        Ok(rejected)
    }

    async fn expire(&self, decision: &Decision, now: DateTime<Utc>) -> Result<Decision> {
        let expired = self
            .deps
            .decisions
            .transition_decision(
                &decision.id,
                ApprovalStatus::Pending,
                DecisionPatch::status(
                    ApprovalStatus::Expired,
                    Some("Approval window elapsed".to_string()),
                    None,
                ),
            )
            .await?;

        tracing::info!(
            category = "approval",
            decision_id = %decision.id,
            "Pending decision expired"
        );
        emit(
            self.deps.audit.as_ref(),
            AuditEvent::new(
                AuditKind::ApprovalExpired,
                format!("Approval for {} expired", decision.action),
                now,
            )
            .for_decision(&expired)
            .with_details(serde_json::json!({ "expires_at": decision.approval_expires_at })),
        )
        .await;
        Ok(expired)
    }

    /// Expire every pending decision whose approval window has closed.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let lease = match self
            .deps
            .leases
            .try_acquire(leases::SWEEP, &self.holder, self.config.lease_ttl(), now)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                report.skipped =
                    Some(format!("lease '{}' is held by another runner", leases::SWEEP));
                return report;
            }
            Err(e) => {
                tracing::error!(category = "approval", error = %e, "Failed to acquire sweep lease");
                report.skipped = Some(format!("lease error: {}", e));
                return report;
            }
        };

        let filter = DecisionFilter {
            approval_status: Some(ApprovalStatus::Pending),
            ..Default::default()
        };
        match self.deps.decisions.query_decisions(filter).await {
            Ok(pending) => {
                for decision in pending.iter().filter(|d| d.approval_expired(now)) {
                    match self.expire(decision, now).await {
                        Ok(_) => report.expired.push(decision.id.clone()),
                        // Approved or rejected since the query
                        Err(Error::Validation(_)) => {}
                        Err(e) => report.failed.push((decision.id.clone(), e.to_string())),
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    category = "approval",
                    error = %e,
                    "Failed to list pending decisions"
                );
                report.failed.push(("*".to_string(), e.to_string()));
            }
        }

        if let Err(e) = self.deps.leases.release(&lease).await {
            tracing::warn!(category = "approval", error = %e, "Failed to release sweep lease");
        }
        if !report.expired.is_empty() {
            tracing::info!(
                category = "approval",
                expired = report.expired.len(),
                "Expired stale approvals"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::*;
    use chrono::Duration;
    use remedy_core::{
        explain_action, Action, Context, DecisionStore, Policy, RiskLevel, TableTargetResolver,
        TelemetryTotals,
    };

    struct Harness {
        telemetry: Arc<StaticTelemetry>,
        decisions: Arc<MemoryDecisionStore>,
        queue: Arc<InMemoryJobQueue>,
        audit: Arc<MemoryAuditSink>,
        desk: ApprovalDesk,
    }

    fn harness() -> Harness {
        let telemetry = StaticTelemetry::new(TelemetryTotals {
            calls_24h: 1000,
            errors_24h: 50,
            p95_ms: 300.0,
        });
        let decisions = MemoryDecisionStore::new();
        let queue = InMemoryJobQueue::new();
        let audit = MemoryAuditSink::new();
        let deps = EngineDeps {
            telemetry: telemetry.clone(),
            forecast: None,
            policy: MemoryPolicyStore::new(),
            decisions: decisions.clone(),
            guardrails: MemoryGuardrailStore::new(vec![]),
            outcomes: MemoryOutcomeStore::new(),
            leases: MemoryLeaseStore::new(),
            queue: queue.clone(),
            audit: audit.clone(),
            targets: Arc::new(TableTargetResolver::default()),
        };
        let desk = ApprovalDesk::new(deps, Arc::new(EngineConfig::default()), "desk".into());
        Harness {
            telemetry,
            decisions,
            queue,
            audit,
            desk,
        }
    }

    fn pending(created: DateTime<Utc>) -> Decision {
        let ctx = Context::default();
        let mut d = Decision::new(
            ctx,
            Action::Reroute,
            Some("primary-route".into()),
            0.9,
            0.6,
            RiskLevel::Medium,
            explain_action(Action::Reroute, &ctx, &Policy::cold_start(created)),
            created,
        );
        d.approval_status = ApprovalStatus::Pending;
        d.approval_reason =
            Some("Approval required by guardrail 'Require approval for reroute'".into());
        d.approval_expires_at = Some(created + Duration::minutes(30));
        d
    }

    #[tokio::test]
    async fn test_approve_executes_like_auto_approval() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);

        let approval = h.desk.approve(&id, "oncall", now + Duration::minutes(5)).await.unwrap();
        assert_eq!(approval.decision.approval_status, ApprovalStatus::Approved);
        assert_eq!(approval.decision.resolved_by.as_deref(), Some("oncall"));
        assert!(approval.decision.executed);
        assert!(approval.decision.pre_snapshot.is_some());
        // Guardrail reason survives approval
        assert!(approval.decision.approval_reason.unwrap().contains("reroute"));

        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, approval.job_id);
        assert_eq!(h.audit.of_kind(AuditKind::ApprovalGranted).len(), 1);
        assert_eq!(h.audit.of_kind(AuditKind::Execution).len(), 1);

        // Not pending anymore
        assert!(h.desk.approve(&id, "oncall", now).await.is_err());
        assert_eq!(h.queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_approving_expired_decision_expires_it() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);

        let err = h.desk.approve(&id, "oncall", now + Duration::minutes(31)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let stored = h.decisions.get_decision(&id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Expired);
        assert!(h.queue.jobs().is_empty());
        assert_eq!(h.audit.of_kind(AuditKind::ApprovalExpired).len(), 1);
    }

    #[tokio::test]
    async fn test_approve_with_telemetry_down_stays_pending() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);
        h.telemetry.set_failing(true);

        assert!(h.desk.approve(&id, "oncall", now).await.is_err());
        let stored = h.decisions.get_decision(&id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_enqueue_failure_returns_approval_to_pending() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);
        h.queue.set_failing(true);

        let err = h.desk.approve(&id, "oncall", now).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        let stored = h.decisions.get_decision(&id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Pending);
        assert!(!stored.executed);
        assert!(stored.approval_reason.unwrap().starts_with("Execution failed"));
        assert_eq!(h.audit.of_kind(AuditKind::ExecutionFailed).len(), 1);

        // Retry once the queue is back
        h.queue.set_failing(false);
        let approval = h.desk.approve(&id, "oncall", now + Duration::minutes(1)).await.unwrap();
        assert!(approval.decision.executed);
        assert_eq!(h.queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_approval_still_expires() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);
        h.queue.set_failing(true);
        assert!(h.desk.approve(&id, "oncall", now).await.is_err());

        let report = h.desk.expire_stale(now + Duration::minutes(31)).await;
        assert_eq!(report.expired, vec![id.clone()]);
        let stored = h.decisions.get_decision(&id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Expired);
        assert!(h.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_reject_pending() {
        let h = harness();
        let now = Utc::now();
        let d = pending(now);
        let id = d.id.clone();
        h.decisions.insert(d);

        let rejected = h.desk.reject(&id, "oncall", "not during peak", now).await.unwrap();
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert_eq!(rejected.approval_reason.as_deref(), Some("not during peak"));
        assert!(h.desk.reject(&id, "oncall", "again", now).await.is_err());
        assert!(h.desk.reject("missing", "oncall", "x", now).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_expires_only_stale_pending() {
        let h = harness();
        let now = Utc::now();

        let stale = pending(now - Duration::hours(1));
        let stale_id = stale.id.clone();
        h.decisions.insert(stale);
        let fresh = pending(now - Duration::minutes(5));
        let fresh_id = fresh.id.clone();
        h.decisions.insert(fresh);
        let mut old_rejected = pending(now - Duration::hours(2));
        old_rejected.approval_status = ApprovalStatus::Rejected;
        h.decisions.insert(old_rejected);

        let report = h.desk.expire_stale(now).await;
        assert_eq!(report.expired, vec![stale_id.clone()]);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_none());

        let fresh = h.decisions.get_decision(&fresh_id).await.unwrap().unwrap();
        assert_eq!(fresh.approval_status, ApprovalStatus::Pending);

        // Idempotent
        assert!(h.desk.expire_stale(now).await.expired.is_empty());
    }
}
