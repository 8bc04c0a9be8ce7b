//! Hand-off of approved decisions to the remediation queue.

use chrono::{DateTime, Utc};
use remedy_core::{
    ApprovalStatus, AuditEvent, AuditKind, AuditSink, Decision, DecisionPatch, DecisionStore,
    Error, RemediationJob, RemediationQueue, Result, TelemetrySnapshot, TelemetrySource,
};
use std::sync::Arc;

use crate::emit;

/// Shared by the orchestrator (auto-approved decisions) and the approval
/// desk (human-approved ones), so both paths execute identically.
pub struct Executor {
    telemetry: Arc<dyn TelemetrySource>,
    queue: Arc<dyn RemediationQueue>,
    decisions: Arc<dyn DecisionStore>,
    audit: Arc<dyn AuditSink>,
    requested_by: String,
}

impl Executor {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        queue: Arc<dyn RemediationQueue>,
        decisions: Arc<dyn DecisionStore>,
        audit: Arc<dyn AuditSink>,
        requested_by: String,
    ) -> Self {
        Self {
            telemetry,
            queue,
            decisions,
            audit,
            requested_by,
        }
    }

    /// Fresh pre-execution snapshot.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<TelemetrySnapshot> {
        let totals = self
            .telemetry
            .totals()
            .await
            .map_err(|e| Error::Telemetry(format!("pre-execution snapshot: {}", e)))?;
        Ok(totals.snapshot(now))
    }

    /// Enqueue the job and stamp the decision executed. Returns the updated
    /// decision and the job id.
    pub async fn execute(
        &self,
        decision: &Decision,
        pre_snapshot: TelemetrySnapshot,
        now: DateTime<Utc>,
    ) -> Result<(Decision, String)> {
        if !decision.approval_status.is_executable() {
            return Err(Error::Validation(format!(
                "decision {} is {}, not executable",
                decision.id, decision.approval_status
            )));
        }
        if decision.executed {
            return Err(Error::Validation(format!("decision {} was already executed", decision.id)));
        }

        let job = RemediationJob {
            id: uuid::Uuid::new_v4().to_string(),
            action: decision.action,
            target: decision.target.clone(),
            requested_by: self.requested_by.clone(),
            decision_id: decision.id.clone(),
            meta: serde_json::json!({
                "risk": decision.risk,
                "expected_gain": decision.expected_gain,
                "confidence": decision.confidence,
                "approval_status": decision.approval_status,
                "max_impact_percentage": decision.max_impact_percentage,
                "matched_guardrails": decision.matched_guardrails,
            }),
            enqueued_at: now,
        };

        let job_id = match self.queue.enqueue(job).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    category = "remediation",
                    decision_id = %decision.id,
                    action = %decision.action,
                    error = %e,
                    "Failed to enqueue remediation job"
                );
                emit(
                    self.audit.as_ref(),
                    AuditEvent::new(
                        AuditKind::ExecutionFailed,
                        format!("Enqueue failed: {}", e),
                        now,
                    )
                    .for_decision(decision),
                )
                .await;
                self.release(decision, &e).await;
                return Err(e);
            }
        };

        let updated = self
            .decisions
            .update_decision(
                &decision.id,
                DecisionPatch::executed(now, job_id.clone(), pre_snapshot),
            )
            .await?;

        tracing::info!(
            category = "remediation",
            decision_id = %decision.id,
            job_id = %job_id,
            action = %decision.action,
            target = decision.target.as_deref().unwrap_or("-"),
            "Remediation handed off"
        );
        emit(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditKind::Execution,
                format!("Enqueued {} as job {}", decision.action, job_id),
                now,
            )
            .for_decision(&updated)
            .with_details(serde_json::json!({ "job_id": job_id, "pre_snapshot": pre_snapshot })),
        )
        .await;

        Ok((updated, job_id))
    }

    /// Move a decision whose hand-off failed out of its executable state.
    /// A human approval goes back to `pending` so it can be retried or
    /// expire; an automatic one becomes `failed`.
    async fn release(&self, decision: &Decision, cause: &Error) {
        let (to, reason) = match decision.approval_status {
            ApprovalStatus::Approved => (
                ApprovalStatus::Pending,
                format!("Execution failed, approval can be retried: {}", cause),
            ),
            _ => (ApprovalStatus::Failed, format!("Execution failed: {}", cause)),
        };
        match self
            .decisions
            .transition_decision(
                &decision.id,
                decision.approval_status,
                DecisionPatch::status(to, Some(reason), None),
            )
            .await
        {
            Ok(_) => tracing::warn!(
                category = "remediation",
                decision_id = %decision.id,
                from = %decision.approval_status,
                to = %to,
                "Decision released after failed hand-off"
            ),
            Err(e) => tracing::error!(
                category = "remediation",
                decision_id = %decision.id,
                error = %e,
                "Failed to release decision after failed hand-off"
            ),
        }
    }
}
