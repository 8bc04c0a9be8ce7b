//! Decision orchestrator: one pass per tick.

use chrono::{DateTime, Utc};
use remedy_core::{
    assess_risk, build_context, explain_action, select_action, ApprovalStatus, AuditEvent,
    AuditKind, ComponentHealth, Context, Decision, EngineConfig, Error, Policy, Result,
    TelemetrySnapshot, TelemetryTotals,
};
use std::sync::Arc;

use crate::executor::Executor;
use crate::governor::GuardrailGovernor;
use crate::report::{DecisionOutcome, DecisionStage, DecisionTickReport};
use crate::{emit, leases, EngineDeps};

/// What one telemetry read produced.
struct Observation {
    context: Context,
    components: Vec<ComponentHealth>,
    /// Only set when the totals read succeeded.
    snapshot: Option<TelemetrySnapshot>,
}

pub struct DecisionOrchestrator {
    deps: EngineDeps,
    config: Arc<EngineConfig>,
    governor: GuardrailGovernor,
    executor: Executor,
    holder: String,
}

impl DecisionOrchestrator {
    pub fn new(deps: EngineDeps, config: Arc<EngineConfig>, holder: String) -> Self {
        let governor = GuardrailGovernor::new(deps.guardrails.clone(), deps.decisions.clone());
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
            governor,
            executor,
            holder,
        }
    }

    /// Run one decision pass. Never fails; every result is in the report.
    pub async fn tick(&self, now: DateTime<Utc>) -> DecisionTickReport {
        let lease = match self
            .deps
            .leases
            .try_acquire(leases::DECISION, &self.holder, self.config.lease_ttl(), now)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::info!(
                    category = "orchestrator",
                    "Decision lease held elsewhere, skipping tick"
                );
                return DecisionTickReport {
                    started_at: now,
                    outcome: DecisionOutcome::Skipped {
                        reason: format!("lease '{}' is held by another runner", leases::DECISION),
                    },
                };
            }
            Err(e) => {
                tracing::error!(
                    category = "orchestrator",
                    error = %e,
                    "Failed to acquire decision lease"
                );
                return DecisionTickReport {
                    started_at: now,
                    outcome: DecisionOutcome::Failed {
                        stage: DecisionStage::Lease,
                        cause: e.to_string(),
                    },
                };
            }
        };

        let outcome = match self.run(now).await {
            Ok(outcome) => outcome,
            Err((stage, e)) => {
                tracing::error!(
                    category = "orchestrator",
                    stage = ?stage,
                    error = %e,
                    "Decision tick failed"
                );
                DecisionOutcome::Failed {
                    stage,
                    cause: e.to_string(),
                }
            }
        };

        if let Err(e) = self.deps.leases.release(&lease).await {
            tracing::warn!(
                category = "orchestrator",
                error = %e,
                "Failed to release decision lease"
            );
        }

        DecisionTickReport {
            started_at: now,
            outcome,
        }
    }

    async fn run(
        &self,
        now: DateTime<Utc>,
    ) -> std::result::Result<DecisionOutcome, (DecisionStage, Error)> {
        let observation = self.observe(now).await;
        let context = observation.context;

        let policy = self
            .current_policy(now)
            .await
            .map_err(|e| (DecisionStage::Policy, e))?;

        let selection = select_action(&context, &policy, self.config.exploration_rate);
        if selection.action.is_noop() {
            tracing::debug!(
                category = "orchestrator",
                score = selection.score,
                "do_nothing selected"
            );
            return Ok(DecisionOutcome::Idle {
                scores: selection.scores,
            });
        }

        let action = selection.action;
        let target = self
            .deps
            .targets
            .resolve(action, &context, &observation.components);
        let risk = assess_risk(action, &context, target.as_deref(), &self.config.protected_targets);
        let verdict = self
            .governor
            .apply(action, risk, target.as_deref(), &context, now)
            .await;

        let mut decision = Decision::new(
            context,
            action,
            target,
            selection.score,
            selection.confidence,
            risk,
            explain_action(action, &context, &policy),
            now,
        );
        decision.matched_guardrails = verdict.matched_guardrails.clone();
        decision.max_impact_percentage = verdict.max_impact_percentage;
        decision.approval_reason = verdict.reason.clone();
        decision.approval_status = if !verdict.allow {
            ApprovalStatus::Rejected
        } else if verdict.approval_required {
            decision.approval_expires_at = Some(now + self.config.approval_horizon());
            ApprovalStatus::Pending
        } else {
            ApprovalStatus::AutoApproved
        };

        // The pre-execution snapshot is taken before the decision is stored,
        // so a telemetry outage records a failed decision, never an
        // executable one that nothing will pick up.
        let mut snapshot = observation.snapshot;
        let mut snapshot_error = None;
        if decision.approval_status == ApprovalStatus::AutoApproved && snapshot.is_none() {
            match self.executor.snapshot(now).await {
                Ok(fresh) => snapshot = Some(fresh),
                Err(e) => {
                    decision.approval_status = ApprovalStatus::Failed;
                    decision.approval_reason = Some(format!("Execution failed: {}", e));
                    snapshot_error = Some(e);
                }
            }
        }

        self.deps
            .decisions
            .create_decision(&decision)
            .await
            .map_err(|e| (DecisionStage::Persist, e))?;

        tracing::info!(
            category = "orchestrator",
            decision_id = %decision.id,
            action = %action,
            target = decision.target.as_deref().unwrap_or("-"),
            risk = %risk,
            status = %decision.approval_status,
            score = selection.score,
            "Decision recorded"
        );

        emit(
            self.deps.audit.as_ref(),
            AuditEvent::new(
                AuditKind::GuardrailDecision,
                format!("{} for {}", decision.approval_status, action),
                now,
            )
            .for_decision(&decision)
            .with_details(serde_json::json!({
                "verdict": verdict,
                "scores": selection.scores,
                "explanation": decision.explanation.summary,
            })),
        )
        .await;

        match decision.approval_status {
            ApprovalStatus::Rejected => Ok(DecisionOutcome::Rejected {
                reason: decision
                    .approval_reason
                    .clone()
                    .unwrap_or_else(|| "Denied by guardrails".to_string()),
                decision_id: decision.id,
            }),
            ApprovalStatus::Pending => {
                let expires_at = decision.approval_expires_at.unwrap_or(now);
                emit(
                    self.deps.audit.as_ref(),
                    AuditEvent::new(
                        AuditKind::ApprovalRequested,
                        format!("Approval requested for {}", action),
                        now,
                    )
                    .for_decision(&decision)
                    .with_details(serde_json::json!({
                        "expires_at": expires_at,
                        "reason": decision.approval_reason,
                    })),
                )
                .await;
                Ok(DecisionOutcome::PendingApproval {
                    decision_id: decision.id,
                    expires_at,
                })
            }
            ApprovalStatus::Failed => {
                let e = snapshot_error.unwrap_or_else(|| {
                    Error::Internal("decision failed before execution".to_string())
                });
                emit(
                    self.deps.audit.as_ref(),
                    AuditEvent::new(AuditKind::ExecutionFailed, format!("Not executed: {}", e), now)
                        .for_decision(&decision),
                )
                .await;
                Err((DecisionStage::Execute, e))
            }
            _ => {
                let snapshot = snapshot.ok_or_else(|| {
                    (
                        DecisionStage::Execute,
                        Error::Internal("missing pre-execution snapshot".to_string()),
                    )
                })?;
                let (executed, job_id) = self
                    .executor
                    .execute(&decision, snapshot, now)
                    .await
                    .map_err(|e| (DecisionStage::Execute, e))?;
                Ok(DecisionOutcome::Executed {
                    decision_id: executed.id,
                    job_id,
                })
            }
        }
    }

    /// Read telemetry, degrading each failed read to its empty default.
    async fn observe(&self, now: DateTime<Utc>) -> Observation {
        let telemetry = &self.deps.telemetry;

        let totals = match telemetry.totals().await {
            Ok(totals) => Some(totals),
            Err(e) => {
                tracing::warn!(
                    category = "telemetry",
                    error = %e,
                    "Totals unavailable, using zeros"
                );
                None
            }
        };
        let anomalies = telemetry
            .recent_anomalies(self.config.anomaly_window)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(category = "telemetry", error = %e, "Anomalies unavailable");
                Vec::new()
            });
        let components = telemetry.component_health().await.unwrap_or_else(|e| {
            tracing::warn!(category = "telemetry", error = %e, "Component health unavailable");
            Vec::new()
        });
        let forecast = match &self.deps.forecast {
            Some(source) => match source.trend().await {
                Ok(trend) => Some(trend),
                Err(e) => {
                    tracing::warn!(category = "telemetry", error = %e, "Forecast unavailable");
                    None
                }
            },
            None => None,
        };

        let context = build_context(
            &totals.unwrap_or_default(),
            &anomalies,
            forecast,
            now,
        );
        Observation {
            context,
            components,
            snapshot: totals.map(|t: TelemetryTotals| t.snapshot(now)),
        }
    }

    /// The live policy, initializing it when missing or incompatible.
    async fn current_policy(&self, now: DateTime<Utc>) -> Result<Policy> {
        match self.deps.policy.load_policy().await? {
            Some(policy) if policy.is_compatible() => Ok(policy),
            Some(stale) => {
                tracing::warn!(
                    category = "policy",
                    version = stale.version,
                    feature_dim = stale.feature_dim,
                    "Stored policy does not match the action set or feature layout, re-initializing"
                );
                let mut fresh = Policy::cold_start(now);
                fresh.version = stale.version + 1;
                self.install(fresh, Some(stale.version)).await
            }
            None => {
                tracing::info!(category = "policy", "No policy found, starting cold");
                self.install(Policy::cold_start(now), None).await
            }
        }
    }

    /// Persist a fresh policy; if another writer got there first, use theirs.
    async fn install(&self, policy: Policy, expected: Option<u64>) -> Result<Policy> {
        match self.deps.policy.save_policy(&policy, expected).await {
            Ok(()) => Ok(policy),
            Err(e) if e.is_conflict() => self
                .deps
                .policy
                .load_policy()
                .await?
                .ok_or_else(|| Error::NotFound("policy".to_string())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::*;
    use chrono::Duration;
    use remedy_core::{
        update_policy, Action, AnomalyEvent, AnomalySeverity, DecisionStore, LeaseStore,
        TableTargetResolver, FEATURE_DIM,
    };

    struct Harness {
        telemetry: Arc<StaticTelemetry>,
        policy: Arc<MemoryPolicyStore>,
        decisions: Arc<MemoryDecisionStore>,
        leases: Arc<MemoryLeaseStore>,
        queue: Arc<InMemoryJobQueue>,
        audit: Arc<MemoryAuditSink>,
        orchestrator: DecisionOrchestrator,
    }

    fn harness(policy: Option<Policy>) -> Harness {
        let telemetry = StaticTelemetry::new(TelemetryTotals {
            calls_24h: 50_000,
            errors_24h: 3_000,
            p95_ms: 640.0,
        });
        let policy = match policy {
            Some(p) => MemoryPolicyStore::with_policy(p),
            None => MemoryPolicyStore::new(),
        };
        let decisions = MemoryDecisionStore::new();
        let leases = MemoryLeaseStore::new();
        let queue = InMemoryJobQueue::new();
        let audit = MemoryAuditSink::new();
        let deps = EngineDeps {
            telemetry: telemetry.clone(),
            forecast: None,
            policy: policy.clone(),
            decisions: decisions.clone(),
            guardrails: MemoryGuardrailStore::new(vec![]),
            outcomes: MemoryOutcomeStore::new(),
            leases: leases.clone(),
            queue: queue.clone(),
            audit: audit.clone(),
            targets: Arc::new(TableTargetResolver::default()),
        };
        let orchestrator = DecisionOrchestrator::new(
            deps,
            Arc::new(EngineConfig::default()),
            "test-holder".into(),
        );
        Harness {
            telemetry,
            policy,
            decisions,
            leases,
            queue,
            audit,
            orchestrator,
        }
    }

    /// A policy trained until `action` beats do_nothing in the harness context.
    fn trained_for(action: Action) -> Policy {
        let now = Utc::now();
        let ctx = build_context(
            &TelemetryTotals {
                calls_24h: 50_000,
                errors_24h: 3_000,
                p95_ms: 640.0,
            },
            &[],
            None,
            now,
        );
        let mut policy = Policy::cold_start(now);
        for _ in 0..10 {
            policy = update_policy(&policy, action, &ctx, 1.0, 0.05, 0.95, now);
        }
        policy
    }

    #[tokio::test]
    async fn test_cold_start_is_idle_and_creates_policy() {
        let h = harness(None);
        let report = h.orchestrator.tick(Utc::now()).await;
        assert!(matches!(
            report.outcome,
            DecisionOutcome::Idle { ref scores } if scores.len() == 7
        ));
        assert!(h.decisions.all().is_empty());
        assert_eq!(h.policy.current().unwrap().version, 0);
        // Lease released at the end of the tick
        assert!(h.leases.holder(leases::DECISION).is_none());
    }

    #[tokio::test]
    async fn test_auto_approved_action_is_executed() {
        let h = harness(Some(trained_for(Action::ScaleUp)));
        let now = Utc::now();
        let report = h.orchestrator.tick(now).await;

        let (decision_id, job_id) = match report.outcome {
            DecisionOutcome::Executed { decision_id, job_id } => (decision_id, job_id),
            other => panic!("expected execution, got {:?}", other),
        };
        let decision = h.decisions.get_decision(&decision_id).await.unwrap().unwrap();
        assert_eq!(decision.action, Action::ScaleUp);
        assert_eq!(decision.target.as_deref(), Some("worker-pool"));
        assert_eq!(decision.approval_status, ApprovalStatus::AutoApproved);
        assert!(decision.executed);
        assert_eq!(decision.executed_at, Some(now));
        assert!(decision.pre_snapshot.is_some());

        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].requested_by, "remedy-engine");
        assert_eq!(h.audit.of_kind(AuditKind::Execution).len(), 1);
        assert_eq!(h.audit.of_kind(AuditKind::GuardrailDecision).len(), 1);
    }

    #[tokio::test]
    async fn test_disruptive_action_waits_for_approval() {
        let h = harness(Some(trained_for(Action::Reroute)));
        let now = Utc::now();
        let report = h.orchestrator.tick(now).await;

        let (decision_id, expires_at) = match report.outcome {
            DecisionOutcome::PendingApproval {
                decision_id,
                expires_at,
            } => (decision_id, expires_at),
            other => panic!("expected pending approval, got {:?}", other),
        };
        assert_eq!(expires_at, now + Duration::minutes(30));
        let decision = h.decisions.get_decision(&decision_id).await.unwrap().unwrap();
        assert_eq!(decision.approval_status, ApprovalStatus::Pending);
        assert!(!decision.executed);
        assert!(h.queue.jobs().is_empty());
        assert_eq!(h.audit.of_kind(AuditKind::ApprovalRequested).len(), 1);
    }

    #[tokio::test]
    async fn test_denied_action_is_rejected_without_execution() {
        let h = harness(Some(trained_for(Action::DisableEndpoint)));
        // High severity plus heavy traffic pushes disable_endpoint to high risk
        h.telemetry.set_totals(TelemetryTotals {
            calls_24h: 90_000,
            errors_24h: 9_000,
            p95_ms: 640.0,
        });
        h.telemetry.set_anomalies(vec![AnomalyEvent {
            ts: Utc::now(),
            severity: AnomalySeverity::High,
            metric: "error_rate".into(),
            score: 4.0,
        }]);
        h.telemetry.set_components(vec![ComponentHealth {
            name: "prod-payment-api".into(),
            error_rate: 0.2,
        }]);

        let report = h.orchestrator.tick(Utc::now()).await;
        let decision_id = match report.outcome {
            DecisionOutcome::Rejected { decision_id, reason } => {
                assert!(reason.contains("Deny high-risk on protected targets"));
                decision_id
            }
            other => panic!("expected rejection, got {:?}", other),
        };
        let decision = h.decisions.get_decision(&decision_id).await.unwrap().unwrap();
        assert_eq!(decision.approval_status, ApprovalStatus::Rejected);
        assert_eq!(decision.target.as_deref(), Some("prod-payment-api"));
        assert!(!decision.executed);
        assert!(h.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_held_lease_skips_tick() {
        let h = harness(Some(trained_for(Action::ScaleUp)));
        let now = Utc::now();
        h.leases
            .try_acquire(leases::DECISION, "someone-else", Duration::seconds(300), now)
            .await
            .unwrap();
        let report = h.orchestrator.tick(now).await;
        assert!(matches!(report.outcome, DecisionOutcome::Skipped { .. }));
        assert!(h.queue.jobs().is_empty());
    }

    /// A policy whose bias weight makes `action` win in any context,
    /// including the all-zero one a telemetry outage produces.
    fn always(action: Action) -> Policy {
        let mut policy = Policy::cold_start(Utc::now());
        if let Some(arm) = policy.arms.get_mut(&action) {
            arm.weights[FEATURE_DIM - 1] = 5.0;
        }
        policy
    }

    #[tokio::test]
    async fn test_telemetry_outage_records_failed_decision() {
        let h = harness(Some(always(Action::ScaleUp)));
        h.telemetry.set_failing(true);
        let report = h.orchestrator.tick(Utc::now()).await;

        match report.outcome {
            DecisionOutcome::Failed { stage, cause } => {
                assert_eq!(stage, DecisionStage::Execute);
                assert!(cause.contains("pre-execution snapshot"));
            }
            other => panic!("expected execute failure, got {:?}", other),
        }
        let stored = h.decisions.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].action, Action::ScaleUp);
        assert_eq!(stored[0].approval_status, ApprovalStatus::Failed);
        assert!(!stored[0].executed);
        assert!(stored[0].approval_reason.as_deref().unwrap().starts_with("Execution failed"));
        assert!(h.queue.jobs().is_empty());
        assert_eq!(h.audit.of_kind(AuditKind::ExecutionFailed).len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_outage_leaves_nothing_executable() {
        let h = harness(Some(always(Action::ScaleUp)));
        h.telemetry.set_failing(true);
        for _ in 0..3 {
            h.orchestrator.tick(Utc::now()).await;
        }
        let decisions = h.decisions.all();
        assert_eq!(decisions.len(), 3);
        assert!(decisions
            .iter()
            .all(|d| !d.approval_status.is_executable() && !d.executed));
    }

    #[tokio::test]
    async fn test_queue_failure_marks_decision_failed() {
        let h = harness(Some(trained_for(Action::ScaleUp)));
        h.queue.set_failing(true);
        let report = h.orchestrator.tick(Utc::now()).await;
        assert!(matches!(
            report.outcome,
            DecisionOutcome::Failed { stage: DecisionStage::Execute, .. }
        ));
        assert_eq!(h.audit.of_kind(AuditKind::ExecutionFailed).len(), 1);
        let decision = &h.decisions.all()[0];
        assert!(!decision.executed);
        assert_eq!(decision.approval_status, ApprovalStatus::Failed);
        assert!(decision.approval_reason.as_deref().unwrap().contains("job queue unavailable"));
    }

    #[tokio::test]
    async fn test_incompatible_policy_is_reinitialized() {
        let mut stale = Policy::cold_start(Utc::now());
        stale.version = 4;
        stale.feature_dim = 9;
        let h = harness(Some(stale));
        let report = h.orchestrator.tick(Utc::now()).await;
        assert!(matches!(report.outcome, DecisionOutcome::Idle { .. }));
        let policy = h.policy.current().unwrap();
        assert_eq!(policy.version, 5);
        assert!(policy.is_compatible());
    }
}
