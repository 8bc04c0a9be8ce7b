//! Outcome tracker: scores executed decisions and feeds rewards back.

use chrono::{DateTime, Utc};
use remedy_core::{
    compute_reward, detect_side_effects, update_policy, Action, AuditEvent, AuditKind, Context,
    Decision, DecisionPatch, EngineConfig, Error, MetricDeltas, Outcome, Policy, Result,
};
use std::sync::Arc;

use crate::report::{OutcomeTickReport, OutcomeTickStatus};
use crate::{emit, leases, EngineDeps};

const MAX_SAVE_ATTEMPTS: usize = 3;

/// A reward folded into the policy this tick.
#[derive(Debug, Clone, Copy)]
struct Applied {
    action: Action,
    context: Context,
    reward: f64,
}

enum Evaluation {
    Scored(Applied),
    /// The outcome was already on record; the decision was only re-stamped.
    Repaired,
}

pub struct OutcomeTracker {
    deps: EngineDeps,
    config: Arc<EngineConfig>,
    holder: String,
}

impl OutcomeTracker {
    pub fn new(deps: EngineDeps, config: Arc<EngineConfig>, holder: String) -> Self {
        Self {
            deps,
            config,
            holder,
        }
    }

    /// Run one evaluation pass. Never fails; every result is in the report.
    pub async fn tick(&self, now: DateTime<Utc>) -> OutcomeTickReport {
        let lease = match self
            .deps
            .leases
            .try_acquire(leases::OUTCOME, &self.holder, self.config.lease_ttl(), now)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::info!(category = "outcome", "Outcome lease held elsewhere, skipping tick");
                return OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Skipped {
                        reason: format!("lease '{}' is held by another runner", leases::OUTCOME),
                    },
                );
            }
            Err(e) => {
                tracing::error!(
                    category = "outcome",
                    error = %e,
                    "Failed to acquire outcome lease"
                );
                return OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Failed {
                        cause: e.to_string(),
                    },
                );
            }
        };

        let report = self.run(now).await;

        if let Err(e) = self.deps.leases.release(&lease).await {
            tracing::warn!(category = "outcome", error = %e, "Failed to release outcome lease");
        }
        report
    }

    async fn run(&self, now: DateTime<Utc>) -> OutcomeTickReport {
        let loaded = match self.deps.policy.load_policy().await {
            Ok(Some(policy)) if policy.is_compatible() => policy,
            Ok(Some(policy)) => {
                tracing::error!(
                    category = "outcome",
                    version = policy.version,
                    "Stored policy is incompatible, skipping outcome tick"
                );
                let mut report = OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Skipped {
                        reason: "stored policy is incompatible".to_string(),
                    },
                );
                report.policy_version = Some(policy.version);
                return report;
            }
            Ok(None) => {
                tracing::error!(category = "outcome", "No policy found, skipping outcome tick");
                return OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Skipped {
                        reason: "no policy found".to_string(),
                    },
                );
            }
            Err(e) => {
                tracing::error!(category = "outcome", error = %e, "Failed to load policy");
                return OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Failed {
                        cause: e.to_string(),
                    },
                );
            }
        };

        let due = match self
            .deps
            .decisions
            .query_executed_unevaluated(now - self.config.dwell(), self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(
                    category = "outcome",
                    error = %e,
                    "Failed to query executed decisions"
                );
                let mut report = OutcomeTickReport::new(
                    now,
                    OutcomeTickStatus::Failed {
                        cause: e.to_string(),
                    },
                );
                report.policy_version = Some(loaded.version);
                return report;
            }
        };

        let mut report = OutcomeTickReport::new(now, OutcomeTickStatus::NothingToDo);
        report.policy_version = Some(loaded.version);
        if due.is_empty() {
            return report;
        }

        let mut applied = Vec::new();
        for decision in &due {
            match self.evaluate(decision, now).await {
                Ok(Evaluation::Scored(item)) => {
                    report.evaluated.push(decision.id.clone());
                    applied.push(item);
                }
                Ok(Evaluation::Repaired) => report.repaired.push(decision.id.clone()),
                Err(e) => {
                    tracing::warn!(
                        category = "outcome",
                        decision_id = %decision.id,
                        error = %e,
                        "Failed to evaluate decision"
                    );
                    report.failed.push((decision.id.clone(), e.to_string()));
                }
            }
        }

        if !applied.is_empty() {
            match self.persist(loaded, &applied, now).await {
                Ok(saved) => {
                    report.policy_version = Some(saved.version);
                    emit(
                        self.deps.audit.as_ref(),
                        AuditEvent::new(
                            AuditKind::PolicyUpdated,
                            format!("Policy updated to version {}", saved.version),
                            now,
                        )
                        .with_details(serde_json::json!({
                            "version": saved.version,
                            "trained_samples": saved.trained_samples,
                            "decisions": report.evaluated,
                        })),
                    )
                    .await;
                }
                Err(e) => {
                    // Outcomes are already recorded, so these rewards will not
                    // be offered to the policy again.
                    tracing::warn!(
                        category = "outcome",
                        error = %e,
                        dropped = ?report.evaluated,
                        "Failed to persist policy, rewards dropped"
                    );
                    emit(
                        self.deps.audit.as_ref(),
                        AuditEvent::new(
                            AuditKind::PolicyUpdateDropped,
                            format!(
                                "Rewards of {} decisions not applied to the policy",
                                report.evaluated.len()
                            ),
                            now,
                        )
                        .with_details(serde_json::json!({
                            "decisions": report.evaluated,
                            "cause": e.to_string(),
                        })),
                    )
                    .await;
                    report.status = OutcomeTickStatus::Failed {
                        cause: format!("policy not saved: {}", e),
                    };
                    return report;
                }
            }
        }

        report.status = if report.failed.is_empty() {
            OutcomeTickStatus::Completed
        } else if report.evaluated.is_empty() && report.repaired.is_empty() {
            OutcomeTickStatus::Failed {
                cause: format!("all {} decisions failed", report.failed.len()),
            }
        } else {
            OutcomeTickStatus::Partial
        };

        tracing::info!(
            category = "outcome",
            evaluated = report.evaluated.len(),
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            policy_version = ?report.policy_version,
            "Outcome tick finished"
        );
        report
    }

    /// Measure and record one decision. The outcome row is written before
    /// the decision is stamped, so a reward reaches the policy at most once.
    async fn evaluate(&self, decision: &Decision, now: DateTime<Utc>) -> Result<Evaluation> {
        if !decision.awaiting_evaluation() {
            return Err(Error::Validation(format!(
                "decision {} is not awaiting evaluation",
                decision.id
            )));
        }
        let pre = decision.pre_snapshot.ok_or_else(|| {
            Error::Validation(format!("decision {} has no pre-execution snapshot", decision.id))
        })?;

        let post = self
            .deps
            .telemetry
            .totals()
            .await
            .map_err(|e| Error::Telemetry(format!("post-execution snapshot: {}", e)))?
            .snapshot(now);

        let deltas = MetricDeltas::between(&pre, &post);
        let breakdown = compute_reward(&deltas, decision.risk);
        let side_effects = detect_side_effects(&pre, &post);

        let outcome = Outcome {
            id: uuid::Uuid::new_v4().to_string(),
            decision_id: decision.id.clone(),
            action: decision.action,
            risk: decision.risk,
            deltas,
            reward: breakdown,
            side_effects: side_effects.clone(),
            recorded_at: now,
        };

        match self.deps.outcomes.record_outcome(&outcome).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                let existing = self
                    .deps
                    .outcomes
                    .get_outcome(&decision.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("outcome for {}", decision.id)))?;
                tracing::warn!(
                    category = "outcome",
                    decision_id = %decision.id,
                    "Outcome already recorded, re-stamping decision without a policy update"
                );
                self.deps
                    .decisions
                    .update_decision(
                        &decision.id,
                        DecisionPatch::evaluated(
                            existing.recorded_at,
                            post,
                            existing.reward.total_reward,
                            existing.side_effects,
                        ),
                    )
                    .await?;
                return Ok(Evaluation::Repaired);
            }
            Err(e) => return Err(e),
        }

        self.deps
            .decisions
            .update_decision(
                &decision.id,
                DecisionPatch::evaluated(now, post, breakdown.total_reward, side_effects.clone()),
            )
            .await?;

        tracing::info!(
            category = "outcome",
            decision_id = %decision.id,
            action = %decision.action,
            reward = breakdown.total_reward,
            error_improvement_pct = deltas.error_improvement_pct,
            latency_improvement_pct = deltas.latency_improvement_pct,
            throughput_change_pct = deltas.throughput_change_pct,
            "Decision evaluated"
        );
        emit(
            self.deps.audit.as_ref(),
            AuditEvent::new(
                AuditKind::OutcomeRecorded,
                format!("Reward {:.3} for {}", breakdown.total_reward, decision.action),
                now,
            )
            .for_decision(decision)
            .with_details(serde_json::json!({
                "deltas": deltas,
                "reward": breakdown,
                "side_effects": side_effects,
            })),
        )
        .await;

        Ok(Evaluation::Scored(Applied {
            action: decision.action,
            context: decision.context,
            reward: breakdown.total_reward,
        }))
    }

    /// Fold the batch into `base` and compare-and-swap it. On a version
    /// conflict the batch is replayed onto the newer policy.
    async fn persist(
        &self,
        base: Policy,
        applied: &[Applied],
        now: DateTime<Utc>,
    ) -> Result<Policy> {
        let mut base = base;
        let mut attempt = 1;
        loop {
            let mut next = applied.iter().fold(base.clone(), |policy, item| {
                update_policy(
                    &policy,
                    item.action,
                    &item.context,
                    item.reward,
                    self.config.learning_rate,
                    self.config.confidence_decay,
                    now,
                )
            });
            next.version = base.version + 1;

            match self.deps.policy.save_policy(&next, Some(base.version)).await {
                Ok(()) => {
                    tracing::info!(
                        category = "policy",
                        version = next.version,
                        trained_samples = next.trained_samples,
                        "Policy saved"
                    );
                    return Ok(next);
                }
                Err(e) if e.is_conflict() && attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::warn!(
                        category = "policy",
                        attempt,
                        error = %e,
                        "Policy version moved, replaying updates"
                    );
                    base = match self.deps.policy.load_policy().await? {
                        Some(latest) if latest.is_compatible() => latest,
                        Some(_) => {
                            return Err(Error::Validation(
                                "stored policy became incompatible".to_string(),
                            ))
                        }
                        None => return Err(Error::NotFound("policy".to_string())),
                    };
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
