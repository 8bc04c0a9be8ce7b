//! Guardrail evaluation.

use chrono::{DateTime, Duration, Utc};
use remedy_core::{
    default_guardrails, order_guardrails, Action, Context, DecisionStore, Guardrail,
    GuardrailPolicy, GuardrailStore, GuardrailVerdict, RiskLevel,
};
use std::sync::Arc;

/// Applies the ordered guardrail set to a proposed action.
///
/// Rules run in descending priority. `deny` stops evaluation,
/// `require_approval` flags the verdict and continues, and `allow_with_limit`
/// enforces its cooldown (denying and stopping while a matching execution is
/// inside the window) and tightens the impact limit. When the store is empty
/// or unreadable the built-in rule set is used.
pub struct GuardrailGovernor {
    guardrails: Arc<dyn GuardrailStore>,
    decisions: Arc<dyn DecisionStore>,
}

impl GuardrailGovernor {
    pub fn new(guardrails: Arc<dyn GuardrailStore>, decisions: Arc<dyn DecisionStore>) -> Self {
        Self {
            guardrails,
            decisions,
        }
    }

    /// Enabled rules in evaluation order, and whether they are the defaults.
    async fn rules(&self) -> (Vec<Guardrail>, bool) {
        match self.guardrails.list_enabled_guardrails().await {
            Ok(rules) if !rules.is_empty() => (order_guardrails(rules), false),
            Ok(_) => {
                tracing::debug!(category = "guardrail", "No guardrails configured, using defaults");
                (order_guardrails(default_guardrails()), true)
            }
            Err(e) => {
                tracing::warn!(
                    category = "guardrail",
                    error = %e,
                    "Guardrail store unavailable, using defaults"
                );
                (order_guardrails(default_guardrails()), true)
            }
        }
    }

    pub async fn apply(
        &self,
        action: Action,
        risk: RiskLevel,
        target: Option<&str>,
        context: &Context,
        now: DateTime<Utc>,
    ) -> GuardrailVerdict {
        let (rules, used_defaults) = self.rules().await;
        let mut verdict = GuardrailVerdict::allowed(risk);
        verdict.used_defaults = used_defaults;

        for rule in &rules {
            if !rule.matches(action, risk, target) {
                continue;
            }
            verdict.matched_guardrails.push(rule.name.clone());

            match rule.policy {
                GuardrailPolicy::Deny => {
                    verdict.deny(format!("Denied by guardrail '{}'", rule.name));
                    break;
                }
                GuardrailPolicy::RequireApproval => {
                    verdict.require_approval(format!(
                        "Approval required by guardrail '{}'",
                        rule.name
                    ));
                }
                GuardrailPolicy::AllowWithLimit => {
                    if let Some(minutes) = rule.cooldown_minutes {
                        let blocked = self
                            .cooldown_block(rule, minutes, action, target, now)
                            .await;
                        if let Some(reason) = blocked {
                            verdict.deny(reason);
                            break;
                        }
                    }
                    if let Some(pct) = rule.max_impact_percentage {
                        verdict.limit_impact(pct);
                    }
                }
            }
        }

        tracing::debug!(
            category = "guardrail",
            action = %action,
            risk = %risk,
            target = target.unwrap_or("-"),
            anomaly_severity = context.anomaly_severity,
            allow = verdict.allow,
            approval_required = verdict.approval_required,
            matched = ?verdict.matched_guardrails,
            "Guardrails applied"
        );
        verdict
    }

    /// Reason to block when a matching execution falls inside the cooldown.
    /// An unreadable history blocks too.
    async fn cooldown_block(
        &self,
        rule: &Guardrail,
        minutes: u32,
        action: Action,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let since = now - Duration::minutes(i64::from(minutes));
        match self.decisions.find_recent_executed(action, target, since).await {
            Ok(Some(previous)) => Some(format!(
                "Cooldown active: {} last executed at {} (guardrail '{}', {} min)",
                action,
                previous
                    .executed_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string()),
                rule.name,
                minutes
            )),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    category = "guardrail",
                    rule = %rule.name,
                    error = %e,
                    "Cooldown lookup failed"
                );
                Some(format!(
                    "Cooldown check for guardrail '{}' could not be completed: {}",
                    rule.name, e
                ))
            }
        }
    }
}
