//! Declarative guardrail rules.
//!
//! Rule evaluation (including the cooldown lookup against executed
//! decisions) lives in the engine's governor; this module holds the rule
//! model, matching and the built-in rule set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, RiskLevel};
use crate::risk::{is_protected, DEFAULT_PROTECTED_TARGETS};

/// What a matching guardrail does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailPolicy {
    /// Block the action and stop evaluating.
    Deny,
    /// Let it through only after a human approves.
    RequireApproval,
    /// Allow, subject to cooldown and impact limits.
    AllowWithLimit,
}

/// A safety rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    pub id: String,
    pub name: String,
    /// Only applies to this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Only applies at this risk tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    /// Only applies when the target contains one of these substrings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protected_targets: Vec<String>,
    pub policy: GuardrailPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_impact_percentage: Option<f64>,
    /// Higher is evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Guardrail {
    pub fn new(id: impl Into<String>, name: impl Into<String>, policy: GuardrailPolicy) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            action: None,
            risk: None,
            protected_targets: Vec::new(),
            policy,
            cooldown_minutes: None,
            max_impact_percentage: None,
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn with_protected_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cooldown(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = Some(minutes);
        self
    }

    pub fn with_max_impact(mut self, percentage: f64) -> Self {
        self.max_impact_percentage = Some(percentage);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether every filter on this rule accepts the candidate.
    pub fn matches(&self, action: Action, risk: RiskLevel, target: Option<&str>) -> bool {
        if self.action.is_some_and(|a| a != action) {
            return false;
        }
        if self.risk.is_some_and(|r| r != risk) {
            return false;
        }
        if !self.protected_targets.is_empty() && !is_protected(target, &self.protected_targets) {
            return false;
        }
        true
    }
}

/// Enabled rules sorted by descending priority. Equal priorities keep their
/// input order.
pub fn order_guardrails(mut rules: Vec<Guardrail>) -> Vec<Guardrail> {
    rules.retain(|g| g.enabled);
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    rules
}

/// Built-in rule set used when no guardrails are configured.
pub fn default_guardrails() -> Vec<Guardrail> {
    vec![
        Guardrail::new(
            "default-deny-high-risk-protected",
            "Deny high-risk on protected targets",
            GuardrailPolicy::Deny,
        )
        .with_risk(RiskLevel::High)
        .with_protected_targets(DEFAULT_PROTECTED_TARGETS)
        .with_priority(100),
        Guardrail::new(
            "default-approve-disable-endpoint",
            "Require approval for disable_endpoint",
            GuardrailPolicy::RequireApproval,
        )
        .with_action(Action::DisableEndpoint)
        .with_priority(90),
        Guardrail::new(
            "default-approve-reroute",
            "Require approval for reroute",
            GuardrailPolicy::RequireApproval,
        )
        .with_action(Action::Reroute)
        .with_priority(85),
        Guardrail::new(
            "default-restart-cooldown",
            "Cooldown for restart_fn",
            GuardrailPolicy::AllowWithLimit,
        )
        .with_action(Action::RestartFn)
        .with_cooldown(30)
        .with_priority(70),
        Guardrail::new(
            "default-allow-low-risk",
            "Allow low-risk actions with limits",
            GuardrailPolicy::AllowWithLimit,
        )
        .with_risk(RiskLevel::Low)
        .with_max_impact(25.0)
        .with_priority(10),
    ]
}

/// Outcome of running the guardrail set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub approval_required: bool,
    pub risk: RiskLevel,
    pub matched_guardrails: Vec<String>,
    /// Tightest impact limit among matched rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_impact_percentage: Option<f64>,
    /// Whether the built-in rule set was used.
    #[serde(default)]
    pub used_defaults: bool,
}

impl GuardrailVerdict {
    pub fn allowed(risk: RiskLevel) -> Self {
        Self {
            allow: true,
            reason: None,
            approval_required: false,
            risk,
            matched_guardrails: Vec::new(),
            max_impact_percentage: None,
            used_defaults: false,
        }
    }

    pub fn deny(&mut self, reason: impl Into<String>) {
        self.allow = false;
        self.reason = Some(reason.into());
    }

    pub fn require_approval(&mut self, reason: impl Into<String>) {
        self.approval_required = true;
        self.reason = Some(reason.into());
    }

    pub fn limit_impact(&mut self, percentage: f64) {
        self.max_impact_percentage = Some(match self.max_impact_percentage {
            Some(current) => current.min(percentage),
            None => percentage,
        });
    }
}
