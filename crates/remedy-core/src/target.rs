//! Target resolution for chosen actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::action::Action;
use crate::context::Context;
use crate::telemetry::ComponentHealth;

/// How to pick the target of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRule {
    /// The action has no target.
    None,
    /// Always the same target.
    Fixed { name: String },
    /// The component with the highest error rate, else `fallback`.
    WorstErrorRate { fallback: String },
}

/// Strategy that maps an action to the thing it acts upon.
pub trait TargetResolver: Send + Sync {
    fn resolve(
        &self,
        action: Action,
        context: &Context,
        components: &[ComponentHealth],
    ) -> Option<String>;
}

/// Lookup-table resolver with one rule per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTargetResolver {
    rules: BTreeMap<Action, TargetRule>,
}

impl TableTargetResolver {
    /// Start from the default table and override the given actions.
    pub fn with_overrides(overrides: BTreeMap<Action, TargetRule>) -> Self {
        let mut resolver = Self::default();
        resolver.rules.extend(overrides);
        resolver
    }

    pub fn rule(&self, action: Action) -> &TargetRule {
        self.rules.get(&action).unwrap_or(&TargetRule::None)
    }
}

fn default_rule(action: Action) -> TargetRule {
    let fixed = |name: &str| TargetRule::Fixed {
        name: name.to_string(),
    };
    match action {
        Action::DoNothing => TargetRule::None,
        Action::RestartFn => TargetRule::WorstErrorRate {
            fallback: "api-handler".to_string(),
        },
        Action::ReduceRate => fixed("api-gateway"),
        Action::DisableEndpoint => TargetRule::WorstErrorRate {
            fallback: "api".to_string(),
        },
        Action::Reroute => fixed("primary-route"),
        Action::ScaleUp => fixed("worker-pool"),
        Action::ClearCache => fixed("edge-cache"),
    }
}

impl Default for TableTargetResolver {
    fn default() -> Self {
        Self {
            rules: Action::ALL.iter().map(|a| (*a, default_rule(*a))).collect(),
        }
    }
}

impl TargetResolver for TableTargetResolver {
    fn resolve(
        &self,
        action: Action,
        _context: &Context,
        components: &[ComponentHealth],
    ) -> Option<String> {
        match self.rule(action) {
            TargetRule::None => None,
            TargetRule::Fixed { name } => Some(name.clone()),
            TargetRule::WorstErrorRate { fallback } => components
                .iter()
                .filter(|c| c.error_rate.is_finite())
                .fold(None::<&ComponentHealth>, |worst, c| match worst {
                    Some(w) if w.error_rate >= c.error_rate => Some(w),
                    _ => Some(c),
                })
                .map(|c| c.name.clone())
                .or_else(|| Some(fallback.clone())),
        }
    }
}
