//! The closed set of remediation actions and risk tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Number of actions in the fixed action set.
pub const ACTION_COUNT: usize = 7;

/// A remediation action the engine can choose.
///
/// Declaration order is the selection order: ties resolve to the earliest
/// variant, so `DoNothing` must stay first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    DoNothing,
    RestartFn,
    ReduceRate,
    DisableEndpoint,
    Reroute,
    ScaleUp,
    ClearCache,
}

/// Inherent risk class of an action, before target and context adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Cheap and reversible.
    Routine,
    /// Briefly disruptive.
    Disruptive,
    /// Can take traffic offline.
    Dangerous,
}

impl ActionClass {
    /// Additive contribution to the risk score.
    pub fn risk_points(self) -> u8 {
        match self {
            ActionClass::Routine => 1,
            ActionClass::Disruptive => 2,
            ActionClass::Dangerous => 3,
        }
    }
}

impl Action {
    /// All actions in selection order.
    pub const ALL: [Action; ACTION_COUNT] = [
        Action::DoNothing,
        Action::RestartFn,
        Action::ReduceRate,
        Action::DisableEndpoint,
        Action::Reroute,
        Action::ScaleUp,
        Action::ClearCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::DoNothing => "do_nothing",
            Action::RestartFn => "restart_fn",
            Action::ReduceRate => "reduce_rate",
            Action::DisableEndpoint => "disable_endpoint",
            Action::Reroute => "reroute",
            Action::ScaleUp => "scale_up",
            Action::ClearCache => "clear_cache",
        }
    }

    pub fn class(&self) -> ActionClass {
        match self {
            Action::DisableEndpoint | Action::Reroute => ActionClass::Dangerous,
            Action::RestartFn | Action::ReduceRate => ActionClass::Disruptive,
            Action::DoNothing | Action::ScaleUp | Action::ClearCache => ActionClass::Routine,
        }
    }

    /// Position in the fixed action set.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Action::DoNothing)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown action: {}", s)))
    }
}

/// Risk tier assigned to an (action, target, context) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(Error::Validation(format!("Unknown risk level: {}", other))),
        }
    }
}
