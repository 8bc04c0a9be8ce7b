//! Engine configuration.
//!
//! Sources, lowest priority first: built-in defaults, a TOML file, then
//! `REMEDY_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::action::Action;
use crate::error::{Error, Result};
use crate::risk::DEFAULT_PROTECTED_TARGETS;
use crate::target::{TableTargetResolver, TargetRule};

/// Environment variable names.
/// Upper bounds for the duration settings.
pub mod limits {
    /// One week.
    pub const MAX_DWELL_MINUTES: i64 = 7 * 24 * 60;
    /// One week.
    pub const MAX_APPROVAL_HORIZON_MINUTES: i64 = 7 * 24 * 60;
    /// One day.
    pub const MAX_LEASE_TTL_SECS: i64 = 24 * 60 * 60;
}

pub mod env_vars {
    pub const EXPLORATION_RATE: &str = "REMEDY_EXPLORATION_RATE";
    pub const LEARNING_RATE: &str = "REMEDY_LEARNING_RATE";
    pub const CONFIDENCE_DECAY: &str = "REMEDY_CONFIDENCE_DECAY";
    pub const DWELL_MINUTES: &str = "REMEDY_DWELL_MINUTES";
    pub const BATCH_SIZE: &str = "REMEDY_BATCH_SIZE";
    pub const APPROVAL_HORIZON_MINUTES: &str = "REMEDY_APPROVAL_HORIZON_MINUTES";
    pub const DATA_DIR: &str = "REMEDY_DATA_DIR";
    pub const LOG_JSON: &str = "REMEDY_LOG_JSON";
}

/// Decision engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// UCB exploration strength (alpha).
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Multiplicative decay applied to confidence on each update.
    #[serde(default = "default_confidence_decay")]
    pub confidence_decay: f64,

    /// Minimum delay between execution and measurement.
    #[serde(default = "default_dwell_minutes")]
    pub dwell_minutes: i64,

    /// Maximum decisions evaluated per outcome tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a pending decision waits for a human.
    #[serde(default = "default_approval_horizon_minutes")]
    pub approval_horizon_minutes: i64,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: i64,

    #[serde(default = "default_decision_interval_secs")]
    pub decision_interval_secs: u64,

    #[serde(default = "default_outcome_interval_secs")]
    pub outcome_interval_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Number of recent anomalies fed to the context builder.
    #[serde(default = "default_anomaly_window")]
    pub anomaly_window: usize,

    /// Recorded as the requester on every remediation job.
    #[serde(default = "default_requested_by")]
    pub requested_by: String,

    /// Target-name substrings that raise risk.
    #[serde(default = "default_protected_targets")]
    pub protected_targets: Vec<String>,

    /// Per-action target rule overrides, keyed by action name.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetRule>,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_exploration_rate() -> f64 { 0.5 }
fn default_learning_rate() -> f64 { 0.05 }
fn default_confidence_decay() -> f64 { 0.95 }
fn default_dwell_minutes() -> i64 { 15 }
fn default_batch_size() -> usize { 20 }
fn default_approval_horizon_minutes() -> i64 { 30 }
fn default_lease_ttl_secs() -> i64 { 300 }
fn default_decision_interval_secs() -> u64 { 60 }
fn default_outcome_interval_secs() -> u64 { 300 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_anomaly_window() -> usize { 10 }
fn default_requested_by() -> String { "remedy-engine".to_string() }
fn default_protected_targets() -> Vec<String> {
    DEFAULT_PROTECTED_TARGETS.iter().map(|s| s.to_string()).collect()
}
fn default_data_dir() -> PathBuf { PathBuf::from("data") }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exploration_rate: default_exploration_rate(),
            learning_rate: default_learning_rate(),
            confidence_decay: default_confidence_decay(),
            dwell_minutes: default_dwell_minutes(),
            batch_size: default_batch_size(),
            approval_horizon_minutes: default_approval_horizon_minutes(),
            lease_ttl_secs: default_lease_ttl_secs(),
            decision_interval_secs: default_decision_interval_secs(),
            outcome_interval_secs: default_outcome_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            anomaly_window: default_anomaly_window(),
            requested_by: default_requested_by(),
            protected_targets: default_protected_targets(),
            targets: BTreeMap::new(),
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("Cannot read {}: {}", p.display(), e)))?;
                tracing::info!(category = "config", path = %p.display(), "Loading engine config");
                toml::from_str(&content)?
            }
            None => EngineConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(
                        category = "config",
                        key,
                        value = %raw,
                        "Ignoring unparseable override"
                    );
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, env_vars::EXPLORATION_RATE) {
            self.exploration_rate = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::LEARNING_RATE) {
            self.learning_rate = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::CONFIDENCE_DECAY) {
            self.confidence_decay = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::DWELL_MINUTES) {
            self.dwell_minutes = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::BATCH_SIZE) {
            self.batch_size = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::APPROVAL_HORIZON_MINUTES) {
            self.approval_horizon_minutes = v;
        }
        if let Some(v) = lookup(env_vars::DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.exploration_rate.is_finite() || self.exploration_rate < 0.0 {
            return Err(Error::Config(format!(
                "exploration_rate must be finite and >= 0, got {}",
                self.exploration_rate
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(Error::Config(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.confidence_decay > 0.0 && self.confidence_decay <= 1.0) {
            return Err(Error::Config(format!(
                "confidence_decay must be in (0, 1], got {}",
                self.confidence_decay
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if !(0..=limits::MAX_DWELL_MINUTES).contains(&self.dwell_minutes) {
            return Err(Error::Config(format!(
                "dwell_minutes must be in [0, {}], got {}",
                limits::MAX_DWELL_MINUTES,
                self.dwell_minutes
            )));
        }
        if !(1..=limits::MAX_APPROVAL_HORIZON_MINUTES).contains(&self.approval_horizon_minutes) {
            return Err(Error::Config(format!(
                "approval_horizon_minutes must be in [1, {}], got {}",
                limits::MAX_APPROVAL_HORIZON_MINUTES,
                self.approval_horizon_minutes
            )));
        }
        if !(1..=limits::MAX_LEASE_TTL_SECS).contains(&self.lease_ttl_secs) {
            return Err(Error::Config(format!(
                "lease_ttl_secs must be in [1, {}], got {}",
                limits::MAX_LEASE_TTL_SECS,
                self.lease_ttl_secs
            )));
        }
        for key in self.targets.keys() {
            key.parse::<Action>().map_err(|_| {
                Error::Config(format!("targets: unknown action '{}'", key))
            })?;
        }
        Ok(())
    }

    /// Target resolver built from the default table plus configured overrides.
    pub fn target_resolver(&self) -> Result<TableTargetResolver> {
        let mut overrides = BTreeMap::new();
        for (key, rule) in &self.targets {
            let action: Action = key
                .parse()
                .map_err(|_| Error::Config(format!("targets: unknown action '{}'", key)))?;
            overrides.insert(action, rule.clone());
        }
        Ok(TableTargetResolver::with_overrides(overrides))
    }

    pub fn dwell(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.dwell_minutes)
    }

    pub fn approval_horizon(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.approval_horizon_minutes)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs)
    }

    /// Path of the redb database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("remedy.redb")
    }
}
