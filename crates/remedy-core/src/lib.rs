//! Core types and pure decision logic for the remedy engine.
//!
//! This crate holds everything that needs no I/O:
//!
//! - **Context**: telemetry aggregates mapped to bounded signals and a fixed feature vector
//! - **Policy**: per-action weights and diagonal confidence, scored with a UCB bonus
//! - **Risk**: additive risk tiering of (action, target, context)
//! - **Guardrails**: rule model, matching and the built-in rule set
//! - **Reward**: shaped reward and side-effect detection from pre/post snapshots
//!
//! plus the traits the engine uses to reach its collaborators (telemetry,
//! stores, job queue, audit sink).
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use remedy_core::{build_context, select_action, Action, Policy, TelemetryTotals};
//!
//! let totals = TelemetryTotals { calls_24h: 50_000, errors_24h: 3_000, p95_ms: 640.0 };
//! let context = build_context(&totals, &[], None, Utc::now());
//! let policy = Policy::cold_start(Utc::now());
//!
//! // A cold policy never acts.
//! assert_eq!(select_action(&context, &policy, 0.5).action, Action::DoNothing);
//! ```

pub mod action;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod guardrail;
pub mod policy;
pub mod remediation;
pub mod reward;
pub mod risk;
pub mod store;
pub mod target;
pub mod telemetry;

pub use action::{Action, ActionClass, RiskLevel, ACTION_COUNT};
pub use config::EngineConfig;
pub use context::{build_context, Context, FeatureVector, FEATURE_DIM, FEATURE_NAMES};
pub use decision::{ApprovalStatus, Decision, DecisionPatch, Outcome};
pub use error::{Error, Result};
pub use guardrail::{
    default_guardrails, order_guardrails, Guardrail, GuardrailPolicy, GuardrailVerdict,
};
pub use policy::{
    explain_action, select_action, update_policy, ArmParams, Explanation, Factor, Policy, Selection,
    CONFIDENCE_FLOOR, WEIGHT_BOUND,
};
pub use remediation::{
    AuditEvent, AuditKind, AuditSink, RemediationJob, RemediationQueue, TracingAuditSink,
};
pub use reward::{compute_reward, detect_side_effects, MetricDeltas, RewardBreakdown};
pub use risk::{assess_risk, is_protected, DEFAULT_PROTECTED_TARGETS};
pub use store::{
    DecisionFilter, DecisionStore, GuardrailStore, Lease, LeaseStore, OutcomeStore, PolicyStore,
};
pub use target::{TableTargetResolver, TargetResolver, TargetRule};
pub use telemetry::{
    AnomalyEvent, AnomalySeverity, ComponentHealth, ForecastSource, TelemetrySnapshot,
    TelemetrySource, TelemetryTotals,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
