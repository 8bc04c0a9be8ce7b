//! The remedy decision loop.
//!
//! - [`DecisionOrchestrator`]: one pass of context → select → risk → guardrails → execute/approve
//! - [`OutcomeTracker`]: score executed decisions after the dwell window and update the policy
//! - [`ApprovalDesk`]: approve, reject and expire pending decisions
//! - [`Scheduler`]: run the three on independent intervals
//!
//! Every collaborator is reached through a `remedy-core` trait, bundled in
//! [`EngineDeps`]. The [`memory`] module has in-memory versions of all of them.

pub mod approvals;
pub mod executor;
pub mod governor;
pub mod memory;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod tracker;

pub use approvals::{Approval, ApprovalDesk};
pub use governor::GuardrailGovernor;
pub use orchestrator::DecisionOrchestrator;
pub use report::{
    DecisionOutcome, DecisionStage, DecisionTickReport, OutcomeTickReport, OutcomeTickStatus,
    SweepReport,
};
pub use scheduler::{Intervals, Scheduler};
pub use tracker::OutcomeTracker;

use remedy_core::{
    AuditEvent, AuditSink, DecisionStore, EngineConfig, ForecastSource, GuardrailStore,
    LeaseStore, OutcomeStore, PolicyStore, RemediationQueue, TargetResolver, TelemetrySource,
};
use std::sync::Arc;

/// Lease names, one per tick kind.
pub mod leases {
    pub const DECISION: &str = "decision-orchestrator";
    pub const OUTCOME: &str = "outcome-tracker";
    pub const SWEEP: &str = "approval-sweeper";
}

/// The engine's collaborators.
#[derive(Clone)]
pub struct EngineDeps {
    pub telemetry: Arc<dyn TelemetrySource>,
    pub forecast: Option<Arc<dyn ForecastSource>>,
    pub policy: Arc<dyn PolicyStore>,
    pub decisions: Arc<dyn DecisionStore>,
    pub guardrails: Arc<dyn GuardrailStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
    pub leases: Arc<dyn LeaseStore>,
    pub queue: Arc<dyn RemediationQueue>,
    pub audit: Arc<dyn AuditSink>,
    pub targets: Arc<dyn TargetResolver>,
}

/// All engine components sharing one set of collaborators and one lease holder id.
pub struct Engine {
    pub orchestrator: Arc<DecisionOrchestrator>,
    pub tracker: Arc<OutcomeTracker>,
    pub approvals: Arc<ApprovalDesk>,
    pub config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let holder = format!("{}:{}", config.requested_by, uuid::Uuid::new_v4());
        Self {
            orchestrator: Arc::new(DecisionOrchestrator::new(
                deps.clone(),
                config.clone(),
                holder.clone(),
            )),
            tracker: Arc::new(OutcomeTracker::new(deps.clone(), config.clone(), holder.clone())),
            approvals: Arc::new(ApprovalDesk::new(deps, config.clone(), holder)),
            config,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.orchestrator.clone(),
            self.tracker.clone(),
            self.approvals.clone(),
            &self.config,
        )
    }
}

/// Write an audit event. A failing sink is logged, never propagated.
pub(crate) async fn emit(audit: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind;
    if let Err(e) = audit.record(event).await {
        tracing::warn!(category = "audit", kind = ?kind, error = %e, "Failed to write audit event");
    }
}
