//! In-memory collaborators for tests and dry runs.
//!
//! Each one can be told to fail so degraded paths are easy to exercise.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use remedy_core::{
    Action, AnomalyEvent, ApprovalStatus, AuditEvent, AuditKind, AuditSink, ComponentHealth,
    Decision, DecisionFilter, DecisionPatch, DecisionStore, Error, ForecastSource, Guardrail,
    GuardrailStore, Lease, LeaseStore, Outcome, OutcomeStore, Policy, PolicyStore,
    RemediationJob, RemediationQueue, Result, TelemetrySource, TelemetryTotals,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Telemetry with settable values.
#[derive(Default)]
pub struct StaticTelemetry {
    totals: Mutex<TelemetryTotals>,
    anomalies: Mutex<Vec<AnomalyEvent>>,
    components: Mutex<Vec<ComponentHealth>>,
    failing: AtomicBool,
}

impl StaticTelemetry {
    pub fn new(totals: TelemetryTotals) -> Arc<Self> {
        let telemetry = Self::default();
        *telemetry.totals.lock() = totals;
        Arc::new(telemetry)
    }

    pub fn set_totals(&self, totals: TelemetryTotals) {
        *self.totals.lock() = totals;
    }

    pub fn set_anomalies(&self, anomalies: Vec<AnomalyEvent>) {
        *self.anomalies.lock() = anomalies;
    }

    pub fn set_components(&self, components: Vec<ComponentHealth>) {
        *self.components.lock() = components;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Telemetry("telemetry store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetry {
    async fn totals(&self) -> Result<TelemetryTotals> {
        self.check()?;
        Ok(*self.totals.lock())
    }

    async fn recent_anomalies(&self, limit: usize) -> Result<Vec<AnomalyEvent>> {
        self.check()?;
        Ok(self.anomalies.lock().iter().take(limit).cloned().collect())
    }

    async fn component_health(&self) -> Result<Vec<ComponentHealth>> {
        self.check()?;
        Ok(self.components.lock().clone())
    }
}

/// Forecaster returning a fixed trend.
pub struct StaticForecast(pub f64);

#[async_trait]
impl ForecastSource for StaticForecast {
    async fn trend(&self) -> Result<f64> {
        Ok(self.0)
    }
}

#[derive(Default)]
pub struct MemoryPolicyStore {
    policy: Mutex<Option<Policy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_policy(policy: Policy) -> Arc<Self> {
        Arc::new(Self {
            policy: Mutex::new(Some(policy)),
        })
    }

    pub fn current(&self) -> Option<Policy> {
        self.policy.lock().clone()
    }

    /// Overwrite without a version check, as a competing writer would.
    pub fn force(&self, policy: Policy) {
        *self.policy.lock() = Some(policy);
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_policy(&self) -> Result<Option<Policy>> {
        Ok(self.policy.lock().clone())
    }

    async fn save_policy(&self, policy: &Policy, expected_version: Option<u64>) -> Result<()> {
        let mut slot = self.policy.lock();
        let found = slot.as_ref().map(|p| p.version);
        if found != expected_version {
            return Err(Error::Conflict {
                expected: expected_version,
                found,
            });
        }
        *slot = Some(policy.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDecisionStore {
    decisions: Mutex<BTreeMap<String, Decision>>,
    failing_lookups: AtomicBool,
}

impl MemoryDecisionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `find_recent_executed` fail.
    pub fn set_failing_lookups(&self, failing: bool) {
        self.failing_lookups.store(failing, Ordering::SeqCst);
    }

    pub fn insert(&self, decision: Decision) {
        self.decisions.lock().insert(decision.id.clone(), decision);
    }

    pub fn all(&self) -> Vec<Decision> {
        self.decisions.lock().values().cloned().collect()
    }
}

#[async_trait]
impl DecisionStore for MemoryDecisionStore {
    async fn create_decision(&self, decision: &Decision) -> Result<String> {
        let mut decisions = self.decisions.lock();
        if decisions.contains_key(&decision.id) {
            return Err(Error::Validation(format!("decision {} already exists", decision.id)));
        }
        decisions.insert(decision.id.clone(), decision.clone());
        Ok(decision.id.clone())
    }

    async fn get_decision(&self, id: &str) -> Result<Option<Decision>> {
        Ok(self.decisions.lock().get(id).cloned())
    }

    async fn update_decision(&self, id: &str, patch: DecisionPatch) -> Result<Decision> {
        let mut decisions = self.decisions.lock();
        let decision = decisions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("decision {}", id)))?;
        patch.apply(decision);
        Ok(decision.clone())
    }

    async fn transition_decision(
        &self,
        id: &str,
        from: ApprovalStatus,
        patch: DecisionPatch,
    ) -> Result<Decision> {
        let mut decisions = self.decisions.lock();
        let decision = decisions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("decision {}", id)))?;
        if decision.approval_status != from {
            return Err(Error::Validation(format!(
                "decision {} is {}, expected {}",
                id, decision.approval_status, from
            )));
        }
        patch.apply(decision);
        Ok(decision.clone())
    }

    async fn query_executed_unevaluated(
        &self,
        executed_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Decision>> {
        let mut due: Vec<Decision> = self
            .decisions
            .lock()
            .values()
            .filter(|d| {
                d.awaiting_evaluation() && d.executed_at.is_some_and(|t| t <= executed_before)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.executed_at.cmp(&b.executed_at).then_with(|| a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn find_recent_executed(
        &self,
        action: Action,
        target: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Option<Decision>> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(Error::Storage("decision store unavailable".to_string()));
        }
        Ok(self
            .decisions
            .lock()
            .values()
            .filter(|d| {
                d.executed
                    && d.action == action
                    && d.executed_at.is_some_and(|t| t >= since)
                    && target.is_none_or(|t| d.target.as_deref() == Some(t))
            })
            .max_by_key(|d| d.executed_at)
            .cloned())
    }

    async fn query_decisions(&self, filter: DecisionFilter) -> Result<Vec<Decision>> {
        let mut matched: Vec<Decision> = self
            .decisions
            .lock()
            .values()
            .filter(|d| filter.action.is_none_or(|a| d.action == a))
            .filter(|d| filter.approval_status.is_none_or(|s| d.approval_status == s))
            .filter(|d| filter.executed.is_none_or(|e| d.executed == e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

/// Guardrail set held in memory; empty means "nothing configured".
#[derive(Default)]
pub struct MemoryGuardrailStore {
    rules: Mutex<Vec<Guardrail>>,
    failing: AtomicBool,
}

impl MemoryGuardrailStore {
    pub fn new(rules: Vec<Guardrail>) -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(rules),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl GuardrailStore for MemoryGuardrailStore {
    async fn list_enabled_guardrails(&self) -> Result<Vec<Guardrail>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("guardrail store unavailable".to_string()));
        }
        Ok(remedy_core::order_guardrails(self.rules.lock().clone()))
    }
}

#[derive(Default)]
pub struct MemoryOutcomeStore {
    outcomes: Mutex<HashMap<String, Outcome>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn record_outcome(&self, outcome: &Outcome) -> Result<()> {
        let mut outcomes = self.outcomes.lock();
        if outcomes.contains_key(&outcome.decision_id) {
            return Err(Error::Conflict {
                expected: None,
                found: Some(1),
            });
        }
        outcomes.insert(outcome.decision_id.clone(), outcome.clone());
        Ok(())
    }

    async fn get_outcome(&self, decision_id: &str) -> Result<Option<Outcome>> {
        Ok(self.outcomes.lock().get(decision_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn holder(&self, name: &str) -> Option<String> {
        self.leases.lock().get(name).map(|l| l.holder.clone())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>> {
        let mut leases = self.leases.lock();
        if let Some(current) = leases.get(name) {
            if !current.can_be_taken_by(holder, now) {
                return Ok(None);
            }
        }
        let lease = Lease::new(name, holder, ttl, now);
        leases.insert(name.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock();
        if leases.get(&lease.name).is_some_and(|l| l.holder == lease.holder) {
            leases.remove(&lease.name);
        }
        Ok(())
    }
}

/// Job queue that keeps every enqueued job.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<RemediationJob>>,
    failing: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn jobs(&self) -> Vec<RemediationJob> {
        self.jobs.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemediationQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: RemediationJob) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Queue("job queue unavailable".to_string()));
        }
        let id = job.id.clone();
        self.jobs.lock().push(job);
        Ok(id)
    }
}

/// Audit sink that keeps every event.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
