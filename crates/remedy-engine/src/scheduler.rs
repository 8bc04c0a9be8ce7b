//! Interval scheduler for the three tick kinds.

use chrono::Utc;
use remedy_core::EngineConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::approvals::ApprovalDesk;
use crate::orchestrator::DecisionOrchestrator;
use crate::report::OutcomeTickStatus;
use crate::tracker::OutcomeTracker;

/// Intervals between ticks.
#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub decision: Duration,
    pub outcome: Duration,
    pub sweep: Duration,
}

impl Intervals {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            decision: Duration::from_secs(config.decision_interval_secs.max(1)),
            outcome: Duration::from_secs(config.outcome_interval_secs.max(1)),
            sweep: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }
}

/// Runs the orchestrator, tracker and expiry sweep on independent intervals.
///
/// Reports are only logged; a failing tick never stops its loop.
pub struct Scheduler {
    orchestrator: Arc<DecisionOrchestrator>,
    tracker: Arc<OutcomeTracker>,
    approvals: Arc<ApprovalDesk>,
    intervals: Intervals,
    running: Arc<RwLock<bool>>,
    shutdown: watch::Sender<bool>,
    handles: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<DecisionOrchestrator>,
        tracker: Arc<OutcomeTracker>,
        approvals: Arc<ApprovalDesk>,
        config: &EngineConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            tracker,
            approvals,
            intervals: Intervals::from_config(config),
            running: Arc::new(RwLock::new(false)),
            shutdown,
            handles: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    fn spawn_loop<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut tick: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(
                category = "scheduler",
                job = name,
                period_secs = period.as_secs(),
                "Loop started"
            );
            loop {
                tokio::select! {
                    _ = timer.tick() => tick().await,
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            tracing::debug!(category = "scheduler", job = name, "Loop stopped");
        })
    }

    /// Start all loops. A second call is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);
        self.shutdown.send_replace(false);

        let orchestrator = self.orchestrator.clone();
        let decision = self.spawn_loop("decision", self.intervals.decision, move || {
            let orchestrator = orchestrator.clone();
            async move {
                let report = orchestrator.tick(Utc::now()).await;
                if report.is_failure() {
                    tracing::warn!(
                        category = "scheduler",
                        outcome = ?report.outcome,
                        "Decision tick failed"
                    );
                } else {
                    tracing::debug!(
                        category = "scheduler",
                        outcome = ?report.outcome,
                        "Decision tick"
                    );
                }
            }
        });

        let tracker = self.tracker.clone();
        let outcome = self.spawn_loop("outcome", self.intervals.outcome, move || {
            let tracker = tracker.clone();
            async move {
                let report = tracker.tick(Utc::now()).await;
                match &report.status {
                    OutcomeTickStatus::Failed { cause } => {
                        tracing::warn!(
                            category = "scheduler",
                            cause = %cause,
                            "Outcome tick failed"
                        )
                    }
                    status => tracing::debug!(
                        category = "scheduler",
                        status = ?status,
                        "Outcome tick"
                    ),
                }
            }
        });

        let approvals = self.approvals.clone();
        let sweep = self.spawn_loop("sweep", self.intervals.sweep, move || {
            let approvals = approvals.clone();
            async move {
                let report = approvals.expire_stale(Utc::now()).await;
                if !report.failed.is_empty() {
                    tracing::warn!(
                        category = "scheduler",
                        failed = ?report.failed,
                        "Expiry sweep had failures"
                    );
                }
            }
        });

        self.handles.write().await.extend([decision, outcome, sweep]);
        tracing::info!(
            category = "scheduler",
            decision_secs = self.intervals.decision.as_secs(),
            outcome_secs = self.intervals.outcome.as_secs(),
            sweep_secs = self.intervals.sweep.as_secs(),
            "Scheduler started"
        );
    }

    /// Stop all loops, waiting for in-flight ticks to finish.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        drop(running);

        self.shutdown.send_replace(true);
        let handles: Vec<_> = self.handles.write().await.drain(..).collect();
        for handle in handles {
            handle.await.ok();
        }
        tracing::info!(category = "scheduler", "Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
