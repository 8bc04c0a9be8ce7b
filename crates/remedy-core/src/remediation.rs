//! Outbound seams: the remediation job queue and the audit sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{Action, RiskLevel};
use crate::error::Result;

/// A job handed to the downstream executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationJob {
    pub id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub requested_by: String,
    pub decision_id: String,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

/// Fire-and-forget job queue. Enqueued is as far as the engine tracks it.
#[async_trait]
pub trait RemediationQueue: Send + Sync {
    /// Hand off a job, returning its id.
    async fn enqueue(&self, job: RemediationJob) -> Result<String>;
}

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    GuardrailDecision,
    Execution,
    ExecutionFailed,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalExpired,
    OutcomeRecorded,
    PolicyUpdated,
    /// Recorded rewards that never reached the policy.
    PolicyUpdateDropped,
}

/// Structured audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub kind: AuditKind,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            at,
            decision_id: None,
            action: None,
            target: None,
            risk: None,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Attach the decision this event is about.
    pub fn for_decision(mut self, decision: &crate::decision::Decision) -> Self {
        self.decision_id = Some(decision.id.clone());
        self.action = Some(decision.action);
        self.target = decision.target.clone();
        self.risk = Some(decision.risk);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Audit sink that only logs.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            category = "audit",
            kind = ?event.kind,
            decision_id = event.decision_id.as_deref().unwrap_or("-"),
            action = event.action.map(|a| a.as_str()).unwrap_or("-"),
            "{}",
            event.message
        );
        Ok(())
    }
}
