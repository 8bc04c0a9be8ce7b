//! Persistent audit log.
//!
//! Keys are the event time in zero-padded microseconds followed by the event
//! id, so table order is chronological and the newest entries sit at the end.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{AuditEvent, AuditKind, AuditSink};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::Result;

const AUDIT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

pub struct RedbAuditLog {
    db: Arc<Database>,
}

fn event_key(event: &AuditEvent) -> String {
    format!("{:020}_{}", event.at.timestamp_micros().max(0), event.id)
}

impl RedbAuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(AUDIT_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("audit_test"))
    }

    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let key = event_key(event);
        let value = serde_json::to_vec(event)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_TABLE)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Newest events first, optionally restricted to one kind.
    pub fn list_recent(&self, kind: Option<AuditKind>, limit: usize) -> Result<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_TABLE)?;

        let mut events = Vec::new();
        for item in table.iter()?.rev() {
            if events.len() >= limit {
                break;
            }
            let (_key, bytes) = item?;
            let event: AuditEvent = serde_json::from_slice(bytes.value())?;
            if kind.is_none_or(|k| event.kind == k) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Every event recorded for one decision, oldest first.
    pub fn for_decision(&self, decision_id: &str) -> Result<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_TABLE)?;

        let mut events = Vec::new();
        for item in table.iter()? {
            let (_key, bytes) = item?;
            let event: AuditEvent = serde_json::from_slice(bytes.value())?;
            if event.decision_id.as_deref() == Some(decision_id) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl AuditSink for RedbAuditLog {
    async fn record(&self, event: AuditEvent) -> remedy_core::Result<()> {
        tracing::debug!(category = "audit", kind = ?event.kind, "{}", event.message);
        Ok(self.append(&event)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let log = RedbAuditLog::memory().unwrap();
        let now = Utc::now();
        for (i, kind) in [AuditKind::Execution, AuditKind::PolicyUpdated, AuditKind::Execution]
            .into_iter()
            .enumerate()
        {
            let event =
                AuditEvent::new(kind, format!("event {}", i), now + Duration::seconds(i as i64));
            log.record(event).await.unwrap();
        }

        let recent = log.list_recent(None, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "event 2");
        assert_eq!(recent[1].message, "event 1");

        let executions = log.list_recent(Some(AuditKind::Execution), 10).unwrap();
        assert_eq!(executions.len(), 2);
    }

    #[tokio::test]
    async fn test_for_decision() {
        let log = RedbAuditLog::memory().unwrap();
        let mut event = AuditEvent::new(AuditKind::ApprovalRequested, "waiting", Utc::now());
        event.decision_id = Some("d-1".to_string());
        log.record(event).await.unwrap();
        log.record(AuditEvent::new(AuditKind::PolicyUpdated, "v2", Utc::now()))
            .await
            .unwrap();

        let events = log.for_decision("d-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::ApprovalRequested);
    }
}
