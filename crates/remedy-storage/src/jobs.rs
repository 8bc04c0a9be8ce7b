//! Remediation job outbox.
//!
//! The engine's hand-off point: jobs are written here and picked up by
//! whatever executes them, which marks them dispatched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{RemediationJob, RemediationQueue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::{Error, Result};

// key = job id, value = JobRecord (JSON)
const JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("remediation_jobs");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: RemediationJob,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

pub struct RedbJobOutbox {
    db: Arc<Database>,
}

impl RedbJobOutbox {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(JOBS_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("jobs_test"))
    }

    fn put(&self, record: &JobRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(JOBS_TABLE)?;
            table.insert(record.job.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JOBS_TABLE)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Jobs in enqueue order, optionally only those in `status`.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JOBS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (_id, bytes) = item?;
            let record: JobRecord = serde_json::from_slice(bytes.value())?;
            if status.is_none_or(|s| record.status == s) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.job.enqueued_at.cmp(&b.job.enqueued_at));
        Ok(records)
    }

    pub fn mark_dispatched(&self, id: &str, at: DateTime<Utc>) -> Result<JobRecord> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        record.status = JobStatus::Dispatched;
        record.dispatched_at = Some(at);
        self.put(&record)?;
        Ok(record)
    }
}

#[async_trait]
impl RemediationQueue for RedbJobOutbox {
    async fn enqueue(&self, job: RemediationJob) -> remedy_core::Result<String> {
        let id = job.id.clone();
        tracing::info!(
            category = "remediation",
            job_id = %id,
            action = %job.action,
            target = job.target.as_deref().unwrap_or("-"),
            "Remediation job queued"
        );
        self.put(&JobRecord {
            job,
            status: JobStatus::Queued,
            dispatched_at: None,
        })?;
        Ok(id)
    }
}
