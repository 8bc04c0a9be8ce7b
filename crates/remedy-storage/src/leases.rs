//! Named leases for single-runner jobs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{Lease, LeaseStore};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::Result;

// key = lease name, value = Lease (JSON)
const LEASES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

pub struct RedbLeaseStore {
    db: Arc<Database>,
}

impl RedbLeaseStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(LEASES_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("leases_test"))
    }

    /// Take or renew the lease in a single write transaction.
    pub fn acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>> {
        let write_txn = self.db.begin_write()?;
        let lease = {
            let mut table = write_txn.open_table(LEASES_TABLE)?;
            let current: Option<Lease> = match table.get(name)? {
                Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                None => None,
            };
            if let Some(current) = current {
                if !current.can_be_taken_by(holder, now) {
                    tracing::debug!(lease = name, holder = %current.holder, "Lease held elsewhere");
                    return Ok(None);
                }
            }
            let lease = Lease::new(name, holder, ttl, now);
            let value = serde_json::to_vec(&lease)?;
            table.insert(name, value.as_slice())?;
            lease
        };
        write_txn.commit()?;
        Ok(Some(lease))
    }

    pub fn release_lease(&self, lease: &Lease) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LEASES_TABLE)?;
            let held_by_caller = match table.get(lease.name.as_str())? {
                Some(bytes) => {
                    serde_json::from_slice::<Lease>(bytes.value())?.holder == lease.holder
                }
                None => false,
            };
            if held_by_caller {
                table.remove(lease.name.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn current(&self, name: &str) -> Result<Option<Lease>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEASES_TABLE)?;
        match table.get(name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LeaseStore for RedbLeaseStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> remedy_core::Result<Option<Lease>> {
        Ok(self.acquire(name, holder, ttl, now)?)
    }

    async fn release(&self, lease: &Lease) -> remedy_core::Result<()> {
        Ok(self.release_lease(lease)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_until_expiry() {
        let store = RedbLeaseStore::memory().unwrap();
        let now = Utc::now();
        let ttl = Duration::seconds(300);

        let lease = store.try_acquire("outcome-tracker", "a", ttl, now).await.unwrap();
        assert!(lease.is_some());
        assert!(store
            .try_acquire("outcome-tracker", "b", ttl, now)
            .await
            .unwrap()
            .is_none());
        // Other names are independent
        assert!(store
            .try_acquire("approval-sweeper", "b", ttl, now)
            .await
            .unwrap()
            .is_some());
        // Expired leases can be taken over
        let later = now + Duration::seconds(301);
        let taken = store
            .try_acquire("outcome-tracker", "b", ttl, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.holder, "b");
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let store = RedbLeaseStore::memory().unwrap();
        let now = Utc::now();
        let ttl = Duration::seconds(60);

        let lease = store
            .try_acquire("decision-orchestrator", "a", ttl, now)
            .await
            .unwrap()
            .unwrap();

        let imposter = Lease::new("decision-orchestrator", "b", ttl, now);
        store.release(&imposter).await.unwrap();
        assert!(store.current("decision-orchestrator").unwrap().is_some());

        store.release(&lease).await.unwrap();
        assert!(store.current("decision-orchestrator").unwrap().is_none());
        assert!(store
            .try_acquire("decision-orchestrator", "b", ttl, now)
            .await
            .unwrap()
            .is_some());
    }
}
