//! Single-document policy storage with compare-and-swap writes.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{Policy, PolicyStore};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::{Error, Result};

const POLICY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("policy");

/// Key of the one live policy document.
const ACTIVE_KEY: &str = "active";

/// redb-backed policy store.
pub struct RedbPolicyStore {
    db: Arc<Database>,
}

impl RedbPolicyStore {
    /// Open or create a policy store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(POLICY_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    /// Create a throwaway store in the temp dir.
    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("policy_test"))
    }

    pub fn load(&self) -> Result<Option<Policy>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(POLICY_TABLE)?;
        match table.get(ACTIVE_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Write `policy` if the stored version equals `expected_version`.
    pub fn compare_and_swap(&self, policy: &Policy, expected_version: Option<u64>) -> Result<()> {
        let value = serde_json::to_vec(policy)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(POLICY_TABLE)?;
            let found = match table.get(ACTIVE_KEY)? {
                Some(bytes) => Some(serde_json::from_slice::<Policy>(bytes.value())?.version),
                None => None,
            };
            if found != expected_version {
                return Err(Error::Conflict {
                    expected: expected_version,
                    found,
                });
            }
            table.insert(ACTIVE_KEY, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(version = policy.version, "Policy persisted");
        Ok(())
    }

    /// Replace the policy unconditionally. Used by explicit operator resets.
    pub fn overwrite(&self, policy: &Policy) -> Result<()> {
        let value = serde_json::to_vec(policy)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(POLICY_TABLE)?;
            table.insert(ACTIVE_KEY, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for RedbPolicyStore {
    async fn load_policy(&self) -> remedy_core::Result<Option<Policy>> {
        Ok(self.load()?)
    }

    async fn save_policy(
        &self,
        policy: &Policy,
        expected_version: Option<u64>,
    ) -> remedy_core::Result<()> {
        Ok(self.compare_and_swap(policy, expected_version)?)
    }
}
