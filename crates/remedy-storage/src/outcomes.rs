//! Append-only outcome records, one per decision.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{Outcome, OutcomeStore};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::{Error, Result};

// key = decision_id, value = Outcome (JSON)
const OUTCOMES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outcomes");

pub struct RedbOutcomeStore {
    db: Arc<Database>,
}

impl RedbOutcomeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(OUTCOMES_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("outcomes_test"))
    }

    /// Insert unless an outcome for the same decision already exists.
    pub fn insert(&self, outcome: &Outcome) -> Result<()> {
        let value = serde_json::to_vec(outcome)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTCOMES_TABLE)?;
            if table.get(outcome.decision_id.as_str())?.is_some() {
                return Err(Error::Conflict {
                    expected: None,
                    found: Some(1),
                });
            }
            table.insert(outcome.decision_id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, decision_id: &str) -> Result<Option<Outcome>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTCOMES_TABLE)?;
        match table.get(decision_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Most recent outcomes first.
    pub fn list(&self, limit: usize) -> Result<Vec<Outcome>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTCOMES_TABLE)?;

        let mut outcomes = Vec::new();
        for item in table.iter()? {
            let (_id, bytes) = item?;
            outcomes.push(serde_json::from_slice::<Outcome>(bytes.value())?);
        }
        outcomes.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        outcomes.truncate(limit);
        Ok(outcomes)
    }
}

#[async_trait]
impl OutcomeStore for RedbOutcomeStore {
    async fn record_outcome(&self, outcome: &Outcome) -> remedy_core::Result<()> {
        Ok(self.insert(outcome)?)
    }

    async fn get_outcome(&self, decision_id: &str) -> remedy_core::Result<Option<Outcome>> {
        Ok(self.get(decision_id)?)
    }
}
