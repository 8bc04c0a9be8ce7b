//! Guardrail rule storage.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use remedy_core::{default_guardrails, order_guardrails, Guardrail, GuardrailStore};
use std::path::Path;
use std::sync::Arc;

use crate::singleton::{get_or_open_db, temp_db_path};
use crate::Result;

// key = guardrail id, value = Guardrail (JSON)
const GUARDRAILS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("guardrails");

pub struct RedbGuardrailStore {
    db: Arc<Database>,
}

impl RedbGuardrailStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let db = get_or_open_db(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(GUARDRAILS_TABLE)?;
        write_txn.commit()?;
        Ok(Arc::new(Self { db }))
    }

    pub fn memory() -> Result<Arc<Self>> {
        Self::open(temp_db_path("guardrails_test"))
    }

    /// Insert or replace a rule by id.
    pub fn upsert(&self, guardrail: &Guardrail) -> Result<()> {
        let value = serde_json::to_vec(guardrail)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GUARDRAILS_TABLE)?;
            table.insert(guardrail.id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Returns whether a rule was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(GUARDRAILS_TABLE)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All rules, enabled or not, by descending priority.
    pub fn list_all(&self) -> Result<Vec<Guardrail>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GUARDRAILS_TABLE)?;

        let mut rules = Vec::new();
        for item in table.iter()? {
            let (_id, bytes) = item?;
            rules.push(serde_json::from_slice::<Guardrail>(bytes.value())?);
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    /// Enabled rules in evaluation order.
    pub fn list_enabled(&self) -> Result<Vec<Guardrail>> {
        Ok(order_guardrails(self.list_all()?))
    }

    /// Write the built-in rule set, leaving existing ids untouched.
    /// Returns how many rules were added.
    pub fn seed_defaults(&self) -> Result<usize> {
        let existing: Vec<String> = self.list_all()?.into_iter().map(|g| g.id).collect();
        let mut added = 0;
        for rule in default_guardrails() {
            if !existing.contains(&rule.id) {
                self.upsert(&rule)?;
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!(category = "guardrails", added, "Seeded default guardrails");
        }
        Ok(added)
    }
}

#[async_trait]
impl GuardrailStore for RedbGuardrailStore {
    async fn list_enabled_guardrails(&self) -> remedy_core::Result<Vec<Guardrail>> {
        Ok(self.list_enabled()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{Action, GuardrailPolicy};

    #[tokio::test]
    async fn test_enabled_rules_in_priority_order() {
        let store = RedbGuardrailStore::memory().unwrap();
        store
            .upsert(&Guardrail::new("low", "Low", GuardrailPolicy::AllowWithLimit).with_priority(1))
            .unwrap();
        store
            .upsert(&Guardrail::new("high", "High", GuardrailPolicy::Deny).with_priority(50))
            .unwrap();
        let mut disabled = Guardrail::new("off", "Off", GuardrailPolicy::Deny).with_priority(99);
        disabled.enabled = false;
        store.upsert(&disabled).unwrap();

        let rules = store.list_enabled_guardrails().await.unwrap();
        let ids: Vec<_> = rules.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_seed_defaults_is_idempotent() {
        let store = RedbGuardrailStore::memory().unwrap();
        let first = store.seed_defaults().unwrap();
        assert_eq!(first, default_guardrails().len());
        assert_eq!(store.seed_defaults().unwrap(), 0);

        let rules = store.list_enabled_guardrails().await.unwrap();
        assert_eq!(rules.len(), first);
        assert_eq!(rules[0].priority, 100);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete() {
        let store = RedbGuardrailStore::memory().unwrap();
        let rule = Guardrail::new("g1", "Approve scale", GuardrailPolicy::RequireApproval)
            .with_action(Action::ScaleUp);
        store.upsert(&rule).unwrap();
        store.upsert(&rule.clone().with_priority(5)).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].priority, 5);

        assert!(store.delete("g1").unwrap());
        assert!(!store.delete("g1").unwrap());
    }
}
