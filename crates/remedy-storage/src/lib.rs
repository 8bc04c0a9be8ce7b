//! redb persistence for the remedy engine.
//!
//! Every store opens the same database file through [`singleton`], each
//! owning one table:
//!
//! | Store | Table | Trait |
//! |-------|-------|-------|
//! | [`RedbPolicyStore`] | `policy` | `PolicyStore` |
//! | [`RedbDecisionStore`] | `decisions` | `DecisionStore` |
//! | [`RedbGuardrailStore`] | `guardrails` | `GuardrailStore` |
//! | [`RedbOutcomeStore`] | `outcomes` | `OutcomeStore` |
//! | [`RedbAuditLog`] | `audit_log` | `AuditSink` |
//! | [`RedbLeaseStore`] | `leases` | `LeaseStore` |
//! | [`RedbJobOutbox`] | `remediation_jobs` | `RemediationQueue` |
//!
//! ## Example
//!
//! ```rust,no_run
//! use remedy_storage::Stores;
//!
//! let stores = Stores::open("./data/remedy.redb")?;
//! stores.guardrails.seed_defaults()?;
//! # Ok::<(), remedy_storage::Error>(())
//! ```

pub mod audit;
pub mod decisions;
pub mod error;
pub mod guardrails;
pub mod jobs;
pub mod leases;
pub mod outcomes;
pub mod policy;
pub mod singleton;

pub use audit::RedbAuditLog;
pub use decisions::RedbDecisionStore;
pub use error::{Error, RemedyError, Result};
pub use guardrails::RedbGuardrailStore;
pub use jobs::{JobRecord, JobStatus, RedbJobOutbox};
pub use leases::RedbLeaseStore;
pub use outcomes::RedbOutcomeStore;
pub use policy::RedbPolicyStore;
pub use singleton::{close_db, get_or_open_db, is_cached};

use std::path::Path;
use std::sync::Arc;

/// All stores over one database file.
#[derive(Clone)]
pub struct Stores {
    pub policy: Arc<RedbPolicyStore>,
    pub decisions: Arc<RedbDecisionStore>,
    pub guardrails: Arc<RedbGuardrailStore>,
    pub outcomes: Arc<RedbOutcomeStore>,
    pub audit: Arc<RedbAuditLog>,
    pub leases: Arc<RedbLeaseStore>,
    pub jobs: Arc<RedbJobOutbox>,
}

impl Stores {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            policy: RedbPolicyStore::open(path)?,
            decisions: RedbDecisionStore::open(path)?,
            guardrails: RedbGuardrailStore::open(path)?,
            outcomes: RedbOutcomeStore::open(path)?,
            audit: RedbAuditLog::open(path)?,
            leases: RedbLeaseStore::open(path)?,
            jobs: RedbJobOutbox::open(path)?,
        })
    }

    /// Stores over a fresh file in the temp dir.
    pub fn memory() -> Result<Self> {
        Self::open(singleton::temp_db_path("remedy_test"))
    }
}
