//! Shared database singleton for redb connections.
//!
//! Every store in this crate lives in the same database file. The cache keyed
//! by path lets each store open it independently while sharing one
//! `Database` handle.

use crate::{Error, Result};
use parking_lot::RwLock;
use redb::Database;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Global cache of open databases.
fn db_cache() -> &'static RwLock<HashMap<String, Arc<Database>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<Database>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get or open a database, caching the connection for reuse.
///
/// Parent directories are created as needed.
pub fn get_or_open_db<P: AsRef<Path>>(path: P) -> Result<Arc<Database>> {
    let path_str = path.as_ref().to_string_lossy().to_string();

    if let Some(db) = db_cache().read().get(&path_str) {
        return Ok(db.clone());
    }

    let mut cache = db_cache().write();
    // Another thread may have opened it between the two locks.
    if let Some(db) = cache.get(&path_str) {
        return Ok(db.clone());
    }

    let path_ref = path.as_ref();
    let db = if path_ref.exists() {
        Database::open(path_ref).map_err(|e| Error::Storage(e.to_string()))?
    } else {
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Database::create(path_ref).map_err(|e| Error::Storage(e.to_string()))?
    };

    let db = Arc::new(db);
    cache.insert(path_str, db.clone());
    tracing::debug!(path = %path_ref.display(), "Opened redb database");
    Ok(db)
}

/// Remove a database from the cache. It stays open while other handles exist.
pub fn close_db<P: AsRef<Path>>(path: P) -> Option<Arc<Database>> {
    let path_str = path.as_ref().to_string_lossy().to_string();
    db_cache().write().remove(&path_str)
}

/// Check if a specific database is currently cached.
pub fn is_cached<P: AsRef<Path>>(path: P) -> bool {
    let path_str = path.as_ref().to_string_lossy().to_string();
    db_cache().read().contains_key(&path_str)
}

/// Fresh database path in the temp dir, for tests and throwaway runs.
pub(crate) fn temp_db_path(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}_{}.redb", prefix, uuid::Uuid::new_v4()))
}
