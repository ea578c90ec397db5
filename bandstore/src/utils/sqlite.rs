use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{Result, StorageError};

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens a store database. Failure here means the store is unreachable.
pub fn open(store: &str, path: &Path) -> Result<SharedConnection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path).map_err(|e| {
        StorageError::Connection(format!("{store} at {}: {e}", path.display()))
    })?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn open_in_memory(store: &str) -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| StorageError::Connection(format!("{store} (in-memory): {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn lock<'a>(store: &str, conn: &'a SharedConnection) -> Result<MutexGuard<'a, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::Connection(format!("{store} connection mutex poisoned")))
}
