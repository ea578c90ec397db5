pub mod catalog;
pub mod config;
pub mod document;
pub mod errors;
pub mod graph;
pub mod models;
pub mod sensor;
pub mod transactional;
pub mod utils;
pub mod warehouse;

use crate::catalog::Catalog;
use crate::config::StorageConfig;
use crate::document::SqliteDocumentStore;
use crate::errors::Result;
use crate::graph::SqliteGraphStore;
use crate::transactional::SqliteTransactionalStore;
use crate::warehouse::SqliteWarehouseStore;
use std::sync::Arc;

/// The storage layer of the wristband sync engine.
///
/// `BandStores` opens the four stores the pipeline moves data between, plus the run
/// catalog that records every unit of work:
/// - `transactional`: users, genders, payments, subscriptions and the audit log.
/// - `documents`: mirrored users and the tagged sensor / app-usage collections.
/// - `graph`: User, Activity and Goal nodes and the relationships derived between them.
/// - `warehouse`: dimensions, fact tables and the warehouse audit log.
///
/// # Example
///
/// ```rust,no_run
/// use bandstore::{BandStores, config::StorageConfig};
/// use tempfile::tempdir;
///
/// let dir = tempdir().unwrap();
/// let stores = BandStores::open(StorageConfig::new(dir.path())).unwrap();
/// let recent = stores.catalog.recent_task_logs(10).unwrap();
/// ```
pub struct BandStores {
    pub config: Option<StorageConfig>,
    pub transactional: Arc<SqliteTransactionalStore>,
    pub documents: Arc<SqliteDocumentStore>,
    pub graph: Arc<SqliteGraphStore>,
    pub warehouse: Arc<SqliteWarehouseStore>,
    pub catalog: Arc<Catalog>,
}

impl BandStores {
    /// Opens (and creates if needed) every store under the configured paths.
    ///
    /// Any store that cannot be opened fails the whole call with a connection error.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        log::info!(
            "opened stores: transactional={}, documents={}, graph={}, warehouse={}",
            config.transactional_path.display(),
            config.document_path.display(),
            config.graph_path.display(),
            config.warehouse_path.display()
        );

        Ok(Self {
            transactional: Arc::new(SqliteTransactionalStore::new(&config)?),
            documents: Arc::new(SqliteDocumentStore::new(&config)?),
            graph: Arc::new(SqliteGraphStore::new(&config)?),
            warehouse: Arc::new(SqliteWarehouseStore::new(&config)?),
            catalog,
            config: Some(config),
        })
    }

    /// Every store in memory; nothing touches disk.
    pub fn in_memory() -> Result<Self> {
        let catalog = Arc::new(Catalog::in_memory()?);
        catalog.initialize_schema()?;
        Ok(Self {
            config: None,
            transactional: Arc::new(SqliteTransactionalStore::in_memory()?),
            documents: Arc::new(SqliteDocumentStore::in_memory()?),
            graph: Arc::new(SqliteGraphStore::in_memory()?),
            warehouse: Arc::new(SqliteWarehouseStore::in_memory()?),
            catalog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_band_stores_initialization() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("nested"));

        let stores = BandStores::open(config.clone());
        assert!(stores.is_ok());

        // Check if files were created
        assert!(config.transactional_path.exists());
        assert!(config.document_path.exists());
        assert!(config.graph_path.exists());
        assert!(config.warehouse_path.exists());
        assert!(config.catalog_path.exists());
    }

    #[test]
    fn test_unreachable_store_is_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let config = StorageConfig::new(&blocker);

        let err = BandStores::open(config).err().unwrap();
        assert!(err.is_fatal());
    }
}
