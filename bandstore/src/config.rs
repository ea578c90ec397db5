use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{Result, StorageError};

pub const BASE_PATH_ENV: &str = "BANDSYNC_BASE_PATH";

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub transactional_path: PathBuf,
    pub document_path: PathBuf,
    pub graph_path: PathBuf,
    pub warehouse_path: PathBuf,
    pub catalog_path: PathBuf,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            transactional_path: base_path.join("transactional.sqlite"),
            document_path: base_path.join("documents.sqlite"),
            graph_path: base_path.join("graph.sqlite"),
            warehouse_path: base_path.join("warehouse.sqlite"),
            catalog_path: base_path.join("catalog.sqlite"),
        }
    }

    /// Resolves the base directory from `BANDSYNC_BASE_PATH`, reading a `.env` file first if one exists.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let base = std::env::var(BASE_PATH_ENV).map_err(|_| {
            StorageError::Config(format!("{BASE_PATH_ENV} is not set"))
        })?;
        Ok(Self::new(base))
    }
}
