use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unreachable: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Connection failures abort a run; everything else is scoped to the row or phase that hit it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
