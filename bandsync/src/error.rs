use bandstore::errors::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid reference catalog: {0}")]
    Reference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Phase {phase} failed: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Storage(e) => e.is_fatal(),
            SyncError::Phase { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
