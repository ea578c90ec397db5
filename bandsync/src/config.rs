use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::reference::ReferenceCatalog;

pub const DEFAULT_ACTIVITY_WINDOW_DAYS: i64 = 30;
pub const MAX_ACTIVITY_WINDOW_DAYS: i64 = 36_500;

/// Tuning for a sync run, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Look-back window for the performs-activity relation.
    pub activity_window_days: i64,
    /// Inclusive year range of the date dimension, when generated as part of a run.
    pub date_dimension: Option<YearRange>,
    /// Reference catalog to use instead of the bundled one.
    pub reference_catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start_year: i32,
    pub end_year: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            activity_window_days: DEFAULT_ACTIVITY_WINDOW_DAYS,
            date_dimension: None,
            reference_catalog: None,
        }
    }
}

impl SyncConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.activity_window_days <= 0 || self.activity_window_days > MAX_ACTIVITY_WINDOW_DAYS {
            return Err(SyncError::Config(format!(
                "activity_window_days must be in 1..={MAX_ACTIVITY_WINDOW_DAYS}, got {}",
                self.activity_window_days
            )));
        }
        if let Some(range) = self.date_dimension {
            range.validate()?;
        }
        Ok(())
    }

    pub fn load_reference(&self) -> Result<ReferenceCatalog> {
        match &self.reference_catalog {
            Some(path) => ReferenceCatalog::from_path(path),
            None => ReferenceCatalog::builtin(),
        }
    }
}

impl YearRange {
    pub fn validate(&self) -> Result<()> {
        if self.start_year > self.end_year {
            return Err(SyncError::InvalidInput(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }
        Ok(())
    }
}
