//! Run reporting: every named unit of work is timed and reported as started,
//! completed or failed, and row-level problems inside a unit are reported as they happen.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bandstore::catalog::Catalog;

use crate::error::Result;

pub const STATUS_STARTED: &str = "STARTED";
pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq)]
pub enum EtlEvent {
    Started {
        unit: String,
    },
    Completed {
        unit: String,
        elapsed: Duration,
        summary: String,
    },
    Failed {
        unit: String,
        elapsed: Duration,
        message: String,
    },
    RowSkipped {
        unit: String,
        reason: String,
    },
    RowFailed {
        unit: String,
        reason: String,
    },
    Progress {
        unit: String,
        done: usize,
        total: usize,
    },
}

impl EtlEvent {
    pub fn unit(&self) -> &str {
        match self {
            EtlEvent::Started { unit }
            | EtlEvent::Completed { unit, .. }
            | EtlEvent::Failed { unit, .. }
            | EtlEvent::RowSkipped { unit, .. }
            | EtlEvent::RowFailed { unit, .. }
            | EtlEvent::Progress { unit, .. } => unit,
        }
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: &EtlEvent);

    fn row_skipped(&self, unit: &str, reason: String) {
        self.report(&EtlEvent::RowSkipped {
            unit: unit.to_string(),
            reason,
        });
    }

    fn row_failed(&self, unit: &str, reason: String) {
        self.report(&EtlEvent::RowFailed {
            unit: unit.to_string(),
            reason,
        });
    }

    fn progress(&self, unit: &str, done: usize, total: usize) {
        self.report(&EtlEvent::Progress {
            unit: unit.to_string(),
            done,
            total,
        });
    }
}

fn seconds(elapsed: &Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, event: &EtlEvent) {
        match event {
            EtlEvent::Started { unit } => log::info!("{unit}: {STATUS_STARTED}"),
            EtlEvent::Completed {
                unit,
                elapsed,
                summary,
            } => log::info!(
                "{unit}: {STATUS_COMPLETED} in {} ({summary})",
                seconds(elapsed)
            ),
            EtlEvent::Failed {
                unit,
                elapsed,
                message,
            } => log::error!(
                "{unit}: {STATUS_ERROR} after {}: {message}",
                seconds(elapsed)
            ),
            EtlEvent::RowSkipped { unit, reason } => log::warn!("{unit}: skipped row: {reason}"),
            EtlEvent::RowFailed { unit, reason } => log::error!("{unit}: row failed: {reason}"),
            EtlEvent::Progress { unit, done, total } => {
                log::debug!("{unit}: {done}/{total} rows processed")
            }
        }
    }
}

/// Persists one `task_logs` row per unit in the run catalog.
///
/// Catalog write failures are logged as warnings and do not affect the unit.
pub struct CatalogReporter {
    catalog: Arc<Catalog>,
    open_tasks: Mutex<HashMap<String, i64>>,
}

impl CatalogReporter {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            open_tasks: Mutex::new(HashMap::new()),
        }
    }

    fn finish(&self, unit: &str, status: &str, details: &str) {
        let task_id = self
            .open_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(unit);
        let Some(task_id) = task_id else {
            log::warn!("{unit}: finished without a recorded start");
            return;
        };
        if let Err(err) = self.catalog.update_task_log_status(task_id, status, details) {
            log::warn!("{unit}: failed to update task log {task_id}: {err}");
        }
    }
}

impl Reporter for CatalogReporter {
    fn report(&self, event: &EtlEvent) {
        match event {
            EtlEvent::Started { unit } => {
                match self.catalog.create_task_log(unit, STATUS_STARTED) {
                    Ok(task_id) => {
                        self.open_tasks
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(unit.clone(), task_id);
                    }
                    Err(err) => log::warn!("{unit}: failed to create task log: {err}"),
                }
            }
            EtlEvent::Completed {
                unit,
                elapsed,
                summary,
            } => self.finish(
                unit,
                STATUS_COMPLETED,
                &format!("Elapsed: {}; {summary}", seconds(elapsed)),
            ),
            EtlEvent::Failed {
                unit,
                elapsed,
                message,
            } => self.finish(
                unit,
                STATUS_ERROR,
                &format!("Error: {message}; Elapsed: {}", seconds(elapsed)),
            ),
            _ => {}
        }
    }
}

/// Keeps every event; used to assert on reporting in tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<EtlEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EtlEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn skipped(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, EtlEvent::RowSkipped { .. }))
            .count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: &EtlEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: &EtlEvent) {}
}

/// Sends each event to every inner reporter in order.
#[derive(Default)]
pub struct FanoutReporter {
    inner: Vec<Arc<dyn Reporter>>,
}

impl FanoutReporter {
    pub fn new(inner: Vec<Arc<dyn Reporter>>) -> Self {
        Self { inner }
    }
}

impl Reporter for FanoutReporter {
    fn report(&self, event: &EtlEvent) {
        for reporter in &self.inner {
            reporter.report(event);
        }
    }
}

/// Runs `fut` as the named unit: reports the start, then completion with elapsed time
/// and the outcome's summary, or the error with elapsed time. The error is returned
/// unchanged.
pub async fn run_unit<T, F>(reporter: &dyn Reporter, unit: &str, fut: F) -> Result<T>
where
    T: Display,
    F: Future<Output = Result<T>>,
{
    reporter.report(&EtlEvent::Started {
        unit: unit.to_string(),
    });
    let start = Instant::now();
    match fut.await {
        Ok(outcome) => {
            reporter.report(&EtlEvent::Completed {
                unit: unit.to_string(),
                elapsed: start.elapsed(),
                summary: outcome.to_string(),
            });
            Ok(outcome)
        }
        Err(err) => {
            reporter.report(&EtlEvent::Failed {
                unit: unit.to_string(),
                elapsed: start.elapsed(),
                message: err.to_string(),
            });
            Err(err)
        }
    }
}
