//! Last-synchronized points, recomputed from the target store on every run.

use bandstore::models::{AuditOperation, FactTable};
use bandstore::warehouse::WarehouseStore;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkTarget {
    UserDimension,
    Facts(FactTable),
}

impl WatermarkTarget {
    pub fn table_name(&self) -> &'static str {
        match self {
            WatermarkTarget::UserDimension => "dim_usuario",
            WatermarkTarget::Facts(table) => table.table_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkMode {
    /// Highest value of the target's natural increasing key.
    MaxColumn,
    /// Latest UPDATE logged against the target in the warehouse audit log.
    AuditLog,
}

/// Substituted when a target has no watermark yet.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn or_epoch(mark: Option<DateTime<Utc>>) -> DateTime<Utc> {
    mark.unwrap_or_else(epoch)
}

/// Fact rows store their time of day in whole seconds, so a fact watermark covers the
/// entire second it names.
pub async fn get_watermark(
    warehouse: &dyn WarehouseStore,
    target: WatermarkTarget,
    mode: WatermarkMode,
) -> Result<Option<DateTime<Utc>>> {
    let mark = match (mode, target) {
        (WatermarkMode::MaxColumn, WatermarkTarget::UserDimension) => {
            warehouse.latest_user_registration().await?
        }
        (WatermarkMode::MaxColumn, WatermarkTarget::Facts(table)) => warehouse
            .latest_fact_instant(table)
            .await?
            .map(|ts| ts + Duration::seconds(1) - Duration::microseconds(1)),
        (WatermarkMode::AuditLog, target) => {
            warehouse
                .latest_audit(target.table_name(), AuditOperation::Update)
                .await?
        }
    };
    match mark {
        Some(ts) => log::debug!("{}: watermark {ts}", target.table_name()),
        None => log::info!("{}: no watermark, first load", target.table_name()),
    }
    Ok(mark)
}
