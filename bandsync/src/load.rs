//! Dimension and fact loading. Rows are written one at a time; a row whose surrogate key
//! cannot be resolved is skipped, a row whose write fails is counted, and the batch
//! carries on either way. Only an unreachable store stops a batch.

use std::fmt;

use bandstore::document::DocumentStore;
use bandstore::errors::StorageError;
use bandstore::models::{
    ActivityFactRow, CalendarDay, FactTable, MirroredUser, PaymentFactRow, UserDimRow,
};
use bandstore::sensor::AppEvent;
use bandstore::transactional::TransactionalStore;
use bandstore::utils::time::split_timestamp;
use bandstore::warehouse::WarehouseStore;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::config::YearRange;
use crate::error::{Result, SyncError};
use crate::extract;
use crate::reference::ReferenceCatalog;
use crate::report::Reporter;
use crate::watermark::{get_watermark, or_epoch, WatermarkMode, WatermarkTarget};

pub const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub loaded: usize,
    /// Rows that needed no write, e.g. a user already mirrored.
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Stale rows deleted because their source entry is gone.
    pub removed: usize,
}

impl LoadStats {
    pub fn errors(&self) -> usize {
        self.skipped + self.failed
    }

    pub fn absorb(&mut self, other: LoadStats) {
        self.loaded += other.loaded;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.removed += other.removed;
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loaded={} unchanged={} skipped={} failed={} removed={}",
            self.loaded, self.unchanged, self.skipped, self.failed, self.removed
        )
    }
}

fn row_failed(
    stats: &mut LoadStats,
    reporter: &dyn Reporter,
    unit: &str,
    what: String,
    err: StorageError,
) -> Result<()> {
    if err.is_fatal() {
        return Err(err.into());
    }
    reporter.row_failed(unit, format!("{what}: {err}"));
    stats.failed += 1;
    Ok(())
}

fn row_skipped(stats: &mut LoadStats, reporter: &dyn Reporter, unit: &str, reason: String) {
    reporter.row_skipped(unit, reason);
    stats.skipped += 1;
}

/// Copies transactional users missing from the document store's user collection.
pub async fn mirror_users(
    tx: &dyn TransactionalStore,
    docs: &dyn DocumentStore,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let users = extract::all_users(tx).await?;
    let mut stats = LoadStats::default();
    for user in &users {
        match docs.find_mirrored_user(user.id).await {
            Ok(Some(_)) => {
                stats.unchanged += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                row_failed(&mut stats, reporter, unit, format!("user {}", user.id), err)?;
                continue;
            }
        }
        match docs.insert_mirrored_user(&MirroredUser::from(user)).await {
            Ok(()) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, format!("user {}", user.id), err)?,
        }
    }
    log::info!(
        "mirrored {} of {} users ({} already present)",
        stats.loaded,
        users.len(),
        stats.unchanged
    );
    Ok(stats)
}

/// Inserts users registered after the latest registration already in `dim_usuario`.
pub async fn load_user_dimension(
    tx: &dyn TransactionalStore,
    wh: &dyn WarehouseStore,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let since = or_epoch(
        get_watermark(wh, WatermarkTarget::UserDimension, WatermarkMode::MaxColumn).await?,
    );
    let users = extract::new_users(tx, since).await?;
    let mut stats = LoadStats::default();
    for user in &users {
        match wh.insert_user(&UserDimRow::from(user)).await {
            Ok(()) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, format!("user {}", user.id), err)?,
        }
    }
    Ok(stats)
}

/// Re-applies source updates logged after the latest warehouse UPDATE entry. Users not yet
/// in the dimension are skipped; each applied update is logged in the warehouse at `now`.
pub async fn refresh_user_dimension(
    tx: &dyn TransactionalStore,
    wh: &dyn WarehouseStore,
    reporter: &dyn Reporter,
    unit: &str,
    now: DateTime<Utc>,
) -> Result<LoadStats> {
    let since = or_epoch(
        get_watermark(wh, WatermarkTarget::UserDimension, WatermarkMode::AuditLog).await?,
    );
    let users = extract::updated_users(tx, since, reporter, unit).await?;
    let mut stats = LoadStats::default();
    for user in &users {
        match wh.find_user(user.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                row_skipped(
                    &mut stats,
                    reporter,
                    unit,
                    format!("user {} is not in dim_usuario", user.id),
                );
                continue;
            }
            Err(err) => {
                row_failed(&mut stats, reporter, unit, format!("user {}", user.id), err)?;
                continue;
            }
        }
        match wh.update_user(&UserDimRow::from(user), now).await {
            Ok(()) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, format!("user {}", user.id), err)?,
        }
    }
    Ok(stats)
}

/// Makes every catalog activity and every app event type resolvable in `dim_actividad`.
pub async fn load_activity_dimension(
    wh: &dyn WarehouseStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let names = catalog
        .activities
        .iter()
        .map(|a| a.name.as_str())
        .chain(AppEvent::EVENT_TYPES);
    let mut stats = LoadStats::default();
    for name in names {
        match wh.activity_id(name).await {
            Ok(Some(_)) => {
                stats.unchanged += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                row_failed(&mut stats, reporter, unit, format!("activity '{name}'"), err)?;
                continue;
            }
        }
        match wh.merge_activity(name).await {
            Ok(_) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, format!("activity '{name}'"), err)?,
        }
    }
    Ok(stats)
}

async fn insert_activity_fact(
    wh: &dyn WarehouseStore,
    stats: &mut LoadStats,
    reporter: &dyn Reporter,
    unit: &str,
    user_id: i64,
    activity: &str,
    timestamp: &DateTime<Utc>,
) -> Result<()> {
    let what = format!("user {user_id} '{activity}' at {timestamp}");
    let activity_id = match wh.activity_id(activity).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            row_skipped(stats, reporter, unit, format!("{what}: unknown activity"));
            return Ok(());
        }
        Err(err) => return row_failed(stats, reporter, unit, what, err),
    };
    let (date, time_of_day) = split_timestamp(timestamp);
    let date_id = match wh.date_id(date).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            row_skipped(stats, reporter, unit, format!("{what}: no dim_fecha row for {date}"));
            return Ok(());
        }
        Err(err) => return row_failed(stats, reporter, unit, what, err),
    };
    let row = ActivityFactRow {
        user_id,
        activity_id,
        date_id,
        time_of_day,
    };
    match wh.insert_activity_fact(&row).await {
        Ok(()) => {
            stats.loaded += 1;
            Ok(())
        }
        Err(err) => row_failed(stats, reporter, unit, what, err),
    }
}

/// Loads sensor activity records (by activity name) and app-usage records (by event
/// type) newer than the `hechos_actividad` watermark, for every mirrored user.
pub async fn load_activity_facts(
    docs: &dyn DocumentStore,
    wh: &dyn WarehouseStore,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let since = or_epoch(
        get_watermark(
            wh,
            WatermarkTarget::Facts(FactTable::Activity),
            WatermarkMode::MaxColumn,
        )
        .await?,
    );
    let users = docs.mirrored_users().await?;
    let mut stats = LoadStats::default();
    for user in &users {
        let sensor = extract::new_activity_records(docs, user.id, since, reporter, unit).await?;
        for record in &sensor {
            let Some(activity) = record.reading.activity_name() else {
                continue;
            };
            insert_activity_fact(
                wh,
                &mut stats,
                reporter,
                unit,
                user.id,
                activity,
                &record.timestamp,
            )
            .await?;
        }

        let usage = extract::new_app_usage(docs, user.id, since, reporter, unit).await?;
        for record in &usage {
            insert_activity_fact(
                wh,
                &mut stats,
                reporter,
                unit,
                user.id,
                record.event.event_type(),
                &record.timestamp,
            )
            .await?;
        }
    }
    Ok(stats)
}

/// Loads payments newer than the `hechos_pagos` watermark. Both the transaction date and
/// the subscription plan must resolve or the payment is skipped.
pub async fn load_payment_facts(
    tx: &dyn TransactionalStore,
    wh: &dyn WarehouseStore,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let since = or_epoch(
        get_watermark(
            wh,
            WatermarkTarget::Facts(FactTable::Payment),
            WatermarkMode::MaxColumn,
        )
        .await?,
    );
    let payments = extract::new_payments(tx, since, reporter, unit).await?;
    let mut stats = LoadStats::default();
    for payment in &payments {
        let what = format!("payment {}", payment.id);
        let (date, time_of_day) = split_timestamp(&payment.transaction_date);
        let date_id = match wh.date_id(date).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                row_skipped(&mut stats, reporter, unit, format!("{what}: no dim_fecha row for {date}"));
                continue;
            }
            Err(err) => {
                row_failed(&mut stats, reporter, unit, what, err)?;
                continue;
            }
        };
        let plan_id = match tx.plan_for_payment(payment.id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                row_skipped(&mut stats, reporter, unit, format!("{what}: no subscription plan"));
                continue;
            }
            Err(err) => {
                row_failed(&mut stats, reporter, unit, what, err)?;
                continue;
            }
        };
        let row = PaymentFactRow {
            user_id: payment.user_id,
            plan_id,
            payment_method_id: payment.payment_method_id,
            payment_status_id: payment.payment_status_id,
            date_id,
            time_of_day,
            amount: payment.amount,
        };
        match wh.insert_payment_fact(&row).await {
            Ok(()) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, what, err)?,
        }
    }
    log::info!("payment facts: {stats} of {} extracted", payments.len());
    Ok(stats)
}

pub fn calendar_day(date: NaiveDate) -> CalendarDay {
    CalendarDay {
        date,
        day: date.day(),
        month: date.month(),
        quarter: (date.month() - 1) / 3 + 1,
        year: date.year(),
    }
}

/// Every calendar day of the inclusive year range.
pub fn date_range(range: YearRange) -> Result<Vec<CalendarDay>> {
    range.validate()?;
    let start = NaiveDate::from_ymd_opt(range.start_year, 1, 1)
        .ok_or_else(|| SyncError::InvalidInput(format!("year {} out of range", range.start_year)))?;
    let end = NaiveDate::from_ymd_opt(range.end_year, 12, 31)
        .ok_or_else(|| SyncError::InvalidInput(format!("year {} out of range", range.end_year)))?;
    Ok(start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(calendar_day)
        .collect())
}

/// Inserts every day of the range into `dim_fecha`. Dates already present count as
/// failed rows; progress is reported every [`PROGRESS_EVERY`] rows.
pub async fn load_date_dimension(
    wh: &dyn WarehouseStore,
    range: YearRange,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let days = date_range(range)?;
    let total = days.len();
    let mut stats = LoadStats::default();
    for (i, day) in days.iter().enumerate() {
        match wh.insert_date(day).await {
            Ok(_) => stats.loaded += 1,
            Err(err) => row_failed(&mut stats, reporter, unit, format!("date {}", day.date), err)?,
        }
        let done = i + 1;
        if done % PROGRESS_EVERY == 0 || done == total {
            reporter.progress(unit, done, total);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_covers_leap_year() {
        let days = date_range(YearRange {
            start_year: 2024,
            end_year: 2025,
        })
        .unwrap();
        assert_eq!(days.len(), 366 + 365);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(days.last().unwrap().date, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn test_quarter_boundaries() {
        let q = |m| calendar_day(NaiveDate::from_ymd_opt(2025, m, 1).unwrap()).quarter;
        assert_eq!([q(1), q(3), q(4), q(6), q(7), q(9), q(10), q(12)], [1, 1, 2, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = date_range(YearRange {
            start_year: 2026,
            end_year: 2025,
        });
        assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    }

    #[test]
    fn test_errors_counts_skips_and_failures() {
        let mut stats = LoadStats {
            loaded: 4,
            unchanged: 2,
            skipped: 1,
            failed: 0,
            removed: 0,
        };
        stats.absorb(LoadStats {
            failed: 2,
            ..LoadStats::default()
        });
        assert_eq!(stats.errors(), 3);
        assert_eq!(stats.to_string(), "loaded=4 unchanged=2 skipped=1 failed=2 removed=0");
    }
}
