//! Incremental extraction: everything strictly newer than a watermark.
//!
//! New-user and all-user extraction fail the calling unit on any error. The other
//! extractors are best-effort: a non-fatal storage error is reported and yields no rows,
//! while an unreachable store still aborts the run.

use bandstore::document::{DocumentStore, SensorQuery};
use bandstore::errors::StorageError;
use bandstore::models::{AuditOperation, Payment, User};
use bandstore::sensor::{AppUsageRecord, SensorKind, SensorRecord};
use bandstore::transactional::TransactionalStore;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::report::Reporter;

fn best_effort<T>(
    reporter: &dyn Reporter,
    unit: &str,
    what: &str,
    result: std::result::Result<Vec<T>, StorageError>,
) -> Result<Vec<T>> {
    match result {
        Ok(rows) => Ok(rows),
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            reporter.row_failed(unit, format!("extracting {what}: {err}"));
            Ok(Vec::new())
        }
    }
}

pub async fn new_users(tx: &dyn TransactionalStore, since: DateTime<Utc>) -> Result<Vec<User>> {
    let users = tx.users_registered_after(since).await?;
    log::info!("extracted {} users registered after {since}", users.len());
    Ok(users)
}

pub async fn all_users(tx: &dyn TransactionalStore) -> Result<Vec<User>> {
    Ok(tx.all_users().await?)
}

/// Users with an UPDATE logged after `since`, as they currently are in the source.
pub async fn updated_users(
    tx: &dyn TransactionalStore,
    since: DateTime<Utc>,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<Vec<User>> {
    let keys = best_effort(
        reporter,
        unit,
        "updated user keys",
        tx.audited_keys_since("usuarios", AuditOperation::Update, since)
            .await,
    )?;
    let mut ids = Vec::with_capacity(keys.len());
    for key in keys {
        match key.parse::<i64>() {
            Ok(id) => ids.push(id),
            Err(_) => reporter.row_skipped(unit, format!("audit entry with non-numeric key '{key}'")),
        }
    }
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let users = best_effort(reporter, unit, "updated users", tx.users_by_ids(&ids).await)?;
    log::info!("extracted {} users updated after {since}", users.len());
    Ok(users)
}

pub async fn new_payments(
    tx: &dyn TransactionalStore,
    since: DateTime<Utc>,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<Vec<Payment>> {
    let payments = best_effort(reporter, unit, "payments", tx.payments_after(since).await)?;
    log::info!("extracted {} payments after {since}", payments.len());
    Ok(payments)
}

pub async fn new_activity_records(
    docs: &dyn DocumentStore,
    user_id: i64,
    since: DateTime<Utc>,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<Vec<SensorRecord>> {
    let query = SensorQuery::for_user(user_id)
        .kind(SensorKind::Activity)
        .after(since);
    let records = best_effort(
        reporter,
        unit,
        &format!("activity records of user {user_id}"),
        docs.sensor_records(&query).await,
    )?;
    log::debug!("user {user_id}: {} activity records after {since}", records.len());
    Ok(records)
}

pub async fn new_app_usage(
    docs: &dyn DocumentStore,
    user_id: i64,
    since: DateTime<Utc>,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<Vec<AppUsageRecord>> {
    let records = best_effort(
        reporter,
        unit,
        &format!("app usage of user {user_id}"),
        docs.app_usage_after(user_id, since).await,
    )?;
    log::debug!("user {user_id}: {} app usage records after {since}", records.len());
    Ok(records)
}
