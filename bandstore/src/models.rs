use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// --- Transactional store rows ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub registration_date: DateTime<Utc>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>, // resolved through `generos`
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub amount: f64,
    pub transaction_date: DateTime<Utc>,
    pub payment_method_id: i64,
    pub payment_status_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Insert => "INSERT",
            AuditOperation::Update => "UPDATE",
            AuditOperation::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub affected_table: String,
    pub operation: AuditOperation,
    pub primary_key: String,
    pub operation_date: DateTime<Utc>,
}

// --- Document store rows ---

/// The subset of a user copied into the `usuarios_sensor` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredUser {
    pub id: i64,
    pub name: String,
    pub registration_date: DateTime<Utc>,
}

impl From<&User> for MirroredUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            registration_date: user.registration_date,
        }
    }
}

// --- Warehouse rows ---

#[derive(Debug, Clone, PartialEq)]
pub struct UserDimRow {
    pub user_id: i64,
    pub name: String,
    pub gender: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub birth_date: Option<NaiveDate>,
}

impl From<&User> for UserDimRow {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            name: user.name.clone(),
            gender: user.gender.clone(),
            registration_date: user.registration_date,
            birth_date: user.birth_date,
        }
    }
}

/// A calendar day before it is assigned a surrogate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day: u32,
    pub month: u32,
    pub quarter: u32,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateDimRow {
    pub id: i64,
    pub day: CalendarDay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFactRow {
    pub user_id: i64,
    pub activity_id: i64,
    pub date_id: i64,
    pub time_of_day: NaiveTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentFactRow {
    pub user_id: i64,
    pub plan_id: i64,
    pub payment_method_id: i64,
    pub payment_status_id: i64,
    pub date_id: i64,
    pub time_of_day: NaiveTime,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactTable {
    Activity,
    Payment,
}

impl FactTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            FactTable::Activity => "hechos_actividad",
            FactTable::Payment => "hechos_pagos",
        }
    }
}

// --- Run catalog (SQLite) models ---

#[derive(Debug, Clone, Serialize)]
pub struct TaskLog {
    pub task_id: i64,
    pub task_name: String,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub details: Option<String>,
}
