//! Analytical warehouse: user, date and activity dimensions plus the two fact tables.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{
    ActivityFactRow, AuditOperation, CalendarDay, FactTable, PaymentFactRow, UserDimRow,
};
use crate::utils::sqlite::{self, SharedConnection};
use crate::utils::time::{format_date, format_time, from_micros, parse_date, parse_time, to_micros};

const STORE: &str = "warehouse";

pub const TABLES: [&str; 6] = [
    "dim_usuario",
    "dim_fecha",
    "dim_actividad",
    "hechos_actividad",
    "hechos_pagos",
    "log_eventos",
];

#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Registration date of the most recently registered user in `dim_usuario`.
    async fn latest_user_registration(&self) -> Result<Option<DateTime<Utc>>>;

    /// Calendar date of the highest date id in the fact table, combined with the latest
    /// time of day recorded on that date.
    async fn latest_fact_instant(&self, table: FactTable) -> Result<Option<DateTime<Utc>>>;

    /// Latest operation date logged for `(table, operation)`.
    async fn latest_audit(&self, table: &str, operation: AuditOperation) -> Result<Option<DateTime<Utc>>>;

    async fn insert_user(&self, row: &UserDimRow) -> Result<()>;

    async fn find_user(&self, user_id: i64) -> Result<Option<UserDimRow>>;

    /// Overwrites an existing dimension row and logs an UPDATE entry stamped `at`.
    async fn update_user(&self, row: &UserDimRow, at: DateTime<Utc>) -> Result<()>;

    /// Inserts a calendar day and returns its surrogate id. Fails on a duplicate date.
    async fn insert_date(&self, day: &CalendarDay) -> Result<i64>;

    async fn date_id(&self, date: NaiveDate) -> Result<Option<i64>>;

    /// Returns the id of the activity, inserting it when unknown.
    async fn merge_activity(&self, description: &str) -> Result<i64>;

    async fn activity_id(&self, description: &str) -> Result<Option<i64>>;

    async fn insert_activity_fact(&self, row: &ActivityFactRow) -> Result<()>;

    async fn insert_payment_fact(&self, row: &PaymentFactRow) -> Result<()>;

    async fn activity_facts(&self) -> Result<Vec<ActivityFactRow>>;

    async fn count_rows(&self, table: &str) -> Result<u64>;
}

pub struct SqliteWarehouseStore {
    conn: SharedConnection,
}

impl SqliteWarehouseStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = Self {
            conn: sqlite::open(STORE, &config.warehouse_path)?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: sqlite::open_in_memory(STORE)?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS dim_usuario (
                id_usuario INTEGER PRIMARY KEY,
                nombre TEXT NOT NULL,
                genero TEXT,
                fecha_registro INTEGER NOT NULL,
                fecha_nacimiento TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dim_usuario_registro ON dim_usuario (fecha_registro);
            CREATE TABLE IF NOT EXISTS dim_fecha (
                id_fecha INTEGER PRIMARY KEY AUTOINCREMENT,
                fecha TEXT NOT NULL UNIQUE,
                dia INTEGER NOT NULL,
                mes INTEGER NOT NULL,
                trimestre INTEGER NOT NULL,
                anio INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dim_actividad (
                id_actividad INTEGER PRIMARY KEY AUTOINCREMENT,
                descripcion TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS hechos_actividad (
                id_hecho INTEGER PRIMARY KEY AUTOINCREMENT,
                id_usuario INTEGER NOT NULL,
                id_actividad INTEGER NOT NULL REFERENCES dim_actividad(id_actividad),
                id_fecha INTEGER NOT NULL REFERENCES dim_fecha(id_fecha),
                hora_registro TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hechos_actividad_fecha ON hechos_actividad (id_fecha);
            CREATE TABLE IF NOT EXISTS hechos_pagos (
                id_hecho INTEGER PRIMARY KEY AUTOINCREMENT,
                id_usuario INTEGER NOT NULL,
                id_plan INTEGER NOT NULL,
                id_metodo_pago INTEGER NOT NULL,
                id_estado_pago INTEGER NOT NULL,
                id_fecha INTEGER NOT NULL REFERENCES dim_fecha(id_fecha),
                hora_registro TEXT NOT NULL,
                monto_pago REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hechos_pagos_fecha ON hechos_pagos (id_fecha);
            CREATE TABLE IF NOT EXISTS log_eventos (
                id_evento INTEGER PRIMARY KEY AUTOINCREMENT,
                tabla_afectada TEXT NOT NULL,
                operacion TEXT NOT NULL,
                llave_primaria TEXT NOT NULL,
                fecha_operacion INTEGER NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }
}

fn read_user(conn: &Connection, user_id: i64) -> Result<Option<UserDimRow>> {
    let raw = conn
        .query_row(
            "SELECT nombre, genero, fecha_registro, fecha_nacimiento FROM dim_usuario
             WHERE id_usuario = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((name, gender, registered, birth)) = raw else {
        return Ok(None);
    };
    Ok(Some(UserDimRow {
        user_id,
        name,
        gender,
        registration_date: from_micros("dim_usuario", registered)?,
        birth_date: birth
            .as_deref()
            .map(|b| parse_date("dim_usuario", b))
            .transpose()?,
    }))
}

#[async_trait]
impl WarehouseStore for SqliteWarehouseStore {
    async fn latest_user_registration(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let latest: Option<i64> = conn
            .query_row(
                "SELECT fecha_registro FROM dim_usuario ORDER BY fecha_registro DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        latest.map(|m| from_micros("dim_usuario", m)).transpose()
    }

    async fn latest_fact_instant(&self, table: FactTable) -> Result<Option<DateTime<Utc>>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let name = table.table_name();
        let sql = format!(
            "SELECT d.fecha, MAX(h.hora_registro) FROM {name} h
             JOIN dim_fecha d ON d.id_fecha = h.id_fecha
             WHERE h.id_fecha = (SELECT MAX(id_fecha) FROM {name})
             GROUP BY d.fecha"
        );
        let latest: Option<(String, String)> = conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((date, time)) = latest else {
            return Ok(None);
        };
        let date = parse_date(name, &date)?;
        let time = parse_time(name, &time)?;
        Ok(Some(date.and_time(time).and_utc()))
    }

    async fn latest_audit(&self, table: &str, operation: AuditOperation) -> Result<Option<DateTime<Utc>>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(fecha_operacion) FROM log_eventos WHERE tabla_afectada = ?1 AND operacion = ?2",
            params![table, operation.as_str()],
            |row| row.get(0),
        )?;
        latest.map(|m| from_micros("log_eventos", m)).transpose()
    }

    async fn insert_user(&self, row: &UserDimRow) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO dim_usuario (id_usuario, nombre, genero, fecha_registro, fecha_nacimiento)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.user_id,
                row.name,
                row.gender,
                to_micros(&row.registration_date),
                row.birth_date.as_ref().map(format_date),
            ],
        )?;
        log::debug!("dim_usuario: inserted user {}", row.user_id);
        Ok(())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserDimRow>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        read_user(&conn, user_id)
    }

    async fn update_user(&self, row: &UserDimRow, at: DateTime<Utc>) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let changed = conn.execute(
            "UPDATE dim_usuario SET nombre = ?2, genero = ?3, fecha_registro = ?4, fecha_nacimiento = ?5
             WHERE id_usuario = ?1",
            params![
                row.user_id,
                row.name,
                row.gender,
                to_micros(&row.registration_date),
                row.birth_date.as_ref().map(format_date),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("dim_usuario row {}", row.user_id)));
        }
        conn.execute(
            "INSERT INTO log_eventos (tabla_afectada, operacion, llave_primaria, fecha_operacion)
             VALUES ('dim_usuario', ?1, ?2, ?3)",
            params![
                AuditOperation::Update.as_str(),
                row.user_id.to_string(),
                to_micros(&at),
            ],
        )?;
        log::debug!("dim_usuario: updated user {}", row.user_id);
        Ok(())
    }

    async fn insert_date(&self, day: &CalendarDay) -> Result<i64> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO dim_fecha (fecha, dia, mes, trimestre, anio) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![format_date(&day.date), day.day, day.month, day.quarter, day.year],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn date_id(&self, date: NaiveDate) -> Result<Option<i64>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let id = conn
            .query_row(
                "SELECT id_fecha FROM dim_fecha WHERE fecha = ?1",
                params![format_date(&date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    async fn merge_activity(&self, description: &str) -> Result<i64> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO dim_actividad (descripcion) VALUES (?1)",
            params![description],
        )?;
        let id = conn.query_row(
            "SELECT id_actividad FROM dim_actividad WHERE descripcion = ?1",
            params![description],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    async fn activity_id(&self, description: &str) -> Result<Option<i64>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let id = conn
            .query_row(
                "SELECT id_actividad FROM dim_actividad WHERE descripcion = ?1",
                params![description],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    async fn insert_activity_fact(&self, row: &ActivityFactRow) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO hechos_actividad (id_usuario, id_actividad, id_fecha, hora_registro)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.user_id, row.activity_id, row.date_id, format_time(&row.time_of_day)],
        )?;
        Ok(())
    }

    async fn insert_payment_fact(&self, row: &PaymentFactRow) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO hechos_pagos (id_usuario, id_plan, id_metodo_pago, id_estado_pago, id_fecha,
                                       hora_registro, monto_pago)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.user_id,
                row.plan_id,
                row.payment_method_id,
                row.payment_status_id,
                row.date_id,
                format_time(&row.time_of_day),
                row.amount,
            ],
        )?;
        Ok(())
    }

    async fn activity_facts(&self) -> Result<Vec<ActivityFactRow>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id_usuario, id_actividad, id_fecha, hora_registro FROM hechos_actividad
             ORDER BY id_hecho",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut facts = Vec::with_capacity(rows.len());
        for (user_id, activity_id, date_id, time) in rows {
            facts.push(ActivityFactRow {
                user_id,
                activity_id,
                date_id,
                time_of_day: parse_time("hechos_actividad", &time)?,
            });
        }
        Ok(facts)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        if !TABLES.contains(&table) {
            return Err(StorageError::InvalidArg(format!("unknown warehouse table '{table}'")));
        }
        let conn = sqlite::lock(STORE, &self.conn)?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}
