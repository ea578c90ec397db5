//! Relational source of truth for users and payments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{AuditEntry, AuditOperation, Payment, User};
use crate::utils::sqlite::{self, SharedConnection};
use crate::utils::time::{format_date, from_micros, parse_date, to_micros};

const STORE: &str = "transactional store";

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Users whose registration date is strictly after `since`, oldest first.
    async fn users_registered_after(&self, since: DateTime<Utc>) -> Result<Vec<User>>;

    async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<User>>;

    async fn all_users(&self) -> Result<Vec<User>>;

    /// Distinct primary keys logged for `(table, operation)` strictly after `since`.
    async fn audited_keys_since(
        &self,
        table: &str,
        operation: AuditOperation,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    async fn payments_after(&self, since: DateTime<Utc>) -> Result<Vec<Payment>>;

    /// Plan the payment paid for, if a subscription references it.
    async fn plan_for_payment(&self, payment_id: i64) -> Result<Option<i64>>;
}

pub struct SqliteTransactionalStore {
    conn: SharedConnection,
}

impl SqliteTransactionalStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = Self {
            conn: sqlite::open(STORE, &config.transactional_path)?,
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
            CREATE TABLE IF NOT EXISTS generos (
                id_genero INTEGER PRIMARY KEY AUTOINCREMENT,
                genero TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS usuarios (
                id_usuario INTEGER PRIMARY KEY,
                nombre TEXT NOT NULL,
                fecha_registro INTEGER NOT NULL,
                fecha_nacimiento TEXT,
                id_genero INTEGER REFERENCES generos(id_genero)
            );
            CREATE INDEX IF NOT EXISTS idx_usuarios_registro ON usuarios (fecha_registro);
            CREATE TABLE IF NOT EXISTS pagos (
                id_pago INTEGER PRIMARY KEY,
                monto REAL NOT NULL,
                fecha_transaccion INTEGER NOT NULL,
                id_metodo_pago INTEGER NOT NULL,
                id_estado_pago INTEGER NOT NULL,
                id_usuario INTEGER NOT NULL REFERENCES usuarios(id_usuario)
            );
            CREATE TABLE IF NOT EXISTS suscripcion (
                id_suscripcion INTEGER PRIMARY KEY AUTOINCREMENT,
                id_pago INTEGER NOT NULL REFERENCES pagos(id_pago),
                id_plan INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS log_eventos (
                id_evento INTEGER PRIMARY KEY AUTOINCREMENT,
                tabla_afectada TEXT NOT NULL,
                operacion TEXT NOT NULL,
                llave_primaria TEXT NOT NULL,
                fecha_operacion INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_log_eventos_lookup
                ON log_eventos (tabla_afectada, operacion, fecha_operacion);
            COMMIT;",
        )?;
        Ok(())
    }

    /// Returns the id of the gender, creating the reference row on first use.
    pub fn ensure_gender(&self, gender: &str) -> Result<i64> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        gender_id(&conn, gender)
    }

    pub fn insert_user(&self, user: &User) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let gender = match &user.gender {
            Some(g) => Some(gender_id(&conn, g)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO usuarios (id_usuario, nombre, fecha_registro, fecha_nacimiento, id_genero)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.name,
                to_micros(&user.registration_date),
                user.birth_date.as_ref().map(format_date),
                gender,
            ],
        )?;
        log::debug!("usuarios: inserted user {}", user.id);
        Ok(())
    }

    /// Overwrites the user's row and appends an UPDATE audit entry stamped `at`.
    pub fn update_user(&self, user: &User, at: DateTime<Utc>) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let gender = match &user.gender {
            Some(g) => Some(gender_id(&conn, g)?),
            None => None,
        };
        let changed = conn.execute(
            "UPDATE usuarios SET nombre = ?2, fecha_registro = ?3, fecha_nacimiento = ?4, id_genero = ?5
             WHERE id_usuario = ?1",
            params![
                user.id,
                user.name,
                to_micros(&user.registration_date),
                user.birth_date.as_ref().map(format_date),
                gender,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("user {}", user.id)));
        }
        append_audit(
            &conn,
            &AuditEntry {
                affected_table: "usuarios".to_string(),
                operation: AuditOperation::Update,
                primary_key: user.id.to_string(),
                operation_date: at,
            },
        )?;
        Ok(())
    }

    pub fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        append_audit(&conn, entry)
    }

    pub fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO pagos (id_pago, monto, fecha_transaccion, id_metodo_pago, id_estado_pago, id_usuario)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                payment.id,
                payment.amount,
                to_micros(&payment.transaction_date),
                payment.payment_method_id,
                payment.payment_status_id,
                payment.user_id,
            ],
        )?;
        Ok(())
    }

    pub fn insert_subscription(&self, payment_id: i64, plan_id: i64) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO suscripcion (id_pago, id_plan) VALUES (?1, ?2)",
            params![payment_id, plan_id],
        )?;
        Ok(())
    }
}

fn gender_id(conn: &Connection, gender: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO generos (genero) VALUES (?1)",
        params![gender],
    )?;
    let id = conn.query_row(
        "SELECT id_genero FROM generos WHERE genero = ?1",
        params![gender],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn append_audit(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO log_eventos (tabla_afectada, operacion, llave_primaria, fecha_operacion)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.affected_table,
            entry.operation.as_str(),
            entry.primary_key,
            to_micros(&entry.operation_date),
        ],
    )?;
    Ok(())
}

const USER_COLUMNS: &str = "u.id_usuario, u.nombre, u.fecha_registro, u.fecha_nacimiento, g.genero
     FROM usuarios u LEFT JOIN generos g ON g.id_genero = u.id_genero";

struct RawUser {
    id: i64,
    name: String,
    registered: i64,
    birth_date: Option<String>,
    gender: Option<String>,
}

impl RawUser {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            registered: row.get(2)?,
            birth_date: row.get(3)?,
            gender: row.get(4)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            registration_date: from_micros("usuarios", self.registered)?,
            birth_date: self
                .birth_date
                .as_deref()
                .map(|raw| parse_date("usuarios", raw))
                .transpose()?,
            gender: self.gender,
        })
    }
}

fn query_users(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, RawUser::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawUser::into_user).collect()
}

#[async_trait]
impl TransactionalStore for SqliteTransactionalStore {
    async fn users_registered_after(&self, since: DateTime<Utc>) -> Result<Vec<User>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let sql = format!(
            "SELECT {USER_COLUMNS} WHERE u.fecha_registro > ?1
             ORDER BY u.fecha_registro, u.id_usuario"
        );
        query_users(&conn, &sql, params![to_micros(&since)])
    }

    async fn users_by_ids(&self, ids: &[i64]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = sqlite::lock(STORE, &self.conn)?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {USER_COLUMNS} WHERE u.id_usuario IN ({placeholders}) ORDER BY u.id_usuario"
        );
        query_users(&conn, &sql, rusqlite::params_from_iter(ids.iter()))
    }

    async fn all_users(&self) -> Result<Vec<User>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let sql = format!("SELECT {USER_COLUMNS} ORDER BY u.id_usuario");
        query_users(&conn, &sql, params![])
    }

    async fn audited_keys_since(
        &self,
        table: &str,
        operation: AuditOperation,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT llave_primaria, MIN(id_evento) AS first_seen FROM log_eventos
             WHERE tabla_afectada = ?1 AND operacion = ?2 AND fecha_operacion > ?3
             GROUP BY llave_primaria ORDER BY first_seen",
        )?;
        let keys = stmt
            .query_map(
                params![table, operation.as_str(), to_micros(&since)],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    async fn payments_after(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id_pago, monto, fecha_transaccion, id_metodo_pago, id_estado_pago, id_usuario
             FROM pagos WHERE fecha_transaccion > ?1 ORDER BY fecha_transaccion, id_pago",
        )?;
        let raws = stmt
            .query_map(params![to_micros(&since)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut payments = Vec::with_capacity(raws.len());
        for (id, amount, ts, method, status, user_id) in raws {
            payments.push(Payment {
                id,
                amount,
                transaction_date: from_micros("pagos", ts)?,
                payment_method_id: method,
                payment_status_id: status,
                user_id,
            });
        }
        Ok(payments)
    }

    async fn plan_for_payment(&self, payment_id: i64) -> Result<Option<i64>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let plan = conn
            .query_row(
                "SELECT id_plan FROM suscripcion WHERE id_pago = ?1 ORDER BY id_suscripcion LIMIT 1",
                params![payment_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(plan)
    }
}
