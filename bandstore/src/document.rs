//! Document collections: mirrored users, sensor records and app-usage records.
//!
//! Each collection is a table holding the owning user, the timestamp used for range
//! queries, the type tag and the full JSON body of the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter, types::Value};

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::models::MirroredUser;
use crate::sensor::{AppUsageRecord, SensorKind, SensorRecord};
use crate::utils::sqlite::{self, SharedConnection};
use crate::utils::time::to_micros;

const STORE: &str = "document store";

/// Filter over `datos_sensor`. Bounds left unset are not applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorQuery {
    pub user_id: Option<i64>,
    pub kind: Option<SensorKind>,
    /// Exclusive lower bound.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub before: Option<DateTime<Utc>>,
}

impl SensorQuery {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: SensorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.after = Some(ts);
        self
    }

    pub fn since(mut self, ts: DateTime<Utc>) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn before(mut self, ts: DateTime<Utc>) -> Self {
        self.before = Some(ts);
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(user_id) = self.user_id {
            clauses.push("id_usuario = ?");
            values.push(Value::Integer(user_id));
        }
        if let Some(kind) = self.kind {
            clauses.push("tipo_registro = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(ts) = self.after {
            clauses.push("ts > ?");
            values.push(Value::Integer(to_micros(&ts)));
        }
        if let Some(ts) = self.since {
            clauses.push("ts >= ?");
            values.push(Value::Integer(to_micros(&ts)));
        }
        if let Some(ts) = self.before {
            clauses.push("ts < ?");
            values.push(Value::Integer(to_micros(&ts)));
        }
        let mut sql = String::from("SELECT cuerpo FROM datos_sensor");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ts, id_documento");
        (sql, values)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_mirrored_user(&self, user_id: i64) -> Result<Option<MirroredUser>>;

    async fn insert_mirrored_user(&self, user: &MirroredUser) -> Result<()>;

    async fn mirrored_users(&self) -> Result<Vec<MirroredUser>>;

    async fn sensor_records(&self, query: &SensorQuery) -> Result<Vec<SensorRecord>>;

    /// App-usage records of the user strictly after `since`.
    async fn app_usage_after(&self, user_id: i64, since: DateTime<Utc>) -> Result<Vec<AppUsageRecord>>;
}

pub struct SqliteDocumentStore {
    conn: SharedConnection,
}

impl SqliteDocumentStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = Self {
            conn: sqlite::open(STORE, &config.document_path)?,
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
            CREATE TABLE IF NOT EXISTS usuarios_sensor (
                id_usuario INTEGER PRIMARY KEY,
                cuerpo TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS datos_sensor (
                id_documento INTEGER PRIMARY KEY AUTOINCREMENT,
                id_usuario INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                tipo_registro TEXT NOT NULL,
                cuerpo TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_datos_sensor_usuario
                ON datos_sensor (id_usuario, tipo_registro, ts);
            CREATE TABLE IF NOT EXISTS datos_aplicacion (
                id_documento INTEGER PRIMARY KEY AUTOINCREMENT,
                id_usuario INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                tipo_evento TEXT NOT NULL,
                cuerpo TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_datos_aplicacion_usuario
                ON datos_aplicacion (id_usuario, ts);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn insert_sensor_record(&self, record: &SensorRecord) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO datos_sensor (id_usuario, ts, tipo_registro, cuerpo) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.user_id,
                to_micros(&record.timestamp),
                record.reading.kind().as_str(),
                body,
            ],
        )?;
        Ok(())
    }

    pub fn insert_app_usage(&self, record: &AppUsageRecord) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO datos_aplicacion (id_usuario, ts, tipo_evento, cuerpo) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.user_id,
                to_micros(&record.timestamp),
                record.event.event_type(),
                body,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_mirrored_user(&self, user_id: i64) -> Result<Option<MirroredUser>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let body: Option<String> = conn
            .query_row(
                "SELECT cuerpo FROM usuarios_sensor WHERE id_usuario = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    async fn insert_mirrored_user(&self, user: &MirroredUser) -> Result<()> {
        let body = serde_json::to_string(user)?;
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO usuarios_sensor (id_usuario, cuerpo) VALUES (?1, ?2)",
            params![user.id, body],
        )?;
        log::debug!("usuarios_sensor: mirrored user {}", user.id);
        Ok(())
    }

    async fn mirrored_users(&self) -> Result<Vec<MirroredUser>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare("SELECT cuerpo FROM usuarios_sensor ORDER BY id_usuario")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut users = Vec::with_capacity(bodies.len());
        for body in bodies {
            users.push(serde_json::from_str(&body)?);
        }
        Ok(users)
    }

    async fn sensor_records(&self, query: &SensorQuery) -> Result<Vec<SensorRecord>> {
        let (sql, values) = query.to_sql();
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut records = Vec::with_capacity(bodies.len());
        for body in bodies {
            records.push(serde_json::from_str(&body)?);
        }
        Ok(records)
    }

    async fn app_usage_after(&self, user_id: i64, since: DateTime<Utc>) -> Result<Vec<AppUsageRecord>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT cuerpo FROM datos_aplicacion WHERE id_usuario = ?1 AND ts > ?2
             ORDER BY ts, id_documento",
        )?;
        let bodies = stmt
            .query_map(params![user_id, to_micros(&since)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut records = Vec::with_capacity(bodies.len());
        for body in bodies {
            records.push(serde_json::from_str(&body)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{AppEvent, GlucoseReading, RestReading, SensorReading};
    use chrono::{Duration, TimeZone};

    fn glucose(user_id: i64, ts: DateTime<Utc>) -> SensorRecord {
        SensorRecord {
            user_id,
            timestamp: ts,
            reading: SensorReading::Glucose(GlucoseReading {
                glucose_mg_dl: 100.0,
                fasting: false,
            }),
        }
    }

    #[tokio::test]
    async fn test_mirrored_user_roundtrip() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let user = MirroredUser {
            id: 4,
            name: "Lucia".into(),
            registration_date: Utc.with_ymd_and_hms(2024, 12, 1, 10, 0, 0).unwrap(),
        };
        assert!(store.find_mirrored_user(4).await.unwrap().is_none());
        store.insert_mirrored_user(&user).await.unwrap();
        assert_eq!(store.find_mirrored_user(4).await.unwrap(), Some(user.clone()));
        assert!(store.insert_mirrored_user(&user).await.is_err());
        assert_eq!(store.mirrored_users().await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn test_sensor_query_bounds() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        for day in 0..5 {
            store
                .insert_sensor_record(&glucose(1, base + Duration::days(day)))
                .unwrap();
        }
        store
            .insert_sensor_record(&SensorRecord {
                user_id: 1,
                timestamp: base,
                reading: SensorReading::Rest(RestReading {
                    still_minutes: 40.0,
                    respiratory_rate: 14.0,
                    hrv_ms: 55.0,
                }),
            })
            .unwrap();
        store.insert_sensor_record(&glucose(2, base)).unwrap();

        let all_for_user = store.sensor_records(&SensorQuery::for_user(1)).await.unwrap();
        assert_eq!(all_for_user.len(), 6);

        let glucose_only = SensorQuery::for_user(1).kind(SensorKind::Glucose);
        let after = store
            .sensor_records(&glucose_only.clone().after(base + Duration::days(2)))
            .await
            .unwrap();
        assert_eq!(after.len(), 2);

        let since = store
            .sensor_records(&glucose_only.clone().since(base + Duration::days(2)))
            .await
            .unwrap();
        assert_eq!(since.len(), 3);

        let window = store
            .sensor_records(
                &glucose_only
                    .since(base + Duration::days(1))
                    .before(base + Duration::days(3)),
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_app_usage_after_is_strict() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        let record = AppUsageRecord {
            user_id: 1,
            timestamp: ts,
            session_id: "s-1".into(),
            app_version: "2.3.0".into(),
            os_version: "Android 14".into(),
            event: AppEvent::ScreenTime {
                screen: "home".into(),
                duration_seconds: 42,
            },
        };
        store.insert_app_usage(&record).unwrap();

        assert_eq!(store.app_usage_after(1, ts).await.unwrap().len(), 0);
        let found = store
            .app_usage_after(1, ts - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(found, vec![record]);
    }
}
