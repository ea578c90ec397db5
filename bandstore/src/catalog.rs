use crate::config::StorageConfig;
use crate::errors::Result;
use crate::models::TaskLog;
use crate::utils::sqlite::{self, SharedConnection};
use rusqlite::params;

const STORE: &str = "run catalog";

/// Run ledger: one `task_logs` row per named unit of work.
pub struct Catalog {
    conn: SharedConnection,
}

impl Catalog {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            conn: sqlite::open(STORE, &config.catalog_path)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: sqlite::open_in_memory(STORE)?,
        })
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS task_logs (
                task_id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL,
                details TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn create_task_log(&self, task_name: &str, status: &str) -> Result<i64> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let start_time = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO task_logs (task_name, start_time, status) VALUES (?1, ?2, ?3)",
            params![task_name, start_time, status],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_task_log_status(&self, task_id: i64, status: &str, details: &str) -> Result<()> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let end_time = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE task_logs SET status = ?1, details = ?2, end_time = ?3 WHERE task_id = ?4",
            params![status, details, end_time, task_id],
        )?;
        Ok(())
    }

    pub fn recent_task_logs(&self, limit: usize) -> Result<Vec<TaskLog>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT task_id, task_name, start_time, end_time, status, details
             FROM task_logs ORDER BY task_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(TaskLog {
                task_id: row.get(0)?,
                task_name: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                status: row.get(4)?,
                details: row.get(5)?,
            })
        })?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (Catalog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let catalog = Catalog::new(&config).unwrap();
        catalog.initialize_schema().unwrap();
        (catalog, dir)
    }

    #[test]
    fn test_task_log_crud() {
        let (catalog, _dir) = setup();

        // Test create
        let task_id = catalog.create_task_log("LOAD_USER_DIMENSION", "STARTED");
        assert!(task_id.is_ok());
        let task_id = task_id.unwrap();
        assert_eq!(task_id, 1);

        // Test update
        let result = catalog.update_task_log_status(task_id, "COMPLETED", "elapsed 0.12s");
        assert!(result.is_ok());

        let logs = catalog.recent_task_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "COMPLETED");
        assert_eq!(logs[0].details.as_deref(), Some("elapsed 0.12s"));
        assert!(logs[0].end_time.is_some());
    }

    #[test]
    fn test_recent_task_logs_newest_first() {
        let catalog = Catalog::in_memory().unwrap();
        catalog.initialize_schema().unwrap();
        catalog.create_task_log("first", "STARTED").unwrap();
        catalog.create_task_log("second", "STARTED").unwrap();
        catalog.create_task_log("third", "STARTED").unwrap();

        let logs = catalog.recent_task_logs(2).unwrap();
        let names: Vec<_> = logs.iter().map(|l| l.task_name.as_str()).collect();
        assert_eq!(names, vec!["third", "second"]);
    }
}
