use std::sync::Arc;

use bandstore::config::StorageConfig;
use bandstore::models::User;
use bandstore::sensor::{
    ActivityReading, AppEvent, AppUsageRecord, GlucoseReading, SensorReading, SensorRecord,
};
use bandstore::BandStores;
use bandsync::config::SyncConfig;
use bandsync::reference::ReferenceCatalog;
use bandsync::report::{MemoryReporter, Reporter};
use bandsync::{Pipeline, SyncStores};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: Option<TempDir>,
    pub stores: BandStores,
    pub reporter: Arc<MemoryReporter>,
    pub reference: ReferenceCatalog,
}

#[allow(dead_code)]
impl TestContext {
    pub fn sync_stores(&self) -> SyncStores {
        SyncStores::from(&self.stores)
    }

    pub fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    pub fn pipeline(&self, config: SyncConfig, now: DateTime<Utc>) -> Pipeline {
        Pipeline::new(
            self.sync_stores(),
            self.reference.clone(),
            config,
            self.reporter.clone(),
        )
        .with_now(now)
    }
}

/// In-memory stores; nothing touches disk.
#[allow(dead_code)]
pub fn init_test_context() -> anyhow::Result<TestContext> {
    Ok(TestContext {
        temp_dir: None,
        stores: BandStores::in_memory()?,
        reporter: Arc::new(MemoryReporter::new()),
        reference: ReferenceCatalog::builtin()?,
    })
}

/// Stores on disk under a temporary directory.
#[allow(dead_code)]
pub fn init_disk_context() -> anyhow::Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let stores = BandStores::open(StorageConfig::new(temp_dir.path()))?;
    Ok(TestContext {
        temp_dir: Some(temp_dir),
        stores,
        reporter: Arc::new(MemoryReporter::new()),
        reference: ReferenceCatalog::builtin()?,
    })
}

#[allow(dead_code)]
pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

#[allow(dead_code)]
pub fn user(id: i64, registered: DateTime<Utc>) -> User {
    User {
        id,
        name: format!("user-{id}"),
        registration_date: registered,
        birth_date: None,
        gender: Some("female".to_string()),
    }
}

#[allow(dead_code)]
pub fn activity(user_id: i64, activity: &str, at: DateTime<Utc>) -> SensorRecord {
    SensorRecord {
        user_id,
        timestamp: at,
        reading: SensorReading::Activity(ActivityReading {
            activity: activity.to_string(),
            duration_min: 40.0,
            distance_km: Some(6.0),
            steps: Some(8000.0),
            calories_burned: 320.0,
            repetitions: None,
            lifted_kg: None,
            avg_heart_rate: Some(132.0),
        }),
    }
}

#[allow(dead_code)]
pub fn glucose(user_id: i64, mg_dl: f64, at: DateTime<Utc>) -> SensorRecord {
    SensorRecord {
        user_id,
        timestamp: at,
        reading: SensorReading::Glucose(GlucoseReading {
            glucose_mg_dl: mg_dl,
            fasting: true,
        }),
    }
}

#[allow(dead_code)]
pub fn screen_time(user_id: i64, at: DateTime<Utc>) -> AppUsageRecord {
    AppUsageRecord {
        user_id,
        timestamp: at,
        session_id: format!("session-{user_id}"),
        app_version: "3.1.0".to_string(),
        os_version: "iOS 18".to_string(),
        event: AppEvent::ScreenTime {
            screen: "dashboard".to_string(),
            duration_seconds: 95,
        },
    }
}
