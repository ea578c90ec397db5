//! Tagged documents stored in the `datos_sensor` and `datos_aplicacion` collections.
//!
//! Each record carries a type tag and a payload whose shape depends on the tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Activity,
    Rest,
    Sleep,
    Glucose,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Activity => "activity",
            SensorKind::Rest => "rest",
            SensorKind::Sleep => "sleep",
            SensorKind::Glucose => "glucose",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: SensorReading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", content = "payload", rename_all = "snake_case")]
pub enum SensorReading {
    Activity(ActivityReading),
    Rest(RestReading),
    Sleep(SleepReading),
    Glucose(GlucoseReading),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReading {
    pub activity: String,
    pub duration_min: f64,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub steps: Option<f64>,
    pub calories_burned: f64,
    #[serde(default)]
    pub repetitions: Option<f64>,
    #[serde(default)]
    pub lifted_kg: Option<f64>,
    #[serde(default)]
    pub avg_heart_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestReading {
    pub still_minutes: f64,
    pub respiratory_rate: f64,
    pub hrv_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepReading {
    pub total_sleep_minutes: f64,
    pub deep_sleep_minutes: f64,
    pub light_sleep_minutes: f64,
    pub interruptions: f64,
    pub sleep_latency_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub glucose_mg_dl: f64,
    pub fasting: bool,
}

impl SensorReading {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorReading::Activity(_) => SensorKind::Activity,
            SensorReading::Rest(_) => SensorKind::Rest,
            SensorReading::Sleep(_) => SensorKind::Sleep,
            SensorReading::Glucose(_) => SensorKind::Glucose,
        }
    }

    /// Looks up a numeric payload field by name. Absent optional fields yield `None`.
    pub fn measure(&self, field: &str) -> Option<f64> {
        match self {
            SensorReading::Activity(r) => match field {
                "duration_min" => Some(r.duration_min),
                "distance_km" => r.distance_km,
                "steps" => r.steps,
                "calories_burned" => Some(r.calories_burned),
                "repetitions" => r.repetitions,
                "lifted_kg" => r.lifted_kg,
                "avg_heart_rate" => r.avg_heart_rate,
                _ => None,
            },
            SensorReading::Rest(r) => match field {
                "still_minutes" => Some(r.still_minutes),
                "respiratory_rate" => Some(r.respiratory_rate),
                "hrv_ms" => Some(r.hrv_ms),
                _ => None,
            },
            SensorReading::Sleep(r) => match field {
                "total_sleep_minutes" => Some(r.total_sleep_minutes),
                "deep_sleep_minutes" => Some(r.deep_sleep_minutes),
                "light_sleep_minutes" => Some(r.light_sleep_minutes),
                "interruptions" => Some(r.interruptions),
                "sleep_latency_minutes" => Some(r.sleep_latency_minutes),
                _ => None,
            },
            SensorReading::Glucose(r) => match field {
                "glucose_mg_dl" => Some(r.glucose_mg_dl),
                _ => None,
            },
        }
    }

    pub fn activity_name(&self) -> Option<&str> {
        match self {
            SensorReading::Activity(r) => Some(r.activity.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsageRecord {
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub app_version: String,
    pub os_version: String,
    #[serde(flatten)]
    pub event: AppEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "details", rename_all = "snake_case")]
pub enum AppEvent {
    ScreenTime {
        screen: String,
        duration_seconds: u32,
    },
    ButtonClick {
        button: String,
        screen: String,
    },
    FormSubmit {
        form: String,
        completed_fields: u32,
    },
    FeatureUse {
        feature: String,
        #[serde(default)]
        attributes: serde_json::Value,
    },
}

impl AppEvent {
    pub const EVENT_TYPES: [&'static str; 4] =
        ["screen_time", "button_click", "form_submit", "feature_use"];

    pub fn event_type(&self) -> &'static str {
        match self {
            AppEvent::ScreenTime { .. } => "screen_time",
            AppEvent::ButtonClick { .. } => "button_click",
            AppEvent::FormSubmit { .. } => "form_submit",
            AppEvent::FeatureUse { .. } => "feature_use",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_sensor_record_uses_type_tag() {
        let record = SensorRecord {
            user_id: 7,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap(),
            reading: SensorReading::Glucose(GlucoseReading {
                glucose_mg_dl: 95.0,
                fasting: true,
            }),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["record_type"], json!("glucose"));
        assert_eq!(value["payload"]["glucose_mg_dl"], json!(95.0));

        let back: SensorRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.reading.kind(), SensorKind::Glucose);
    }

    #[test]
    fn test_measure_skips_absent_optional_fields() {
        let cycling = SensorReading::Activity(ActivityReading {
            activity: "cycling".into(),
            duration_min: 45.0,
            distance_km: Some(18.5),
            steps: None,
            calories_burned: 400.0,
            repetitions: None,
            lifted_kg: None,
            avg_heart_rate: Some(128.0),
        });
        assert_eq!(cycling.measure("distance_km"), Some(18.5));
        assert_eq!(cycling.measure("steps"), None);
        assert_eq!(cycling.measure("glucose_mg_dl"), None);
        assert_eq!(cycling.activity_name(), Some("cycling"));
    }

    #[test]
    fn test_app_event_type_matches_tag() {
        let event = AppEvent::FormSubmit {
            form: "login".into(),
            completed_fields: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], json!(event.event_type()));
        assert!(AppEvent::EVENT_TYPES.contains(&event.event_type()));
    }
}
