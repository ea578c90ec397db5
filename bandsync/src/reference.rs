//! Static activity / goal catalog and the activity→goal contribution list.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, SyncError};

const BUILTIN_CATALOG: &str = include_str!("../reference/default_catalog.json");

/// Upper bound on `min_consecutive_days`, about a century.
pub const MAX_EVIDENCE_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub measured_quantity: String,
    pub unit: String,
    pub minimum_weekly_frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Name of the sensor payload field the goal is evaluated on.
    pub measured_quantity: String,
    pub min_threshold: f64,
    #[serde(default)]
    pub max_threshold: Option<f64>,
    pub unit: String,
    pub min_consecutive_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contribution {
    pub activity_id: i64,
    pub goal_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCatalog {
    pub activities: Vec<Activity>,
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
}

impl Activity {
    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("name".into(), json!(self.name));
        props.insert("description".into(), json!(self.description));
        props.insert("measured_quantity".into(), json!(self.measured_quantity));
        props.insert("unit".into(), json!(self.unit));
        props.insert(
            "minimum_weekly_frequency".into(),
            json!(self.minimum_weekly_frequency),
        );
        props
    }
}

impl Goal {
    pub fn properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("name".into(), json!(self.name));
        props.insert("description".into(), json!(self.description));
        props.insert("measured_quantity".into(), json!(self.measured_quantity));
        props.insert("min_threshold".into(), json!(self.min_threshold));
        props.insert("max_threshold".into(), json!(self.max_threshold));
        props.insert("unit".into(), json!(self.unit));
        props.insert(
            "min_consecutive_days".into(),
            json!(self.min_consecutive_days),
        );
        props
    }

    /// Whether a mean value lies inside the goal's threshold band.
    pub fn accepts(&self, mean: f64) -> bool {
        match self.max_threshold {
            Some(max) => mean >= self.min_threshold && mean <= max,
            None => mean >= self.min_threshold,
        }
    }
}

impl ReferenceCatalog {
    /// The catalog bundled with the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: Self =
            serde_json::from_str(raw).map_err(|e| SyncError::Reference(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        let mut activity_ids = HashSet::new();
        let mut activity_names = HashSet::new();
        for activity in &self.activities {
            if !activity_ids.insert(activity.id) {
                return Err(SyncError::Reference(format!(
                    "duplicate activity id {}",
                    activity.id
                )));
            }
            if !activity_names.insert(activity.name.as_str()) {
                return Err(SyncError::Reference(format!(
                    "duplicate activity name '{}'",
                    activity.name
                )));
            }
        }

        let mut goal_ids = HashSet::new();
        for goal in &self.goals {
            if !goal_ids.insert(goal.id) {
                return Err(SyncError::Reference(format!("duplicate goal id {}", goal.id)));
            }
            if goal.min_consecutive_days == 0 {
                return Err(SyncError::Reference(format!(
                    "goal '{}' needs at least one day of evidence",
                    goal.name
                )));
            }
            if goal.min_consecutive_days > MAX_EVIDENCE_DAYS {
                return Err(SyncError::Reference(format!(
                    "goal '{}' asks for {} days of evidence, at most {MAX_EVIDENCE_DAYS} allowed",
                    goal.name, goal.min_consecutive_days
                )));
            }
            if let Some(max) = goal.max_threshold {
                if max < goal.min_threshold {
                    return Err(SyncError::Reference(format!(
                        "goal '{}' has max_threshold {max} below min_threshold {}",
                        goal.name, goal.min_threshold
                    )));
                }
            }
        }

        for c in &self.contributions {
            if !activity_ids.contains(&c.activity_id) || !goal_ids.contains(&c.goal_id) {
                return Err(SyncError::Reference(format!(
                    "contribution {} -> {} references an unknown activity or goal",
                    c.activity_id, c.goal_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        assert_eq!(catalog.activities.len(), 5);
        assert_eq!(catalog.goals.len(), 4);
        assert_eq!(catalog.contributions.len(), 14);

        let glucose = catalog.goals.iter().find(|g| g.id == 3).unwrap();
        assert_eq!(glucose.measured_quantity, "glucose_mg_dl");
        assert!(glucose.accepts(100.0));
        assert!(!glucose.accepts(130.0));
        assert!(glucose.accepts(120.0));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut catalog = ReferenceCatalog::builtin().unwrap();
        catalog.goals[0].max_threshold = Some(10.0);
        assert!(matches!(catalog.validate(), Err(SyncError::Reference(_))));
    }

    #[test]
    fn test_rejects_dangling_contribution() {
        let mut catalog = ReferenceCatalog::builtin().unwrap();
        catalog.contributions.push(Contribution {
            activity_id: 99,
            goal_id: 1,
        });
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_day_goal() {
        let mut catalog = ReferenceCatalog::builtin().unwrap();
        catalog.goals[1].min_consecutive_days = 0;
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_goal_window() {
        let mut catalog = ReferenceCatalog::builtin().unwrap();
        catalog.goals[0].min_consecutive_days = 4_000_000_000;
        let raw = serde_json::to_string(&catalog).unwrap();
        assert!(matches!(
            ReferenceCatalog::from_json(&raw),
            Err(SyncError::Reference(_))
        ));

        catalog.goals[0].min_consecutive_days = MAX_EVIDENCE_DAYS;
        assert!(catalog.validate().is_ok());
    }
}
