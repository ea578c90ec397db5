//! Derived user relationships. Each (user, catalog entry) pair is evaluated against the
//! raw sensor evidence and the edge set is reconciled to the result, so the graph after a
//! run only depends on the evidence, never on earlier runs.
//!
//! Pairs are drawn from the catalog. Edges on activities or goals removed from it are
//! deleted with their nodes by the node phases, which run first.

use std::fmt;

use bandstore::document::{DocumentStore, SensorQuery};
use bandstore::graph::{EdgeRef, GraphStore, NodeLabel, RelationType};
use bandstore::sensor::SensorKind;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::reference::{Activity, Goal, ReferenceCatalog};
use crate::report::Reporter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GoalEvaluation {
    Achieved { mean: f64 },
    OutOfRange { mean: f64 },
    InsufficientEvidence { samples: usize },
}

impl GoalEvaluation {
    pub fn is_met(&self) -> bool {
        matches!(self, GoalEvaluation::Achieved { .. })
    }
}

/// Needs at least `min_consecutive_days` samples; the mean of all samples must then lie
/// in the goal's threshold band.
pub fn evaluate_goal(goal: &Goal, samples: &[f64]) -> GoalEvaluation {
    if samples.len() < goal.min_consecutive_days as usize {
        return GoalEvaluation::InsufficientEvidence {
            samples: samples.len(),
        };
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if goal.accepts(mean) {
        GoalEvaluation::Achieved { mean }
    } else {
        GoalEvaluation::OutOfRange { mean }
    }
}

fn look_back(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(span).ok_or_else(|| {
        SyncError::InvalidInput(format!("look-back of {span} from {now} is out of range"))
    })
}

/// Whether the user logged the activity in `[now - window, now)`.
pub async fn performs_activity(
    docs: &dyn DocumentStore,
    user_id: i64,
    activity: &Activity,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<bool> {
    let query = SensorQuery::for_user(user_id)
        .kind(SensorKind::Activity)
        .since(look_back(now, window)?)
        .before(now);
    let records = docs.sensor_records(&query).await?;
    Ok(records
        .iter()
        .any(|r| r.reading.activity_name() == Some(activity.name.as_str())))
}

/// Evaluates the goal over the user's readings from the last `min_consecutive_days` days.
pub async fn meets_goal(
    docs: &dyn DocumentStore,
    user_id: i64,
    goal: &Goal,
    now: DateTime<Utc>,
) -> Result<GoalEvaluation> {
    let cutoff = look_back(now, Duration::days(i64::from(goal.min_consecutive_days)))?;
    let records = docs
        .sensor_records(&SensorQuery::for_user(user_id).since(cutoff))
        .await?;
    let samples: Vec<f64> = records
        .iter()
        .filter_map(|r| r.reading.measure(&goal.measured_quantity))
        .collect();
    Ok(evaluate_goal(goal, &samples))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub evaluated: usize,
    pub held: usize,
    pub not_held: usize,
    /// Pairs whose positive or negative edge could not be merged for lack of a node.
    pub skipped: usize,
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluated={} held={} not_held={} skipped={}",
            self.evaluated, self.held, self.not_held, self.skipped
        )
    }
}

/// Makes the edge set agree with `truth`: the positive edge exists iff `truth`, and the
/// negative edge, when there is one, exists iff `!truth`. Returns `false` if a required
/// edge could not be merged because an endpoint node is missing.
pub async fn reconcile(
    graph: &dyn GraphStore,
    positive: &EdgeRef,
    negative: Option<&EdgeRef>,
    truth: bool,
    today: NaiveDate,
) -> Result<bool> {
    let (keep, drop) = if truth {
        (Some(positive), negative)
    } else {
        (negative, Some(positive))
    };
    if let Some(edge) = drop {
        graph.delete_edge(edge).await?;
    }
    match keep {
        Some(edge) => Ok(graph.merge_edge(edge, today).await?),
        None => Ok(true),
    }
}

fn tally(
    stats: &mut ReconcileStats,
    reporter: &dyn Reporter,
    unit: &str,
    truth: bool,
    merged: bool,
    pair: String,
) {
    stats.evaluated += 1;
    if truth {
        stats.held += 1;
    } else {
        stats.not_held += 1;
    }
    if !merged {
        stats.skipped += 1;
        reporter.row_skipped(unit, format!("{pair}: endpoint node missing"));
    }
}

/// REALIZA for every graph user × catalog activity.
pub async fn reconcile_user_activities(
    docs: &dyn DocumentStore,
    graph: &dyn GraphStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<ReconcileStats> {
    let today = now.date_naive();
    let users = graph.node_keys(NodeLabel::User).await?;
    let mut stats = ReconcileStats::default();
    for &user_id in &users {
        for activity in &catalog.activities {
            let truth = performs_activity(docs, user_id, activity, now, window).await?;
            let edge = EdgeRef::new(RelationType::Performs, user_id, activity.id);
            let merged = reconcile(graph, &edge, None, truth, today).await?;
            tally(
                &mut stats,
                reporter,
                unit,
                truth,
                merged,
                format!("user {user_id} / activity '{}'", activity.name),
            );
        }
    }
    Ok(stats)
}

/// CUMPLIO or TIENE_OBJETIVO, exactly one of them, for every graph user × catalog goal.
pub async fn reconcile_user_goals(
    docs: &dyn DocumentStore,
    graph: &dyn GraphStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileStats> {
    let today = now.date_naive();
    let users = graph.node_keys(NodeLabel::User).await?;
    let mut stats = ReconcileStats::default();
    for &user_id in &users {
        for goal in &catalog.goals {
            let evaluation = meets_goal(docs, user_id, goal, now).await?;
            log::debug!("user {user_id} / goal '{}': {evaluation:?}", goal.name);
            let achieved = EdgeRef::new(RelationType::Achieved, user_id, goal.id);
            let pending = EdgeRef::new(RelationType::HasGoal, user_id, goal.id);
            let truth = evaluation.is_met();
            let merged = reconcile(graph, &achieved, Some(&pending), truth, today).await?;
            tally(
                &mut stats,
                reporter,
                unit,
                truth,
                merged,
                format!("user {user_id} / goal '{}'", goal.name),
            );
        }
    }
    Ok(stats)
}
