//! Canonical graph nodes keyed by business id, plus the static contribution edges.
//!
//! The reference catalog is authoritative for activity and goal nodes: entries dropped
//! from it lose their node, every user edge on that node and their contribution edges.

use std::collections::HashSet;

use bandstore::document::DocumentStore;
use bandstore::graph::{EdgeRef, GraphStore, NodeLabel, RelationType};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::load::LoadStats;
use crate::reference::ReferenceCatalog;
use crate::report::Reporter;

async fn upsert_node(
    graph: &dyn GraphStore,
    stats: &mut LoadStats,
    reporter: &dyn Reporter,
    unit: &str,
    label: NodeLabel,
    key: i64,
    properties: Map<String, Value>,
) -> Result<()> {
    match graph.merge_node(label, key, properties).await {
        Ok(()) => stats.loaded += 1,
        Err(err) if err.is_fatal() => return Err(err.into()),
        Err(err) => {
            reporter.row_failed(unit, format!("{}({key}): {err}", label.as_str()));
            stats.failed += 1;
        }
    }
    Ok(())
}

/// Deletes `label` nodes whose key is not in `keep`.
async fn prune_nodes(
    graph: &dyn GraphStore,
    stats: &mut LoadStats,
    reporter: &dyn Reporter,
    unit: &str,
    label: NodeLabel,
    keep: &HashSet<i64>,
) -> Result<()> {
    for key in graph.node_keys(label).await? {
        if keep.contains(&key) {
            continue;
        }
        match graph.delete_node(label, key).await {
            Ok(_) => {
                log::info!("removed {}({key}), no longer in the catalog", label.as_str());
                stats.removed += 1;
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                reporter.row_failed(unit, format!("{}({key}): {err}", label.as_str()));
                stats.failed += 1;
            }
        }
    }
    Ok(())
}

pub async fn sync_user_nodes(
    docs: &dyn DocumentStore,
    graph: &dyn GraphStore,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let users = docs.mirrored_users().await?;
    let mut stats = LoadStats::default();
    for user in &users {
        let mut props = Map::new();
        props.insert("name".into(), json!(user.name));
        props.insert(
            "registration_date".into(),
            json!(user.registration_date.to_rfc3339()),
        );
        upsert_node(graph, &mut stats, reporter, unit, NodeLabel::User, user.id, props).await?;
    }
    log::info!("merged {} of {} user nodes", stats.loaded, users.len());
    Ok(stats)
}

pub async fn sync_activity_nodes(
    graph: &dyn GraphStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let mut stats = LoadStats::default();
    for activity in &catalog.activities {
        upsert_node(
            graph,
            &mut stats,
            reporter,
            unit,
            NodeLabel::Activity,
            activity.id,
            activity.properties(),
        )
        .await?;
    }
    let keep: HashSet<i64> = catalog.activities.iter().map(|a| a.id).collect();
    prune_nodes(graph, &mut stats, reporter, unit, NodeLabel::Activity, &keep).await?;
    Ok(stats)
}

pub async fn sync_goal_nodes(
    graph: &dyn GraphStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
) -> Result<LoadStats> {
    let mut stats = LoadStats::default();
    for goal in &catalog.goals {
        upsert_node(
            graph,
            &mut stats,
            reporter,
            unit,
            NodeLabel::Goal,
            goal.id,
            goal.properties(),
        )
        .await?;
    }
    let keep: HashSet<i64> = catalog.goals.iter().map(|g| g.id).collect();
    prune_nodes(graph, &mut stats, reporter, unit, NodeLabel::Goal, &keep).await?;
    Ok(stats)
}

/// Merges one CONTRIBUYE_A edge per catalog contribution and deletes the ones the catalog
/// no longer lists. Entries whose activity or goal node is missing are skipped.
pub async fn sync_contributions(
    graph: &dyn GraphStore,
    catalog: &ReferenceCatalog,
    reporter: &dyn Reporter,
    unit: &str,
    today: NaiveDate,
) -> Result<LoadStats> {
    let mut stats = LoadStats::default();
    for c in &catalog.contributions {
        let edge = EdgeRef::new(RelationType::ContributesTo, c.activity_id, c.goal_id);
        match graph.merge_edge(&edge, today).await {
            Ok(true) => stats.loaded += 1,
            Ok(false) => {
                reporter.row_skipped(
                    unit,
                    format!(
                        "activity {} -> goal {}: endpoint node missing",
                        c.activity_id, c.goal_id
                    ),
                );
                stats.skipped += 1;
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                reporter.row_failed(
                    unit,
                    format!("activity {} -> goal {}: {err}", c.activity_id, c.goal_id),
                );
                stats.failed += 1;
            }
        }
    }

    let listed: HashSet<EdgeRef> = catalog
        .contributions
        .iter()
        .map(|c| EdgeRef::new(RelationType::ContributesTo, c.activity_id, c.goal_id))
        .collect();
    for existing in graph.edges(RelationType::ContributesTo).await? {
        if listed.contains(&existing.edge) {
            continue;
        }
        match graph.delete_edge(&existing.edge).await {
            Ok(_) => stats.removed += 1,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                reporter.row_failed(
                    unit,
                    format!(
                        "activity {} -> goal {}: {err}",
                        existing.edge.from.key, existing.edge.to.key
                    ),
                );
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}
