use bandstore::graph::{EdgeRef, GraphEdge, GraphStore, NodeLabel, RelationType};
use bandsync::load;
use bandsync::nodes;
use bandsync::relations;
use chrono::{DateTime, Duration, Utc};

mod common;

use common::{activity, glucose, ts, user, TestContext};

const UNIT: &str = "TEST_UNIT";

/// Mirrors the users and merges every node the relationship phases need.
async fn seed_graph(ctx: &TestContext, user_ids: &[i64]) -> anyhow::Result<()> {
    for &id in user_ids {
        ctx.stores
            .transactional
            .insert_user(&user(id, ts(2025, 1, 1, 0, 0, 0)))?;
    }
    let docs = ctx.stores.documents.as_ref();
    let graph = ctx.stores.graph.as_ref();
    load::mirror_users(ctx.stores.transactional.as_ref(), docs, ctx.reporter(), UNIT).await?;
    nodes::sync_user_nodes(docs, graph, ctx.reporter(), UNIT).await?;
    nodes::sync_activity_nodes(graph, &ctx.reference, ctx.reporter(), UNIT).await?;
    nodes::sync_goal_nodes(graph, &ctx.reference, ctx.reporter(), UNIT).await?;
    Ok(())
}

fn glucose_week(ctx: &TestContext, user_id: i64, mg_dl: f64, days: i64, now: DateTime<Utc>) -> anyhow::Result<()> {
    for k in 1..=days {
        ctx.stores
            .documents
            .insert_sensor_record(&glucose(user_id, mg_dl, now - Duration::days(k) + Duration::hours(1)))?;
    }
    Ok(())
}

fn goal_id(ctx: &TestContext, name: &str) -> i64 {
    ctx.reference.goals.iter().find(|g| g.name == name).unwrap().id
}

fn activity_id(ctx: &TestContext, name: &str) -> i64 {
    ctx.reference.activities.iter().find(|a| a.name == name).unwrap().id
}

async fn goal_edges(ctx: &TestContext, user_id: i64, goal: i64) -> anyhow::Result<(bool, bool)> {
    let graph = ctx.stores.graph.as_ref();
    let achieved = graph
        .edge(&EdgeRef::new(RelationType::Achieved, user_id, goal))
        .await?
        .is_some();
    let pending = graph
        .edge(&EdgeRef::new(RelationType::HasGoal, user_id, goal))
        .await?
        .is_some();
    Ok((achieved, pending))
}

/// Every user edge the relationship phases maintain, with its `since` stamp.
async fn user_edges(ctx: &TestContext) -> anyhow::Result<Vec<GraphEdge>> {
    let mut edges = Vec::new();
    for relation in [RelationType::Performs, RelationType::HasGoal, RelationType::Achieved] {
        edges.extend(ctx.stores.graph.edges(relation).await?);
    }
    Ok(edges)
}

async fn reconcile_goals(ctx: &TestContext, now: DateTime<Utc>) -> anyhow::Result<relations::ReconcileStats> {
    Ok(relations::reconcile_user_goals(
        ctx.stores.documents.as_ref(),
        ctx.stores.graph.as_ref(),
        &ctx.reference,
        ctx.reporter(),
        UNIT,
        now,
    )
    .await?)
}

async fn reconcile_activities(
    ctx: &TestContext,
    now: DateTime<Utc>,
    window: Duration,
) -> anyhow::Result<relations::ReconcileStats> {
    Ok(relations::reconcile_user_activities(
        ctx.stores.documents.as_ref(),
        ctx.stores.graph.as_ref(),
        &ctx.reference,
        ctx.reporter(),
        UNIT,
        now,
        window,
    )
    .await?)
}

#[tokio::test]
async fn goal_needs_a_full_week_in_range() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let now = ts(2025, 6, 15, 12, 0, 0);
    seed_graph(&ctx, &[1, 2, 3]).await?;

    glucose_week(&ctx, 1, 100.0, 6, now)?;
    glucose_week(&ctx, 2, 100.0, 7, now)?;
    glucose_week(&ctx, 3, 130.0, 7, now)?;

    reconcile_goals(&ctx, now).await?;

    let glucose_goal = goal_id(&ctx, "glucose_control");
    assert_eq!(goal_edges(&ctx, 1, glucose_goal).await?, (false, true));
    assert_eq!(goal_edges(&ctx, 2, glucose_goal).await?, (true, false));
    assert_eq!(goal_edges(&ctx, 3, glucose_goal).await?, (false, true));

    let edge = ctx
        .stores
        .graph
        .edge(&EdgeRef::new(RelationType::Achieved, 2, glucose_goal))
        .await?
        .unwrap();
    assert_eq!(edge.since, now.date_naive());
    Ok(())
}

#[tokio::test]
async fn each_user_goal_pair_has_exactly_one_edge() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let now = ts(2025, 6, 15, 12, 0, 0);
    seed_graph(&ctx, &[1, 2]).await?;
    glucose_week(&ctx, 1, 95.0, 7, now)?;

    let stats = reconcile_goals(&ctx, now).await?;
    let goals = ctx.reference.goals.len();
    assert_eq!(stats.evaluated, 2 * goals);
    assert_eq!(stats.held + stats.not_held, stats.evaluated);
    assert_eq!(stats.skipped, 0);

    for user_id in [1, 2] {
        for goal in &ctx.reference.goals {
            let (achieved, pending) = goal_edges(&ctx, user_id, goal.id).await?;
            assert!(achieved ^ pending, "user {user_id} goal {}", goal.name);
        }
    }
    Ok(())
}

#[tokio::test]
async fn goal_edges_follow_the_evidence() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let now = ts(2025, 6, 15, 12, 0, 0);
    let window = Duration::days(30);
    seed_graph(&ctx, &[1]).await?;
    glucose_week(&ctx, 1, 100.0, 7, now)?;
    ctx.stores
        .documents
        .insert_sensor_record(&activity(1, "running", now - Duration::days(2)))?;
    let glucose_goal = goal_id(&ctx, "glucose_control");

    let first = (
        reconcile_activities(&ctx, now, window).await?,
        reconcile_goals(&ctx, now).await?,
    );
    let after_first = user_edges(&ctx).await?;
    let second = (
        reconcile_activities(&ctx, now, window).await?,
        reconcile_goals(&ctx, now).await?,
    );
    assert_eq!(first, second);
    assert_eq!(user_edges(&ctx).await?, after_first);
    assert!(after_first.iter().all(|e| e.since == now.date_naive()));
    assert_eq!(ctx.stores.graph.edges(RelationType::Performs).await?.len(), 1);
    assert_eq!(ctx.stores.graph.edges(RelationType::Achieved).await?.len(), 1);
    assert_eq!(goal_edges(&ctx, 1, glucose_goal).await?, (true, false));

    // a second week of high readings pulls the mean to 150
    glucose_week(&ctx, 1, 200.0, 7, now)?;
    reconcile_goals(&ctx, now).await?;
    assert_eq!(goal_edges(&ctx, 1, glucose_goal).await?, (false, true));
    assert!(ctx.stores.graph.edges(RelationType::Achieved).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn activity_window_is_half_open() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let now = ts(2025, 6, 15, 12, 0, 0);
    let window = Duration::days(30);
    seed_graph(&ctx, &[1, 2, 3]).await?;

    let docs = &ctx.stores.documents;
    docs.insert_sensor_record(&activity(1, "running", now - window))?;
    docs.insert_sensor_record(&activity(2, "cycling", now))?;
    docs.insert_sensor_record(&activity(3, "yoga", now - window - Duration::seconds(1)))?;

    let stats = reconcile_activities(&ctx, now, window).await?;
    assert_eq!(stats.evaluated, 3 * ctx.reference.activities.len());
    assert_eq!(stats.held, 1);

    let performs = ctx.stores.graph.edges(RelationType::Performs).await?;
    assert_eq!(performs.len(), 1);
    assert_eq!(
        performs[0].edge,
        EdgeRef::new(RelationType::Performs, 1, activity_id(&ctx, "running"))
    );
    Ok(())
}

#[tokio::test]
async fn stale_activity_edge_is_removed() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let window = Duration::days(30);
    seed_graph(&ctx, &[1]).await?;
    let walked = ts(2025, 6, 1, 8, 0, 0);
    ctx.stores
        .documents
        .insert_sensor_record(&activity(1, "walking", walked))?;

    reconcile_activities(&ctx, ts(2025, 6, 10, 0, 0, 0), window).await?;
    assert_eq!(ctx.stores.graph.edges(RelationType::Performs).await?.len(), 1);

    reconcile_activities(&ctx, walked + window + Duration::days(1), window).await?;
    assert!(ctx.stores.graph.edges(RelationType::Performs).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn contributions_link_catalog_nodes() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let graph = ctx.stores.graph.as_ref();
    let today = ts(2025, 6, 15, 0, 0, 0).date_naive();

    // without nodes every contribution is skipped
    let skipped = nodes::sync_contributions(graph, &ctx.reference, ctx.reporter(), UNIT, today).await?;
    assert_eq!(skipped.skipped, ctx.reference.contributions.len());

    seed_graph(&ctx, &[]).await?;
    let stats = nodes::sync_contributions(graph, &ctx.reference, ctx.reporter(), UNIT, today).await?;
    assert_eq!(stats.loaded, 14);
    nodes::sync_contributions(graph, &ctx.reference, ctx.reporter(), UNIT, today).await?;
    assert_eq!(graph.edges(RelationType::ContributesTo).await?.len(), 14);
    Ok(())
}

#[tokio::test]
async fn entries_dropped_from_the_catalog_leave_the_graph() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let now = ts(2025, 6, 15, 12, 0, 0);
    let today = now.date_naive();
    let graph = ctx.stores.graph.as_ref();
    seed_graph(&ctx, &[1]).await?;
    ctx.stores
        .documents
        .insert_sensor_record(&activity(1, "yoga", now - Duration::days(1)))?;
    reconcile_activities(&ctx, now, Duration::days(30)).await?;
    reconcile_goals(&ctx, now).await?;
    nodes::sync_contributions(graph, &ctx.reference, ctx.reporter(), UNIT, today).await?;

    let yoga = activity_id(&ctx, "yoga");
    let sleep = goal_id(&ctx, "restful_sleep");
    assert!(graph.edge(&EdgeRef::new(RelationType::Performs, 1, yoga)).await?.is_some());

    let mut trimmed = ctx.reference.clone();
    trimmed.activities.retain(|a| a.id != yoga);
    trimmed.goals.retain(|g| g.id != sleep);
    trimmed
        .contributions
        .retain(|c| c.activity_id != yoga && c.goal_id != sleep);
    trimmed.validate()?;

    let activities = nodes::sync_activity_nodes(graph, &trimmed, ctx.reporter(), UNIT).await?;
    let goals = nodes::sync_goal_nodes(graph, &trimmed, ctx.reporter(), UNIT).await?;
    let contributions = nodes::sync_contributions(graph, &trimmed, ctx.reporter(), UNIT, today).await?;
    assert_eq!(activities.removed, 1);
    assert_eq!(goals.removed, 1);
    assert_eq!(contributions.removed, 0);

    assert!(!graph.node_keys(NodeLabel::Activity).await?.contains(&yoga));
    assert!(!graph.node_keys(NodeLabel::Goal).await?.contains(&sleep));
    assert!(graph.edges(RelationType::Performs).await?.is_empty());
    assert_eq!(goal_edges(&ctx, 1, sleep).await?, (false, false));
    assert_eq!(
        graph.edges(RelationType::ContributesTo).await?.len(),
        trimmed.contributions.len()
    );

    // a contribution dropped on its own is deleted by the contribution phase
    let dropped = trimmed.contributions.pop().unwrap();
    let contributions = nodes::sync_contributions(graph, &trimmed, ctx.reporter(), UNIT, today).await?;
    assert_eq!(contributions.removed, 1);
    assert!(graph
        .edge(&EdgeRef::new(RelationType::ContributesTo, dropped.activity_id, dropped.goal_id))
        .await?
        .is_none());
    Ok(())
}
