//! Phase sequencing. Phases run strictly in dependency order and the first failure stops
//! the run.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use bandstore::document::DocumentStore;
use bandstore::graph::GraphStore;
use bandstore::transactional::TransactionalStore;
use bandstore::warehouse::WarehouseStore;
use bandstore::BandStores;
use chrono::{DateTime, Duration, Utc};

use crate::config::{SyncConfig, YearRange};
use crate::error::{Result, SyncError};
use crate::load::{self, LoadStats};
use crate::nodes;
use crate::reference::ReferenceCatalog;
use crate::relations::{self, ReconcileStats};
use crate::report::{run_unit, Reporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    MirrorUsers,
    UserNodes,
    GoalNodes,
    ActivityNodes,
    UserActivities,
    UserGoals,
    Contributions,
    DateDimension,
    UserDimension,
    UserDimensionRefresh,
    ActivityDimension,
    ActivityFacts,
    PaymentFacts,
}

impl Phase {
    /// Every phase, in the order a full run executes them.
    pub const ALL: [Phase; 13] = [
        Phase::MirrorUsers,
        Phase::UserNodes,
        Phase::GoalNodes,
        Phase::ActivityNodes,
        Phase::UserActivities,
        Phase::UserGoals,
        Phase::Contributions,
        Phase::DateDimension,
        Phase::UserDimension,
        Phase::UserDimensionRefresh,
        Phase::ActivityDimension,
        Phase::ActivityFacts,
        Phase::PaymentFacts,
    ];

    /// Unit name used in reports and the run catalog.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::MirrorUsers => "ETL_MIRROR_USERS",
            Phase::UserNodes => "ETL_USER_NODES",
            Phase::GoalNodes => "ETL_GOAL_NODES",
            Phase::ActivityNodes => "ETL_ACTIVITY_NODES",
            Phase::UserActivities => "ETL_USER_ACTIVITY_RELATIONS",
            Phase::UserGoals => "ETL_USER_GOAL_RELATIONS",
            Phase::Contributions => "ETL_ACTIVITY_GOAL_RELATIONS",
            Phase::DateDimension => "ETL_LOAD_DIM_DATE",
            Phase::UserDimension => "ETL_LOAD_DIM_USER",
            Phase::UserDimensionRefresh => "ETL_REFRESH_DIM_USER",
            Phase::ActivityDimension => "ETL_LOAD_DIM_ACTIVITY",
            Phase::ActivityFacts => "ETL_LOAD_ACTIVITY_FACTS",
            Phase::PaymentFacts => "ETL_LOAD_PAYMENT_FACTS",
        }
    }

    /// Command-line spelling, e.g. `user-dimension`.
    pub fn slug(&self) -> &'static str {
        match self {
            Phase::MirrorUsers => "mirror-users",
            Phase::UserNodes => "user-nodes",
            Phase::GoalNodes => "goal-nodes",
            Phase::ActivityNodes => "activity-nodes",
            Phase::UserActivities => "user-activities",
            Phase::UserGoals => "user-goals",
            Phase::Contributions => "contributions",
            Phase::DateDimension => "date-dimension",
            Phase::UserDimension => "user-dimension",
            Phase::UserDimensionRefresh => "user-dimension-refresh",
            Phase::ActivityDimension => "activity-dimension",
            Phase::ActivityFacts => "activity-facts",
            Phase::PaymentFacts => "payment-facts",
        }
    }
}

impl FromStr for Phase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|p| p.slug() == s || p.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Phase::ALL.iter().map(|p| p.slug()).collect();
                SyncError::InvalidInput(format!(
                    "unknown phase '{s}', expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Load(LoadStats),
    Reconcile(ReconcileStats),
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOutcome::Load(stats) => fmt::Display::fmt(stats, f),
            PhaseOutcome::Reconcile(stats) => fmt::Display::fmt(stats, f),
        }
    }
}

/// The four stores a pipeline moves data between.
#[derive(Clone)]
pub struct SyncStores {
    pub transactional: Arc<dyn TransactionalStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub graph: Arc<dyn GraphStore>,
    pub warehouse: Arc<dyn WarehouseStore>,
}

impl From<&BandStores> for SyncStores {
    fn from(stores: &BandStores) -> Self {
        Self {
            transactional: stores.transactional.clone(),
            documents: stores.documents.clone(),
            graph: stores.graph.clone(),
            warehouse: stores.warehouse.clone(),
        }
    }
}

pub struct Pipeline {
    stores: SyncStores,
    catalog: ReferenceCatalog,
    config: SyncConfig,
    reporter: Arc<dyn Reporter>,
    now: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(
        stores: SyncStores,
        catalog: ReferenceCatalog,
        config: SyncConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            stores,
            catalog,
            config,
            reporter,
            now: None,
        }
    }

    /// Pins the processing time instead of reading the clock at each phase.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    pub async fn run_phase(&self, phase: Phase) -> Result<PhaseOutcome> {
        run_unit(self.reporter.as_ref(), phase.name(), self.execute(phase)).await
    }

    /// Runs every phase in order, the date dimension only when asked. Stops at the first
    /// failed phase and returns its error.
    pub async fn run_all(&self, with_date_dimension: bool) -> Result<Vec<(Phase, PhaseOutcome)>> {
        let start = Instant::now();
        log::info!("starting full sync run");
        let mut outcomes = Vec::new();
        for phase in Phase::ALL {
            if phase == Phase::DateDimension && !with_date_dimension {
                continue;
            }
            match self.run_phase(phase).await {
                Ok(outcome) => outcomes.push((phase, outcome)),
                Err(err) => {
                    log::error!(
                        "sync run failed in {} after {:.2} min",
                        phase.name(),
                        start.elapsed().as_secs_f64() / 60.0
                    );
                    return Err(SyncError::Phase {
                        phase: phase.name(),
                        source: Box::new(err),
                    });
                }
            }
        }
        log::info!(
            "sync run finished: {} phases in {:.2} min",
            outcomes.len(),
            start.elapsed().as_secs_f64() / 60.0
        );
        Ok(outcomes)
    }

    /// Generates the date dimension for an explicit year range.
    pub async fn load_date_dimension(&self, range: YearRange) -> Result<LoadStats> {
        let unit = Phase::DateDimension.name();
        run_unit(
            self.reporter.as_ref(),
            unit,
            load::load_date_dimension(
                self.stores.warehouse.as_ref(),
                range,
                self.reporter.as_ref(),
                unit,
            ),
        )
        .await
    }

    async fn execute(&self, phase: Phase) -> Result<PhaseOutcome> {
        let s = &self.stores;
        let reporter = self.reporter.as_ref();
        let unit = phase.name();
        let outcome = match phase {
            Phase::MirrorUsers => PhaseOutcome::Load(
                load::mirror_users(s.transactional.as_ref(), s.documents.as_ref(), reporter, unit)
                    .await?,
            ),
            Phase::UserNodes => PhaseOutcome::Load(
                nodes::sync_user_nodes(s.documents.as_ref(), s.graph.as_ref(), reporter, unit)
                    .await?,
            ),
            Phase::GoalNodes => PhaseOutcome::Load(
                nodes::sync_goal_nodes(s.graph.as_ref(), &self.catalog, reporter, unit).await?,
            ),
            Phase::ActivityNodes => PhaseOutcome::Load(
                nodes::sync_activity_nodes(s.graph.as_ref(), &self.catalog, reporter, unit)
                    .await?,
            ),
            Phase::UserActivities => PhaseOutcome::Reconcile(
                relations::reconcile_user_activities(
                    s.documents.as_ref(),
                    s.graph.as_ref(),
                    &self.catalog,
                    reporter,
                    unit,
                    self.now(),
                    Duration::try_days(self.config.activity_window_days).ok_or_else(|| {
                        SyncError::InvalidInput(format!(
                            "activity window of {} days is out of range",
                            self.config.activity_window_days
                        ))
                    })?,
                )
                .await?,
            ),
            Phase::UserGoals => PhaseOutcome::Reconcile(
                relations::reconcile_user_goals(
                    s.documents.as_ref(),
                    s.graph.as_ref(),
                    &self.catalog,
                    reporter,
                    unit,
                    self.now(),
                )
                .await?,
            ),
            Phase::Contributions => PhaseOutcome::Load(
                nodes::sync_contributions(
                    s.graph.as_ref(),
                    &self.catalog,
                    reporter,
                    unit,
                    self.now().date_naive(),
                )
                .await?,
            ),
            Phase::DateDimension => {
                let range = self.config.date_dimension.ok_or_else(|| {
                    SyncError::Config("no date_dimension year range configured".into())
                })?;
                PhaseOutcome::Load(
                    load::load_date_dimension(s.warehouse.as_ref(), range, reporter, unit).await?,
                )
            }
            Phase::UserDimension => PhaseOutcome::Load(
                load::load_user_dimension(
                    s.transactional.as_ref(),
                    s.warehouse.as_ref(),
                    reporter,
                    unit,
                )
                .await?,
            ),
            Phase::UserDimensionRefresh => PhaseOutcome::Load(
                load::refresh_user_dimension(
                    s.transactional.as_ref(),
                    s.warehouse.as_ref(),
                    reporter,
                    unit,
                    self.now(),
                )
                .await?,
            ),
            Phase::ActivityDimension => PhaseOutcome::Load(
                load::load_activity_dimension(s.warehouse.as_ref(), &self.catalog, reporter, unit)
                    .await?,
            ),
            Phase::ActivityFacts => PhaseOutcome::Load(
                load::load_activity_facts(s.documents.as_ref(), s.warehouse.as_ref(), reporter, unit)
                    .await?,
            ),
            Phase::PaymentFacts => PhaseOutcome::Load(
                load::load_payment_facts(
                    s.transactional.as_ref(),
                    s.warehouse.as_ref(),
                    reporter,
                    unit,
                )
                .await?,
            ),
        };
        Ok(outcome)
    }
}
