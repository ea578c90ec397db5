use bandstore::config::StorageConfig;
use bandstore::document::DocumentStore;
use bandstore::graph::{EdgeRef, GraphStore, NodeLabel, RelationType};
use bandstore::models::{CalendarDay, MirroredUser, User, UserDimRow};
use bandstore::transactional::TransactionalStore;
use bandstore::warehouse::WarehouseStore;
use bandstore::BandStores;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Map};

#[tokio::test]
async fn stores_survive_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let registered = Utc.with_ymd_and_hms(2025, 4, 2, 8, 15, 0).unwrap();
    let today = NaiveDate::from_ymd_opt(2025, 4, 3).unwrap();
    let user = User {
        id: 11,
        name: "Lucia".to_string(),
        registration_date: registered,
        birth_date: NaiveDate::from_ymd_opt(1990, 5, 17),
        gender: Some("female".to_string()),
    };

    {
        let stores = BandStores::open(StorageConfig::new(dir.path()))?;
        stores.transactional.insert_user(&user)?;
        stores
            .documents
            .insert_mirrored_user(&MirroredUser::from(&user))
            .await?;

        let mut props = Map::new();
        props.insert("name".into(), json!("running"));
        stores.graph.merge_node(NodeLabel::User, 11, Map::new()).await?;
        stores.graph.merge_node(NodeLabel::Activity, 2, props).await?;
        let edge = EdgeRef::new(RelationType::Performs, 11, 2);
        assert!(stores.graph.merge_edge(&edge, today).await?);

        stores.warehouse.insert_user(&UserDimRow::from(&user)).await?;
        stores
            .warehouse
            .insert_date(&CalendarDay {
                date: today,
                day: 3,
                month: 4,
                quarter: 2,
                year: 2025,
            })
            .await?;
        stores.catalog.create_task_log("ETL_LOAD_DIM_USER", "COMPLETED")?;
    }

    let stores = BandStores::open(StorageConfig::new(dir.path()))?;
    assert_eq!(stores.transactional.all_users().await?, vec![user.clone()]);
    assert!(stores.documents.find_mirrored_user(11).await?.is_some());

    let edge = stores
        .graph
        .edge(&EdgeRef::new(RelationType::Performs, 11, 2))
        .await?
        .expect("edge persisted");
    assert_eq!(edge.since, today);
    assert_eq!(stores.graph.node_keys(NodeLabel::Activity).await?, vec![2]);

    assert_eq!(
        stores.warehouse.latest_user_registration().await?,
        Some(registered)
    );
    assert!(stores.warehouse.date_id(today).await?.is_some());
    assert_eq!(stores.catalog.recent_task_logs(5)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn in_memory_stores_are_independent() -> anyhow::Result<()> {
    let first = BandStores::in_memory()?;
    let second = BandStores::in_memory()?;
    first
        .warehouse
        .merge_activity("screen_time")
        .await?;

    assert_eq!(first.warehouse.count_rows("dim_actividad").await?, 1);
    assert_eq!(second.warehouse.count_rows("dim_actividad").await?, 0);
    assert!(second.config.is_none());
    Ok(())
}
