//! Property graph of users, activities and goals.
//!
//! Nodes are keyed by `(label, business key)` and edges by `(type, from, to)`; both get
//! stable v5 uuids so merges from separate runs converge on the same rows.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::utils::id::{stable_edge_id, stable_node_id};
use crate::utils::sqlite::{self, SharedConnection};
use crate::utils::time::{format_date, parse_date};

const STORE: &str = "graph store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    User,
    Activity,
    Goal,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::User => "Usuario",
            NodeLabel::Activity => "Actividad",
            NodeLabel::Goal => "Objetivo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    Performs,
    HasGoal,
    Achieved,
    ContributesTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Performs => "REALIZA",
            RelationType::HasGoal => "TIENE_OBJETIVO",
            RelationType::Achieved => "CUMPLIO",
            RelationType::ContributesTo => "CONTRIBUYE_A",
        }
    }

    /// `(from, to)` labels of the relation.
    pub fn endpoints(&self) -> (NodeLabel, NodeLabel) {
        match self {
            RelationType::Performs => (NodeLabel::User, NodeLabel::Activity),
            RelationType::HasGoal | RelationType::Achieved => (NodeLabel::User, NodeLabel::Goal),
            RelationType::ContributesTo => (NodeLabel::Activity, NodeLabel::Goal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub key: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    pub relation: RelationType,
    pub from: NodeRef,
    pub to: NodeRef,
}

impl EdgeRef {
    pub fn new(relation: RelationType, from_key: i64, to_key: i64) -> Self {
        let (from_label, to_label) = relation.endpoints();
        Self {
            relation,
            from: NodeRef {
                label: from_label,
                key: from_key,
            },
            to: NodeRef {
                label: to_label,
                key: to_key,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub label: NodeLabel,
    pub key: i64,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub edge: EdgeRef,
    pub since: NaiveDate,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Creates the node or replaces its properties. Never duplicates a business key.
    async fn merge_node(&self, label: NodeLabel, key: i64, properties: Map<String, Value>) -> Result<()>;

    async fn node_keys(&self, label: NodeLabel) -> Result<Vec<i64>>;

    async fn nodes(&self, label: NodeLabel) -> Result<Vec<GraphNode>>;

    /// Removes the node together with every edge touching it. Returns whether the node
    /// existed.
    async fn delete_node(&self, label: NodeLabel, key: i64) -> Result<bool>;

    /// Creates the edge or refreshes its `since` stamp. Returns `false` without writing
    /// when either endpoint node is missing.
    async fn merge_edge(&self, edge: &EdgeRef, since: NaiveDate) -> Result<bool>;

    /// Returns whether an edge was removed.
    async fn delete_edge(&self, edge: &EdgeRef) -> Result<bool>;

    async fn edge(&self, edge: &EdgeRef) -> Result<Option<GraphEdge>>;

    async fn edges(&self, relation: RelationType) -> Result<Vec<GraphEdge>>;
}

pub struct SqliteGraphStore {
    conn: SharedConnection,
}

impl SqliteGraphStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let store = Self {
            conn: sqlite::open(STORE, &config.graph_path)?,
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
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                business_key INTEGER NOT NULL,
                properties TEXT NOT NULL,
                UNIQUE (label, business_key)
            );
            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                relation TEXT NOT NULL,
                from_node TEXT NOT NULL REFERENCES nodes(id),
                to_node TEXT NOT NULL REFERENCES nodes(id),
                from_key INTEGER NOT NULL,
                to_key INTEGER NOT NULL,
                since TEXT NOT NULL,
                UNIQUE (relation, from_node, to_node)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_relation ON edges (relation);
            COMMIT;",
        )?;
        Ok(())
    }
}

fn node_id(node: &NodeRef) -> String {
    stable_node_id(node.label.as_str(), node.key).to_string()
}

fn edge_id(edge: &EdgeRef) -> String {
    let from = stable_node_id(edge.from.label.as_str(), edge.from.key);
    let to = stable_node_id(edge.to.label.as_str(), edge.to.key);
    stable_edge_id(edge.relation.as_str(), &from, &to).to_string()
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn merge_node(&self, label: NodeLabel, key: i64, properties: Map<String, Value>) -> Result<()> {
        let id = node_id(&NodeRef { label, key });
        let body = serde_json::to_string(&properties)?;
        let conn = sqlite::lock(STORE, &self.conn)?;
        conn.execute(
            "INSERT INTO nodes (id, label, business_key, properties) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET properties = excluded.properties",
            params![id, label.as_str(), key, body],
        )?;
        log::debug!("merged node {}({key})", label.as_str());
        Ok(())
    }

    async fn node_keys(&self, label: NodeLabel) -> Result<Vec<i64>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt =
            conn.prepare("SELECT business_key FROM nodes WHERE label = ?1 ORDER BY business_key")?;
        let keys = stmt
            .query_map(params![label.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(keys)
    }

    async fn nodes(&self, label: NodeLabel) -> Result<Vec<GraphNode>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT business_key, properties FROM nodes WHERE label = ?1 ORDER BY business_key",
        )?;
        let rows = stmt
            .query_map(params![label.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut nodes = Vec::with_capacity(rows.len());
        for (key, body) in rows {
            nodes.push(GraphNode {
                label,
                key,
                properties: serde_json::from_str(&body)?,
            });
        }
        Ok(nodes)
    }

    async fn delete_node(&self, label: NodeLabel, key: i64) -> Result<bool> {
        let id = node_id(&NodeRef { label, key });
        let mut conn = sqlite::lock(STORE, &self.conn)?;
        let tx = conn.transaction()?;
        let edges = tx.execute(
            "DELETE FROM edges WHERE from_node = ?1 OR to_node = ?1",
            params![id],
        )?;
        let removed = tx.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
        tx.commit()?;
        if removed > 0 {
            log::debug!("deleted node {}({key}) and {edges} edges", label.as_str());
        }
        Ok(removed > 0)
    }

    async fn merge_edge(&self, edge: &EdgeRef, since: NaiveDate) -> Result<bool> {
        let from = node_id(&edge.from);
        let to = node_id(&edge.to);
        let conn = sqlite::lock(STORE, &self.conn)?;
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2)",
            params![from, to],
            |row| row.get(0),
        )?;
        if present < 2 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO edges (id, relation, from_node, to_node, from_key, to_key, since)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET since = excluded.since",
            params![
                edge_id(edge),
                edge.relation.as_str(),
                from,
                to,
                edge.from.key,
                edge.to.key,
                format_date(&since),
            ],
        )?;
        Ok(true)
    }

    async fn delete_edge(&self, edge: &EdgeRef) -> Result<bool> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let removed = conn.execute("DELETE FROM edges WHERE id = ?1", params![edge_id(edge)])?;
        Ok(removed > 0)
    }

    async fn edge(&self, edge: &EdgeRef) -> Result<Option<GraphEdge>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let since: Option<String> = conn
            .query_row(
                "SELECT since FROM edges WHERE id = ?1",
                params![edge_id(edge)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = since else {
            return Ok(None);
        };
        Ok(Some(GraphEdge {
            edge: *edge,
            since: parse_date("edges", &raw)?,
        }))
    }

    async fn edges(&self, relation: RelationType) -> Result<Vec<GraphEdge>> {
        let conn = sqlite::lock(STORE, &self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT from_key, to_key, since FROM edges WHERE relation = ?1 ORDER BY from_key, to_key",
        )?;
        let rows = stmt
            .query_map(params![relation.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut edges = Vec::with_capacity(rows.len());
        for (from_key, to_key, since) in rows {
            edges.push(GraphEdge {
                edge: EdgeRef::new(relation, from_key, to_key),
                since: parse_date("edges", &since)?,
            });
        }
        Ok(edges)
    }
}
