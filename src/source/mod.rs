#![forbid(unsafe_code)]

//! Reading vertices and edges out of the source graph.
//!
//! A [`GraphSource`] hands back untyped [`SourceRow`]s; [`vertex_from_row`]
//! and [`edge_from_row`] are the only places those rows are inspected, so the
//! rest of the crate works on validated [`Vertex`] and [`Edge`] values.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::model::{Edge, PropValue, Properties, Vertex};

/// Bolt protocol source backed by `neo4rs`.
pub mod bolt;
/// Source answering the two read queries from a JSON export.
pub mod snapshot;

pub use bolt::BoltSource;
pub use snapshot::{GraphSnapshot, SnapshotSource};

/// A fixed read-only query and the result column holding the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadQuery {
    /// Cypher text.
    pub cypher: &'static str,
    /// Column carrying the node or relationship.
    pub column: &'static str,
}

/// Returns every node.
pub const VERTEX_QUERY: ReadQuery = ReadQuery {
    cypher: "MATCH (n) RETURN n",
    column: "n",
};

/// Returns every relationship together with its endpoints.
pub const EDGE_QUERY: ReadQuery = ReadQuery {
    cypher: "MATCH (a)-[r]->(b) RETURN r",
    column: "r",
};

/// One cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// A graph node.
    Node {
        /// Source identifier.
        id: String,
        /// Labels in source order.
        labels: Vec<String>,
        /// Node properties.
        properties: Properties,
    },
    /// A graph relationship.
    Relationship {
        /// Relationship type.
        rel_type: String,
        /// Identifier of the start node.
        start: String,
        /// Identifier of the end node.
        end: String,
        /// Relationship properties.
        properties: Properties,
    },
    /// Anything else.
    Scalar(PropValue),
}

/// A result row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    columns: BTreeMap<String, SourceValue>,
}

impl SourceRow {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the row with `value` stored under `column`.
    pub fn with(mut self, column: impl Into<String>, value: SourceValue) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    /// Value stored under `column`.
    pub fn get(&self, column: &str) -> Option<&SourceValue> {
        self.columns.get(column)
    }
}

/// Read access to the source graph.
///
/// Each call opens its own session, runs one read-only query, materializes
/// every row and releases the session before returning, on success and on
/// failure alike.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Runs `query` and returns all rows.
    async fn read(&self, query: &ReadQuery) -> Result<Vec<SourceRow>>;
}

/// Extracts a vertex from `column` of `row`.
pub fn vertex_from_row(row: &SourceRow, column: &str) -> Result<Vertex> {
    match row.get(column) {
        Some(SourceValue::Node {
            id,
            labels,
            properties,
        }) => {
            if labels.is_empty() {
                return Err(MigrateError::malformed(
                    column,
                    format!("node {id} has no labels"),
                ));
            }
            Ok(Vertex {
                labels: labels.clone(),
                id: id.clone(),
                properties: properties.clone(),
            })
        }
        Some(other) => Err(MigrateError::malformed(
            column,
            format!("expected a node, found {}", kind(other)),
        )),
        None => Err(MigrateError::malformed(column, "column missing")),
    }
}

/// Extracts an edge from `column` of `row`.
pub fn edge_from_row(row: &SourceRow, column: &str) -> Result<Edge> {
    match row.get(column) {
        Some(SourceValue::Relationship {
            rel_type,
            start,
            end,
            properties,
        }) => {
            if rel_type.is_empty() {
                return Err(MigrateError::malformed(
                    column,
                    format!("relationship {start}->{end} has no type"),
                ));
            }
            Ok(Edge {
                rel_type: rel_type.clone(),
                start_node_id: start.clone(),
                end_node_id: end.clone(),
                properties: properties.clone(),
            })
        }
        Some(other) => Err(MigrateError::malformed(
            column,
            format!("expected a relationship, found {}", kind(other)),
        )),
        None => Err(MigrateError::malformed(column, "column missing")),
    }
}

/// Reads every vertex of the source graph.
pub async fn read_vertices(source: &dyn GraphSource) -> Result<Vec<Vertex>> {
    let start = Instant::now();
    let rows = source.read(&VERTEX_QUERY).await?;
    let vertices = rows
        .iter()
        .map(|row| vertex_from_row(row, VERTEX_QUERY.column))
        .collect::<Result<Vec<_>>>()?;
    info!(
        query = VERTEX_QUERY.cypher,
        rows = vertices.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "source.read.completed"
    );
    Ok(vertices)
}

/// Reads every edge of the source graph.
pub async fn read_edges(source: &dyn GraphSource) -> Result<Vec<Edge>> {
    let start = Instant::now();
    let rows = source.read(&EDGE_QUERY).await?;
    let edges = rows
        .iter()
        .map(|row| edge_from_row(row, EDGE_QUERY.column))
        .collect::<Result<Vec<_>>>()?;
    info!(
        query = EDGE_QUERY.cypher,
        rows = edges.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "source.read.completed"
    );
    Ok(edges)
}

fn kind(value: &SourceValue) -> &'static str {
    match value {
        SourceValue::Node { .. } => "a node",
        SourceValue::Relationship { .. } => "a relationship",
        SourceValue::Scalar(_) => "a scalar",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(id: &str, labels: &[&str]) -> SourceValue {
        SourceValue::Node {
            id: id.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties: Properties::from([("name".to_string(), PropValue::from("Alice"))]),
        }
    }

    #[test]
    fn node_rows_become_vertices() {
        let row = SourceRow::new().with("n", node("1", &["Person", "Admin"]));
        let vertex = vertex_from_row(&row, "n").unwrap();
        assert_eq!(vertex.id, "1");
        assert_eq!(vertex.labels, vec!["Person", "Admin"]);
        assert_eq!(vertex.properties["name"], PropValue::from("Alice"));
    }

    #[test]
    fn unlabeled_nodes_are_rejected() {
        let row = SourceRow::new().with("n", node("1", &[]));
        let err = vertex_from_row(&row, "n").unwrap_err();
        assert!(matches!(err, MigrateError::MalformedRow { ref column, .. } if column == "n"));
    }

    #[test]
    fn wrong_kinds_and_missing_columns_are_rejected() {
        let row = SourceRow::new().with("n", SourceValue::Scalar(PropValue::Int(3)));
        assert!(vertex_from_row(&row, "n")
            .unwrap_err()
            .to_string()
            .contains("found a scalar"));
        assert!(edge_from_row(&row, "n")
            .unwrap_err()
            .to_string()
            .contains("expected a relationship"));
        assert!(edge_from_row(&row, "r")
            .unwrap_err()
            .to_string()
            .contains("column missing"));
    }

    #[test]
    fn relationship_rows_become_edges() {
        let row = SourceRow::new().with(
            "r",
            SourceValue::Relationship {
                rel_type: "KNOWS".into(),
                start: "1".into(),
                end: "2".into(),
                properties: Properties::new(),
            },
        );
        assert_eq!(
            edge_from_row(&row, "r").unwrap(),
            Edge::new("KNOWS", "1", "2")
        );
    }

    struct CountingSource {
        reads: AtomicUsize,
        rows: Vec<SourceRow>,
    }

    #[async_trait]
    impl GraphSource for CountingSource {
        async fn read(&self, _query: &ReadQuery) -> Result<Vec<SourceRow>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }
    }

    #[tokio::test]
    async fn one_bad_row_fails_the_whole_read() {
        let source = CountingSource {
            reads: AtomicUsize::new(0),
            rows: vec![
                SourceRow::new().with("n", node("1", &["Person"])),
                SourceRow::new().with("n", node("2", &[])),
            ],
        };
        assert!(read_vertices(&source).await.is_err());
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_read_issues_its_own_query() {
        let source = CountingSource {
            reads: AtomicUsize::new(0),
            rows: vec![SourceRow::new().with("n", node("1", &["Person"]))],
        };
        assert_eq!(read_vertices(&source).await.unwrap().len(), 1);
        assert_eq!(read_vertices(&source).await.unwrap().len(), 1);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }
}
