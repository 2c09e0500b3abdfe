use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::model::{Edge, Vertex};
use crate::source::{GraphSource, ReadQuery, SourceRow, SourceValue, EDGE_QUERY, VERTEX_QUERY};

/// A whole source graph held in memory.
///
/// The JSON form is
/// `{"nodes": [{"labels": [..], "id": "1", "properties": {..}}],
///   "relationships": [{"type": "..", "startNodeId": "1", "endNodeId": "2", "properties": {..}}]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Every node.
    #[serde(default)]
    pub nodes: Vec<Vertex>,
    /// Every relationship.
    #[serde(default)]
    pub relationships: Vec<Edge>,
}

impl GraphSnapshot {
    /// Reads a snapshot from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Serves the two read queries out of a [`GraphSnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotSource {
    snapshot: GraphSnapshot,
    reads: AtomicUsize,
}

impl SnapshotSource {
    /// Wraps an in-memory snapshot.
    pub fn new(snapshot: GraphSnapshot) -> Self {
        Self {
            snapshot,
            reads: AtomicUsize::new(0),
        }
    }

    /// Loads a snapshot file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(GraphSnapshot::from_path(path)?))
    }

    /// Number of queries answered so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GraphSource for SnapshotSource {
    async fn read(&self, query: &ReadQuery) -> Result<Vec<SourceRow>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if *query == VERTEX_QUERY {
            Ok(self
                .snapshot
                .nodes
                .iter()
                .map(|vertex| {
                    SourceRow::new().with(
                        query.column,
                        SourceValue::Node {
                            id: vertex.id.clone(),
                            labels: vertex.labels.clone(),
                            properties: vertex.properties.clone(),
                        },
                    )
                })
                .collect())
        } else if *query == EDGE_QUERY {
            Ok(self
                .snapshot
                .relationships
                .iter()
                .map(|edge| {
                    SourceRow::new().with(
                        query.column,
                        SourceValue::Relationship {
                            rel_type: edge.rel_type.clone(),
                            start: edge.start_node_id.clone(),
                            end: edge.end_node_id.clone(),
                            properties: edge.properties.clone(),
                        },
                    )
                })
                .collect())
        } else {
            Err(MigrateError::SourceRead(format!(
                "snapshot cannot answer '{}'",
                query.cypher
            )))
        }
    }
}
