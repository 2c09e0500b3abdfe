use async_trait::async_trait;
use neo4rs::{query, Graph, Node, Relation, Row};
use serde_json::Value;

use crate::config::SourceSettings;
use crate::error::{MigrateError, Result};
use crate::model::{PropValue, Properties};
use crate::source::{GraphSource, ReadQuery, SourceRow, SourceValue};

/// Reads from a Neo4j server over Bolt.
///
/// No connection outlives a [`GraphSource::read`] call: the driver handle is
/// created at the start of the call and dropped before it returns.
pub struct BoltSource {
    settings: SourceSettings,
}

impl BoltSource {
    /// Source for the server described by `settings`. Nothing is dialled yet.
    pub fn new(settings: &SourceSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    async fn connect(&self) -> Result<Graph> {
        Graph::new(
            self.settings.uri.as_str(),
            self.settings.user.as_str(),
            self.settings.password.as_str(),
        )
        .await
        .map_err(|err| MigrateError::SourceConnect(format!("{}: {err}", self.settings.uri)))
    }
}

#[async_trait]
impl GraphSource for BoltSource {
    async fn read(&self, read: &ReadQuery) -> Result<Vec<SourceRow>> {
        let graph = self.connect().await?;
        let mut stream = graph
            .execute(query(read.cypher))
            .await
            .map_err(|err| MigrateError::SourceRead(format!("{}: {err}", read.cypher)))?;
        let mut rows = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|err| MigrateError::SourceRead(format!("{}: {err}", read.cypher)))?
        {
            rows.push(convert_row(&row, read.column)?);
        }
        drop(stream);
        drop(graph);
        Ok(rows)
    }
}

fn convert_row(row: &Row, column: &str) -> Result<SourceRow> {
    if let Ok(node) = row.get::<Node>(column) {
        return Ok(SourceRow::new().with(column, node_value(&node, column)?));
    }
    if let Ok(rel) = row.get::<Relation>(column) {
        return Ok(SourceRow::new().with(column, relation_value(&rel, column)?));
    }
    Err(MigrateError::malformed(
        column,
        "expected a node or relationship",
    ))
}

fn node_value(node: &Node, column: &str) -> Result<SourceValue> {
    let mut properties = Properties::new();
    for key in node.keys() {
        let key = key.to_string();
        let value = node
            .get::<Value>(&key)
            .map_err(|err| MigrateError::malformed(column, format!("property '{key}': {err}")))?;
        properties.insert(key, PropValue::from(value));
    }
    Ok(SourceValue::Node {
        id: node.id().to_string(),
        labels: node.labels().iter().map(|label| label.to_string()).collect(),
        properties,
    })
}

fn relation_value(rel: &Relation, column: &str) -> Result<SourceValue> {
    let mut properties = Properties::new();
    for key in rel.keys() {
        let key = key.to_string();
        let value = rel
            .get::<Value>(&key)
            .map_err(|err| MigrateError::malformed(column, format!("property '{key}': {err}")))?;
        properties.insert(key, PropValue::from(value));
    }
    Ok(SourceValue::Relationship {
        rel_type: rel.typ().to_string(),
        start: rel.start_node_id().to_string(),
        end: rel.end_node_id().to_string(),
        properties,
    })
}
