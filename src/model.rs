//! In-memory shapes of the entities moved by a migration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Property mapping of a vertex or edge. Keys enumerate in ascending order.
pub type Properties = BTreeMap<String, PropValue>;

/// Scalar (or list of scalars) property value read from the source graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    Str(String),
    /// Homogeneous or mixed list.
    List(Vec<PropValue>),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => Ok(()),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => f.write_str(v),
            PropValue::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PropValue::Null,
            Value::Bool(v) => PropValue::Bool(v),
            Value::Number(num) => {
                if let Some(i) = num.as_i64() {
                    PropValue::Int(i)
                } else if let Some(f) = num.as_f64() {
                    PropValue::Float(f)
                } else {
                    PropValue::Str(num.to_string())
                }
            }
            Value::String(s) => PropValue::Str(s),
            Value::Array(items) => PropValue::List(items.into_iter().map(PropValue::from).collect()),
            other @ Value::Object(_) => PropValue::Str(other.to_string()),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// A source node.
///
/// `labels` is never empty once the vertex has passed the source boundary and
/// `id` is carried verbatim into the destination so edges can find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Labels in source order; the first one is the primary label.
    pub labels: Vec<String>,
    /// Source-assigned identifier.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Property mapping.
    #[serde(default)]
    pub properties: Properties,
}

impl Vertex {
    /// Creates a vertex with a single label and no properties.
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            labels: vec![label.into()],
            id: id.into(),
            properties: Properties::new(),
        }
    }

    /// Adds a property, replacing any previous value under `key`.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// First label, the only one the destination keeps.
    pub fn primary_label(&self) -> &str {
        self.labels.first().map_or("", String::as_str)
    }
}

/// A directed, typed source relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Relationship type.
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Identifier of the vertex the edge leaves.
    #[serde(deserialize_with = "string_or_number")]
    pub start_node_id: String,
    /// Identifier of the vertex the edge enters.
    #[serde(deserialize_with = "string_or_number")]
    pub end_node_id: String,
    /// Property mapping.
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    /// Creates an edge with no properties.
    pub fn new(
        rel_type: impl Into<String>,
        start_node_id: impl Into<String>,
        end_node_id: impl Into<String>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            start_node_id: start_node_id.into(),
            end_node_id: end_node_id.into(),
            properties: Properties::new(),
        }
    }

    /// Adds a property, replacing any previous value under `key`.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One mutation in the destination's traversal language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Statement(String);

impl Statement {
    /// Wraps statement text.
    pub fn new(text: impl Into<String>) -> Self {
        Statement(text.into())
    }

    /// Statement text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the statement, returning its text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(i) => i.to_string(),
    })
}
