use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::dest::{GraphStore, ResultPage, ResultPages};
use crate::error::{MigrateError, Result};
use crate::model::Statement;

const PAGE_CHARGE: f64 = 1.0;

/// A vertex held by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredVertex {
    /// Vertex label.
    pub label: String,
    /// Properties as strings. A user property named `id` is kept here; it
    /// never replaces the identifier.
    pub properties: BTreeMap<String, String>,
}

/// An edge held by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StoredEdge {
    /// Edge label.
    pub label: String,
    /// Id of the vertex the edge leaves.
    pub out_v: String,
    /// Id of the vertex the edge enters.
    pub in_v: String,
    /// Edge properties, as strings.
    pub properties: BTreeMap<String, String>,
}

/// Contents of the graph collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Collection {
    /// Throughput the collection was created with.
    pub throughput: u32,
    /// Vertices by id.
    pub vertices: BTreeMap<String, StoredVertex>,
    /// Edges in insertion order.
    pub edges: Vec<StoredEdge>,
}

#[derive(Debug, Default)]
struct State {
    database: bool,
    collection: Option<Collection>,
    submitted: Vec<Statement>,
    page_fetches: usize,
}

/// Destination that keeps the graph in process memory.
///
/// Statements are parsed against the exact mutation grammar the encoder
/// produces. Every response is split into a fixed number of pages and the
/// mutation only takes effect when the last page is fetched, so a caller that
/// stops draining early loses the write.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    pages_per_response: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store answering every statement with a single page.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            pages_per_response: 1,
        }
    }

    /// Splits every response into `pages` pages (at least one).
    pub fn with_pages_per_response(mut self, pages: usize) -> Self {
        self.pages_per_response = pages.max(1);
        self
    }

    /// True once the database has been created.
    pub fn database_exists(&self) -> bool {
        self.state.lock().database
    }

    /// Copy of the graph collection, if it exists.
    pub fn collection(&self) -> Option<Collection> {
        self.state.lock().collection.clone()
    }

    /// Vertices currently stored.
    pub fn vertex_count(&self) -> usize {
        self.state
            .lock()
            .collection
            .as_ref()
            .map_or(0, |c| c.vertices.len())
    }

    /// Edges currently stored.
    pub fn edge_count(&self) -> usize {
        self.state
            .lock()
            .collection
            .as_ref()
            .map_or(0, |c| c.edges.len())
    }

    /// Every statement submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<Statement> {
        self.state.lock().submitted.clone()
    }

    /// Pages fetched across all statements.
    pub fn page_fetches(&self) -> usize {
        self.state.lock().page_fetches
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn ensure_database(&self) -> Result<()> {
        self.state.lock().database = true;
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.database || state.collection.take().is_none() {
            return Err(MigrateError::NotFound("collection".into()));
        }
        Ok(())
    }

    async fn create_collection(&self, throughput: u32) -> Result<()> {
        let mut state = self.state.lock();
        if !state.database {
            return Err(MigrateError::NotFound("database".into()));
        }
        if state.collection.is_some() {
            return Err(MigrateError::Provisioning {
                resource: "collection".into(),
                status: 409,
                message: "collection already exists".into(),
            });
        }
        state.collection = Some(Collection {
            throughput,
            ..Collection::default()
        });
        Ok(())
    }

    async fn submit(&self, statement: &Statement) -> Result<Box<dyn ResultPages>> {
        let mut state = self.state.lock();
        state.submitted.push(statement.clone());
        if state.collection.is_none() {
            return Err(MigrateError::execution(
                statement.as_str(),
                "graph collection does not exist",
            ));
        }
        let mutation = Mutation::parse(statement.as_str())
            .map_err(|reason| MigrateError::execution(statement.as_str(), reason))?;
        Ok(Box::new(MemoryPages {
            state: Arc::clone(&self.state),
            statement: statement.clone(),
            mutation: Some(mutation),
            remaining: self.pages_per_response,
        }))
    }
}

struct MemoryPages {
    state: Arc<Mutex<State>>,
    statement: Statement,
    mutation: Option<Mutation>,
    remaining: usize,
}

#[async_trait]
impl ResultPages for MemoryPages {
    fn has_more_results(&self) -> bool {
        self.remaining > 0
    }

    async fn next_page(&mut self) -> Result<ResultPage> {
        let mut state = self.state.lock();
        state.page_fetches += 1;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return Ok(ResultPage {
                items: Vec::new(),
                request_charge: PAGE_CHARGE,
            });
        }
        let Some(mutation) = self.mutation.take() else {
            return Ok(ResultPage::default());
        };
        let item = mutation
            .apply(&mut state)
            .map_err(|reason| MigrateError::execution(self.statement.as_str(), reason))?;
        Ok(ResultPage {
            items: vec![item],
            request_charge: PAGE_CHARGE,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Mutation {
    AddVertex {
        label: String,
        id: String,
        properties: BTreeMap<String, String>,
    },
    AddEdge {
        label: String,
        out_v: String,
        in_v: String,
        properties: BTreeMap<String, String>,
    },
}

impl Mutation {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(text);
        if cursor.eat("g.addV(") {
            let label = cursor.literal()?;
            cursor.expect(")")?;
            let id = cursor
                .identifier()
                .map_err(|_| "addV without a leading id property".to_string())?;
            let properties = cursor.properties()?;
            cursor.finish()?;
            Ok(Mutation::AddVertex {
                label,
                id,
                properties,
            })
        } else if cursor.eat("g.V(") {
            let out_v = cursor.literal()?;
            cursor.expect(").addE(")?;
            let label = cursor.literal()?;
            cursor.expect(")")?;
            let properties = cursor.properties()?;
            cursor.expect(".to(g.V(")?;
            let in_v = cursor.literal()?;
            cursor.expect("))")?;
            cursor.finish()?;
            Ok(Mutation::AddEdge {
                label,
                out_v,
                in_v,
                properties,
            })
        } else {
            Err(format!("unsupported traversal at offset 0: '{text}'"))
        }
    }

    fn apply(self, state: &mut State) -> std::result::Result<Value, String> {
        let collection = state
            .collection
            .as_mut()
            .ok_or_else(|| "graph collection does not exist".to_string())?;
        match self {
            Mutation::AddVertex {
                label,
                id,
                properties,
            } => {
                if collection.vertices.contains_key(&id) {
                    return Err(format!("a vertex with id '{id}' already exists"));
                }
                let item = json!({
                    "id": id,
                    "label": label,
                    "type": "vertex",
                    "properties": properties,
                });
                collection
                    .vertices
                    .insert(id, StoredVertex { label, properties });
                Ok(item)
            }
            Mutation::AddEdge {
                label,
                out_v,
                in_v,
                properties,
            } => {
                for endpoint in [&out_v, &in_v] {
                    if !collection.vertices.contains_key(endpoint) {
                        return Err(format!("vertex '{endpoint}' does not exist"));
                    }
                }
                let item = json!({
                    "id": Uuid::new_v4().to_string(),
                    "label": label,
                    "type": "edge",
                    "outV": out_v,
                    "inV": in_v,
                    "properties": properties,
                });
                collection.edges.push(StoredEdge {
                    label,
                    out_v,
                    in_v,
                    properties,
                });
                Ok(item)
            }
        }
    }
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> std::result::Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected '{token}' at offset {}", self.pos))
        }
    }

    fn literal(&mut self) -> std::result::Result<String, String> {
        self.expect("'")?;
        let rest = self.rest();
        let end = rest
            .find('\'')
            .ok_or_else(|| format!("unterminated literal at offset {}", self.pos))?;
        let value = rest[..end].to_string();
        self.pos += end + 1;
        Ok(value)
    }

    /// The `.property('id','<id>')` clause that must open a vertex.
    fn identifier(&mut self) -> std::result::Result<String, String> {
        self.expect(".property('id',")?;
        let id = self.literal()?;
        self.expect(")")?;
        Ok(id)
    }

    fn properties(&mut self) -> std::result::Result<BTreeMap<String, String>, String> {
        let mut properties = BTreeMap::new();
        while self.eat(".property(") {
            let key = self.literal()?;
            self.expect(",")?;
            let value = self.literal()?;
            self.expect(")")?;
            properties.insert(key, value);
        }
        Ok(properties)
    }

    fn finish(&self) -> std::result::Result<(), String> {
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(format!("unexpected trailing input at offset {}", self.pos))
        }
    }
}
