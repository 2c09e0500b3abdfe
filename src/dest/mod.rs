#![forbid(unsafe_code)]

//! Destination graph store: provisioning and statement execution.
//!
//! A [`GraphStore`] accepts one statement at a time and answers with a
//! [`ResultPages`] cursor. Side effects of a statement are only guaranteed once
//! every page has been fetched, which is what [`execute`] does.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use crate::model::Statement;

/// Cosmos DB REST provisioning and the composed production store.
pub mod cosmos;
/// Gremlin WebSocket client.
pub mod gremlin;
/// In-process store that interprets the statement grammar.
pub mod memory;

pub use cosmos::{CosmosRest, CosmosStore};
pub use gremlin::GremlinClient;
pub use memory::MemoryStore;

/// One page of a statement's response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    /// Result items carried by the page.
    pub items: Vec<Value>,
    /// Request units charged for the page.
    pub request_charge: f64,
}

/// Cursor over the response pages of a submitted statement.
#[async_trait]
pub trait ResultPages: Send {
    /// True while at least one page is still outstanding.
    fn has_more_results(&self) -> bool;

    /// Fetches the next page. Must only be called while
    /// [`has_more_results`](Self::has_more_results) is true.
    async fn next_page(&mut self) -> Result<ResultPage>;
}

/// A destination graph database with a single graph collection.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Creates the logical database if it does not exist yet.
    async fn ensure_database(&self) -> Result<()>;

    /// Deletes the graph collection. Fails with
    /// [`MigrateError::NotFound`](crate::MigrateError::NotFound) when it is
    /// already absent.
    async fn delete_collection(&self) -> Result<()>;

    /// Creates the graph collection with `throughput` request units.
    async fn create_collection(&self, throughput: u32) -> Result<()>;

    /// Submits one mutation statement.
    async fn submit(&self, statement: &Statement) -> Result<Box<dyn ResultPages>>;
}

/// What draining one statement's response took.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Execution {
    /// Pages fetched.
    pub pages: usize,
    /// Result items across all pages.
    pub items: usize,
    /// Request units across all pages.
    pub request_charge: f64,
}

/// Submits `statement` and fetches result pages until none remain.
pub async fn execute(store: &dyn GraphStore, statement: &Statement) -> Result<Execution> {
    let mut cursor = store.submit(statement).await?;
    let mut execution = Execution::default();
    while cursor.has_more_results() {
        let page = cursor.next_page().await?;
        execution.pages += 1;
        execution.items += page.items.len();
        execution.request_charge += page.request_charge;
        trace!(
            page = execution.pages,
            items = page.items.len(),
            "dest.page.fetched"
        );
    }
    Ok(execution)
}
