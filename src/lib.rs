//! Copies a Neo4j property graph into an Azure Cosmos DB Gremlin collection.
//!
//! The pipeline reads every node and relationship from a [`GraphSource`],
//! encodes each one as a Gremlin mutation [`Statement`], and executes the
//! statements against a [`GraphStore`] in two barrier-separated phases:
//! all vertices first, then all edges.

#![warn(missing_docs)]

pub mod config;
pub mod dest;
pub mod encode;
pub mod error;
pub mod migrate;
pub mod model;
pub mod source;

pub use config::{FileConfig, MigrationConfig, Overrides, Settings};
pub use dest::{execute, Execution, GraphStore, MemoryStore};
pub use encode::{encode_edge, encode_vertex};
pub use error::{MigrateError, Result};
pub use migrate::{plan, MigrationObserver, MigrationPlan, MigrationReport, Migrator, Phase};
pub use model::{Edge, PropValue, Properties, Statement, Vertex};
pub use source::{read_edges, read_vertices, GraphSource, SnapshotSource};
