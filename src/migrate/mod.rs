#![forbid(unsafe_code)]

//! Migration orchestrator.
//!
//! A run walks a fixed sequence: ensure the database, reset the graph
//! collection, load every vertex, then load every edge. Each load phase fans
//! out over a bounded worker pool and waits for all workers before the next
//! step starts, so no edge statement is submitted before the last vertex
//! statement has finished.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::dest::{execute, GraphStore};
use crate::encode::{encode_edge, encode_vertex};
use crate::error::{MigrateError, Result};
use crate::model::Statement;
use crate::source::{read_edges, read_vertices, GraphSource};

mod pool;

/// The two load phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Vertex load.
    Vertices,
    /// Edge load; starts only after the vertex load has completed.
    Edges,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Vertices => f.write_str("vertex"),
            Phase::Edges => f.write_str("edge"),
        }
    }
}

/// Outcome of one load phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseReport {
    /// Entities read from the source.
    pub total: usize,
    /// Statements executed successfully.
    pub executed: usize,
    /// Result pages drained across all statements.
    pub pages: usize,
    /// Request units charged by the destination.
    pub request_charge: f64,
    /// Wall time of the phase.
    pub duration_ms: f64,
}

/// Outcome of a full run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Vertex phase.
    pub vertices: PhaseReport,
    /// Edge phase.
    pub edges: PhaseReport,
    /// Request units charged across both phases.
    pub request_charge: f64,
    /// Wall time of the whole run, provisioning included.
    pub duration_ms: f64,
}

/// Statements a run would submit, in phase order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    /// One statement per source vertex.
    pub vertices: Vec<Statement>,
    /// One statement per source edge.
    pub edges: Vec<Statement>,
}

impl MigrationPlan {
    /// Every statement, vertices first.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.vertices.iter().chain(self.edges.iter())
    }

    /// Number of statements across both phases.
    pub fn len(&self) -> usize {
        self.vertices.len() + self.edges.len()
    }

    /// True when the source graph is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives progress callbacks during [`Migrator::run`]. Every method has a
/// no-op default.
pub trait MigrationObserver: Send + Sync {
    /// A phase is about to submit `total` statements.
    fn phase_started(&self, _phase: Phase, _total: usize) {}

    /// One statement finished, successfully or not.
    fn item_finished(&self, _phase: Phase, _statement: &Statement, _ok: bool) {}

    /// A phase passed its barrier.
    fn phase_finished(&self, _phase: Phase, _report: &PhaseReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {}

/// Drives a migration from a [`GraphSource`] into a [`GraphStore`].
pub struct Migrator<'a> {
    config: &'a MigrationConfig,
    source: Arc<dyn GraphSource>,
    store: Arc<dyn GraphStore>,
    observer: Arc<dyn MigrationObserver>,
}

impl<'a> Migrator<'a> {
    /// Migrator over the given collaborators.
    pub fn new(
        config: &'a MigrationConfig,
        source: Arc<dyn GraphSource>,
        store: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Replaces the progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs the migration end to end.
    ///
    /// The source is read afresh and the destination collection recreated on
    /// every call, so repeated runs converge on the same graph content.
    pub async fn run(&self) -> Result<MigrationReport> {
        let start = Instant::now();
        info!(
            workers = self.config.workers,
            throughput = self.config.throughput,
            "migrate.started"
        );

        self.store.ensure_database().await?;
        self.reset_destination().await?;

        let vertices = read_vertices(self.source.as_ref()).await?;
        let vertex_report = self.load(Phase::Vertices, vertices, encode_vertex).await?;

        let edges = read_edges(self.source.as_ref()).await?;
        let edge_report = self.load(Phase::Edges, edges, encode_edge).await?;

        let report = MigrationReport {
            request_charge: vertex_report.request_charge + edge_report.request_charge,
            vertices: vertex_report,
            edges: edge_report,
            duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        };
        info!(
            vertices = report.vertices.executed,
            edges = report.edges.executed,
            request_charge = report.request_charge,
            duration_ms = report.duration_ms,
            "migrate.completed"
        );
        Ok(report)
    }

    /// Deletes the graph collection if present and creates it again.
    pub async fn reset_destination(&self) -> Result<()> {
        match self.store.delete_collection().await {
            Ok(()) => info!("dest.collection.deleted"),
            Err(MigrateError::NotFound(resource)) => {
                info!(%resource, "dest.collection.absent")
            }
            Err(err) => return Err(err),
        }
        self.store.create_collection(self.config.throughput).await?;
        info!(throughput = self.config.throughput, "dest.collection.created");
        Ok(())
    }

    /// Reads and encodes both phases without touching the destination.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        plan(self.source.as_ref()).await
    }

    async fn load<T>(
        &self,
        phase: Phase,
        entities: Vec<T>,
        encode: fn(&T) -> Statement,
    ) -> Result<PhaseReport>
    where
        T: Send + 'static,
    {
        let total = entities.len();
        let start = Instant::now();
        self.observer.phase_started(phase, total);
        info!(%phase, total, workers = self.config.workers, "migrate.phase.begin");

        let store = Arc::clone(&self.store);
        let observer = Arc::clone(&self.observer);
        let collected = pool::run_bounded(entities, self.config.workers, move |entity: T| {
            let store = Arc::clone(&store);
            let observer = Arc::clone(&observer);
            async move {
                let statement = encode(&entity);
                let started = Instant::now();
                let result = execute(store.as_ref(), &statement).await;
                let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
                match &result {
                    Ok(execution) => info!(
                        %phase,
                        %statement,
                        elapsed_ms,
                        pages = execution.pages,
                        "migrate.item.executed"
                    ),
                    Err(err) => warn!(
                        %phase,
                        %statement,
                        elapsed_ms,
                        error = %err,
                        "migrate.item.failed"
                    ),
                }
                observer.item_finished(phase, &statement, result.is_ok());
                result
            }
        })
        .await;

        let report = PhaseReport {
            total,
            executed: collected.results.len(),
            pages: collected.results.iter().map(|e| e.pages).sum(),
            request_charge: collected.results.iter().map(|e| e.request_charge).sum(),
            duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        };
        info!(
            %phase,
            total,
            failed = collected.failed,
            duration_ms = report.duration_ms,
            "migrate.phase.completed"
        );
        self.observer.phase_finished(phase, &report);

        match collected.first_error {
            Some(first) => Err(MigrateError::PhaseFailed {
                phase,
                failed: collected.failed,
                total,
                first: Box::new(first),
            }),
            None => Ok(report),
        }
    }
}

/// Reads both phases from `source` and encodes them.
pub async fn plan(source: &dyn GraphSource) -> Result<MigrationPlan> {
    let vertices = read_vertices(source).await?;
    let edges = read_edges(source).await?;
    Ok(MigrationPlan {
        vertices: vertices.iter().map(encode_vertex).collect(),
        edges: edges.iter().map(encode_edge).collect(),
    })
}
