//! Error taxonomy shared by every stage of a migration.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::migrate::Phase;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Every way a migration run can fail.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Missing or invalid connection settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The source graph refused the connection or the credentials.
    #[error("failed to connect to source graph: {0}")]
    SourceConnect(String),
    /// A read query failed while streaming rows.
    #[error("failed to read from source graph: {0}")]
    SourceRead(String),
    /// A source row did not carry the entity the query promised.
    #[error("malformed source row in column '{column}': {reason}")]
    MalformedRow {
        /// Result column that was inspected.
        column: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A destination resource does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Creating or deleting a destination resource failed.
    #[error("provisioning {resource} failed with status {status}: {message}")]
    Provisioning {
        /// Resource link, e.g. `dbs/graphdb/colls/Northwind`.
        resource: String,
        /// HTTP status returned by the destination.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The destination rejected a mutation statement.
    #[error("statement failed: {message} (statement: {statement})")]
    Execution {
        /// Statement text as submitted.
        statement: String,
        /// Destination diagnostic.
        message: String,
    },
    /// The destination connection broke.
    #[error("destination transport error: {0}")]
    Transport(String),
    /// A pool worker panicked before reporting its result.
    #[error("worker aborted: {0}")]
    Worker(String),
    /// One or more items of a phase failed; raised after the phase barrier.
    #[error("{phase} phase failed for {failed} of {total} items; first error: {first}")]
    PhaseFailed {
        /// Phase that failed.
        phase: Phase,
        /// Number of failed items.
        failed: usize,
        /// Number of items in the phase.
        total: usize,
        /// First error observed.
        first: Box<MigrateError>,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    pub(crate) fn malformed(column: &str, reason: impl Into<String>) -> Self {
        MigrateError::MalformedRow {
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(statement: &str, message: impl Into<String>) -> Self {
        MigrateError::Execution {
            statement: statement.to_string(),
            message: message.into(),
        }
    }
}
