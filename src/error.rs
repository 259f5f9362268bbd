//! Error types for connramp.

use std::fmt;
use thiserror::Error;

/// Which statement of a workload unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Insert,
    Select,
    Delete,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPhase::Insert => write!(f, "inserting row"),
            QueryPhase::Select => write!(f, "selecting row"),
            QueryPhase::Delete => write!(f, "deleting row"),
        }
    }
}

/// Which transaction boundary of a workload unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Begin,
    Commit,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Begin => write!(f, "beginning transaction"),
            TxPhase::Commit => write!(f, "committing transaction"),
        }
    }
}

/// The main error type for benchmark operations.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Connection acquisition exhausted its retries.
    #[error("Error opening connection after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// A statement inside a workload unit failed.
    #[error("Error {phase}: {source}")]
    Query {
        phase: QueryPhase,
        #[source]
        source: sqlx::Error,
    },

    /// BEGIN or COMMIT failed.
    #[error("Error {phase}: {source}")]
    Transaction {
        phase: TxPhase,
        #[source]
        source: sqlx::Error,
    },

    /// Creating scratch tables or warming up failed.
    #[error("Setup error: {0}")]
    Setup(String),

    /// Dropping tables or closing connections failed.
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// A worker task died without reporting a result.
    #[error("Worker {slot} aborted: {message}")]
    Worker { slot: usize, message: String },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error on one of the report streams.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a query error for the given phase.
    pub fn query(phase: QueryPhase, source: sqlx::Error) -> Self {
        Self::Query { phase, source }
    }

    /// Create a transaction error for the given phase.
    pub fn transaction(phase: TxPhase, source: sqlx::Error) -> Self {
        Self::Transaction { phase, source }
    }

    /// Whether this error only affects a single workload unit.
    ///
    /// Unit failures are data: they are counted and the ramp continues.
    pub fn is_unit_failure(&self) -> bool {
        matches!(
            self,
            Self::Query { .. } | Self::Transaction { .. } | Self::Worker { .. }
        )
    }
}

/// Result type alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;
