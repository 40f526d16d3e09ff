//! The contract between the engine and virtualized tabular backends.
//!
//! A backend receives a [VirtualizedQuery] whose identifier set has been
//! resolved and returns one columnar batch matching the query's declared
//! outputs. SQL-emitting backends translate the query to one of the
//! recognized dialects; the in-memory backend in this crate evaluates it
//! directly with DataFusion and doubles as the reference implementation.

mod expression;
mod memory;

pub use memory::InMemoryVirtualizedDatabase;

use async_trait::async_trait;
use chrontext_query::VirtualizedQuery;
use datafusion::arrow::array::RecordBatch;
use datafusion::error::DataFusionError;
use thiserror::Error;

/// The SQL dialects a SQL-emitting backend may target. Dialect selection is
/// a property of the backend, never of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    BigQuery,
    Databricks,
    DuckDb,
}

/// An error raised by a virtualized backend.
#[derive(Debug, Error)]
pub enum VirtualizedDatabaseError {
    #[error("no resource named '{0}' is served by this backend")]
    UnknownResource(String),
    #[error("the backend cannot evaluate this query: {0}")]
    Unsupported(String),
    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
}

/// A database serving the bulk tabular observations behind the registered
/// resources.
#[async_trait]
pub trait VirtualizedDatabase: Send + Sync {
    /// Evaluates a fully resolved virtualized query.
    ///
    /// The result schema must contain the identifier column (string typed),
    /// the mapped output columns, aggregate outputs and, when requested, the
    /// grouping column. Timestamps are UTC instants.
    async fn execute(
        &self,
        query: &VirtualizedQuery,
    ) -> Result<RecordBatch, VirtualizedDatabaseError>;
}
