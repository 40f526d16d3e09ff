//! The engine's contract with the RDF store: a read-only SPARQL 1.1 SELECT
//! endpoint over an immutable snapshot, either embedded (Oxigraph) or spoken
//! to over the SPARQL protocol.

mod embedded;
mod endpoint;

pub use embedded::EmbeddedOxigraph;
pub use endpoint::SparqlEndpoint;

use async_trait::async_trait;
use chrontext_model::SolutionTable;
use spargebra::Query;
use thiserror::Error;

/// An error raised by the RDF store.
#[derive(Debug, Error)]
pub enum SparqlQueryError {
    #[error(transparent)]
    Storage(#[from] oxigraph::store::StorageError),
    #[error(transparent)]
    Loader(#[from] oxigraph::store::LoaderError),
    #[error(transparent)]
    Evaluation(#[from] oxigraph::sparql::EvaluationError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Results(#[from] sparesults::QueryResultsParseError),
    #[error("unexpected response from the SPARQL store: {0}")]
    Protocol(String),
    #[error("i/o error while bootstrapping the store: {0}")]
    Io(#[from] std::io::Error),
}

/// A read-only SPARQL store answering SELECT queries.
#[async_trait]
pub trait SparqlQueryable: Send + Sync {
    async fn execute(&self, query: &Query) -> Result<SolutionTable, SparqlQueryError>;
}
