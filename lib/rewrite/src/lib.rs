//! Query rewriting for the hybrid engine.
//!
//! The passes in this crate take a parsed SPARQL query and produce a
//! [chrontext_query::CombinedPlan]: DT-block desugaring, property-path
//! decomposition, classification of triple patterns into static and
//! virtualized accesses, and the pushdown of enclosing algebra operators
//! into the virtualized queries.

mod dt;
mod expressions;
mod normalize;
mod pushdown;
mod split;
mod vars;

pub use dt::parse_query;
pub use pushdown::{plan_query, PlannedQuery};

use thiserror::Error;

/// An error raised while parsing or planning a query.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Parse(#[from] spargebra::SparqlSyntaxError),
    #[error("only SELECT queries are supported")]
    UnsupportedQueryType,
    #[error("cannot bind the DT block to a timeseries variable: {0}")]
    AmbiguousDTBinding(String),
    #[error("malformed DT block: {0}")]
    DtSyntax(String),
}
