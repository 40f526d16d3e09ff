use chrontext_model::TermError;
use chrontext_rewrite::RewriteError;
use chrontext_sparql::SparqlQueryError;
use chrontext_templates::SchemaError;
use chrontext_virtualized::VirtualizedDatabaseError;
use thiserror::Error;

/// The engine-level error taxonomy.
///
/// Planning errors are fatal for the query and reported verbatim; backend
/// errors are wrapped with the fingerprint of the offending virtualized
/// query. Pushdown fallbacks are not errors and never surface here.
#[derive(Debug, Error)]
pub enum ChrontextError {
    #[error(transparent)]
    ParseError(#[from] spargebra::SparqlSyntaxError),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error(transparent)]
    SchemaError(#[from] SchemaError),
    #[error(transparent)]
    TermError(#[from] TermError),
    #[error("ambiguous DT binding: {0}")]
    AmbiguousDTBinding(String),
    #[error("virtualized backend failed on {fingerprint}: {source}")]
    BackendError {
        fingerprint: String,
        #[source]
        source: VirtualizedDatabaseError,
    },
    #[error("no virtualized backend is configured, but the query reaches virtualized resources")]
    BackendUnavailable,
    #[error(transparent)]
    StoreError(#[from] SparqlQueryError),
    #[error("the query was cancelled")]
    CancellationError,
    #[error("internal planning invariant violated: {0}")]
    InternalError(String),
}

impl From<RewriteError> for ChrontextError {
    fn from(error: RewriteError) -> Self {
        match error {
            RewriteError::Parse(e) => ChrontextError::ParseError(e),
            RewriteError::UnsupportedQueryType => {
                ChrontextError::MalformedQuery("only SELECT queries are supported".to_owned())
            }
            RewriteError::AmbiguousDTBinding(message) => {
                ChrontextError::AmbiguousDTBinding(message)
            }
            RewriteError::DtSyntax(message) => ChrontextError::MalformedQuery(message),
        }
    }
}
