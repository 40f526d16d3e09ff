#![doc = include_str!("../README.md")]

mod combiner;
mod errors;
pub mod flight;
mod mapper;

pub use chrontext_model::{NativeValue, RDFType, SolutionTable};
pub use chrontext_query::{PathEntry, VirtualizedQuery};
pub use chrontext_sparql::{
    EmbeddedOxigraph, SparqlEndpoint, SparqlQueryError, SparqlQueryable,
};
pub use chrontext_templates::{Parameter, SchemaError, Template, TemplateRegistry};
pub use chrontext_virtualized::{
    InMemoryVirtualizedDatabase, SqlDialect, VirtualizedDatabase,
    VirtualizedDatabaseError,
};
pub use errors::ChrontextError;
pub use tokio_util::sync::CancellationToken;

use combiner::Combiner;
use oxrdf::{NamedNode, Term};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The engine facade: a validated resource registry, a handle to the RDF
/// store and, when configured, a virtualized backend.
pub struct Engine {
    registry: TemplateRegistry,
    sparql: Arc<dyn SparqlQueryable>,
    virtualized: Option<Arc<dyn VirtualizedDatabase>>,
}

/// The answer to one hybrid query.
#[derive(Debug)]
pub struct EngineResponse {
    pub table: SolutionTable,
    /// Output column → RDF datatype, where one is known.
    pub rdf_datatypes: HashMap<String, NamedNode>,
    /// One entry per independently planned virtualized query, in rule
    /// application order (innermost pushdown first).
    pub pushdown_paths: Vec<Vec<PathEntry>>,
}

impl Engine {
    /// Validates the resource templates and assembles the engine.
    ///
    /// Fails with [ChrontextError::SchemaError] when a template breaks the
    /// registry invariants; the engine never starts with an inconsistent
    /// schema.
    pub fn new(
        resources: HashMap<String, Template>,
        sparql: Arc<dyn SparqlQueryable>,
        virtualized: Option<Arc<dyn VirtualizedDatabase>>,
    ) -> Result<Engine, ChrontextError> {
        let registry = TemplateRegistry::new(resources)?;
        Ok(Engine {
            registry,
            sparql,
            virtualized,
        })
    }

    /// Answers a SPARQL query, pushing work into the virtualized backend
    /// where possible.
    pub async fn query(&self, sparql: &str) -> Result<EngineResponse, ChrontextError> {
        self.query_with_options(sparql, true, CancellationToken::new())
            .await
    }

    /// [Engine::query] with explicit datatype reporting and cancellation.
    ///
    /// Cancellation is cooperative: it is honored before every store or
    /// backend round-trip, and a cancelled query returns no rows.
    pub async fn query_with_options(
        &self,
        sparql: &str,
        include_datatypes: bool,
        cancellation: CancellationToken,
    ) -> Result<EngineResponse, ChrontextError> {
        let parsed = chrontext_rewrite::parse_query(sparql)?;
        let planned = chrontext_rewrite::plan_query(&parsed, &self.registry)?;
        debug!(
            virtualized = planned.pushdown_paths.len(),
            "finished planning"
        );
        if cancellation.is_cancelled() {
            return Err(ChrontextError::CancellationError);
        }

        let combiner = Combiner {
            registry: &self.registry,
            sparql: self.sparql.as_ref(),
            virtualized: self.virtualized.as_deref(),
            cancellation: &cancellation,
        };
        let table = combiner.execute(&planned.plan).await?;

        let rdf_datatypes = if include_datatypes {
            response_datatypes(&table)
        } else {
            HashMap::new()
        };
        Ok(EngineResponse {
            table,
            rdf_datatypes,
            pushdown_paths: planned.pushdown_paths,
        })
    }
}

/// The datatype dictionary of a result: declared virtualized column types,
/// supplemented by inference from the first bound literal of the remaining
/// columns.
fn response_datatypes(table: &SolutionTable) -> HashMap<String, NamedNode> {
    let mut out = table.rdf_datatypes().clone();
    for (index, column) in table.columns().iter().enumerate() {
        if out.contains_key(column) {
            continue;
        }
        for row in table.rows() {
            match &row[index] {
                Some(Term::Literal(literal)) => {
                    out.insert(column.clone(), literal.datatype().into_owned());
                    break;
                }
                Some(_) => break,
                None => {}
            }
        }
    }
    out
}
