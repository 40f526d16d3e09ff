use crate::{SparqlQueryError, SparqlQueryable};
use async_trait::async_trait;
use chrontext_model::SolutionTable;
use oxigraph::io::RdfFormat;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use spargebra::Query;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// An embedded Oxigraph store bootstrapped from an RDF file or reader.
///
/// The snapshot is immutable once constructed; queries clone the (cheaply
/// clonable) store handle and run on a blocking thread.
#[derive(Clone)]
pub struct EmbeddedOxigraph {
    store: Store,
}

impl EmbeddedOxigraph {
    /// Loads N-Triples or Turtle, inferred from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<EmbeddedOxigraph, SparqlQueryError> {
        let path = path.as_ref();
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("nt") => RdfFormat::NTriples,
            Some("ttl") => RdfFormat::Turtle,
            other => {
                return Err(SparqlQueryError::Protocol(format!(
                    "cannot infer an RDF format from extension {other:?}"
                )))
            }
        };
        Self::from_reader(format, BufReader::new(File::open(path)?))
    }

    pub fn from_reader(
        format: RdfFormat,
        reader: impl Read,
    ) -> Result<EmbeddedOxigraph, SparqlQueryError> {
        let store = Store::new()?;
        store.load_from_reader(format, reader)?;
        Ok(EmbeddedOxigraph { store })
    }
}

#[async_trait]
impl SparqlQueryable for EmbeddedOxigraph {
    async fn execute(&self, query: &Query) -> Result<SolutionTable, SparqlQueryError> {
        let store = self.store.clone();
        let query_string = query.to_string();
        tokio::task::spawn_blocking(move || {
            let results = store.query(query_string.as_str())?;
            let QueryResults::Solutions(solutions) = results else {
                return Err(SparqlQueryError::Protocol(
                    "expected a solution sequence".to_owned(),
                ));
            };
            let variables = solutions.variables().to_vec();
            let mut table = SolutionTable::new(
                variables.iter().map(|v| v.as_str().to_owned()).collect(),
            );
            for solution in solutions {
                let solution = solution?;
                table.push_row(
                    variables
                        .iter()
                        .map(|v| solution.get(v).cloned())
                        .collect(),
                );
            }
            Ok(table)
        })
        .await
        .map_err(|e| SparqlQueryError::Protocol(format!("store task failed: {e}")))?
    }
}
