use crate::{SparqlQueryError, SparqlQueryable};
use async_trait::async_trait;
use chrontext_model::SolutionTable;
use sparesults::{
    QueryResultsFormat, QueryResultsParser, ReaderQueryResultsParserOutput,
};
use spargebra::Query;

/// A remote store spoken to over the HTTP SPARQL protocol.
pub struct SparqlEndpoint {
    endpoint: String,
    client: reqwest::Client,
}

impl SparqlEndpoint {
    pub fn new(endpoint: impl Into<String>) -> SparqlEndpoint {
        SparqlEndpoint {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SparqlQueryable for SparqlEndpoint {
    async fn execute(&self, query: &Query) -> Result<SolutionTable, SparqlQueryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .form(&[("query", query.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let parser = QueryResultsParser::from_format(QueryResultsFormat::Json);
        let ReaderQueryResultsParserOutput::Solutions(solutions) =
            parser.for_reader(body.as_ref())?
        else {
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
    }
}
