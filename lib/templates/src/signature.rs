use crate::{expand, SchemaError, Template};
use chrontext_model::RDFType;
use oxrdf::{NamedNode, Variable};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::collections::HashMap;

/// The shape a resource template exposes to the splitter.
///
/// A signature is the expanded template body rooted at the identifier
/// parameter, together with the declared column types. The splitter matches
/// query triples against the body to recognize virtualized accesses.
#[derive(Debug, Clone)]
pub struct ResourceSignature {
    pub resource: String,
    pub identifier: Variable,
    pub triples: Vec<TriplePattern>,
    /// Parameter name → declared type, identifier included.
    pub column_types: HashMap<String, RDFType>,
}

impl ResourceSignature {
    /// Expands the template with its own parameters as arguments; internal
    /// variables are renamed with `fresh_suffix` so signatures of different
    /// resources stay independent.
    pub fn new(
        resource: String,
        template: &Template,
        fresh_suffix: &str,
    ) -> Result<ResourceSignature, SchemaError> {
        let arguments: Vec<TermPattern> = template
            .parameters
            .iter()
            .map(|p| TermPattern::Variable(p.variable.clone()))
            .collect();
        let triples = expand(template, &arguments, fresh_suffix)?;
        let column_types = template
            .parameters
            .iter()
            .map(|p| (p.variable.as_str().to_owned(), p.rdf_type.clone()))
            .collect();
        Ok(ResourceSignature {
            resource,
            identifier: template.identifier().variable.clone(),
            triples,
            column_types,
        })
    }

    /// The constant predicates appearing in the body.
    pub fn predicates(&self) -> impl Iterator<Item = &NamedNode> {
        self.triples.iter().filter_map(|t| match &t.predicate {
            NamedNodePattern::NamedNode(nn) => Some(nn),
            NamedNodePattern::Variable(_) => None,
        })
    }

    /// Whether `variable` names a column parameter (identifier excluded).
    pub fn is_column(&self, variable: &Variable) -> bool {
        variable != &self.identifier && self.column_types.contains_key(variable.as_str())
    }
}
