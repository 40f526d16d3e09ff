//! Resource templates.
//!
//! A [Template] names an RDF resource and binds ordered, typed parameters to
//! a body of triple patterns. When a query mentions the resource, the engine
//! expands the body and treats the matched triples as virtualized.

mod expansion;
mod registry;
mod signature;

pub use expansion::expand;
pub use registry::TemplateRegistry;
pub use signature::ResourceSignature;

use chrontext_model::RDFType;
use oxrdf::vocab::xsd;
use oxrdf::{NamedNode, Variable};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use thiserror::Error;

/// An error in a resource template or registry, detected at engine init.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("template {template} has no parameters")]
    NoParameters { template: NamedNode },
    #[error("template {template} declares parameter {variable} twice")]
    DuplicateParameter {
        template: NamedNode,
        variable: Variable,
    },
    #[error("template {template}: the identifier parameter {variable} must be a string literal")]
    IdentifierNotString {
        template: NamedNode,
        variable: Variable,
    },
    #[error("template {template} uses a variable predicate in its body")]
    VariablePredicate { template: NamedNode },
    #[error("template {template}: parameter {variable} is not reachable from the identifier")]
    UnreachableParameter {
        template: NamedNode,
        variable: Variable,
    },
    #[error("template {template} was called with {actual} arguments, expected {expected}")]
    ArgumentCount {
        template: NamedNode,
        expected: usize,
        actual: usize,
    },
    #[error("no resource named '{name}' is registered")]
    UnknownResource { name: String },
}

/// A typed template parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub variable: Variable,
    pub rdf_type: RDFType,
}

impl Parameter {
    pub fn new(variable: Variable, rdf_type: RDFType) -> Parameter {
        Parameter { variable, rdf_type }
    }
}

/// A named, parameterized pattern of triples describing one virtualized
/// resource.
///
/// The first parameter is the resource identifier; the remaining parameters
/// are the columns the backend serves for that identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub iri: NamedNode,
    pub parameters: Vec<Parameter>,
    pub instances: Vec<TriplePattern>,
}

impl Template {
    pub fn new(
        iri: NamedNode,
        parameters: Vec<Parameter>,
        instances: Vec<TriplePattern>,
    ) -> Template {
        Template {
            iri,
            parameters,
            instances,
        }
    }

    /// The canonical timeseries template: an identifier with data points
    /// carrying a timestamp and a value of the given datatype.
    pub fn timeseries(iri: NamedNode, value_datatype: NamedNode) -> Template {
        let id = Variable::new_unchecked("id");
        let timestamp = Variable::new_unchecked("timestamp");
        let value = Variable::new_unchecked("value");
        let data_point = Variable::new_unchecked("data_point");
        Template {
            iri,
            parameters: vec![
                Parameter::new(id.clone(), RDFType::string()),
                Parameter::new(timestamp.clone(), RDFType::date_time()),
                Parameter::new(value.clone(), RDFType::Literal(value_datatype)),
            ],
            instances: vec![
                triple(&id, chrontext_model::vocab::ct::HAS_DATA_POINT, &data_point),
                triple(
                    &data_point,
                    chrontext_model::vocab::ct::HAS_TIMESTAMP,
                    &timestamp,
                ),
                triple(&data_point, chrontext_model::vocab::ct::HAS_VALUE, &value),
            ],
        }
    }

    /// The identifier parameter.
    pub fn identifier(&self) -> &Parameter {
        &self.parameters[0]
    }

    pub fn parameter(&self, variable: &Variable) -> Option<&Parameter> {
        self.parameters.iter().find(|p| &p.variable == variable)
    }

    /// Checks the template invariants. See [SchemaError] for the failure
    /// modes.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.parameters.is_empty() {
            return Err(SchemaError::NoParameters {
                template: self.iri.clone(),
            });
        }
        for (i, parameter) in self.parameters.iter().enumerate() {
            if self.parameters[..i]
                .iter()
                .any(|p| p.variable == parameter.variable)
            {
                return Err(SchemaError::DuplicateParameter {
                    template: self.iri.clone(),
                    variable: parameter.variable.clone(),
                });
            }
        }
        let identifier = self.identifier();
        if identifier.rdf_type != RDFType::Literal(xsd::STRING.into_owned()) {
            return Err(SchemaError::IdentifierNotString {
                template: self.iri.clone(),
                variable: identifier.variable.clone(),
            });
        }
        for instance in &self.instances {
            if matches!(instance.predicate, NamedNodePattern::Variable(_)) {
                return Err(SchemaError::VariablePredicate {
                    template: self.iri.clone(),
                });
            }
        }
        for parameter in &self.parameters[1..] {
            if !self.reachable_from_identifier(&parameter.variable) {
                return Err(SchemaError::UnreachableParameter {
                    template: self.iri.clone(),
                    variable: parameter.variable.clone(),
                });
            }
        }
        Ok(())
    }

    fn reachable_from_identifier(&self, target: &Variable) -> bool {
        let mut frontier = vec![self.identifier().variable.clone()];
        let mut seen = Vec::new();
        while let Some(current) = frontier.pop() {
            if &current == target {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current.clone());
            for instance in &self.instances {
                if instance.subject == TermPattern::Variable(current.clone()) {
                    if let TermPattern::Variable(object) = &instance.object {
                        frontier.push(object.clone());
                    }
                }
            }
        }
        false
    }
}

/// Convenience constructor for template body triples.
pub fn triple(
    subject: &Variable,
    predicate: impl Into<NamedNode>,
    object: &Variable,
) -> TriplePattern {
    TriplePattern {
        subject: TermPattern::Variable(subject.clone()),
        predicate: NamedNodePattern::NamedNode(predicate.into()),
        object: TermPattern::Variable(object.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontext_model::vocab::ct;

    fn template_iri() -> NamedNode {
        NamedNode::new_unchecked(format!("{}my_resource", ct::NAMESPACE))
    }

    #[test]
    fn timeseries_template_is_valid() {
        let template = Template::timeseries(template_iri(), xsd::DOUBLE.into_owned());
        template.validate().unwrap();
        assert_eq!(template.identifier().variable.as_str(), "id");
    }

    #[test]
    fn non_string_identifier_is_rejected() {
        let mut template = Template::timeseries(template_iri(), xsd::DOUBLE.into_owned());
        template.parameters[0].rdf_type = RDFType::integer();
        assert!(matches!(
            template.validate(),
            Err(SchemaError::IdentifierNotString { .. })
        ));
    }

    #[test]
    fn unreachable_parameter_is_rejected() {
        let mut template = Template::timeseries(template_iri(), xsd::DOUBLE.into_owned());
        let orphan = Variable::new_unchecked("orphan");
        template
            .parameters
            .push(Parameter::new(orphan, RDFType::double()));
        assert!(matches!(
            template.validate(),
            Err(SchemaError::UnreachableParameter { .. })
        ));
    }
}
