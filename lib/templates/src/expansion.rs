use crate::{SchemaError, Template};
use oxrdf::Variable;
use spargebra::term::{TermPattern, TriplePattern};
use std::collections::HashMap;

/// Expands a template body with the given arguments.
///
/// Each parameter reference is substituted by the corresponding argument.
/// Internal variables and blank nodes are renamed with `fresh_suffix` so
/// repeated expansions stay independent.
pub fn expand(
    template: &Template,
    arguments: &[TermPattern],
    fresh_suffix: &str,
) -> Result<Vec<TriplePattern>, SchemaError> {
    if arguments.len() != template.parameters.len() {
        return Err(SchemaError::ArgumentCount {
            template: template.iri.clone(),
            expected: template.parameters.len(),
            actual: arguments.len(),
        });
    }
    let substitution: HashMap<&Variable, &TermPattern> = template
        .parameters
        .iter()
        .map(|p| &p.variable)
        .zip(arguments)
        .collect();

    let mut expanded = Vec::with_capacity(template.instances.len());
    for instance in &template.instances {
        expanded.push(TriplePattern {
            subject: substitute(&instance.subject, &substitution, fresh_suffix),
            predicate: instance.predicate.clone(),
            object: substitute(&instance.object, &substitution, fresh_suffix),
        });
    }
    Ok(expanded)
}

fn substitute(
    pattern: &TermPattern,
    substitution: &HashMap<&Variable, &TermPattern>,
    fresh_suffix: &str,
) -> TermPattern {
    match pattern {
        TermPattern::Variable(variable) => match substitution.get(variable) {
            Some(argument) => (*argument).clone(),
            None => TermPattern::Variable(fresh_variable(variable.as_str(), fresh_suffix)),
        },
        TermPattern::BlankNode(blank) => {
            TermPattern::Variable(fresh_variable(blank.as_str(), fresh_suffix))
        }
        other => other.clone(),
    }
}

fn fresh_variable(base: &str, fresh_suffix: &str) -> Variable {
    Variable::new_unchecked(format!("{base}_{fresh_suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontext_model::vocab::ct;
    use oxrdf::vocab::xsd;
    use oxrdf::NamedNode;

    #[test]
    fn expansion_substitutes_parameters_and_renames_internals() {
        let template = Template::timeseries(
            NamedNode::new_unchecked(format!("{}my_resource", ct::NAMESPACE)),
            xsd::DOUBLE.into_owned(),
        );
        let args = vec![
            TermPattern::Variable(Variable::new_unchecked("ts")),
            TermPattern::Variable(Variable::new_unchecked("t")),
            TermPattern::Variable(Variable::new_unchecked("v")),
        ];
        let expanded = expand(&template, &args, "0").unwrap();
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            expanded[0].subject,
            TermPattern::Variable(Variable::new_unchecked("ts"))
        );
        // The internal data-point variable is renamed per expansion.
        assert_eq!(
            expanded[0].object,
            TermPattern::Variable(Variable::new_unchecked("data_point_0"))
        );
        assert_eq!(
            expanded[1].object,
            TermPattern::Variable(Variable::new_unchecked("t"))
        );
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let template = Template::timeseries(
            NamedNode::new_unchecked(format!("{}my_resource", ct::NAMESPACE)),
            xsd::DOUBLE.into_owned(),
        );
        let err = expand(&template, &[], "0").unwrap_err();
        assert!(matches!(err, SchemaError::ArgumentCount { .. }));
    }
}
