//! Small helpers over the SPARQL algebra.

use oxrdf::Variable;
use spargebra::algebra::GraphPattern;
use spargebra::term::TermPattern;
use std::collections::HashSet;

/// Collects the in-scope variables of a graph pattern, per the SPARQL 1.1
/// definition of variable scope.
pub fn in_scope_variables(pattern: &GraphPattern, out: &mut HashSet<Variable>) {
    match pattern {
        GraphPattern::Bgp { patterns } => {
            for triple in patterns {
                term_pattern_variable(&triple.subject, out);
                if let spargebra::term::NamedNodePattern::Variable(v) = &triple.predicate {
                    out.insert(v.clone());
                }
                term_pattern_variable(&triple.object, out);
            }
        }
        GraphPattern::Path {
            subject, object, ..
        } => {
            term_pattern_variable(subject, out);
            term_pattern_variable(object, out);
        }
        GraphPattern::Join { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::LeftJoin { left, right, .. }
        | GraphPattern::Lateral { left, right } => {
            in_scope_variables(left, out);
            in_scope_variables(right, out);
        }
        GraphPattern::Minus { left, .. } => in_scope_variables(left, out),
        GraphPattern::Filter { inner, .. }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. } => in_scope_variables(inner, out),
        GraphPattern::Graph { name, inner } => {
            if let spargebra::term::NamedNodePattern::Variable(v) = name {
                out.insert(v.clone());
            }
            in_scope_variables(inner, out);
        }
        GraphPattern::Extend {
            inner, variable, ..
        } => {
            in_scope_variables(inner, out);
            out.insert(variable.clone());
        }
        GraphPattern::Values { variables, .. } => {
            out.extend(variables.iter().cloned());
        }
        GraphPattern::Project { variables, .. } => {
            out.extend(variables.iter().cloned());
        }
        GraphPattern::Group {
            variables,
            aggregates,
            ..
        } => {
            out.extend(variables.iter().cloned());
            out.extend(aggregates.iter().map(|(v, _)| v.clone()));
        }
        GraphPattern::Service { inner, .. } => in_scope_variables(inner, out),
    }
}

fn term_pattern_variable(pattern: &TermPattern, out: &mut HashSet<Variable>) {
    if let TermPattern::Variable(v) = pattern {
        out.insert(v.clone());
    }
}
