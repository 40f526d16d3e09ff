use crate::vars::VariableGenerator;
use spargebra::algebra::{GraphPattern, PropertyPathExpression};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// Prepares a pattern for splitting: decomposes sequence and inverse
/// property paths into plain triples with fresh intermediate variables and
/// merges adjacent basic graph patterns so contiguous triples end up in one
/// BGP.
///
/// Paths with closures (`+`, `*`, `?`) and alternatives are left intact;
/// they are never virtualized.
pub fn normalize(pattern: GraphPattern, gen: &mut VariableGenerator) -> GraphPattern {
    let decomposed = decompose_paths(pattern, gen);
    merge_bgps(decomposed)
}

fn decompose_paths(pattern: GraphPattern, gen: &mut VariableGenerator) -> GraphPattern {
    match pattern {
        GraphPattern::Path {
            subject,
            path,
            object,
        } => {
            let mut triples = Vec::new();
            if expand_path(subject.clone(), &path, object.clone(), gen, &mut triples) {
                GraphPattern::Bgp { patterns: triples }
            } else {
                GraphPattern::Path {
                    subject,
                    path,
                    object,
                }
            }
        }
        GraphPattern::Bgp { patterns } => GraphPattern::Bgp { patterns },
        GraphPattern::Join { left, right } => GraphPattern::Join {
            left: Box::new(decompose_paths(*left, gen)),
            right: Box::new(decompose_paths(*right, gen)),
        },
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => GraphPattern::LeftJoin {
            left: Box::new(decompose_paths(*left, gen)),
            right: Box::new(decompose_paths(*right, gen)),
            expression,
        },
        GraphPattern::Lateral { left, right } => GraphPattern::Lateral {
            left: Box::new(decompose_paths(*left, gen)),
            right: Box::new(decompose_paths(*right, gen)),
        },
        GraphPattern::Filter { expr, inner } => GraphPattern::Filter {
            expr,
            inner: Box::new(decompose_paths(*inner, gen)),
        },
        GraphPattern::Union { left, right } => GraphPattern::Union {
            left: Box::new(decompose_paths(*left, gen)),
            right: Box::new(decompose_paths(*right, gen)),
        },
        GraphPattern::Graph { name, inner } => GraphPattern::Graph {
            name,
            inner: Box::new(decompose_paths(*inner, gen)),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => GraphPattern::Extend {
            inner: Box::new(decompose_paths(*inner, gen)),
            variable,
            expression,
        },
        GraphPattern::Minus { left, right } => GraphPattern::Minus {
            left: Box::new(decompose_paths(*left, gen)),
            right: Box::new(decompose_paths(*right, gen)),
        },
        GraphPattern::Values {
            variables,
            bindings,
        } => GraphPattern::Values {
            variables,
            bindings,
        },
        GraphPattern::OrderBy { inner, expression } => GraphPattern::OrderBy {
            inner: Box::new(decompose_paths(*inner, gen)),
            expression,
        },
        GraphPattern::Project { inner, variables } => GraphPattern::Project {
            inner: Box::new(decompose_paths(*inner, gen)),
            variables,
        },
        GraphPattern::Distinct { inner } => GraphPattern::Distinct {
            inner: Box::new(decompose_paths(*inner, gen)),
        },
        GraphPattern::Reduced { inner } => GraphPattern::Reduced {
            inner: Box::new(decompose_paths(*inner, gen)),
        },
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => GraphPattern::Slice {
            inner: Box::new(decompose_paths(*inner, gen)),
            start,
            length,
        },
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => GraphPattern::Group {
            inner: Box::new(decompose_paths(*inner, gen)),
            variables,
            aggregates,
        },
        GraphPattern::Service {
            name,
            inner,
            silent,
        } => GraphPattern::Service {
            name,
            inner,
            silent,
        },
    }
}

fn expand_path(
    subject: TermPattern,
    path: &PropertyPathExpression,
    object: TermPattern,
    gen: &mut VariableGenerator,
    triples: &mut Vec<TriplePattern>,
) -> bool {
    match path {
        PropertyPathExpression::NamedNode(predicate) => {
            triples.push(TriplePattern {
                subject,
                predicate: NamedNodePattern::NamedNode(predicate.clone()),
                object,
            });
            true
        }
        PropertyPathExpression::Reverse(inner) => {
            expand_path(object, inner, subject, gen, triples)
        }
        PropertyPathExpression::Sequence(first, second) => {
            let middle = TermPattern::Variable(gen.fresh("path_intermediate"));
            expand_path(subject, first, middle.clone(), gen, triples)
                && expand_path(middle, second, object, gen, triples)
        }
        PropertyPathExpression::Alternative(_, _)
        | PropertyPathExpression::ZeroOrMore(_)
        | PropertyPathExpression::OneOrMore(_)
        | PropertyPathExpression::ZeroOrOne(_)
        | PropertyPathExpression::NegatedPropertySet(_) => false,
    }
}

/// Flattens nested joins and merges BGP operands into a single BGP.
fn merge_bgps(pattern: GraphPattern) -> GraphPattern {
    match pattern {
        GraphPattern::Join { left, right } => {
            let mut operands = Vec::new();
            flatten_join(merge_bgps(*left), &mut operands);
            flatten_join(merge_bgps(*right), &mut operands);

            let mut triples = Vec::new();
            let mut rest = Vec::new();
            for operand in operands {
                match operand {
                    GraphPattern::Bgp { patterns } => triples.extend(patterns),
                    other => rest.push(other),
                }
            }
            let mut result = if triples.is_empty() {
                None
            } else {
                Some(GraphPattern::Bgp { patterns: triples })
            };
            for operand in rest {
                result = Some(match result {
                    None => operand,
                    Some(left) => GraphPattern::Join {
                        left: Box::new(left),
                        right: Box::new(operand),
                    },
                });
            }
            result.unwrap_or(GraphPattern::Bgp {
                patterns: Vec::new(),
            })
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => GraphPattern::LeftJoin {
            left: Box::new(merge_bgps(*left)),
            right: Box::new(merge_bgps(*right)),
            expression,
        },
        GraphPattern::Lateral { left, right } => GraphPattern::Lateral {
            left: Box::new(merge_bgps(*left)),
            right: Box::new(merge_bgps(*right)),
        },
        GraphPattern::Filter { expr, inner } => GraphPattern::Filter {
            expr,
            inner: Box::new(merge_bgps(*inner)),
        },
        GraphPattern::Union { left, right } => GraphPattern::Union {
            left: Box::new(merge_bgps(*left)),
            right: Box::new(merge_bgps(*right)),
        },
        GraphPattern::Graph { name, inner } => GraphPattern::Graph {
            name,
            inner: Box::new(merge_bgps(*inner)),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => GraphPattern::Extend {
            inner: Box::new(merge_bgps(*inner)),
            variable,
            expression,
        },
        GraphPattern::Minus { left, right } => GraphPattern::Minus {
            left: Box::new(merge_bgps(*left)),
            right: Box::new(merge_bgps(*right)),
        },
        GraphPattern::OrderBy { inner, expression } => GraphPattern::OrderBy {
            inner: Box::new(merge_bgps(*inner)),
            expression,
        },
        GraphPattern::Project { inner, variables } => GraphPattern::Project {
            inner: Box::new(merge_bgps(*inner)),
            variables,
        },
        GraphPattern::Distinct { inner } => GraphPattern::Distinct {
            inner: Box::new(merge_bgps(*inner)),
        },
        GraphPattern::Reduced { inner } => GraphPattern::Reduced {
            inner: Box::new(merge_bgps(*inner)),
        },
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => GraphPattern::Slice {
            inner: Box::new(merge_bgps(*inner)),
            start,
            length,
        },
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => GraphPattern::Group {
            inner: Box::new(merge_bgps(*inner)),
            variables,
            aggregates,
        },
        other => other,
    }
}

fn flatten_join(pattern: GraphPattern, out: &mut Vec<GraphPattern>) {
    if let GraphPattern::Join { left, right } = pattern {
        flatten_join(*left, out);
        flatten_join(*right, out);
    } else {
        out.push(pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spargebra::Query;

    fn normalize_query(sparql: &str) -> GraphPattern {
        let Query::Select { pattern, .. } = Query::parse(sparql, None).unwrap() else {
            panic!("expected a select query");
        };
        let mut gen = VariableGenerator::new();
        normalize(pattern, &mut gen)
    }

    #[test]
    fn sequence_paths_become_triples() {
        let pattern = normalize_query(
            "SELECT ?v WHERE { ?w <http://example.org/a>/<http://example.org/b> ?v }",
        );
        let GraphPattern::Project { inner, .. } = pattern else {
            panic!("expected project");
        };
        let GraphPattern::Bgp { patterns } = *inner else {
            panic!("expected a bgp, got {inner:?}");
        };
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn transitive_paths_are_kept() {
        let pattern = normalize_query(
            "SELECT ?v WHERE { ?w <http://example.org/a>+ ?v }",
        );
        let GraphPattern::Project { inner, .. } = pattern else {
            panic!("expected project");
        };
        assert!(matches!(*inner, GraphPattern::Path { .. }));
    }

    #[test]
    fn paths_merge_with_sibling_triples() {
        let pattern = normalize_query(
            "SELECT ?v WHERE { ?w a <http://example.org/T> . \
             ?w <http://example.org/a>/<http://example.org/b> ?v }",
        );
        let GraphPattern::Project { inner, .. } = pattern else {
            panic!("expected project");
        };
        let GraphPattern::Bgp { patterns } = *inner else {
            panic!("expected a merged bgp, got {inner:?}");
        };
        assert_eq!(patterns.len(), 3);
    }
}
