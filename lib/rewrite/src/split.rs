use crate::vars::VariableGenerator;
use chrontext_model::vocab::ct;
use chrontext_query::BasicVirtualizedQuery;
use chrontext_templates::{ResourceSignature, TemplateRegistry};
use oxrdf::Variable;
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::collections::HashMap;

/// The outcome of classifying one basic graph pattern.
///
/// Virtual triple groups have been replaced by basic virtualized queries;
/// the static triples keep everything else plus, per virtualized query, the
/// two discovery triples binding the identifier's external id and resource
/// name on the static side.
#[derive(Debug)]
pub struct BgpSplit {
    pub static_triples: Vec<TriplePattern>,
    pub virtualized: Vec<BasicVirtualizedQuery>,
}

/// Splits a BGP into its static triples and basic virtualized queries.
///
/// A triple is a candidate when its constant predicate occurs in a resource
/// template body. Candidates are grouped by walking a template body from its
/// identifier parameter along the query's triples; each maximal group
/// becomes one basic virtualized query keyed by the query's identifier
/// variable. Candidates that match no template shape fall back to the static
/// side ("both stores could answer" ties also classify static).
pub fn split_bgp(
    patterns: &[TriplePattern],
    registry: &TemplateRegistry,
    gen: &mut VariableGenerator,
) -> BgpSplit {
    let mut static_triples = Vec::new();
    let mut candidates = Vec::new();
    for triple in patterns {
        match &triple.predicate {
            NamedNodePattern::NamedNode(predicate)
                if registry.is_virtual_predicate(predicate) =>
            {
                candidates.push(triple.clone());
            }
            _ => static_triples.push(triple.clone()),
        }
    }

    let mut virtualized = Vec::new();
    while !candidates.is_empty() {
        let Some((signature, root, consumed, bindings)) =
            best_match(&candidates, registry)
        else {
            // Nothing matches a template shape; the remaining candidates are
            // static after all.
            static_triples.extend(candidates.drain(..));
            break;
        };

        let mut basic = BasicVirtualizedQuery::new(
            root.clone(),
            gen.fresh(&format!("{}_external_id", root.as_str())),
            gen.fresh(&format!("{}_resource", root.as_str())),
        );
        for (parameter, query_variable) in bindings {
            basic
                .column_mapping
                .insert(parameter.as_str().to_owned(), query_variable);
        }
        basic.column_types = signature.column_types.clone();

        static_triples.push(TriplePattern {
            subject: TermPattern::Variable(root.clone()),
            predicate: NamedNodePattern::NamedNode(ct::HAS_EXTERNAL_ID.into_owned()),
            object: TermPattern::Variable(basic.identifier_variable.clone()),
        });
        static_triples.push(TriplePattern {
            subject: TermPattern::Variable(root),
            predicate: NamedNodePattern::NamedNode(ct::HAS_RESOURCE.into_owned()),
            object: TermPattern::Variable(basic.resource_variable.clone()),
        });
        virtualized.push(basic);

        let mut index = 0usize;
        candidates.retain(|_| {
            let keep = !consumed.contains(&index);
            index += 1;
            keep
        });
    }

    BgpSplit {
        static_triples,
        virtualized,
    }
}

/// Finds the signature and root variable consuming the most candidate
/// triples. Returns the consumed candidate indices and the column-parameter
/// bindings (template parameter variable → query variable).
fn best_match(
    candidates: &[TriplePattern],
    registry: &TemplateRegistry,
) -> Option<(
    ResourceSignature,
    Variable,
    Vec<usize>,
    Vec<(Variable, Variable)>,
)> {
    let mut best: Option<(
        ResourceSignature,
        Variable,
        Vec<usize>,
        Vec<(Variable, Variable)>,
    )> = None;
    for signature in registry.signatures() {
        for root in root_candidates(candidates, signature) {
            let (consumed, bindings) = match_from_root(candidates, signature, &root);
            if consumed.is_empty() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, _, best_consumed, _)) => consumed.len() > best_consumed.len(),
            };
            if better {
                best = Some((signature.clone(), root, consumed, bindings));
            }
        }
    }
    best
}

fn root_candidates(
    candidates: &[TriplePattern],
    signature: &ResourceSignature,
) -> Vec<Variable> {
    let root_predicates: Vec<_> = signature
        .triples
        .iter()
        .filter(|t| t.subject == TermPattern::Variable(signature.identifier.clone()))
        .filter_map(|t| match &t.predicate {
            NamedNodePattern::NamedNode(nn) => Some(nn.clone()),
            NamedNodePattern::Variable(_) => None,
        })
        .collect();
    let mut roots = Vec::new();
    for triple in candidates {
        if let NamedNodePattern::NamedNode(predicate) = &triple.predicate {
            if root_predicates.contains(predicate) {
                if let TermPattern::Variable(subject) = &triple.subject {
                    if !roots.contains(subject) {
                        roots.push(subject.clone());
                    }
                }
            }
        }
    }
    roots
}

/// Walks the template body outward from the identifier, unifying template
/// variables with the query's terms. Consumes at most one query triple per
/// body triple.
fn match_from_root(
    candidates: &[TriplePattern],
    signature: &ResourceSignature,
    root: &Variable,
) -> (Vec<usize>, Vec<(Variable, Variable)>) {
    let mut mapping: HashMap<Variable, Variable> = HashMap::new();
    mapping.insert(signature.identifier.clone(), root.clone());
    let mut consumed: Vec<usize> = Vec::new();
    let mut bindings: Vec<(Variable, Variable)> = Vec::new();

    let mut progressed = true;
    while progressed {
        progressed = false;
        for body_triple in &signature.triples {
            let TermPattern::Variable(body_subject) = &body_triple.subject else {
                continue;
            };
            let Some(query_subject) = mapping.get(body_subject).cloned() else {
                continue;
            };
            let NamedNodePattern::NamedNode(body_predicate) = &body_triple.predicate
            else {
                continue;
            };
            let TermPattern::Variable(body_object) = &body_triple.object else {
                continue;
            };
            if mapping.contains_key(body_object) {
                continue;
            }
            for (index, candidate) in candidates.iter().enumerate() {
                if consumed.contains(&index) {
                    continue;
                }
                if candidate.subject != TermPattern::Variable(query_subject.clone()) {
                    continue;
                }
                let NamedNodePattern::NamedNode(predicate) = &candidate.predicate else {
                    continue;
                };
                if predicate != body_predicate {
                    continue;
                }
                let TermPattern::Variable(query_object) = &candidate.object else {
                    continue;
                };
                mapping.insert(body_object.clone(), query_object.clone());
                consumed.push(index);
                if signature.is_column(body_object) {
                    bindings.push((body_object.clone(), query_object.clone()));
                }
                progressed = true;
                break;
            }
        }
    }
    (consumed, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontext_templates::Template;
    use oxrdf::vocab::xsd;
    use oxrdf::NamedNode;
    use spargebra::Query;

    fn registry() -> TemplateRegistry {
        let template = Template::timeseries(
            NamedNode::new_unchecked(format!("{}my_resource", ct::NAMESPACE)),
            xsd::DOUBLE.into_owned(),
        );
        TemplateRegistry::new([("my_resource".to_owned(), template)].into()).unwrap()
    }

    fn bgp_of(sparql: &str) -> Vec<TriplePattern> {
        let Query::Select { pattern, .. } = Query::parse(sparql, None).unwrap() else {
            panic!("expected select");
        };
        fn find_bgp(p: &spargebra::algebra::GraphPattern) -> Option<Vec<TriplePattern>> {
            use spargebra::algebra::GraphPattern;
            match p {
                GraphPattern::Bgp { patterns } => Some(patterns.clone()),
                GraphPattern::Project { inner, .. }
                | GraphPattern::Filter { inner, .. } => find_bgp(inner),
                _ => None,
            }
        }
        find_bgp(&pattern).unwrap()
    }

    #[test]
    fn data_point_triples_form_one_virtualized_query() {
        let triples = bgp_of(
            "PREFIX ct: <https://github.com/DataTreehouse/chrontext#> \
             SELECT ?v WHERE { \
               ?w <http://example.org/hasSensor> ?s . \
               ?s ct:hasTimeseries ?ts . \
               ?ts ct:hasDataPoint ?dp . \
               ?dp ct:hasTimestamp ?t . \
               ?dp ct:hasValue ?v . }",
        );
        let mut gen = VariableGenerator::new();
        let split = split_bgp(&triples, &registry(), &mut gen);

        assert_eq!(split.virtualized.len(), 1);
        let basic = &split.virtualized[0];
        assert_eq!(basic.query_variable.as_str(), "ts");
        assert_eq!(
            basic.column_mapping.get("timestamp").map(Variable::as_str),
            Some("t")
        );
        assert_eq!(
            basic.column_mapping.get("value").map(Variable::as_str),
            Some("v")
        );
        // hasSensor + hasTimeseries + the two discovery triples.
        assert_eq!(split.static_triples.len(), 4);
        assert!(split
            .static_triples
            .iter()
            .any(|t| t.predicate
                == NamedNodePattern::NamedNode(ct::HAS_EXTERNAL_ID.into_owned())));
    }

    #[test]
    fn two_roots_form_two_virtualized_queries() {
        let triples = bgp_of(
            "PREFIX ct: <https://github.com/DataTreehouse/chrontext#> \
             SELECT ?v1 ?v2 WHERE { \
               ?ts1 ct:hasDataPoint ?dp1 . \
               ?dp1 ct:hasTimestamp ?t . \
               ?dp1 ct:hasValue ?v1 . \
               ?ts2 ct:hasDataPoint ?dp2 . \
               ?dp2 ct:hasTimestamp ?t . \
               ?dp2 ct:hasValue ?v2 . }",
        );
        let mut gen = VariableGenerator::new();
        let split = split_bgp(&triples, &registry(), &mut gen);
        assert_eq!(split.virtualized.len(), 2);
        // Only discovery triples remain on the static side.
        assert_eq!(split.static_triples.len(), 4);
    }

    #[test]
    fn value_only_access_matches_partially() {
        let triples = bgp_of(
            "PREFIX ct: <https://github.com/DataTreehouse/chrontext#> \
             SELECT ?v WHERE { \
               ?ts ct:hasDataPoint ?dp . \
               ?dp ct:hasValue ?v . }",
        );
        let mut gen = VariableGenerator::new();
        let split = split_bgp(&triples, &registry(), &mut gen);
        assert_eq!(split.virtualized.len(), 1);
        let basic = &split.virtualized[0];
        assert!(basic.column_mapping.contains_key("value"));
        assert!(!basic.column_mapping.contains_key("timestamp"));
    }
}
