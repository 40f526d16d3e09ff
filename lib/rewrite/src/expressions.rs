use chrontext_model::vocab::ct;
use chrontext_model::xsd;
use chrontext_templates::TemplateRegistry;
use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function, GraphPattern,
    PropertyPathExpression,
};
use spargebra::term::NamedNodePattern;

/// Splits a conjunction into its conjuncts, in source order.
pub fn flatten_and(expression: &Expression, out: &mut Vec<Expression>) {
    if let Expression::And(left, right) = expression {
        flatten_and(left, out);
        flatten_and(right, out);
    } else {
        out.push(expression.clone());
    }
}

/// Rebuilds a conjunction; `None` when there are no conjuncts.
pub fn conjoin(mut conjuncts: Vec<Expression>) -> Option<Expression> {
    let mut result = conjuncts.pop()?;
    while let Some(conjunct) = conjuncts.pop() {
        result = Expression::And(Box::new(conjunct), Box::new(result));
    }
    Some(result)
}

/// Whether an expression can be handed to a virtualized backend.
///
/// The translatable subset mirrors what backends implement: comparisons,
/// boolean connectives, arithmetic, IF/IN/COALESCE, the date component and
/// FLOOR/CEIL/CONCAT built-ins, the XSD cast functions and the timestamp
/// flooring helper. Anything else aborts pushdown at its level.
pub fn is_translatable(expression: &Expression) -> bool {
    match expression {
        Expression::Variable(_) | Expression::Literal(_) | Expression::Bound(_) => true,
        Expression::NamedNode(_) => false,
        Expression::Greater(l, r)
        | Expression::GreaterOrEqual(l, r)
        | Expression::Less(l, r)
        | Expression::LessOrEqual(l, r)
        | Expression::And(l, r)
        | Expression::Or(l, r)
        | Expression::Add(l, r)
        | Expression::Subtract(l, r)
        | Expression::Multiply(l, r)
        | Expression::Divide(l, r) => is_translatable(l) && is_translatable(r),
        Expression::Equal(_, _) | Expression::SameTerm(_, _) => false,
        Expression::Not(inner) => is_translatable(inner),
        Expression::UnaryPlus(_) | Expression::UnaryMinus(_) => false,
        Expression::In(e, list) => {
            is_translatable(e) && list.iter().all(is_translatable)
        }
        Expression::Coalesce(list) => list.iter().all(is_translatable),
        Expression::If(a, b, c) => {
            is_translatable(a) && is_translatable(b) && is_translatable(c)
        }
        Expression::FunctionCall(function, arguments) => {
            function_is_translatable(function) && arguments.iter().all(is_translatable)
        }
        Expression::Exists(_) => false,
    }
}

fn function_is_translatable(function: &Function) -> bool {
    match function {
        Function::Seconds
        | Function::Minutes
        | Function::Hours
        | Function::Day
        | Function::Month
        | Function::Year
        | Function::Floor
        | Function::Ceil
        | Function::Concat => true,
        Function::Custom(nn) => {
            nn.as_ref() == xsd::INTEGER
                || nn.as_ref() == xsd::DOUBLE
                || nn.as_ref() == xsd::DECIMAL
                || nn.as_ref() == xsd::DATE_TIME
                || nn.as_ref() == ct::FLOOR_DATE_TIME_TO_SECONDS_INTERVAL
        }
        _ => false,
    }
}

/// Whether an aggregation can be evaluated by a virtualized backend.
pub fn aggregate_is_translatable(aggregate: &AggregateExpression) -> bool {
    match aggregate {
        // COUNT(*) counts whole solutions, including static-side
        // multiplicity a backend never sees.
        AggregateExpression::CountSolutions { .. } => false,
        AggregateExpression::FunctionCall { name, expr, .. } => {
            let function_ok = match name {
                AggregateFunction::Count
                | AggregateFunction::Sum
                | AggregateFunction::Avg
                | AggregateFunction::Min
                | AggregateFunction::Max
                | AggregateFunction::GroupConcat { .. }
                | AggregateFunction::Sample => true,
                AggregateFunction::Custom(nn) => {
                    nn.as_ref() == ct::AGG_FIRST || nn.as_ref() == ct::AGG_LAST
                }
            };
            function_ok && is_translatable(expr)
        }
    }
}

pub fn contains_exists(expression: &Expression) -> bool {
    !collect_exists_patterns(expression).is_empty()
}

/// The `EXISTS` subpatterns of an expression, in depth-first order of
/// occurrence. This order is shared with the evaluator.
pub fn collect_exists_patterns(expression: &Expression) -> Vec<&GraphPattern> {
    let mut out = Vec::new();
    collect_exists(expression, &mut out);
    out
}

fn collect_exists<'a>(expression: &'a Expression, out: &mut Vec<&'a GraphPattern>) {
    match expression {
        Expression::Exists(pattern) => out.push(pattern),
        Expression::Variable(_)
        | Expression::Literal(_)
        | Expression::NamedNode(_)
        | Expression::Bound(_) => {}
        Expression::Or(l, r)
        | Expression::And(l, r)
        | Expression::Equal(l, r)
        | Expression::SameTerm(l, r)
        | Expression::Greater(l, r)
        | Expression::GreaterOrEqual(l, r)
        | Expression::Less(l, r)
        | Expression::LessOrEqual(l, r)
        | Expression::Add(l, r)
        | Expression::Subtract(l, r)
        | Expression::Multiply(l, r)
        | Expression::Divide(l, r) => {
            collect_exists(l, out);
            collect_exists(r, out);
        }
        Expression::UnaryPlus(inner)
        | Expression::UnaryMinus(inner)
        | Expression::Not(inner) => collect_exists(inner, out),
        Expression::In(e, list) => {
            collect_exists(e, out);
            for item in list {
                collect_exists(item, out);
            }
        }
        Expression::Coalesce(list) => {
            for item in list {
                collect_exists(item, out);
            }
        }
        Expression::If(a, b, c) => {
            collect_exists(a, out);
            collect_exists(b, out);
            collect_exists(c, out);
        }
        Expression::FunctionCall(_, arguments) => {
            for argument in arguments {
                collect_exists(argument, out);
            }
        }
    }
}

/// Whether any `EXISTS` subpattern of the expression touches a virtualized
/// resource. Such expressions cannot be folded into the static plan.
pub fn has_virtual_exists(expression: &Expression, registry: &TemplateRegistry) -> bool {
    collect_exists_patterns(expression)
        .iter()
        .any(|pattern| pattern_has_virtual(pattern, registry))
}

/// Whether a pattern contains a triple or path over a virtual predicate.
pub fn pattern_has_virtual(pattern: &GraphPattern, registry: &TemplateRegistry) -> bool {
    match pattern {
        GraphPattern::Bgp { patterns } => patterns.iter().any(|t| {
            matches!(&t.predicate, NamedNodePattern::NamedNode(nn)
                if registry.is_virtual_predicate(nn))
        }),
        GraphPattern::Path { path, .. } => path_has_virtual(path, registry),
        GraphPattern::Join { left, right }
        | GraphPattern::LeftJoin { left, right, .. }
        | GraphPattern::Lateral { left, right }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            pattern_has_virtual(left, registry) || pattern_has_virtual(right, registry)
        }
        GraphPattern::Filter { expr, inner } => {
            pattern_has_virtual(inner, registry)
                || collect_exists_patterns(expr)
                    .iter()
                    .any(|p| pattern_has_virtual(p, registry))
        }
        GraphPattern::Graph { inner, .. }
        | GraphPattern::Extend { inner, .. }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::Group { inner, .. }
        | GraphPattern::Service { inner, .. } => pattern_has_virtual(inner, registry),
        GraphPattern::Values { .. } => false,
    }
}

fn path_has_virtual(path: &PropertyPathExpression, registry: &TemplateRegistry) -> bool {
    match path {
        PropertyPathExpression::NamedNode(nn) => registry.is_virtual_predicate(nn),
        PropertyPathExpression::Reverse(inner)
        | PropertyPathExpression::ZeroOrMore(inner)
        | PropertyPathExpression::OneOrMore(inner)
        | PropertyPathExpression::ZeroOrOne(inner) => path_has_virtual(inner, registry),
        PropertyPathExpression::Sequence(a, b)
        | PropertyPathExpression::Alternative(a, b) => {
            path_has_virtual(a, registry) || path_has_virtual(b, registry)
        }
        PropertyPathExpression::NegatedPropertySet(list) => {
            list.iter().any(|nn| registry.is_virtual_predicate(nn))
        }
    }
}
