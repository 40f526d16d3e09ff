//! Residual aggregation over solution rows.

use crate::combiner::expressions::{evaluate, EvalContext};
use chrontext_model::vocab::ct;
use chrontext_model::NativeValue;
use oxrdf::{Literal, Term};
use spargebra::algebra::{AggregateExpression, AggregateFunction, Expression};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Evaluates one aggregation over the rows of a group.
///
/// Unbound or erroneous values are skipped rather than failing the whole
/// group, matching how tabular backends aggregate over nullable columns.
pub fn aggregate_group(
    aggregate: &AggregateExpression,
    rows: &[&Vec<Option<Term>>],
    ctx: &EvalContext<'_>,
) -> Option<Term> {
    match aggregate {
        AggregateExpression::CountSolutions { distinct } => {
            let count = if *distinct {
                rows.iter().map(|r| (*r).clone()).collect::<HashSet<_>>().len()
            } else {
                rows.len()
            };
            Some(Literal::from(count as i64).into())
        }
        AggregateExpression::FunctionCall {
            name,
            expr,
            distinct,
        } => {
            let values = collect_values(expr, rows, ctx, *distinct);
            apply(name, values)
        }
    }
}

fn collect_values(
    expr: &Expression,
    rows: &[&Vec<Option<Term>>],
    ctx: &EvalContext<'_>,
    distinct: bool,
) -> Vec<Term> {
    let mut values: Vec<Term> = rows
        .iter()
        .filter_map(|row| evaluate(expr, row, ctx))
        .collect();
    if distinct {
        let mut seen = HashSet::new();
        values.retain(|t| seen.insert(t.clone()));
    }
    values
}

fn apply(name: &AggregateFunction, values: Vec<Term>) -> Option<Term> {
    match name {
        AggregateFunction::Count => Some(Literal::from(values.len() as i64).into()),
        AggregateFunction::Sum => {
            let numeric = numeric_values(&values)?;
            Some(sum_values(&numeric).to_literal().into())
        }
        AggregateFunction::Avg => {
            let numeric = numeric_values(&values)?;
            if numeric.is_empty() {
                return None;
            }
            let sum = sum_values(&numeric).as_f64()?;
            Some(
                NativeValue::Double(sum / numeric.len() as f64)
                    .to_literal()
                    .into(),
            )
        }
        AggregateFunction::Min => extremum(&values, Ordering::Less),
        AggregateFunction::Max => extremum(&values, Ordering::Greater),
        AggregateFunction::GroupConcat { separator } => {
            let separator = separator.as_deref().unwrap_or(" ");
            let parts: Vec<String> = values
                .iter()
                .map(|t| match t {
                    Term::Literal(l) => l.value().to_owned(),
                    other => other.to_string(),
                })
                .collect();
            Some(Literal::new_simple_literal(parts.join(separator)).into())
        }
        AggregateFunction::Sample => values.into_iter().next(),
        AggregateFunction::Custom(nn) if nn.as_ref() == ct::AGG_FIRST => {
            values.into_iter().next()
        }
        AggregateFunction::Custom(nn) if nn.as_ref() == ct::AGG_LAST => {
            values.into_iter().next_back()
        }
        AggregateFunction::Custom(_) => None,
    }
}

fn numeric_values(values: &[Term]) -> Option<Vec<NativeValue>> {
    values
        .iter()
        .map(|t| match t {
            Term::Literal(l) => {
                let native = NativeValue::from_literal(l.as_ref()).ok()?;
                native.is_numeric().then_some(native)
            }
            _ => None,
        })
        .collect()
}

fn sum_values(values: &[NativeValue]) -> NativeValue {
    let all_integers = values
        .iter()
        .all(|v| matches!(v, NativeValue::Integer(_)));
    if all_integers {
        let mut sum = 0i64;
        for value in values {
            if let NativeValue::Integer(i) = value {
                sum = sum.saturating_add(*i);
            }
        }
        NativeValue::Integer(sum)
    } else {
        let sum: f64 = values.iter().filter_map(NativeValue::as_f64).sum();
        NativeValue::Double(sum)
    }
}

fn extremum(values: &[Term], keep: Ordering) -> Option<Term> {
    let mut best: Option<&Term> = None;
    for value in values {
        match best {
            None => best = Some(value),
            Some(current) => {
                let ordering = crate::combiner::expressions::order_terms(
                    &Some(value.clone()),
                    &Some(current.clone()),
                );
                if ordering == keep {
                    best = Some(value);
                }
            }
        }
    }
    best.cloned()
}
