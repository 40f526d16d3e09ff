//! Row-level evaluation of SPARQL expressions over solution tables.
//!
//! Used for the residual filters, extends, ordering and aggregation that
//! were not pushed into a virtualized query. Evaluation errors follow
//! SPARQL's error-as-unbound convention: they yield `None` and a filter
//! treats them as not satisfied.

use chrontext_model::vocab::ct;
use chrontext_model::{format_date_time, parse_date_time, xsd, NativeValue, SolutionTable};
use chrono::DateTime;
use oxrdf::{Literal, Term, Variable};
use spargebra::algebra::{Expression, Function, GraphPattern};
use std::cmp::Ordering;

/// Everything an expression needs besides the current row: the column
/// layout and the pre-executed tables for `EXISTS` subpatterns.
pub struct EvalContext<'a> {
    pub columns: &'a [String],
    pub exists_patterns: Vec<&'a GraphPattern>,
    pub exists_tables: &'a [SolutionTable],
}

impl<'a> EvalContext<'a> {
    pub fn new(
        columns: &'a [String],
        expression: Option<&'a Expression>,
        exists_tables: &'a [SolutionTable],
    ) -> EvalContext<'a> {
        EvalContext {
            columns,
            exists_patterns: expression
                .map(collect_exists_patterns)
                .unwrap_or_default(),
            exists_tables,
        }
    }

    fn column_index(&self, variable: &Variable) -> Option<usize> {
        self.columns.iter().position(|c| c == variable.as_str())
    }
}

fn collect_exists_patterns(expression: &Expression) -> Vec<&GraphPattern> {
    fn walk<'a>(expression: &'a Expression, out: &mut Vec<&'a GraphPattern>) {
        match expression {
            Expression::Exists(p) => out.push(p),
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
                walk(l, out);
                walk(r, out);
            }
            Expression::UnaryPlus(e) | Expression::UnaryMinus(e) | Expression::Not(e) => {
                walk(e, out)
            }
            Expression::In(e, list) => {
                walk(e, out);
                for item in list {
                    walk(item, out);
                }
            }
            Expression::Coalesce(list) => {
                for item in list {
                    walk(item, out);
                }
            }
            Expression::If(a, b, c) => {
                walk(a, out);
                walk(b, out);
                walk(c, out);
            }
            Expression::FunctionCall(_, arguments) => {
                for argument in arguments {
                    walk(argument, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(expression, &mut out);
    out
}

/// Evaluates an expression to a term; `None` is unbound/error.
pub fn evaluate(
    expression: &Expression,
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
) -> Option<Term> {
    match expression {
        Expression::Variable(v) => row.get(ctx.column_index(v)?)?.clone(),
        Expression::NamedNode(nn) => Some(Term::NamedNode(nn.clone())),
        Expression::Literal(l) => Some(Term::Literal(l.clone())),
        Expression::Bound(v) => {
            let bound = ctx
                .column_index(v)
                .and_then(|i| row.get(i))
                .is_some_and(|t| t.is_some());
            Some(Literal::from(bound).into())
        }
        Expression::And(l, r) => {
            match (evaluate_ebv(l, row, ctx), evaluate_ebv(r, row, ctx)) {
                (Some(false), _) | (_, Some(false)) => Some(Literal::from(false).into()),
                (Some(true), Some(true)) => Some(Literal::from(true).into()),
                _ => None,
            }
        }
        Expression::Or(l, r) => {
            match (evaluate_ebv(l, row, ctx), evaluate_ebv(r, row, ctx)) {
                (Some(true), _) | (_, Some(true)) => Some(Literal::from(true).into()),
                (Some(false), Some(false)) => Some(Literal::from(false).into()),
                _ => None,
            }
        }
        Expression::Not(inner) => {
            Some(Literal::from(!evaluate_ebv(inner, row, ctx)?).into())
        }
        Expression::Equal(l, r) => {
            let l = evaluate(l, row, ctx)?;
            let r = evaluate(r, row, ctx)?;
            Some(Literal::from(terms_equal(&l, &r)?).into())
        }
        Expression::SameTerm(l, r) => {
            let l = evaluate(l, row, ctx)?;
            let r = evaluate(r, row, ctx)?;
            Some(Literal::from(l == r).into())
        }
        Expression::Greater(l, r) => compare(l, r, row, ctx, Ordering::is_gt),
        Expression::GreaterOrEqual(l, r) => compare(l, r, row, ctx, Ordering::is_ge),
        Expression::Less(l, r) => compare(l, r, row, ctx, Ordering::is_lt),
        Expression::LessOrEqual(l, r) => compare(l, r, row, ctx, Ordering::is_le),
        Expression::Add(l, r) => arithmetic(l, r, row, ctx, |a, b| a + b, |a, b| {
            a.checked_add(b)
        }),
        Expression::Subtract(l, r) => arithmetic(l, r, row, ctx, |a, b| a - b, |a, b| {
            a.checked_sub(b)
        }),
        Expression::Multiply(l, r) => arithmetic(l, r, row, ctx, |a, b| a * b, |a, b| {
            a.checked_mul(b)
        }),
        Expression::Divide(l, r) => {
            let l = native(l, row, ctx)?;
            let r = native(r, row, ctx)?;
            let divisor = r.as_f64()?;
            if divisor == 0.0 {
                return None;
            }
            Some(NativeValue::Double(l.as_f64()? / divisor).to_literal().into())
        }
        Expression::UnaryPlus(inner) => evaluate(inner, row, ctx),
        Expression::UnaryMinus(inner) => match native(inner, row, ctx)? {
            NativeValue::Integer(i) => {
                Some(NativeValue::Integer(i.checked_neg()?).to_literal().into())
            }
            other => Some(NativeValue::Double(-other.as_f64()?).to_literal().into()),
        },
        Expression::If(condition, then, otherwise) => {
            if evaluate_ebv(condition, row, ctx)? {
                evaluate(then, row, ctx)
            } else {
                evaluate(otherwise, row, ctx)
            }
        }
        Expression::In(e, list) => {
            let value = evaluate(e, row, ctx)?;
            let mut result = Some(false);
            for item in list {
                match evaluate(item, row, ctx).and_then(|t| terms_equal(&value, &t)) {
                    Some(true) => return Some(Literal::from(true).into()),
                    Some(false) => {}
                    None => result = None,
                }
            }
            result.map(|b| Literal::from(b).into())
        }
        Expression::Coalesce(list) => {
            list.iter().find_map(|item| evaluate(item, row, ctx))
        }
        Expression::FunctionCall(function, arguments) => {
            evaluate_function(function, arguments, row, ctx)
        }
        Expression::Exists(pattern) => {
            let index = ctx
                .exists_patterns
                .iter()
                .position(|p| std::ptr::eq(*p, pattern.as_ref()))?;
            let table = ctx.exists_tables.get(index)?;
            Some(Literal::from(any_compatible(row, ctx.columns, table)).into())
        }
    }
}

/// SPARQL effective boolean value of an expression.
pub fn evaluate_ebv(
    expression: &Expression,
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
) -> Option<bool> {
    match evaluate(expression, row, ctx)? {
        Term::Literal(l) => NativeValue::from_literal(l.as_ref())
            .ok()?
            .effective_boolean_value(),
        _ => None,
    }
}

fn native(
    expression: &Expression,
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
) -> Option<NativeValue> {
    match evaluate(expression, row, ctx)? {
        Term::Literal(l) => NativeValue::from_literal(l.as_ref()).ok(),
        _ => None,
    }
}

fn compare(
    l: &Expression,
    r: &Expression,
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
    test: fn(Ordering) -> bool,
) -> Option<Term> {
    let l = native(l, row, ctx)?;
    let r = native(r, row, ctx)?;
    Some(Literal::from(test(l.compare(&r)?)).into())
}

fn arithmetic(
    l: &Expression,
    r: &Expression,
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
    double_op: fn(f64, f64) -> f64,
    integer_op: fn(i64, i64) -> Option<i64>,
) -> Option<Term> {
    let l = native(l, row, ctx)?;
    let r = native(r, row, ctx)?;
    match (&l, &r) {
        (NativeValue::Integer(a), NativeValue::Integer(b)) => {
            Some(NativeValue::Integer(integer_op(*a, *b)?).to_literal().into())
        }
        _ => Some(
            NativeValue::Double(double_op(l.as_f64()?, r.as_f64()?))
                .to_literal()
                .into(),
        ),
    }
}

/// Value equality with numeric promotion; term equality otherwise.
pub fn terms_equal(l: &Term, r: &Term) -> Option<bool> {
    if let (Term::Literal(ll), Term::Literal(rl)) = (l, r) {
        if let (Ok(lv), Ok(rv)) = (
            NativeValue::from_literal(ll.as_ref()),
            NativeValue::from_literal(rl.as_ref()),
        ) {
            return Some(lv.compare(&rv)? == Ordering::Equal);
        }
    }
    Some(l == r)
}

fn evaluate_function(
    function: &Function,
    arguments: &[Expression],
    row: &[Option<Term>],
    ctx: &EvalContext<'_>,
) -> Option<Term> {
    use chrono::{Datelike, Timelike};
    let date_time = |index: usize| -> Option<chrono::DateTime<chrono::Utc>> {
        match native(arguments.get(index)?, row, ctx)? {
            NativeValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    };
    match function {
        Function::Seconds => {
            Some(NativeValue::Integer(date_time(0)?.second().into()).to_literal().into())
        }
        Function::Minutes => {
            Some(NativeValue::Integer(date_time(0)?.minute().into()).to_literal().into())
        }
        Function::Hours => {
            Some(NativeValue::Integer(date_time(0)?.hour().into()).to_literal().into())
        }
        Function::Day => {
            Some(NativeValue::Integer(date_time(0)?.day().into()).to_literal().into())
        }
        Function::Month => {
            Some(NativeValue::Integer(date_time(0)?.month().into()).to_literal().into())
        }
        Function::Year => {
            Some(NativeValue::Integer(date_time(0)?.year().into()).to_literal().into())
        }
        Function::Floor => match native(arguments.first()?, row, ctx)? {
            NativeValue::Integer(i) => Some(NativeValue::Integer(i).to_literal().into()),
            other => Some(NativeValue::Double(other.as_f64()?.floor()).to_literal().into()),
        },
        Function::Ceil => match native(arguments.first()?, row, ctx)? {
            NativeValue::Integer(i) => Some(NativeValue::Integer(i).to_literal().into()),
            other => Some(NativeValue::Double(other.as_f64()?.ceil()).to_literal().into()),
        },
        Function::Concat => {
            let mut out = String::new();
            for argument in arguments {
                match evaluate(argument, row, ctx)? {
                    Term::Literal(l) => out.push_str(l.value()),
                    _ => return None,
                }
            }
            Some(Literal::new_simple_literal(out).into())
        }
        Function::Str => match evaluate(arguments.first()?, row, ctx)? {
            Term::Literal(l) => Some(Literal::new_simple_literal(l.value()).into()),
            Term::NamedNode(nn) => {
                Some(Literal::new_simple_literal(nn.as_str()).into())
            }
            _ => None,
        },
        Function::Custom(nn) if nn.as_ref() == xsd::INTEGER => {
            let value = match native(arguments.first()?, row, ctx)? {
                NativeValue::Integer(i) => i,
                NativeValue::Boolean(b) => i64::from(b),
                NativeValue::String(s) => s.trim().parse().ok()?,
                other => other.as_f64()?.trunc() as i64,
            };
            Some(NativeValue::Integer(value).to_literal().into())
        }
        Function::Custom(nn) if nn.as_ref() == xsd::DOUBLE => {
            let value = match native(arguments.first()?, row, ctx)? {
                NativeValue::String(s) => s.trim().parse().ok()?,
                NativeValue::Boolean(b) => f64::from(u8::from(b)),
                other => other.as_f64()?,
            };
            Some(NativeValue::Double(value).to_literal().into())
        }
        Function::Custom(nn) if nn.as_ref() == xsd::DECIMAL => {
            let value = match native(arguments.first()?, row, ctx)? {
                NativeValue::Decimal(d) => d,
                NativeValue::Integer(i) => i.into(),
                NativeValue::String(s) => s.trim().parse().ok()?,
                other => format!("{}", other.as_f64()?).parse().ok()?,
            };
            Some(NativeValue::Decimal(value).to_literal().into())
        }
        Function::Custom(nn) if nn.as_ref() == xsd::DATE_TIME => {
            let value = match native(arguments.first()?, row, ctx)? {
                NativeValue::DateTime(dt) => dt,
                NativeValue::String(s) => parse_date_time(&s)?,
                _ => return None,
            };
            Some(
                Literal::new_typed_literal(format_date_time(&value), xsd::DATE_TIME)
                    .into(),
            )
        }
        Function::Custom(nn) if nn.as_ref() == ct::FLOOR_DATE_TIME_TO_SECONDS_INTERVAL => {
            let instant = date_time(0)?;
            let NativeValue::Integer(seconds) = native(arguments.get(1)?, row, ctx)?
            else {
                return None;
            };
            if seconds <= 0 {
                return None;
            }
            let interval = seconds.checked_mul(1_000_000)?;
            let micros = instant.timestamp_micros();
            let floored = micros.div_euclid(interval) * interval;
            let result = DateTime::from_timestamp_micros(floored)?;
            Some(
                Literal::new_typed_literal(format_date_time(&result), xsd::DATE_TIME)
                    .into(),
            )
        }
        _ => None,
    }
}

/// Whether any row of `table` is compatible with `row` on the columns both
/// sides share.
pub fn any_compatible(
    row: &[Option<Term>],
    columns: &[String],
    table: &SolutionTable,
) -> bool {
    let shared: Vec<(usize, usize)> = columns
        .iter()
        .enumerate()
        .filter_map(|(i, c)| table.index_of(c).map(|j| (i, j)))
        .collect();
    table.rows().iter().any(|candidate| {
        shared.iter().all(|(i, j)| match (&row[*i], &candidate[*j]) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
    })
}

/// Total order used for ORDER BY: unbound first, then by value-space
/// comparison, falling back to lexical forms for incomparable terms.
pub fn order_terms(l: &Option<Term>, r: &Option<Term>) -> Ordering {
    match (l, r) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => {
            if let (Term::Literal(ll), Term::Literal(rl)) = (l, r) {
                if let (Ok(lv), Ok(rv)) = (
                    NativeValue::from_literal(ll.as_ref()),
                    NativeValue::from_literal(rl.as_ref()),
                ) {
                    if let Some(ordering) = lv.compare(&rv) {
                        return ordering;
                    }
                }
            }
            l.to_string().cmp(&r.to_string())
        }
    }
}
