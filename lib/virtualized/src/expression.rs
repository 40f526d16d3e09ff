//! Translation of SPARQL algebra expressions into DataFusion expressions.

use crate::VirtualizedDatabaseError;
use chrontext_model::vocab::ct;
use chrontext_model::{xsd, NativeValue};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::common::ScalarValue;
use datafusion::functions::expr_fn::{ceil, coalesce, concat, date_part, floor};
use datafusion::functions_aggregate::expr_fn::{
    avg, count, count_distinct, max, min, sum,
};
use datafusion::functions_aggregate::first_last::{first_value_udaf, last_value_udaf};
use datafusion::functions_aggregate::string_agg::string_agg_udaf;
use datafusion::logical_expr::{cast, lit, when, Expr};
use datafusion::prelude::col;
use oxrdf::Literal;
use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function,
};

const MICROS_PER_SECOND: i64 = 1_000_000;

fn unsupported(what: impl Into<String>) -> VirtualizedDatabaseError {
    VirtualizedDatabaseError::Unsupported(what.into())
}

/// Translates a pushed-down expression. Planning only pushes the
/// translatable subset, so hitting an unsupported node here means the
/// caller handed the backend a query the planner never produces.
pub fn to_df_expr(expression: &Expression) -> Result<Expr, VirtualizedDatabaseError> {
    Ok(match expression {
        Expression::Variable(v) => col(v.as_str()),
        Expression::Literal(l) => lit(scalar_from_literal(l)?),
        Expression::Bound(v) => col(v.as_str()).is_not_null(),
        Expression::Greater(l, r) => to_df_expr(l)?.gt(to_df_expr(r)?),
        Expression::GreaterOrEqual(l, r) => to_df_expr(l)?.gt_eq(to_df_expr(r)?),
        Expression::Less(l, r) => to_df_expr(l)?.lt(to_df_expr(r)?),
        Expression::LessOrEqual(l, r) => to_df_expr(l)?.lt_eq(to_df_expr(r)?),
        Expression::And(l, r) => to_df_expr(l)?.and(to_df_expr(r)?),
        Expression::Or(l, r) => to_df_expr(l)?.or(to_df_expr(r)?),
        Expression::Not(inner) => !to_df_expr(inner)?,
        Expression::Add(l, r) => to_df_expr(l)? + to_df_expr(r)?,
        Expression::Subtract(l, r) => to_df_expr(l)? - to_df_expr(r)?,
        Expression::Multiply(l, r) => to_df_expr(l)? * to_df_expr(r)?,
        Expression::Divide(l, r) => to_df_expr(l)? / to_df_expr(r)?,
        Expression::If(condition, then, otherwise) => {
            when(to_df_expr(condition)?, to_df_expr(then)?)
                .otherwise(to_df_expr(otherwise)?)?
        }
        Expression::In(e, list) => {
            let list = list.iter().map(to_df_expr).collect::<Result<Vec<_>, _>>()?;
            to_df_expr(e)?.in_list(list, false)
        }
        Expression::Coalesce(list) => {
            coalesce(list.iter().map(to_df_expr).collect::<Result<Vec<_>, _>>()?)
        }
        Expression::FunctionCall(function, arguments) => {
            let mut args = arguments
                .iter()
                .map(to_df_expr)
                .collect::<Result<Vec<_>, _>>()?;
            match function {
                Function::Seconds => date_part(lit("second"), one_arg(args)?),
                Function::Minutes => date_part(lit("minute"), one_arg(args)?),
                Function::Hours => date_part(lit("hour"), one_arg(args)?),
                Function::Day => date_part(lit("day"), one_arg(args)?),
                Function::Month => date_part(lit("month"), one_arg(args)?),
                Function::Year => date_part(lit("year"), one_arg(args)?),
                Function::Floor => floor(one_arg(args)?),
                Function::Ceil => ceil(one_arg(args)?),
                Function::Concat => concat(args),
                Function::Custom(nn) if nn.as_ref() == xsd::INTEGER => {
                    cast(one_arg(args)?, DataType::Int64)
                }
                Function::Custom(nn) if nn.as_ref() == xsd::DOUBLE => {
                    cast(one_arg(args)?, DataType::Float64)
                }
                Function::Custom(nn) if nn.as_ref() == xsd::DECIMAL => {
                    cast(one_arg(args)?, DataType::Float64)
                }
                Function::Custom(nn) if nn.as_ref() == xsd::DATE_TIME => cast(
                    one_arg(args)?,
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                ),
                Function::Custom(nn)
                    if nn.as_ref() == ct::FLOOR_DATE_TIME_TO_SECONDS_INTERVAL =>
                {
                    let Some(Expression::Literal(literal)) = arguments.get(1) else {
                        return Err(unsupported(
                            "the flooring interval must be a literal",
                        ));
                    };
                    let seconds = literal_as_i64(literal)?;
                    if args.len() != 2 {
                        return Err(unsupported("FloorDateTimeToSecondsInterval/2"));
                    }
                    let timestamp = args.swap_remove(0);
                    floor_to_interval(timestamp, seconds)
                }
                other => return Err(unsupported(format!("function {other}"))),
            }
        }
        other => return Err(unsupported(format!("expression {other:?}"))),
    })
}

fn one_arg(mut args: Vec<Expr>) -> Result<Expr, VirtualizedDatabaseError> {
    if args.len() != 1 {
        return Err(unsupported("wrong argument count"));
    }
    Ok(args.swap_remove(0))
}

/// Floors a UTC timestamp to the nearest multiple of `seconds`
/// epoch-seconds, via integer arithmetic on epoch microseconds.
fn floor_to_interval(timestamp: Expr, seconds: i64) -> Expr {
    let interval = seconds * MICROS_PER_SECOND;
    let epoch = cast(timestamp, DataType::Int64);
    let floored = epoch / lit(interval) * lit(interval);
    cast(
        floored,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    )
}

/// Translates a pushed-down aggregation, aliasing it to its output column.
pub fn to_df_aggregate(
    aggregate: &AggregateExpression,
) -> Result<Expr, VirtualizedDatabaseError> {
    Ok(match aggregate {
        AggregateExpression::CountSolutions { distinct: false } => count(lit(1i64)),
        AggregateExpression::CountSolutions { distinct: true } => {
            return Err(unsupported("COUNT(DISTINCT *)"))
        }
        AggregateExpression::FunctionCall {
            name,
            expr,
            distinct,
        } => {
            let expr = to_df_expr(expr)?;
            match (name, distinct) {
                (AggregateFunction::Count, false) => count(expr),
                (AggregateFunction::Count, true) => count_distinct(expr),
                (AggregateFunction::Sum, false) => sum(expr),
                (AggregateFunction::Avg, false) => avg(expr),
                (AggregateFunction::Min, _) => min(expr),
                (AggregateFunction::Max, _) => max(expr),
                (AggregateFunction::GroupConcat { separator }, false) => string_agg_udaf()
                    .call(vec![
                        cast(expr, DataType::Utf8),
                        lit(separator.clone().unwrap_or_else(|| " ".to_owned())),
                    ]),
                (AggregateFunction::Sample, _) => first_value_udaf().call(vec![expr]),
                (AggregateFunction::Custom(nn), _) if nn.as_ref() == ct::AGG_FIRST => {
                    first_value_udaf().call(vec![expr])
                }
                (AggregateFunction::Custom(nn), _) if nn.as_ref() == ct::AGG_LAST => {
                    last_value_udaf().call(vec![expr])
                }
                (name, _) => {
                    return Err(unsupported(format!("aggregate {name:?}")))
                }
            }
        }
    })
}

/// Converts a typed literal to a DataFusion scalar through the native value
/// model.
pub fn scalar_from_literal(
    literal: &Literal,
) -> Result<ScalarValue, VirtualizedDatabaseError> {
    let native = NativeValue::from_literal(literal.as_ref())
        .map_err(|e| unsupported(e.to_string()))?;
    Ok(match native {
        NativeValue::Boolean(b) => ScalarValue::Boolean(Some(b)),
        NativeValue::Integer(i) => ScalarValue::Int64(Some(i)),
        NativeValue::Double(d) => ScalarValue::Float64(Some(d)),
        NativeValue::Decimal(d) => {
            ScalarValue::Float64(Some(f64::from(oxsdatatypes::Double::from(d))))
        }
        NativeValue::String(s) => ScalarValue::Utf8(Some(s)),
        NativeValue::DateTime(dt) => ScalarValue::TimestampMicrosecond(
            Some(dt.timestamp_micros()),
            Some("UTC".into()),
        ),
    })
}

fn literal_as_i64(literal: &Literal) -> Result<i64, VirtualizedDatabaseError> {
    match NativeValue::from_literal(literal.as_ref()) {
        Ok(NativeValue::Integer(i)) => Ok(i),
        _ => Err(unsupported("expected an integer literal")),
    }
}
