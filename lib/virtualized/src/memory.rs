use crate::expression::{to_df_aggregate, to_df_expr};
use crate::{VirtualizedDatabase, VirtualizedDatabaseError};
use async_trait::async_trait;
use chrontext_query::{BasicVirtualizedQuery, VirtualizedQuery};
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::{DataType, Schema};
use datafusion::common::JoinType;
use datafusion::dataframe::DataFrame;
use datafusion::error::DataFusionError;
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{case, cast, lit, Expr};
use datafusion::prelude::{col, SessionContext};
use spargebra::algebra::OrderExpression;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// The column every relational resource shape exposes its identifier under.
const ID_COLUMN: &str = "id";

/// A virtualized backend over in-memory Arrow tables.
///
/// Each resource is one registered table with an `id` column plus the
/// columns named by the resource template's parameters. Virtualized queries
/// are evaluated as DataFusion dataframe pipelines, which makes this backend
/// the executable reference for the backend contract.
pub struct InMemoryVirtualizedDatabase {
    ctx: SessionContext,
}

impl InMemoryVirtualizedDatabase {
    pub fn new(
        tables: HashMap<String, RecordBatch>,
    ) -> Result<InMemoryVirtualizedDatabase, VirtualizedDatabaseError> {
        let ctx = SessionContext::new();
        for (name, batch) in tables {
            let table = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
            ctx.register_table(name.as_str(), Arc::new(table))?;
        }
        Ok(InMemoryVirtualizedDatabase { ctx })
    }

    /// The basic scan: restrict to the resolved identifiers, rename columns
    /// to the query's output variables, and attach the grouping column when
    /// several series are batched into one scan.
    async fn scan_basic(
        &self,
        basic: &BasicVirtualizedQuery,
    ) -> Result<DataFrame, VirtualizedDatabaseError> {
        let Some(resource) = &basic.resource else {
            return Err(VirtualizedDatabaseError::Unsupported(
                "the query reached the backend without a resolved resource".to_owned(),
            ));
        };
        let frame = self
            .ctx
            .table(resource.as_str())
            .await
            .map_err(|_| VirtualizedDatabaseError::UnknownResource(resource.clone()))?;

        let ids: Vec<Expr> = basic.ids.iter().map(|id| lit(id.clone())).collect();
        let frame = frame.filter(col(ID_COLUMN).in_list(ids, false))?;

        let mut selection = vec![col(ID_COLUMN).alias(basic.identifier_name())];
        let mut mapped: Vec<(&String, &oxrdf::Variable)> =
            basic.column_mapping.iter().collect();
        mapped.sort_by(|a, b| a.0.cmp(b.0));
        for (column, variable) in mapped {
            selection.push(col(column.as_str()).alias(variable.as_str()));
        }
        if let Some(grouping) = &basic.grouping {
            let mut entries: Vec<(&String, &i64)> = grouping.mapping.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut builder = case(col(ID_COLUMN));
            for (id, group) in entries {
                builder = builder.when(lit(id.clone()), lit(*group));
            }
            let expr = builder.end()?;
            selection.push(cast(expr, DataType::Int64).alias(&grouping.column_name));
        }
        Ok(frame.select(selection)?)
    }

    async fn evaluate(
        &self,
        query: &VirtualizedQuery,
    ) -> Result<DataFrame, VirtualizedDatabaseError> {
        let mut frames = VecDeque::new();
        for basic in query.basics() {
            frames.push_back(self.scan_basic(basic).await?);
        }
        combine(query, &mut frames)
    }
}

#[async_trait]
impl VirtualizedDatabase for InMemoryVirtualizedDatabase {
    async fn execute(
        &self,
        query: &VirtualizedQuery,
    ) -> Result<RecordBatch, VirtualizedDatabaseError> {
        let frame = self.evaluate(query).await?;
        let schema = Arc::new(Schema::from(frame.schema().clone()));
        let batches = frame.collect().await?;
        Ok(concat_batches(&schema, &batches).map_err(DataFusionError::from)?)
    }
}

/// Folds the query tree over the prepared basic scans. The scans arrive in
/// the same order [VirtualizedQuery::basics] reports them.
fn combine(
    query: &VirtualizedQuery,
    frames: &mut VecDeque<DataFrame>,
) -> Result<DataFrame, VirtualizedDatabaseError> {
    match query {
        VirtualizedQuery::Basic(_) => frames.pop_front().ok_or_else(|| {
            VirtualizedDatabaseError::Unsupported("scan ordering mismatch".to_owned())
        }),
        VirtualizedQuery::Filtered(inner, expression) => {
            let frame = combine(inner, frames)?;
            Ok(frame.filter(to_df_expr(expression)?)?)
        }
        VirtualizedQuery::ExpressionAs(inner, variable, expression) => {
            let frame = combine(inner, frames)?;
            Ok(frame.with_column(variable.as_str(), to_df_expr(expression)?)?)
        }
        VirtualizedQuery::Grouped(grouped) => {
            let frame = combine(&grouped.query, frames)?;
            let group_exprs: Vec<Expr> =
                grouped.by.iter().map(|v| col(v.as_str())).collect();
            let mut aggregate_exprs = Vec::new();
            for (variable, aggregate) in &grouped.aggregations {
                aggregate_exprs.push(to_df_aggregate(aggregate)?.alias(variable.as_str()));
            }
            Ok(frame.aggregate(group_exprs, aggregate_exprs)?)
        }
        VirtualizedQuery::InnerJoin(left, right) => {
            let left_frame = combine(left, frames)?;
            let right_frame = combine(right, frames)?;
            let left_vars = left.output_variables();
            let shared: Vec<String> = right
                .output_variables()
                .into_iter()
                .filter(|v| left_vars.contains(v))
                .map(|v| v.as_str().to_owned())
                .collect();
            let shared_refs: Vec<&str> = shared.iter().map(String::as_str).collect();
            Ok(left_frame.join(right_frame, JoinType::Inner, &shared_refs, &shared_refs, None)?)
        }
        VirtualizedQuery::Ordered(inner, expressions) => {
            let frame = combine(inner, frames)?;
            let mut sort_exprs = Vec::new();
            for expression in expressions {
                match expression {
                    OrderExpression::Asc(e) => {
                        sort_exprs.push(to_df_expr(e)?.sort(true, false));
                    }
                    OrderExpression::Desc(e) => {
                        sort_exprs.push(to_df_expr(e)?.sort(false, true));
                    }
                }
            }
            Ok(frame.sort(sort_exprs)?)
        }
        VirtualizedQuery::Sliced(sliced) => {
            let frame = combine(&sliced.query, frames)?;
            Ok(frame.limit(sliced.offset, sliced.limit)?)
        }
        VirtualizedQuery::Distinct(inner) => {
            let frame = combine(inner, frames)?;
            Ok(frame.distinct()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontext_model::RDFType;
    use datafusion::arrow::array::{Int64Array, StringArray, TimestampMicrosecondArray};
    use datafusion::arrow::datatypes::{Field, TimeUnit};
    use oxrdf::{Literal, Variable};
    use spargebra::algebra::{AggregateExpression, AggregateFunction, Expression};

    fn series_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("value", DataType::Int64, false),
        ]));
        let base = 1_654_073_160_000_000i64; // 2022-06-01T08:46:00Z
        let n = 10usize;
        let ids = StringArray::from(vec!["ts1"; n]);
        let timestamps = TimestampMicrosecondArray::from(
            (0..n as i64)
                .map(|i| base + i * 1_000_000)
                .collect::<Vec<_>>(),
        )
        .with_timezone("UTC");
        let values = Int64Array::from((100..100 + n as i64).collect::<Vec<_>>());
        RecordBatch::try_new(
            schema,
            vec![Arc::new(ids), Arc::new(timestamps), Arc::new(values)],
        )
        .unwrap()
    }

    fn basic() -> BasicVirtualizedQuery {
        let mut basic = BasicVirtualizedQuery::new(
            Variable::new_unchecked("ts"),
            Variable::new_unchecked("ts_external_id_0"),
            Variable::new_unchecked("ts_resource_1"),
        );
        basic.resource = Some("my_resource".to_owned());
        basic.ids = vec!["ts1".to_owned()];
        basic
            .column_mapping
            .insert("timestamp".to_owned(), Variable::new_unchecked("t"));
        basic
            .column_mapping
            .insert("value".to_owned(), Variable::new_unchecked("v"));
        basic
            .column_types
            .insert("timestamp".to_owned(), RDFType::date_time());
        basic
            .column_types
            .insert("value".to_owned(), RDFType::integer());
        basic
    }

    fn database() -> InMemoryVirtualizedDatabase {
        InMemoryVirtualizedDatabase::new(
            [("my_resource".to_owned(), series_batch())].into(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn basic_scan_renames_columns() {
        let batch = database()
            .execute(&VirtualizedQuery::Basic(basic()))
            .await
            .unwrap();
        assert_eq!(batch.num_rows(), 10);
        let names: Vec<&str> = batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["ts_external_id_0", "t", "v"]);
    }

    #[tokio::test]
    async fn filter_on_value_restricts_rows() {
        let query = VirtualizedQuery::Filtered(
            Box::new(VirtualizedQuery::Basic(basic())),
            Expression::Greater(
                Box::new(Expression::Variable(Variable::new_unchecked("v"))),
                Box::new(Expression::Literal(Literal::from(104i64))),
            ),
        );
        let batch = database().execute(&query).await.unwrap();
        assert_eq!(batch.num_rows(), 5);
    }

    #[tokio::test]
    async fn grouped_sum_by_flooring() {
        let bucket = Variable::new_unchecked("bucket");
        let sum_var = Variable::new_unchecked("sum_v");
        let query = VirtualizedQuery::Grouped(chrontext_query::GroupedVirtualizedQuery {
            query: Box::new(VirtualizedQuery::ExpressionAs(
                Box::new(VirtualizedQuery::Basic(basic())),
                bucket.clone(),
                Expression::FunctionCall(
                    spargebra::algebra::Function::Custom(
                        chrontext_model::vocab::ct::FLOOR_DATE_TIME_TO_SECONDS_INTERVAL
                            .into_owned(),
                    ),
                    vec![
                        Expression::Variable(Variable::new_unchecked("t")),
                        Expression::Literal(Literal::from(5i64)),
                    ],
                ),
            )),
            by: vec![bucket],
            aggregations: vec![(
                sum_var,
                AggregateExpression::FunctionCall {
                    name: AggregateFunction::Sum,
                    expr: Expression::Variable(Variable::new_unchecked("v")),
                    distinct: false,
                },
            )],
        });
        let batch = database().execute(&query).await.unwrap();
        // Ten one-second points starting on a 5s boundary → two buckets.
        assert_eq!(batch.num_rows(), 2);
    }

    #[tokio::test]
    async fn unknown_ids_yield_empty_result_with_schema() {
        let mut basic = basic();
        basic.ids = vec!["nope".to_owned()];
        let batch = database()
            .execute(&VirtualizedQuery::Basic(basic))
            .await
            .unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 3);
    }
}
