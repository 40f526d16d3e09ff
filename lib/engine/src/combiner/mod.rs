//! The execution coordinator.
//!
//! Interprets a [CombinedPlan]: static leaves run against the RDF store,
//! virtualized leaves run against the backend once their identifier sets
//! have been discovered from the already-evaluated static side, and the
//! residual operators are evaluated over solution tables in memory.

mod aggregates;
mod expressions;

use crate::errors::ChrontextError;
use crate::mapper::batch_to_table;
use aggregates::aggregate_group;
use chrontext_model::SolutionTable;
use chrontext_query::sparql_utils::in_scope_variables;
use chrontext_query::{CombinedPlan, VirtualizedPlan, VirtualizedQuery};
use chrontext_sparql::SparqlQueryable;
use chrontext_templates::TemplateRegistry;
use chrontext_virtualized::VirtualizedDatabase;
use expressions::{evaluate, evaluate_ebv, order_terms, EvalContext};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use oxrdf::{Literal, Term, Variable};
use spargebra::algebra::{Expression, GraphPattern, OrderExpression};
use spargebra::Query;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) struct Combiner<'a> {
    pub registry: &'a TemplateRegistry,
    pub sparql: &'a dyn SparqlQueryable,
    pub virtualized: Option<&'a dyn VirtualizedDatabase>,
    pub cancellation: &'a CancellationToken,
}

impl Combiner<'_> {
    pub async fn execute(
        &self,
        plan: &CombinedPlan,
    ) -> Result<SolutionTable, ChrontextError> {
        self.run(plan).await
    }

    fn run<'p>(
        &'p self,
        plan: &'p CombinedPlan,
    ) -> BoxFuture<'p, Result<SolutionTable, ChrontextError>> {
        async move {
            if self.cancellation.is_cancelled() {
                return Err(ChrontextError::CancellationError);
            }
            match plan {
                CombinedPlan::Static(static_plan) => {
                    self.execute_static(&static_plan.pattern).await
                }
                CombinedPlan::Virtualized(_) => Err(ChrontextError::InternalError(
                    "virtualized leaf reached without a discovery side".to_owned(),
                )),
                CombinedPlan::Join(left, right) => {
                    if let CombinedPlan::Virtualized(virtualized) = right.as_ref() {
                        let left_table = self.run(left).await?;
                        self.attach_virtualized(virtualized, left_table).await
                    } else if let CombinedPlan::Virtualized(virtualized) = left.as_ref() {
                        let right_table = self.run(right).await?;
                        self.attach_virtualized(virtualized, right_table).await
                    } else {
                        let left_table = self.run(left).await?;
                        let right_table = self.run(right).await?;
                        Ok(join_tables(left_table, right_table, None).0)
                    }
                }
                CombinedPlan::LeftJoin {
                    left,
                    right,
                    expression,
                    exists_plans,
                } => {
                    let left_table = self.run(left).await?;
                    let right_table = self.run(right).await?;
                    let exists_tables = self.run_all(exists_plans).await?;
                    Ok(left_join_tables(
                        left_table,
                        right_table,
                        expression.as_ref(),
                        &exists_tables,
                    ))
                }
                CombinedPlan::Minus(left, right) => {
                    let left_table = self.run(left).await?;
                    let right_table = self.run(right).await?;
                    Ok(minus_tables(left_table, &right_table))
                }
                CombinedPlan::Union(left, right) => {
                    let mut left_table = self.run(left).await?;
                    let right_table = self.run(right).await?;
                    left_table.concat(right_table);
                    Ok(left_table)
                }
                CombinedPlan::Filter {
                    inner,
                    expression,
                    exists_plans,
                } => {
                    let table = self.run(inner).await?;
                    let exists_tables = self.run_all(exists_plans).await?;
                    Ok(filter_table(table, expression, &exists_tables))
                }
                CombinedPlan::Extend {
                    inner,
                    variable,
                    expression,
                    exists_plans,
                } => {
                    let mut table = self.run(inner).await?;
                    let exists_tables = self.run_all(exists_plans).await?;
                    let ctx = EvalContext::new(
                        table.columns(),
                        Some(expression),
                        &exists_tables,
                    );
                    let values: Vec<Option<Term>> = table
                        .rows()
                        .iter()
                        .map(|row| evaluate(expression, row, &ctx))
                        .collect();
                    drop(ctx);
                    table.push_column(variable.as_str().to_owned(), values);
                    Ok(table)
                }
                CombinedPlan::Group {
                    inner,
                    by,
                    aggregations,
                    absorbed,
                } => {
                    let table = self.run(inner).await?;
                    if *absorbed {
                        Ok(dedup_absorbed_group(table, by, aggregations))
                    } else {
                        Ok(group_table(table, by, aggregations))
                    }
                }
                CombinedPlan::OrderBy { inner, expressions } => {
                    let table = self.run(inner).await?;
                    Ok(order_table(table, expressions))
                }
                CombinedPlan::Slice {
                    inner,
                    start,
                    length,
                } => {
                    let mut table = self.run(inner).await?;
                    let start = (*start).min(table.len());
                    let end = match length {
                        Some(length) => (start + *length).min(table.len()),
                        None => table.len(),
                    };
                    let rows = table.rows()[start..end].to_vec();
                    table.set_rows(rows);
                    Ok(table)
                }
                CombinedPlan::Distinct(inner) => {
                    let mut table = self.run(inner).await?;
                    let mut seen = HashSet::new();
                    let rows = table
                        .rows()
                        .iter()
                        .filter(|row| seen.insert((*row).clone()))
                        .cloned()
                        .collect();
                    table.set_rows(rows);
                    Ok(table)
                }
                CombinedPlan::Project { inner, variables } => {
                    let table = self.run(inner).await?;
                    let names: Vec<String> =
                        variables.iter().map(|v| v.as_str().to_owned()).collect();
                    Ok(table.project(&names))
                }
            }
        }
        .boxed()
    }

    async fn run_all(
        &self,
        plans: &[CombinedPlan],
    ) -> Result<Vec<SolutionTable>, ChrontextError> {
        let mut out = Vec::with_capacity(plans.len());
        for plan in plans {
            out.push(self.run(plan).await?);
        }
        Ok(out)
    }

    async fn execute_static(
        &self,
        pattern: &GraphPattern,
    ) -> Result<SolutionTable, ChrontextError> {
        let pattern = if pattern_projects(pattern) {
            pattern.clone()
        } else {
            let mut scope = HashSet::new();
            in_scope_variables(pattern, &mut scope);
            let mut variables: Vec<Variable> = scope.into_iter().collect();
            variables.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            GraphPattern::Project {
                inner: Box::new(pattern.clone()),
                variables,
            }
        };
        let query = Query::Select {
            dataset: None,
            pattern,
            base_iri: None,
        };
        debug!(query = %query, "executing static query");
        Ok(self.sparql.execute(&query).await?)
    }

    /// Materializes a virtualized leaf against the backend and joins it onto
    /// the discovery side.
    async fn attach_virtualized(
        &self,
        virtualized: &VirtualizedPlan,
        mut left: SolutionTable,
    ) -> Result<SolutionTable, ChrontextError> {
        if self.cancellation.is_cancelled() {
            return Err(ChrontextError::CancellationError);
        }
        let Some(backend) = self.virtualized else {
            return Err(ChrontextError::BackendUnavailable);
        };
        let basics = virtualized.query.basics();
        let [basic] = basics.as_slice() else {
            return Err(ChrontextError::InternalError(
                "a virtualized leaf must hold exactly one basic scan".to_owned(),
            ));
        };
        let id_index = left
            .index_of(basic.identifier_variable.as_str())
            .ok_or_else(|| {
                ChrontextError::InternalError(
                    "identifier discovery column missing".to_owned(),
                )
            })?;
        let resource_index = left
            .index_of(basic.resource_variable.as_str())
            .ok_or_else(|| {
                ChrontextError::InternalError(
                    "resource discovery column missing".to_owned(),
                )
            })?;

        // Identifier discovery: the distinct (resource, id) pairs the static
        // side reaches.
        let mut by_resource: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for row in left.rows() {
            let (Some(Term::Literal(id)), Some(Term::Literal(resource))) =
                (&row[id_index], &row[resource_index])
            else {
                continue;
            };
            by_resource
                .entry(resource.value().to_owned())
                .or_default()
                .insert(id.value().to_owned());
        }
        debug!(
            resources = by_resource.len(),
            ids = by_resource.values().map(BTreeSet::len).sum::<usize>(),
            "identifier discovery finished"
        );
        // The graph may name any resource; only registered ones are backed.
        for resource in by_resource.keys() {
            self.registry.get(resource)?;
        }

        let grouping = basic.grouping.clone();
        let mut queries = Vec::new();
        if let Some(grouping) = &grouping {
            let static_indices: Vec<usize> = grouping
                .static_by
                .iter()
                .map(|v| left.index_of(v.as_str()))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ChrontextError::InternalError(
                        "grouping keys missing from the static side".to_owned(),
                    )
                })?;

            // Assign a group number to every distinct static key combination
            // and derive the per-row and per-id assignments.
            let mut groups_by_key: HashMap<Vec<Option<Term>>, i64> = HashMap::new();
            let mut row_groups: Vec<Option<i64>> = Vec::with_capacity(left.len());
            let mut id_groups: HashMap<String, BTreeSet<i64>> = HashMap::new();
            for row in left.rows() {
                let Some(Term::Literal(id)) = &row[id_index] else {
                    row_groups.push(None);
                    continue;
                };
                let key: Vec<Option<Term>> =
                    static_indices.iter().map(|i| row[*i].clone()).collect();
                let next = groups_by_key.len() as i64;
                let group = *groups_by_key.entry(key).or_insert(next);
                row_groups.push(Some(group));
                id_groups
                    .entry(id.value().to_owned())
                    .or_default()
                    .insert(group);
            }
            left.push_column(
                grouping.column_name.clone(),
                row_groups
                    .into_iter()
                    .map(|g| g.map(|g| Literal::from(g).into()))
                    .collect(),
            );

            let conflicted = id_groups.values().any(|groups| groups.len() > 1);
            for (resource, ids) in by_resource {
                if conflicted {
                    // An id belonging to several groups cannot be expressed
                    // in one id → group mapping; scan once per group.
                    let mut per_group: BTreeMap<i64, Vec<String>> = BTreeMap::new();
                    for id in ids {
                        if let Some(groups) = id_groups.get(&id) {
                            for group in groups {
                                per_group.entry(*group).or_default().push(id.clone());
                            }
                        }
                    }
                    for (group, group_ids) in per_group {
                        let mapping = group_ids
                            .iter()
                            .map(|id| (id.clone(), group))
                            .collect();
                        queries.push(instantiate(
                            &virtualized.query,
                            &resource,
                            group_ids,
                            Some(mapping),
                        ));
                    }
                } else {
                    let mapping = ids
                        .iter()
                        .filter_map(|id| {
                            id_groups
                                .get(id)
                                .and_then(|groups| groups.first())
                                .map(|group| (id.clone(), *group))
                        })
                        .collect();
                    queries.push(instantiate(
                        &virtualized.query,
                        &resource,
                        ids.into_iter().collect(),
                        Some(mapping),
                    ));
                }
            }
        } else {
            for (resource, ids) in by_resource {
                queries.push(instantiate(
                    &virtualized.query,
                    &resource,
                    ids.into_iter().collect(),
                    None,
                ));
            }
        }

        if self.cancellation.is_cancelled() {
            return Err(ChrontextError::CancellationError);
        }
        // Independent scans go to the backend concurrently.
        let tables = try_join_all(queries.iter().map(|query| async move {
            debug!(fingerprint = %query.fingerprint(), "materializing virtualized query");
            let batch =
                backend
                    .execute(query)
                    .await
                    .map_err(|source| ChrontextError::BackendError {
                        fingerprint: query.fingerprint(),
                        source,
                    })?;
            batch_to_table(&batch, query)
        }))
        .await?;

        let mut virtual_table = empty_output_table(&virtualized.query, grouping.as_ref());
        for table in tables {
            virtual_table.concat(table);
        }
        let (joined, _) = join_tables(left, virtual_table, None);
        Ok(joined)
    }
}

/// Clones the virtualized query with a concrete resource, identifier set and
/// optional grouping mapping.
fn instantiate(
    query: &VirtualizedQuery,
    resource: &str,
    ids: Vec<String>,
    mapping: Option<HashMap<String, i64>>,
) -> VirtualizedQuery {
    let mut query = query.clone();
    for basic in query.basics_mut() {
        basic.resource = Some(resource.to_owned());
        basic.ids = ids.clone();
        if let (Some(grouping), Some(mapping)) = (&mut basic.grouping, &mapping) {
            grouping.mapping = mapping.clone();
        }
    }
    query
}

/// The schema a virtualized query produces, used when discovery found no
/// identifiers so the joined result keeps its declared columns.
fn empty_output_table(
    query: &VirtualizedQuery,
    grouping: Option<&chrontext_query::IdGrouping>,
) -> SolutionTable {
    let mut columns: Vec<String> = query
        .output_variables()
        .iter()
        .map(|v| v.as_str().to_owned())
        .collect();
    if let Some(grouping) = grouping {
        if !columns.contains(&grouping.column_name) {
            columns.push(grouping.column_name.clone());
        }
    }
    SolutionTable::new(columns)
}

fn pattern_projects(pattern: &GraphPattern) -> bool {
    match pattern {
        GraphPattern::Project { .. } => true,
        GraphPattern::Slice { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::OrderBy { inner, .. } => pattern_projects(inner),
        _ => false,
    }
}

/// SPARQL-compatible inner join on the columns shared by both tables.
///
/// Returns the joined table and, when `expression` is given, treats it as a
/// join condition evaluated on merged rows (left-join support reuses this).
fn join_tables(
    left: SolutionTable,
    right: SolutionTable,
    expression: Option<(&Expression, &[SolutionTable])>,
) -> (SolutionTable, Vec<bool>) {
    let shared: Vec<(usize, usize)> = left
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| right.index_of(c).map(|j| (i, j)))
        .collect();

    let mut out_columns: Vec<String> = left.columns().to_vec();
    let right_extra: Vec<(usize, String)> = right
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| left.index_of(c).is_none())
        .map(|(j, c)| (j, c.clone()))
        .collect();
    out_columns.extend(right_extra.iter().map(|(_, c)| c.clone()));

    let mut out = SolutionTable::new(out_columns);
    out.adopt_rdf_datatypes(&left);
    out.adopt_rdf_datatypes(&right);

    // Hash the right rows that are fully bound on the shared columns; rows
    // with unbound shared variables need the compatibility scan.
    let mut hashed: HashMap<Vec<Term>, Vec<usize>> = HashMap::new();
    let mut loose: Vec<usize> = Vec::new();
    for (j, row) in right.rows().iter().enumerate() {
        let key: Option<Vec<Term>> = shared
            .iter()
            .map(|(_, rj)| row[*rj].clone())
            .collect::<Vec<Option<Term>>>()
            .into_iter()
            .collect();
        match key {
            Some(key) => hashed.entry(key).or_default().push(j),
            None => loose.push(j),
        }
    }

    let mut matched_left = vec![false; left.len()];
    let ctx_columns = out.columns().to_vec();
    for (i, left_row) in left.rows().iter().enumerate() {
        let left_key: Option<Vec<Term>> = shared
            .iter()
            .map(|(li, _)| left_row[*li].clone())
            .collect::<Vec<Option<Term>>>()
            .into_iter()
            .collect();

        let mut candidates: Vec<usize> = Vec::new();
        match &left_key {
            Some(key) => {
                if let Some(found) = hashed.get(key) {
                    candidates.extend(found);
                }
                candidates.extend(&loose);
            }
            None => candidates.extend(0..right.len()),
        }

        for j in candidates {
            let right_row = &right.rows()[j];
            if !rows_compatible(left_row, right_row, &shared) {
                continue;
            }
            let merged = merge_rows(left_row, right_row, &shared, &right_extra);
            if let Some((expression, exists_tables)) = expression {
                let ctx = EvalContext::new(&ctx_columns, Some(expression), exists_tables);
                if evaluate_ebv(expression, &merged, &ctx) != Some(true) {
                    continue;
                }
            }
            matched_left[i] = true;
            out.push_row(merged);
        }
    }
    (out, matched_left)
}

fn rows_compatible(
    left: &[Option<Term>],
    right: &[Option<Term>],
    shared: &[(usize, usize)],
) -> bool {
    shared.iter().all(|(li, rj)| match (&left[*li], &right[*rj]) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    })
}

fn merge_rows(
    left: &[Option<Term>],
    right: &[Option<Term>],
    shared: &[(usize, usize)],
    right_extra: &[(usize, String)],
) -> Vec<Option<Term>> {
    let mut merged: Vec<Option<Term>> = left.to_vec();
    for (li, rj) in shared {
        if merged[*li].is_none() {
            merged[*li] = right[*rj].clone();
        }
    }
    merged.extend(right_extra.iter().map(|(j, _)| right[*j].clone()));
    merged
}

fn left_join_tables(
    left: SolutionTable,
    right: SolutionTable,
    expression: Option<&Expression>,
    exists_tables: &[SolutionTable],
) -> SolutionTable {
    let left_copy = left.clone();
    let right_width_extra: usize = right
        .columns()
        .iter()
        .filter(|c| left.index_of(c).is_none())
        .count();
    let (mut joined, matched) = match expression {
        Some(expression) => join_tables(left, right, Some((expression, exists_tables))),
        None => join_tables(left, right, None),
    };
    for (i, row) in left_copy.rows().iter().enumerate() {
        if !matched[i] {
            let mut padded = row.clone();
            padded.extend(std::iter::repeat(None).take(right_width_extra));
            joined.push_row(padded);
        }
    }
    joined
}

/// SPARQL MINUS: drop left rows for which a right row is compatible and
/// shares at least one mutually bound variable.
fn minus_tables(mut left: SolutionTable, right: &SolutionTable) -> SolutionTable {
    let shared: Vec<(usize, usize)> = left
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| right.index_of(c).map(|j| (i, j)))
        .collect();
    if shared.is_empty() {
        return left;
    }
    let rows = left
        .rows()
        .iter()
        .filter(|row| {
            !right.rows().iter().any(|candidate| {
                let overlaps = shared
                    .iter()
                    .any(|(li, rj)| row[*li].is_some() && candidate[*rj].is_some());
                overlaps && rows_compatible(row, candidate, &shared)
            })
        })
        .cloned()
        .collect();
    left.set_rows(rows);
    left
}

fn filter_table(
    mut table: SolutionTable,
    expression: &Expression,
    exists_tables: &[SolutionTable],
) -> SolutionTable {
    let columns = table.columns().to_vec();
    let ctx = EvalContext::new(&columns, Some(expression), exists_tables);
    let rows = table
        .rows()
        .iter()
        .filter(|row| evaluate_ebv(expression, row, &ctx) == Some(true))
        .cloned()
        .collect();
    drop(ctx);
    table.set_rows(rows);
    table
}

/// A group-by that was absorbed by the backend only needs deduplication:
/// the aggregate columns are functionally determined by the keys.
fn dedup_absorbed_group(
    table: SolutionTable,
    by: &[Variable],
    aggregations: &[(Variable, spargebra::algebra::AggregateExpression)],
) -> SolutionTable {
    let mut keep: Vec<String> = by.iter().map(|v| v.as_str().to_owned()).collect();
    keep.extend(aggregations.iter().map(|(v, _)| v.as_str().to_owned()));
    let mut projected = table.project(&keep);
    let mut seen = HashSet::new();
    let rows = projected
        .rows()
        .iter()
        .filter(|row| seen.insert((*row).clone()))
        .cloned()
        .collect();
    projected.set_rows(rows);
    projected
}

fn group_table(
    table: SolutionTable,
    by: &[Variable],
    aggregations: &[(Variable, spargebra::algebra::AggregateExpression)],
) -> SolutionTable {
    let by_indices: Vec<Option<usize>> =
        by.iter().map(|v| table.index_of(v.as_str())).collect();

    let mut order: Vec<Vec<Option<Term>>> = Vec::new();
    let mut groups: HashMap<Vec<Option<Term>>, Vec<usize>> = HashMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        let key: Vec<Option<Term>> = by_indices
            .iter()
            .map(|idx| idx.and_then(|i| row[i].clone()))
            .collect();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(i);
    }

    let mut columns: Vec<String> = by.iter().map(|v| v.as_str().to_owned()).collect();
    columns.extend(aggregations.iter().map(|(v, _)| v.as_str().to_owned()));
    let mut out = SolutionTable::new(columns);
    out.adopt_rdf_datatypes(&table);

    let table_columns = table.columns().to_vec();
    let ctx = EvalContext::new(&table_columns, None, &[]);
    for key in order {
        let indices = &groups[&key];
        let rows: Vec<&Vec<Option<Term>>> =
            indices.iter().map(|i| &table.rows()[*i]).collect();
        let mut out_row = key.clone();
        for (_, aggregation) in aggregations {
            out_row.push(aggregate_group(aggregation, &rows, &ctx));
        }
        out.push_row(out_row);
    }
    out
}

fn order_table(mut table: SolutionTable, expressions: &[OrderExpression]) -> SolutionTable {
    let columns = table.columns().to_vec();
    let keys: Vec<(bool, Vec<Option<Term>>)> = expressions
        .iter()
        .map(|expression| {
            let (ascending, inner) = match expression {
                OrderExpression::Asc(e) => (true, e),
                OrderExpression::Desc(e) => (false, e),
            };
            let ctx = EvalContext::new(&columns, Some(inner), &[]);
            let values = table
                .rows()
                .iter()
                .map(|row| evaluate(inner, row, &ctx))
                .collect();
            (ascending, values)
        })
        .collect();

    let mut indices: Vec<usize> = (0..table.len()).collect();
    indices.sort_by(|a, b| {
        for (ascending, values) in &keys {
            let ordering = order_terms(&values[*a], &values[*b]);
            let ordering = if *ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    let rows = indices
        .into_iter()
        .map(|i| table.rows()[i].clone())
        .collect();
    table.set_rows(rows);
    table
}
