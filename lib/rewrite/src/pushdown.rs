use crate::expressions::{
    aggregate_is_translatable, collect_exists_patterns, conjoin, contains_exists,
    flatten_and, has_virtual_exists, is_translatable,
};
use crate::normalize::normalize;
use crate::split::split_bgp;
use crate::vars::VariableGenerator;
use crate::RewriteError;
use chrontext_query::sparql_utils::in_scope_variables;
use chrontext_query::{
    expression_variables, CombinedPlan, IdGrouping, PathEntry, StaticPlan,
    VirtualizedPlan, VirtualizedQuery,
};
use chrontext_query::{GroupedVirtualizedQuery, SlicedVirtualizedQuery};
use chrontext_templates::TemplateRegistry;
use oxrdf::Variable;
use spargebra::algebra::{
    AggregateExpression, Expression, GraphPattern, OrderExpression,
};
use spargebra::Query;
use std::collections::{HashMap, HashSet};

/// A hybrid query plan together with the recorded pushdown paths.
#[derive(Debug)]
pub struct PlannedQuery {
    pub plan: CombinedPlan,
    pub pushdown_paths: Vec<Vec<PathEntry>>,
}

/// Plans a parsed SPARQL query against the registered resources.
///
/// Queries that never touch a virtualized resource collapse into a single
/// static leaf and are executed by the RDF store unchanged.
pub fn plan_query(
    query: &Query,
    registry: &TemplateRegistry,
) -> Result<PlannedQuery, RewriteError> {
    let Query::Select { pattern, .. } = query else {
        return Err(RewriteError::UnsupportedQueryType);
    };
    let mut rewriter = QueryRewriter::new(registry);
    let normalized = normalize(pattern.clone(), &mut rewriter.gen);
    let rewritten = rewriter.rewrite_pattern(&normalized)?;
    let plan = rewritten.into_plan();
    let pushdown_paths = plan
        .virtual_plans()
        .into_iter()
        .map(|p| p.path.clone())
        .collect();
    Ok(PlannedQuery {
        plan,
        pushdown_paths,
    })
}

/// Rewrites the algebra bottom-up into a [CombinedPlan], pushing as much as
/// possible into virtualized queries and recording a path entry per applied
/// rule.
struct QueryRewriter<'a> {
    registry: &'a TemplateRegistry,
    gen: VariableGenerator,
}

/// A subtree that stayed entirely static keeps its algebra form so enclosing
/// static subtrees can keep growing; it only becomes a leaf when a hybrid
/// ancestor forces it to.
enum Rewritten {
    Static(GraphPattern),
    Plan(CombinedPlan),
}

impl Rewritten {
    fn into_plan(self) -> CombinedPlan {
        match self {
            Rewritten::Static(pattern) => CombinedPlan::Static(StaticPlan { pattern }),
            Rewritten::Plan(plan) => plan,
        }
    }
}

/// A leaf a filter or extend expression may be pushed into, in plan
/// traversal order.
enum PushSlot {
    Virtual {
        outputs: HashSet<Variable>,
        filter_safe: bool,
        extend_safe: bool,
    },
    Static {
        scope: HashSet<Variable>,
        filter_safe: bool,
        extend_safe: bool,
    },
}

enum PushAction {
    Filter(Expression),
    Extend(Variable, Expression),
}

impl<'a> QueryRewriter<'a> {
    fn new(registry: &'a TemplateRegistry) -> QueryRewriter<'a> {
        QueryRewriter {
            registry,
            gen: VariableGenerator::new(),
        }
    }

    fn rewrite_pattern(&mut self, pattern: &GraphPattern) -> Result<Rewritten, RewriteError> {
        match pattern {
            GraphPattern::Bgp { patterns } => {
                let split = split_bgp(patterns, self.registry, &mut self.gen);
                if split.virtualized.is_empty() {
                    return Ok(Rewritten::Static(GraphPattern::Bgp {
                        patterns: split.static_triples,
                    }));
                }
                let mut plan = CombinedPlan::Static(StaticPlan {
                    pattern: GraphPattern::Bgp {
                        patterns: split.static_triples,
                    },
                });
                for basic in split.virtualized {
                    let leaf = CombinedPlan::Virtualized(VirtualizedPlan::new(
                        VirtualizedQuery::Basic(basic),
                    ));
                    plan = CombinedPlan::Join(plan.boxed(), leaf.boxed());
                }
                Ok(Rewritten::Plan(plan))
            }
            GraphPattern::Join { left, right } => {
                let left = self.rewrite_pattern(left)?;
                let right = self.rewrite_pattern(right)?;
                match (left, right) {
                    (Rewritten::Static(l), Rewritten::Static(r)) => {
                        Ok(Rewritten::Static(GraphPattern::Join {
                            left: Box::new(l),
                            right: Box::new(r),
                        }))
                    }
                    (left, right) => Ok(Rewritten::Plan(CombinedPlan::Join(
                        left.into_plan().boxed(),
                        right.into_plan().boxed(),
                    ))),
                }
            }
            GraphPattern::Filter { expr, inner } => self.rewrite_filter(expr, inner),
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => self.rewrite_extend(inner, variable, expression),
            GraphPattern::Group {
                inner,
                variables,
                aggregates,
            } => self.rewrite_group(inner, variables, aggregates),
            GraphPattern::Union { left, right } => {
                let left = self.rewrite_pattern(left)?;
                let right = self.rewrite_pattern(right)?;
                match (left, right) {
                    (Rewritten::Static(l), Rewritten::Static(r)) => {
                        Ok(Rewritten::Static(GraphPattern::Union {
                            left: Box::new(l),
                            right: Box::new(r),
                        }))
                    }
                    (left, right) => {
                        let mut left = left.into_plan();
                        let mut right = right.into_plan();
                        left.record_for_all(PathEntry::UnionLeftSide);
                        right.record_for_all(PathEntry::UnionRightSide);
                        Ok(Rewritten::Plan(CombinedPlan::Union(
                            left.boxed(),
                            right.boxed(),
                        )))
                    }
                }
            }
            GraphPattern::Minus { left, right } => {
                let left = self.rewrite_pattern(left)?;
                let right = self.rewrite_pattern(right)?;
                match (left, right) {
                    (Rewritten::Static(l), Rewritten::Static(r)) => {
                        Ok(Rewritten::Static(GraphPattern::Minus {
                            left: Box::new(l),
                            right: Box::new(r),
                        }))
                    }
                    (left, right) => {
                        let mut left = left.into_plan();
                        let mut right = right.into_plan();
                        left.record_for_all(PathEntry::MinusLeftSide);
                        right.record_for_all(PathEntry::MinusRightSide);
                        Ok(Rewritten::Plan(CombinedPlan::Minus(
                            left.boxed(),
                            right.boxed(),
                        )))
                    }
                }
            }
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => {
                let left_r = self.rewrite_pattern(left)?;
                let right_r = self.rewrite_pattern(right)?;
                let expression_virtual = expression
                    .as_ref()
                    .is_some_and(|e| has_virtual_exists(e, self.registry));
                match (left_r, right_r) {
                    (Rewritten::Static(l), Rewritten::Static(r))
                        if !expression_virtual =>
                    {
                        Ok(Rewritten::Static(GraphPattern::LeftJoin {
                            left: Box::new(l),
                            right: Box::new(r),
                            expression: expression.clone(),
                        }))
                    }
                    (left_r, right_r) => {
                        let mut left_plan = left_r.into_plan();
                        let mut right_plan = right_r.into_plan();
                        left_plan.record_for_all(PathEntry::LeftJoinLeftSide);
                        right_plan.record_for_all(PathEntry::LeftJoinRightSide);
                        let exists_plans = match expression {
                            Some(e) => self.plan_exists(e)?,
                            None => Vec::new(),
                        };
                        Ok(Rewritten::Plan(CombinedPlan::LeftJoin {
                            left: left_plan.boxed(),
                            right: right_plan.boxed(),
                            expression: expression.clone(),
                            exists_plans,
                        }))
                    }
                }
            }
            GraphPattern::Project { inner, variables } => {
                match self.rewrite_pattern(inner)? {
                    Rewritten::Static(p) => Ok(Rewritten::Static(GraphPattern::Project {
                        inner: Box::new(p),
                        variables: variables.clone(),
                    })),
                    Rewritten::Plan(mut plan) => {
                        let mut keep: HashSet<Variable> =
                            variables.iter().cloned().collect();
                        plan.residual_variables(&mut keep);
                        for leaf in plan.virtual_plans_mut() {
                            leaf.query.prune_columns(&keep);
                        }
                        plan.record_for_all(PathEntry::ProjectInner);
                        Ok(Rewritten::Plan(CombinedPlan::Project {
                            inner: plan.boxed(),
                            variables: variables.clone(),
                        }))
                    }
                }
            }
            GraphPattern::OrderBy { inner, expression } => {
                match self.rewrite_pattern(inner)? {
                    Rewritten::Static(p) => Ok(Rewritten::Static(GraphPattern::OrderBy {
                        inner: Box::new(p),
                        expression: expression.clone(),
                    })),
                    Rewritten::Plan(mut plan) => {
                        try_push_order(&mut plan, expression);
                        Ok(Rewritten::Plan(CombinedPlan::OrderBy {
                            inner: plan.boxed(),
                            expressions: expression.clone(),
                        }))
                    }
                }
            }
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => match self.rewrite_pattern(inner)? {
                Rewritten::Static(p) => Ok(Rewritten::Static(GraphPattern::Slice {
                    inner: Box::new(p),
                    start: *start,
                    length: *length,
                })),
                Rewritten::Plan(mut plan) => {
                    if *start == 0 {
                        if let Some(limit) = length {
                            try_push_limit(&mut plan, *limit);
                        }
                    }
                    Ok(Rewritten::Plan(CombinedPlan::Slice {
                        inner: plan.boxed(),
                        start: *start,
                        length: *length,
                    }))
                }
            },
            GraphPattern::Distinct { inner } => match self.rewrite_pattern(inner)? {
                Rewritten::Static(p) => Ok(Rewritten::Static(GraphPattern::Distinct {
                    inner: Box::new(p),
                })),
                Rewritten::Plan(mut plan) => {
                    if let CombinedPlan::Virtualized(leaf) = &mut plan {
                        leaf.query =
                            VirtualizedQuery::Distinct(Box::new(leaf.query.clone()));
                        leaf.record(PathEntry::DistinctInner);
                    }
                    Ok(Rewritten::Plan(CombinedPlan::Distinct(plan.boxed())))
                }
            },
            GraphPattern::Reduced { inner } => match self.rewrite_pattern(inner)? {
                Rewritten::Static(p) => Ok(Rewritten::Static(GraphPattern::Reduced {
                    inner: Box::new(p),
                })),
                // REDUCED permits duplicate elimination; evaluate it as
                // DISTINCT on the hybrid path.
                Rewritten::Plan(plan) => {
                    Ok(Rewritten::Plan(CombinedPlan::Distinct(plan.boxed())))
                }
            },
            // These constructs are served by the RDF store alone; virtual
            // predicates inside them are not recognized.
            GraphPattern::Path { .. }
            | GraphPattern::Values { .. }
            | GraphPattern::Graph { .. }
            | GraphPattern::Service { .. }
            | GraphPattern::Lateral { .. } => Ok(Rewritten::Static(pattern.clone())),
        }
    }

    fn rewrite_filter(
        &mut self,
        expr: &Expression,
        inner: &GraphPattern,
    ) -> Result<Rewritten, RewriteError> {
        let inner_r = self.rewrite_pattern(inner)?;
        if let Rewritten::Static(inner_pattern) = inner_r {
            if !has_virtual_exists(expr, self.registry) {
                return Ok(Rewritten::Static(GraphPattern::Filter {
                    expr: expr.clone(),
                    inner: Box::new(inner_pattern),
                }));
            }
            return self.hybrid_filter(
                expr,
                CombinedPlan::Static(StaticPlan {
                    pattern: inner_pattern,
                }),
            );
        }
        self.hybrid_filter(expr, inner_r.into_plan())
    }

    fn hybrid_filter(
        &mut self,
        expr: &Expression,
        mut plan: CombinedPlan,
    ) -> Result<Rewritten, RewriteError> {
        let mut conjuncts = Vec::new();
        flatten_and(expr, &mut conjuncts);

        let slots = collect_push_slots(&plan);
        let mut per_slot: Vec<Vec<Expression>> = slots.iter().map(|_| Vec::new()).collect();
        let mut residual = Vec::new();
        for conjunct in conjuncts {
            let target = if contains_exists(&conjunct) {
                None
            } else {
                find_filter_slot(&slots, &conjunct)
            };
            match target {
                Some(index) => per_slot[index].push(conjunct),
                None => residual.push(conjunct),
            }
        }

        for (index, assigned) in per_slot.into_iter().enumerate() {
            if let Some(combined) = conjoin(assigned) {
                let mut counter = 0usize;
                apply_to_slot(
                    &mut plan,
                    index,
                    &mut counter,
                    &mut PushAction::Filter(combined),
                );
            }
        }

        if let Some(residual_expr) = conjoin(residual) {
            let exists_plans = self.plan_exists(&residual_expr)?;
            plan = CombinedPlan::Filter {
                inner: plan.boxed(),
                expression: residual_expr,
                exists_plans,
            };
        }
        Ok(Rewritten::Plan(plan))
    }

    fn rewrite_extend(
        &mut self,
        inner: &GraphPattern,
        variable: &Variable,
        expression: &Expression,
    ) -> Result<Rewritten, RewriteError> {
        let inner_r = self.rewrite_pattern(inner)?;
        let expression_virtual = has_virtual_exists(expression, self.registry);
        let mut plan = match inner_r {
            Rewritten::Static(p) if !expression_virtual => {
                return Ok(Rewritten::Static(GraphPattern::Extend {
                    inner: Box::new(p),
                    variable: variable.clone(),
                    expression: expression.clone(),
                }));
            }
            other => other.into_plan(),
        };

        if !contains_exists(expression) {
            let slots = collect_push_slots(&plan);
            let mut vars = HashSet::new();
            expression_variables(expression, &mut vars);
            let target = slots.iter().position(|slot| match slot {
                PushSlot::Virtual {
                    outputs,
                    extend_safe,
                    ..
                } => {
                    *extend_safe
                        && is_translatable(expression)
                        && vars.is_subset(outputs)
                }
                PushSlot::Static { .. } => false,
            });
            let target = target.or_else(|| {
                slots.iter().position(|slot| match slot {
                    PushSlot::Static {
                        scope, extend_safe, ..
                    } => *extend_safe && vars.is_subset(scope),
                    PushSlot::Virtual { .. } => false,
                })
            });
            if let Some(index) = target {
                let mut counter = 0usize;
                apply_to_slot(
                    &mut plan,
                    index,
                    &mut counter,
                    &mut PushAction::Extend(variable.clone(), expression.clone()),
                );
                return Ok(Rewritten::Plan(plan));
            }
        }

        let exists_plans = self.plan_exists(expression)?;
        Ok(Rewritten::Plan(CombinedPlan::Extend {
            inner: plan.boxed(),
            variable: variable.clone(),
            expression: expression.clone(),
            exists_plans,
        }))
    }

    fn rewrite_group(
        &mut self,
        inner: &GraphPattern,
        by: &[Variable],
        aggregates: &[(Variable, AggregateExpression)],
    ) -> Result<Rewritten, RewriteError> {
        let inner_r = self.rewrite_pattern(inner)?;
        let mut plan = match inner_r {
            Rewritten::Static(p) => {
                return Ok(Rewritten::Static(GraphPattern::Group {
                    inner: Box::new(p),
                    variables: by.to_vec(),
                    aggregates: aggregates.to_vec(),
                }));
            }
            Rewritten::Plan(plan) => plan,
        };

        let absorbed = self.try_push_group(&mut plan, by, aggregates);
        Ok(Rewritten::Plan(CombinedPlan::Group {
            inner: plan.boxed(),
            by: by.to_vec(),
            aggregations: aggregates.to_vec(),
            absorbed,
        }))
    }

    /// Attempts to absorb a GROUP BY into the plan's single virtualized
    /// leaf. Group keys bound on the static side are replaced by a grouping
    /// column whose id assignment the coordinator computes after identifier
    /// discovery.
    fn try_push_group(
        &mut self,
        plan: &mut CombinedPlan,
        by: &[Variable],
        aggregates: &[(Variable, AggregateExpression)],
    ) -> bool {
        if !is_static_virtual_join(plan) {
            return false;
        }
        let mut static_scope = HashSet::new();
        collect_static_scope(plan, &mut static_scope);

        let outputs: HashSet<Variable> = {
            let leaves = plan.virtual_plans();
            if leaves.len() != 1 {
                return false;
            }
            if leaves[0].query.basics().len() != 1 {
                return false;
            }
            leaves[0].query.output_variables().into_iter().collect()
        };

        let aggregates_ok = aggregates.iter().all(|(_, aggregate)| {
            if !aggregate_is_translatable(aggregate) {
                return false;
            }
            let mut vars = HashSet::new();
            if let AggregateExpression::FunctionCall { expr, .. } = aggregate {
                expression_variables(expr, &mut vars);
            }
            vars.is_subset(&outputs)
        });
        if !aggregates_ok {
            return false;
        }

        let by_virtual: Vec<Variable> =
            by.iter().filter(|v| outputs.contains(*v)).cloned().collect();
        let by_static: Vec<Variable> = by
            .iter()
            .filter(|v| !outputs.contains(*v))
            .cloned()
            .collect();
        if !by_static.iter().all(|v| static_scope.contains(v)) {
            return false;
        }

        let grouping_variable = if by_static.is_empty() {
            None
        } else {
            Some(self.gen.fresh("grouping_col"))
        };

        let mut leaves = plan.virtual_plans_mut();
        let Some(leaf) = leaves.pop() else {
            return false;
        };
        let mut grouped_by = Vec::new();
        if let Some(grouping_variable) = &grouping_variable {
            let mut basics = leaf.query.basics_mut();
            let Some(basic) = basics.pop() else {
                return false;
            };
            basic.grouping = Some(IdGrouping {
                column_name: grouping_variable.as_str().to_owned(),
                static_by: by_static.clone(),
                mapping: HashMap::new(),
            });
            grouped_by.push(grouping_variable.clone());
        }
        grouped_by.extend(by_virtual);

        leaf.query = VirtualizedQuery::Grouped(GroupedVirtualizedQuery {
            query: Box::new(leaf.query.clone()),
            by: grouped_by,
            aggregations: aggregates.to_vec(),
        });
        leaf.record(PathEntry::GroupInner);
        true
    }

    /// Plans every `EXISTS` pattern of an expression, in depth-first order.
    fn plan_exists(&mut self, expression: &Expression) -> Result<Vec<CombinedPlan>, RewriteError> {
        let mut plans = Vec::new();
        for pattern in collect_exists_patterns(expression) {
            let normalized = normalize(pattern.clone(), &mut self.gen);
            plans.push(self.rewrite_pattern(&normalized)?.into_plan());
        }
        Ok(plans)
    }
}

fn try_push_order(plan: &mut CombinedPlan, expressions: &[OrderExpression]) {
    let CombinedPlan::Virtualized(leaf) = plan else {
        return;
    };
    let outputs: HashSet<Variable> = leaf.query.output_variables().into_iter().collect();
    let pushable = expressions.iter().all(|e| {
        let (OrderExpression::Asc(inner) | OrderExpression::Desc(inner)) = e;
        let mut vars = HashSet::new();
        expression_variables(inner, &mut vars);
        is_translatable(inner) && vars.is_subset(&outputs)
    });
    if pushable {
        leaf.query =
            VirtualizedQuery::Ordered(Box::new(leaf.query.clone()), expressions.to_vec());
        leaf.record(PathEntry::OrderByInner);
    }
}

fn try_push_limit(plan: &mut CombinedPlan, limit: usize) {
    // Projections and extends are row-count preserving, so a limit may pass
    // through them; anything else between the slice and the scan blocks it.
    fn row_preserving_shape(plan: &CombinedPlan) -> bool {
        match plan {
            CombinedPlan::Project { inner, .. } | CombinedPlan::Extend { inner, .. } => {
                row_preserving_shape(inner)
            }
            other => is_static_virtual_join(other),
        }
    }
    if !row_preserving_shape(plan) {
        return;
    }
    let mut leaves = plan.virtual_plans_mut();
    if leaves.len() != 1 {
        return;
    }
    let Some(leaf) = leaves.pop() else {
        return;
    };
    leaf.query = VirtualizedQuery::Sliced(SlicedVirtualizedQuery {
        query: Box::new(leaf.query.clone()),
        offset: 0,
        limit: Some(limit),
    });
    leaf.record(PathEntry::SliceInner);
}

fn find_filter_slot(slots: &[PushSlot], conjunct: &Expression) -> Option<usize> {
    let mut vars = HashSet::new();
    expression_variables(conjunct, &mut vars);
    let virtual_slot = slots.iter().position(|slot| match slot {
        PushSlot::Virtual {
            outputs,
            filter_safe,
            ..
        } => *filter_safe && is_translatable(conjunct) && vars.is_subset(outputs),
        PushSlot::Static { .. } => false,
    });
    virtual_slot.or_else(|| {
        slots.iter().position(|slot| match slot {
            PushSlot::Static {
                scope, filter_safe, ..
            } => *filter_safe && vars.is_subset(scope),
            PushSlot::Virtual { .. } => false,
        })
    })
}

/// Collects push slots in plan traversal order, degrading safety flags on
/// operators an expression may not be moved beneath.
fn collect_push_slots(plan: &CombinedPlan) -> Vec<PushSlot> {
    let mut out = Vec::new();
    collect_slots(plan, true, true, &mut out);
    out
}

fn collect_slots(
    plan: &CombinedPlan,
    filter_safe: bool,
    extend_safe: bool,
    out: &mut Vec<PushSlot>,
) {
    match plan {
        CombinedPlan::Static(static_plan) => {
            let mut scope = HashSet::new();
            in_scope_variables(&static_plan.pattern, &mut scope);
            out.push(PushSlot::Static {
                scope,
                filter_safe,
                extend_safe,
            });
        }
        CombinedPlan::Virtualized(leaf) => {
            out.push(PushSlot::Virtual {
                outputs: leaf.query.output_variables().into_iter().collect(),
                filter_safe,
                extend_safe,
            });
        }
        CombinedPlan::Join(left, right) => {
            collect_slots(left, filter_safe, extend_safe, out);
            collect_slots(right, filter_safe, extend_safe, out);
        }
        CombinedPlan::Filter { inner, .. }
        | CombinedPlan::Extend { inner, .. }
        | CombinedPlan::OrderBy { inner, .. }
        | CombinedPlan::Distinct(inner) => {
            collect_slots(inner, filter_safe, extend_safe, out);
        }
        CombinedPlan::Group {
            inner, absorbed, ..
        } => {
            if *absorbed {
                collect_slots(inner, filter_safe, false, out);
            } else {
                collect_slots(inner, false, false, out);
            }
        }
        CombinedPlan::Slice { inner, .. } | CombinedPlan::Project { inner, .. } => {
            collect_slots(inner, false, false, out);
        }
        CombinedPlan::Union(left, right) | CombinedPlan::Minus(left, right) => {
            collect_slots(left, false, false, out);
            collect_slots(right, false, false, out);
        }
        CombinedPlan::LeftJoin { left, right, .. } => {
            collect_slots(left, false, false, out);
            collect_slots(right, false, false, out);
        }
    }
}

/// Applies a push action to the `target`-th slot, mirroring the traversal of
/// [collect_slots]. Returns whether the target was reached.
fn apply_to_slot(
    plan: &mut CombinedPlan,
    target: usize,
    counter: &mut usize,
    action: &mut PushAction,
) -> bool {
    match plan {
        CombinedPlan::Static(static_plan) => {
            let here = *counter == target;
            *counter += 1;
            if here {
                let inner = Box::new(static_plan.pattern.clone());
                static_plan.pattern = match action {
                    PushAction::Filter(expr) => GraphPattern::Filter {
                        expr: expr.clone(),
                        inner,
                    },
                    PushAction::Extend(variable, expression) => GraphPattern::Extend {
                        inner,
                        variable: variable.clone(),
                        expression: expression.clone(),
                    },
                };
            }
            here
        }
        CombinedPlan::Virtualized(leaf) => {
            let here = *counter == target;
            *counter += 1;
            if here {
                match action {
                    PushAction::Filter(expr) => {
                        leaf.query = VirtualizedQuery::Filtered(
                            Box::new(leaf.query.clone()),
                            expr.clone(),
                        );
                        leaf.record(PathEntry::FilterInner);
                    }
                    PushAction::Extend(variable, expression) => {
                        leaf.query = VirtualizedQuery::ExpressionAs(
                            Box::new(leaf.query.clone()),
                            variable.clone(),
                            expression.clone(),
                        );
                        leaf.record(PathEntry::ExtendInner);
                    }
                }
            }
            here
        }
        CombinedPlan::Join(left, right)
        | CombinedPlan::Union(left, right)
        | CombinedPlan::Minus(left, right) => {
            apply_to_slot(left, target, counter, action)
                || apply_to_slot(right, target, counter, action)
        }
        CombinedPlan::LeftJoin { left, right, .. } => {
            apply_to_slot(left, target, counter, action)
                || apply_to_slot(right, target, counter, action)
        }
        CombinedPlan::Filter { inner, .. }
        | CombinedPlan::Extend { inner, .. }
        | CombinedPlan::Group { inner, .. }
        | CombinedPlan::OrderBy { inner, .. }
        | CombinedPlan::Slice { inner, .. }
        | CombinedPlan::Distinct(inner)
        | CombinedPlan::Project { inner, .. } => {
            apply_to_slot(inner, target, counter, action)
        }
    }
}

/// Whether the plan is a join tree over static leaves and virtualized
/// leaves only (no residual operators in between).
fn is_static_virtual_join(plan: &CombinedPlan) -> bool {
    match plan {
        CombinedPlan::Static(_) | CombinedPlan::Virtualized(_) => true,
        CombinedPlan::Join(left, right) => {
            is_static_virtual_join(left) && is_static_virtual_join(right)
        }
        _ => false,
    }
}

fn collect_static_scope(plan: &CombinedPlan, out: &mut HashSet<Variable>) {
    match plan {
        CombinedPlan::Static(static_plan) => {
            in_scope_variables(&static_plan.pattern, out);
        }
        CombinedPlan::Virtualized(_) => {}
        CombinedPlan::Join(left, right) => {
            collect_static_scope(left, out);
            collect_static_scope(right, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontext_model::vocab::ct;
    use chrontext_templates::Template;
    use oxrdf::vocab::xsd;
    use oxrdf::NamedNode;

    const PREFIXES: &str = "PREFIX xsd: <http://www.w3.org/2001/XMLSchema#> \
         PREFIX ct: <https://github.com/DataTreehouse/chrontext#> \
         PREFIX types: <http://example.org/types#> ";

    fn registry() -> TemplateRegistry {
        let template = Template::timeseries(
            NamedNode::new_unchecked(format!("{}my_resource", ct::NAMESPACE)),
            xsd::INTEGER.into_owned(),
        );
        TemplateRegistry::new([("my_resource".to_owned(), template)].into()).unwrap()
    }

    fn plan(sparql: &str) -> PlannedQuery {
        let query = Query::parse(&format!("{PREFIXES}{sparql}"), None).unwrap();
        plan_query(&query, &registry()).unwrap()
    }

    #[test]
    fn static_only_queries_collapse_to_one_leaf() {
        let planned = plan("SELECT ?w WHERE { ?w a types:BigWidget }");
        assert!(matches!(planned.plan, CombinedPlan::Static(_)));
        assert!(planned.pushdown_paths.is_empty());
    }

    #[test]
    fn hybrid_filter_is_pushed_and_projected() {
        let planned = plan(
            "SELECT ?w ?t ?v WHERE { \
               ?w a types:BigWidget . \
               ?w types:hasSensor/ct:hasTimeseries/ct:hasDataPoint ?dp . \
               ?dp ct:hasTimestamp ?t . \
               ?dp ct:hasValue ?v . \
               FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime && ?v < 200) }",
        );
        assert_eq!(
            planned.pushdown_paths,
            vec![vec![PathEntry::FilterInner, PathEntry::ProjectInner]]
        );
        // The filter left no residual node above the join.
        let CombinedPlan::Project { inner, .. } = &planned.plan else {
            panic!("expected a projection root");
        };
        assert!(matches!(inner.as_ref(), CombinedPlan::Join(_, _)));
        let leaf = planned.plan.virtual_plans()[0];
        assert!(matches!(&leaf.query, VirtualizedQuery::Filtered(_, _)));
    }

    #[test]
    fn static_conjuncts_fold_into_the_static_side() {
        let planned = plan(
            "SELECT ?w ?v WHERE { \
               ?w a types:BigWidget . \
               ?w types:hasSensor ?s . \
               ?s ct:hasTimeseries ?ts . \
               ?ts ct:hasDataPoint ?dp . \
               ?dp ct:hasValue ?v . \
               FILTER(?v < 200 && ?w != types:excluded) }",
        );
        // ?v < 200 goes to the backend; ?w != ... folds into the static
        // pattern, and nothing remains above the join.
        let CombinedPlan::Project { inner, .. } = &planned.plan else {
            panic!("expected a projection root");
        };
        let CombinedPlan::Join(static_side, _) = inner.as_ref() else {
            panic!("expected a join, got {inner:?}");
        };
        let CombinedPlan::Static(static_plan) = static_side.as_ref() else {
            panic!("expected the static leaf");
        };
        assert!(matches!(
            static_plan.pattern,
            GraphPattern::Filter { .. }
        ));
    }

    #[test]
    fn hybrid_group_by_uses_a_grouping_column() {
        let planned = plan(
            "SELECT ?w (SUM(?v) AS ?s) WHERE { \
               ?w types:hasSensor ?sen . \
               ?sen ct:hasTimeseries ?ts . \
               ?ts ct:hasDataPoint ?dp . \
               ?dp ct:hasTimestamp ?t . \
               ?dp ct:hasValue ?v . \
               BIND(xsd:integer(FLOOR(SECONDS(?t)/5.0)) AS ?b) \
               FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime) \
             } GROUP BY ?w ?b",
        );
        let path = &planned.pushdown_paths[0];
        assert!(path.contains(&PathEntry::ExtendInner));
        assert!(path.contains(&PathEntry::FilterInner));
        assert!(path.contains(&PathEntry::GroupInner));
        assert_eq!(path.last(), Some(&PathEntry::ProjectInner));

        let leaf = planned.plan.virtual_plans()[0];
        let basics = leaf.query.basics();
        let grouping = basics[0].grouping.as_ref().expect("grouping column set");
        assert_eq!(grouping.static_by.len(), 1);
        assert_eq!(grouping.static_by[0].as_str(), "w");
    }

    #[test]
    fn untranslatable_filters_stay_residual() {
        let planned = plan(
            "SELECT ?v WHERE { \
               ?ts ct:hasDataPoint ?dp . \
               ?dp ct:hasValue ?v . \
               FILTER(STRLEN(STR(?v)) > 1) }",
        );
        // The pushdown path stops before the filter.
        assert!(!planned.pushdown_paths[0].contains(&PathEntry::FilterInner));
        let CombinedPlan::Project { inner, .. } = &planned.plan else {
            panic!("expected a projection root");
        };
        assert!(matches!(inner.as_ref(), CombinedPlan::Filter { .. }));
    }

    #[test]
    fn virtual_exists_is_planned_separately() {
        let planned = plan(
            "SELECT ?w ?s WHERE { \
               ?w types:hasSensor ?s . \
               FILTER EXISTS { SELECT ?s WHERE { \
                   ?s ct:hasTimeseries ?ts . \
                   ?ts ct:hasDataPoint ?dp . \
                   ?dp ct:hasValue ?v . \
                   FILTER(?v > 300) } } }",
        );
        // The EXISTS subquery owns the only virtualized plan, and its value
        // filter was pushed down within it.
        assert_eq!(planned.pushdown_paths.len(), 1);
        assert!(planned.pushdown_paths[0].contains(&PathEntry::FilterInner));
        let CombinedPlan::Project { inner, .. } = &planned.plan else {
            panic!("expected a projection root");
        };
        let CombinedPlan::Filter { exists_plans, .. } = inner.as_ref() else {
            panic!("expected a residual filter, got {inner:?}");
        };
        assert_eq!(exists_plans.len(), 1);
    }

    #[test]
    fn union_sides_are_tagged() {
        let planned = plan(
            "SELECT ?v WHERE { \
               { ?ts ct:hasDataPoint ?dp . ?dp ct:hasValue ?v . FILTER(?v > 1) } \
               UNION \
               { ?ts ct:hasDataPoint ?dp . ?dp ct:hasValue ?v . FILTER(?v < 1) } }",
        );
        assert_eq!(planned.pushdown_paths.len(), 2);
        assert!(planned.pushdown_paths[0].contains(&PathEntry::UnionLeftSide));
        assert!(planned.pushdown_paths[1].contains(&PathEntry::UnionRightSide));
    }

    #[test]
    fn transitive_paths_are_never_virtualized() {
        let planned = plan(
            "SELECT ?v WHERE { ?ts ct:hasDataPoint+ ?dp . ?dp ct:hasValue ?v . }",
        );
        // The closure stays static, which orphans the value triple from any
        // identifier; the whole pattern is answered by the store alone.
        assert!(planned.pushdown_paths.is_empty());
        assert!(matches!(planned.plan, CombinedPlan::Static(_)));
    }
}
