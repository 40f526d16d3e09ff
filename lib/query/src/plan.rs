use crate::context::PathEntry;
use crate::virtualized::{expression_variables, VirtualizedQuery};
use crate::sparql_utils;
use oxrdf::Variable;
use spargebra::algebra::{
    AggregateExpression, Expression, GraphPattern, OrderExpression,
};
use std::collections::HashSet;

/// A leaf evaluated against the RDF store.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticPlan {
    pub pattern: GraphPattern,
}

/// A leaf evaluated against a virtualized backend, together with the
/// pushdown path recorded while the leaf was enriched.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualizedPlan {
    pub query: VirtualizedQuery,
    pub path: Vec<PathEntry>,
}

impl VirtualizedPlan {
    pub fn new(query: VirtualizedQuery) -> VirtualizedPlan {
        VirtualizedPlan {
            query,
            path: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: PathEntry) {
        self.path.push(entry);
    }
}

/// The coordinator-facing query plan.
///
/// Static and virtualized leaves stand where spec-level "VirtualJoin"
/// placeholders would; the remaining nodes are the algebra operators that
/// could not be pushed down and are evaluated over solution tables after the
/// leaves are materialized.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedPlan {
    Static(StaticPlan),
    Virtualized(VirtualizedPlan),
    Join(Box<CombinedPlan>, Box<CombinedPlan>),
    LeftJoin {
        left: Box<CombinedPlan>,
        right: Box<CombinedPlan>,
        expression: Option<Expression>,
        exists_plans: Vec<CombinedPlan>,
    },
    Minus(Box<CombinedPlan>, Box<CombinedPlan>),
    Union(Box<CombinedPlan>, Box<CombinedPlan>),
    Filter {
        inner: Box<CombinedPlan>,
        expression: Expression,
        /// Plans for `EXISTS` patterns inside `expression`, in depth-first
        /// order of occurrence.
        exists_plans: Vec<CombinedPlan>,
    },
    Extend {
        inner: Box<CombinedPlan>,
        variable: Variable,
        expression: Expression,
        exists_plans: Vec<CombinedPlan>,
    },
    Group {
        inner: Box<CombinedPlan>,
        by: Vec<Variable>,
        aggregations: Vec<(Variable, AggregateExpression)>,
        /// When the grouping was absorbed by a virtualized leaf the node only
        /// deduplicates the joined result instead of aggregating.
        absorbed: bool,
    },
    OrderBy {
        inner: Box<CombinedPlan>,
        expressions: Vec<OrderExpression>,
    },
    Slice {
        inner: Box<CombinedPlan>,
        start: usize,
        length: Option<usize>,
    },
    Distinct(Box<CombinedPlan>),
    Project {
        inner: Box<CombinedPlan>,
        variables: Vec<Variable>,
    },
}

impl CombinedPlan {
    pub fn boxed(self) -> Box<CombinedPlan> {
        Box::new(self)
    }

    /// All virtualized leaves, leftmost first.
    pub fn virtual_plans(&self) -> Vec<&VirtualizedPlan> {
        let mut out = Vec::new();
        self.visit(&mut |plan| {
            if let CombinedPlan::Virtualized(v) = plan {
                out.push(v);
            }
        });
        out
    }

    pub fn virtual_plans_mut(&mut self) -> Vec<&mut VirtualizedPlan> {
        match self {
            CombinedPlan::Static(_) => Vec::new(),
            CombinedPlan::Virtualized(v) => vec![v],
            CombinedPlan::Join(left, right)
            | CombinedPlan::Minus(left, right)
            | CombinedPlan::Union(left, right) => {
                let mut out = left.virtual_plans_mut();
                out.extend(right.virtual_plans_mut());
                out
            }
            CombinedPlan::LeftJoin {
                left,
                right,
                exists_plans,
                ..
            } => {
                let mut out = left.virtual_plans_mut();
                out.extend(right.virtual_plans_mut());
                for plan in exists_plans {
                    out.extend(plan.virtual_plans_mut());
                }
                out
            }
            CombinedPlan::Filter {
                inner,
                exists_plans,
                ..
            }
            | CombinedPlan::Extend {
                inner,
                exists_plans,
                ..
            } => {
                let mut out = inner.virtual_plans_mut();
                for plan in exists_plans {
                    out.extend(plan.virtual_plans_mut());
                }
                out
            }
            CombinedPlan::Group { inner, .. }
            | CombinedPlan::OrderBy { inner, .. }
            | CombinedPlan::Slice { inner, .. }
            | CombinedPlan::Distinct(inner)
            | CombinedPlan::Project { inner, .. } => inner.virtual_plans_mut(),
        }
    }

    /// Appends `entry` to the pushdown path of every virtualized leaf in the
    /// subtree. Used for side tags (union, minus, joins) and projection.
    pub fn record_for_all(&mut self, entry: PathEntry) {
        for plan in self.virtual_plans_mut() {
            plan.record(entry);
        }
    }

    /// Whether the subtree contains a virtualized leaf.
    pub fn has_virtual(&self) -> bool {
        !self.virtual_plans().is_empty()
    }

    /// The variables a solution table produced from this plan may bind.
    pub fn variables(&self, out: &mut HashSet<Variable>) {
        match self {
            CombinedPlan::Static(static_plan) => {
                sparql_utils::in_scope_variables(&static_plan.pattern, out);
            }
            CombinedPlan::Virtualized(virtualized) => {
                out.extend(virtualized.query.output_variables());
            }
            CombinedPlan::Join(left, right) | CombinedPlan::Union(left, right) => {
                left.variables(out);
                right.variables(out);
            }
            CombinedPlan::LeftJoin { left, right, .. } => {
                left.variables(out);
                right.variables(out);
            }
            CombinedPlan::Minus(left, _) => left.variables(out),
            CombinedPlan::Filter { inner, .. }
            | CombinedPlan::OrderBy { inner, .. }
            | CombinedPlan::Slice { inner, .. }
            | CombinedPlan::Distinct(inner) => inner.variables(out),
            CombinedPlan::Extend {
                inner, variable, ..
            } => {
                inner.variables(out);
                out.insert(variable.clone());
            }
            CombinedPlan::Group {
                by, aggregations, ..
            } => {
                out.extend(by.iter().cloned());
                out.extend(aggregations.iter().map(|(v, _)| v.clone()));
            }
            CombinedPlan::Project { variables, .. } => {
                out.extend(variables.iter().cloned());
            }
        }
    }

    /// Variables referenced by residual operators in this subtree. Column
    /// pruning at projections must preserve these.
    pub fn residual_variables(&self, out: &mut HashSet<Variable>) {
        match self {
            CombinedPlan::Static(_) | CombinedPlan::Virtualized(_) => {}
            CombinedPlan::Union(left, right) => {
                left.residual_variables(out);
                right.residual_variables(out);
            }
            CombinedPlan::Join(left, right) | CombinedPlan::Minus(left, right) => {
                // The shared variables are the join keys; pruning them would
                // silently turn the join into a cross product.
                shared_variables(left, right, out);
                left.residual_variables(out);
                right.residual_variables(out);
            }
            CombinedPlan::LeftJoin {
                left,
                right,
                expression,
                ..
            } => {
                if let Some(expression) = expression {
                    expression_variables(expression, out);
                }
                shared_variables(left, right, out);
                left.residual_variables(out);
                right.residual_variables(out);
            }
            CombinedPlan::Filter {
                inner, expression, ..
            } => {
                expression_variables(expression, out);
                inner.residual_variables(out);
            }
            CombinedPlan::Extend {
                inner, expression, ..
            } => {
                expression_variables(expression, out);
                inner.residual_variables(out);
            }
            CombinedPlan::Group {
                inner,
                by,
                aggregations,
                ..
            } => {
                out.extend(by.iter().cloned());
                for (_, aggregation) in aggregations {
                    if let AggregateExpression::FunctionCall { expr, .. } = aggregation {
                        expression_variables(expr, out);
                    }
                }
                inner.residual_variables(out);
            }
            CombinedPlan::OrderBy { inner, expressions } => {
                for expression in expressions {
                    let (OrderExpression::Asc(e) | OrderExpression::Desc(e)) = expression;
                    expression_variables(e, out);
                }
                inner.residual_variables(out);
            }
            CombinedPlan::Slice { inner, .. } | CombinedPlan::Distinct(inner) => {
                inner.residual_variables(out);
            }
            CombinedPlan::Project { inner, variables } => {
                out.extend(variables.iter().cloned());
                inner.residual_variables(out);
            }
        }
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a CombinedPlan)) {
        f(self);
        match self {
            CombinedPlan::Static(_) | CombinedPlan::Virtualized(_) => {}
            CombinedPlan::Join(left, right)
            | CombinedPlan::Minus(left, right)
            | CombinedPlan::Union(left, right) => {
                left.visit(f);
                right.visit(f);
            }
            CombinedPlan::LeftJoin {
                left,
                right,
                exists_plans,
                ..
            } => {
                left.visit(f);
                right.visit(f);
                for plan in exists_plans {
                    plan.visit(f);
                }
            }
            CombinedPlan::Filter {
                inner,
                exists_plans,
                ..
            }
            | CombinedPlan::Extend {
                inner,
                exists_plans,
                ..
            } => {
                inner.visit(f);
                for plan in exists_plans {
                    plan.visit(f);
                }
            }
            CombinedPlan::Group { inner, .. }
            | CombinedPlan::OrderBy { inner, .. }
            | CombinedPlan::Slice { inner, .. }
            | CombinedPlan::Distinct(inner)
            | CombinedPlan::Project { inner, .. } => inner.visit(f),
        }
    }
}

/// Adds the variables bound on both sides to `out`.
fn shared_variables(
    left: &CombinedPlan,
    right: &CombinedPlan,
    out: &mut HashSet<Variable>,
) {
    let mut left_vars = HashSet::new();
    left.variables(&mut left_vars);
    let mut right_vars = HashSet::new();
    right.variables(&mut right_vars);
    out.extend(left_vars.intersection(&right_vars).cloned());
}
