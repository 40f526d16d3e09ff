use chrontext_model::RDFType;
use oxrdf::Variable;
use spargebra::algebra::{AggregateExpression, Expression, OrderExpression};
use std::collections::{HashMap, HashSet};

/// The portion of a SPARQL query evaluated against a tabular backend.
///
/// Every node owns its child; the tree is rooted at [VirtualizedQuery::Basic]
/// and enriched by the pushdown rewriter. Expressions reuse the SPARQL
/// algebra types — a backend translates them to its own dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualizedQuery {
    Basic(BasicVirtualizedQuery),
    Filtered(Box<VirtualizedQuery>, Expression),
    Grouped(GroupedVirtualizedQuery),
    ExpressionAs(Box<VirtualizedQuery>, Variable, Expression),
    InnerJoin(Box<VirtualizedQuery>, Box<VirtualizedQuery>),
    Ordered(Box<VirtualizedQuery>, Vec<OrderExpression>),
    Sliced(SlicedVirtualizedQuery),
    Distinct(Box<VirtualizedQuery>),
}

/// A scan of one virtualized resource.
///
/// The resource name and the identifier set are symbolic at plan time; the
/// coordinator fills them in after identifier discovery against the static
/// plan.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicVirtualizedQuery {
    /// The variable the query used for the resource node (e.g. `?ts`).
    pub query_variable: Variable,
    /// The generated variable naming the identifier column in outputs.
    pub identifier_variable: Variable,
    /// The generated variable binding the resource name on the static side.
    pub resource_variable: Variable,
    /// Resolved resource name; `None` until identifier discovery.
    pub resource: Option<String>,
    /// Identifier values known at materialization time.
    pub ids: Vec<String>,
    /// Resource column → output variable.
    pub column_mapping: HashMap<String, Variable>,
    /// Resource column → declared parameter type, used for retyping results.
    pub column_types: HashMap<String, RDFType>,
    /// Per-id group assignment when several logical series are batched into
    /// one scan.
    pub grouping: Option<IdGrouping>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdGrouping {
    /// Name of the grouping column in the backend's output.
    pub column_name: String,
    /// The static-side group keys the coordinator derives the id → group
    /// assignment from after identifier discovery.
    pub static_by: Vec<Variable>,
    /// External id → group number.
    pub mapping: HashMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedVirtualizedQuery {
    pub query: Box<VirtualizedQuery>,
    pub by: Vec<Variable>,
    pub aggregations: Vec<(Variable, AggregateExpression)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlicedVirtualizedQuery {
    pub query: Box<VirtualizedQuery>,
    /// Reserved; planning never pushes a non-zero offset.
    pub offset: usize,
    pub limit: Option<usize>,
}

impl BasicVirtualizedQuery {
    pub fn new(
        query_variable: Variable,
        identifier_variable: Variable,
        resource_variable: Variable,
    ) -> BasicVirtualizedQuery {
        BasicVirtualizedQuery {
            query_variable,
            identifier_variable,
            resource_variable,
            resource: None,
            ids: Vec::new(),
            column_mapping: HashMap::new(),
            column_types: HashMap::new(),
            grouping: None,
        }
    }

    /// The name of the identifier column in backend outputs.
    pub fn identifier_name(&self) -> &str {
        self.identifier_variable.as_str()
    }

    /// The declared type of the column an output variable maps to.
    pub fn column_type_of(&self, variable: &Variable) -> Option<&RDFType> {
        self.column_mapping
            .iter()
            .find(|(_, v)| *v == variable)
            .and_then(|(column, _)| self.column_types.get(column))
    }
}

impl VirtualizedQuery {
    /// All basic scans in the tree.
    pub fn basics(&self) -> Vec<&BasicVirtualizedQuery> {
        match self {
            VirtualizedQuery::Basic(b) => vec![b],
            VirtualizedQuery::Filtered(inner, _)
            | VirtualizedQuery::ExpressionAs(inner, _, _)
            | VirtualizedQuery::Ordered(inner, _)
            | VirtualizedQuery::Distinct(inner) => inner.basics(),
            VirtualizedQuery::Grouped(grouped) => grouped.query.basics(),
            VirtualizedQuery::Sliced(sliced) => sliced.query.basics(),
            VirtualizedQuery::InnerJoin(left, right) => {
                let mut out = left.basics();
                out.extend(right.basics());
                out
            }
        }
    }

    /// Mutable access to all basic scans, used by the coordinator to fill in
    /// discovered identifiers.
    pub fn basics_mut(&mut self) -> Vec<&mut BasicVirtualizedQuery> {
        match self {
            VirtualizedQuery::Basic(b) => vec![b],
            VirtualizedQuery::Filtered(inner, _)
            | VirtualizedQuery::ExpressionAs(inner, _, _)
            | VirtualizedQuery::Ordered(inner, _)
            | VirtualizedQuery::Distinct(inner) => inner.basics_mut(),
            VirtualizedQuery::Grouped(grouped) => grouped.query.basics_mut(),
            VirtualizedQuery::Sliced(sliced) => sliced.query.basics_mut(),
            VirtualizedQuery::InnerJoin(left, right) => {
                let mut out = left.basics_mut();
                out.extend(right.basics_mut());
                out
            }
        }
    }

    /// The variables this query binds in its output table.
    pub fn output_variables(&self) -> Vec<Variable> {
        match self {
            VirtualizedQuery::Basic(b) => {
                let mut out = vec![b.identifier_variable.clone()];
                let mut mapped: Vec<&Variable> = b.column_mapping.values().collect();
                mapped.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                out.extend(mapped.into_iter().cloned());
                out
            }
            VirtualizedQuery::Filtered(inner, _)
            | VirtualizedQuery::Ordered(inner, _)
            | VirtualizedQuery::Distinct(inner) => inner.output_variables(),
            VirtualizedQuery::Sliced(sliced) => sliced.query.output_variables(),
            VirtualizedQuery::ExpressionAs(inner, variable, _) => {
                let mut out = inner.output_variables();
                if !out.contains(variable) {
                    out.push(variable.clone());
                }
                out
            }
            VirtualizedQuery::Grouped(grouped) => {
                let mut out = grouped.by.clone();
                out.extend(grouped.aggregations.iter().map(|(v, _)| v.clone()));
                out
            }
            VirtualizedQuery::InnerJoin(left, right) => {
                let mut out = left.output_variables();
                for variable in right.output_variables() {
                    if !out.contains(&variable) {
                        out.push(variable);
                    }
                }
                out
            }
        }
    }

    /// Removes basic-scan output columns that are not in `keep` and are not
    /// referenced by any node of this tree.
    pub fn prune_columns(&mut self, keep: &HashSet<Variable>) {
        let mut needed = keep.clone();
        self.collect_referenced_variables(&mut needed);
        self.prune_basics(&needed);
    }

    fn collect_referenced_variables(&self, out: &mut HashSet<Variable>) {
        match self {
            VirtualizedQuery::Basic(_) => {}
            VirtualizedQuery::Filtered(inner, expression) => {
                expression_variables(expression, out);
                inner.collect_referenced_variables(out);
            }
            VirtualizedQuery::ExpressionAs(inner, _, expression) => {
                expression_variables(expression, out);
                inner.collect_referenced_variables(out);
            }
            VirtualizedQuery::Grouped(grouped) => {
                out.extend(grouped.by.iter().cloned());
                for (_, aggregation) in &grouped.aggregations {
                    if let AggregateExpression::FunctionCall { expr, .. } = aggregation {
                        expression_variables(expr, out);
                    }
                }
                grouped.query.collect_referenced_variables(out);
            }
            VirtualizedQuery::Ordered(inner, expressions) => {
                for expression in expressions {
                    let (OrderExpression::Asc(e) | OrderExpression::Desc(e)) = expression;
                    expression_variables(e, out);
                }
                inner.collect_referenced_variables(out);
            }
            VirtualizedQuery::Sliced(sliced) => {
                sliced.query.collect_referenced_variables(out);
            }
            VirtualizedQuery::Distinct(inner) => inner.collect_referenced_variables(out),
            VirtualizedQuery::InnerJoin(left, right) => {
                left.collect_referenced_variables(out);
                right.collect_referenced_variables(out);
            }
        }
    }

    fn prune_basics(&mut self, needed: &HashSet<Variable>) {
        match self {
            VirtualizedQuery::Basic(b) => {
                b.column_mapping.retain(|_, v| needed.contains(v));
            }
            VirtualizedQuery::Filtered(inner, _)
            | VirtualizedQuery::ExpressionAs(inner, _, _)
            | VirtualizedQuery::Ordered(inner, _)
            | VirtualizedQuery::Distinct(inner) => inner.prune_basics(needed),
            VirtualizedQuery::Grouped(grouped) => grouped.query.prune_basics(needed),
            VirtualizedQuery::Sliced(sliced) => sliced.query.prune_basics(needed),
            VirtualizedQuery::InnerJoin(left, right) => {
                left.prune_basics(needed);
                right.prune_basics(needed);
            }
        }
    }

    /// A short description of the query used when wrapping backend errors.
    pub fn fingerprint(&self) -> String {
        let basics = self.basics();
        let parts: Vec<String> = basics
            .iter()
            .map(|b| {
                format!(
                    "{}[{}:{} ids]",
                    b.resource.as_deref().unwrap_or("?"),
                    b.identifier_name(),
                    b.ids.len()
                )
            })
            .collect();
        parts.join(",")
    }
}

/// Collects every variable mentioned by an expression.
pub fn expression_variables(expression: &Expression, out: &mut HashSet<Variable>) {
    match expression {
        Expression::Variable(v) | Expression::Bound(v) => {
            out.insert(v.clone());
        }
        Expression::NamedNode(_) | Expression::Literal(_) => {}
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
            expression_variables(l, out);
            expression_variables(r, out);
        }
        Expression::UnaryPlus(inner)
        | Expression::UnaryMinus(inner)
        | Expression::Not(inner) => expression_variables(inner, out),
        Expression::In(e, list) => {
            expression_variables(e, out);
            for item in list {
                expression_variables(item, out);
            }
        }
        Expression::Coalesce(list) => {
            for item in list {
                expression_variables(item, out);
            }
        }
        Expression::If(a, b, c) => {
            expression_variables(a, out);
            expression_variables(b, out);
            expression_variables(c, out);
        }
        Expression::FunctionCall(_, arguments) => {
            for argument in arguments {
                expression_variables(argument, out);
            }
        }
        Expression::Exists(_) => {
            // The subpattern's variables are scoped to the subquery.
        }
    }
}
