//! The intermediate representations built while planning a hybrid query:
//! the virtualized-query tree handed to tabular backends, the combined plan
//! interpreted by the execution coordinator, and the pushdown-path tags that
//! record how deep rewriting progressed.

mod context;
mod plan;
pub mod sparql_utils;
mod virtualized;

pub use context::PathEntry;
pub use plan::{CombinedPlan, StaticPlan, VirtualizedPlan};
pub use virtualized::{
    expression_variables, BasicVirtualizedQuery, GroupedVirtualizedQuery, IdGrouping,
    SlicedVirtualizedQuery, VirtualizedQuery,
};
