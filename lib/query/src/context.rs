use std::fmt;

/// A position tag in the original algebra tree.
///
/// Every successful pushdown rule appends the tag of the construct it
/// absorbed to the owning virtualized plan, innermost rule first. The
/// resulting list is exposed on query responses for observability and test
/// assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathEntry {
    ProjectInner,
    FilterInner,
    ExtendInner,
    GroupInner,
    OrderByInner,
    SliceInner,
    DistinctInner,
    JoinLeftSide,
    JoinRightSide,
    LeftJoinLeftSide,
    LeftJoinRightSide,
    MinusLeftSide,
    MinusRightSide,
    UnionLeftSide,
    UnionRightSide,
}

impl fmt::Display for PathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PathEntry::ProjectInner => "ProjectInner",
            PathEntry::FilterInner => "FilterInner",
            PathEntry::ExtendInner => "ExtendInner",
            PathEntry::GroupInner => "GroupInner",
            PathEntry::OrderByInner => "OrderByInner",
            PathEntry::SliceInner => "SliceInner",
            PathEntry::DistinctInner => "DistinctInner",
            PathEntry::JoinLeftSide => "JoinLeftSide",
            PathEntry::JoinRightSide => "JoinRightSide",
            PathEntry::LeftJoinLeftSide => "LeftJoinLeftSide",
            PathEntry::LeftJoinRightSide => "LeftJoinRightSide",
            PathEntry::MinusLeftSide => "MinusLeftSide",
            PathEntry::MinusRightSide => "MinusRightSide",
            PathEntry::UnionLeftSide => "UnionLeftSide",
            PathEntry::UnionRightSide => "UnionRightSide",
        };
        f.write_str(name)
    }
}
