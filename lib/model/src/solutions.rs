use oxrdf::{NamedNode, Term};
use std::collections::HashMap;

/// An ordered, named-column table of optional RDF terms.
///
/// This is the engine's in-memory solution-mapping representation: rows are
/// tuples of optional terms (unbound ≡ absent) and each column may carry an
/// RDF datatype recorded when the column was materialized from a virtualized
/// backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolutionTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Term>>>,
    rdf_datatypes: HashMap<String, NamedNode>,
}

impl SolutionTable {
    pub fn new(columns: Vec<String>) -> SolutionTable {
        SolutionTable {
            columns,
            rows: Vec::new(),
            rdf_datatypes: HashMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<Term>>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Option<Term>>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Term> {
        let idx = self.index_of(column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }

    /// Appends a row. The row length must match the column count.
    pub fn push_row(&mut self, row: Vec<Option<Term>>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn set_rows(&mut self, rows: Vec<Vec<Option<Term>>>) {
        self.rows = rows;
    }

    /// Adds a new column filled from `values` (one entry per existing row).
    pub fn push_column(&mut self, name: String, values: Vec<Option<Term>>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    pub fn rdf_datatypes(&self) -> &HashMap<String, NamedNode> {
        &self.rdf_datatypes
    }

    pub fn set_rdf_datatype(&mut self, column: impl Into<String>, datatype: NamedNode) {
        self.rdf_datatypes.insert(column.into(), datatype);
    }

    /// Copies datatype annotations from another table for shared columns.
    pub fn adopt_rdf_datatypes(&mut self, other: &SolutionTable) {
        for (column, datatype) in &other.rdf_datatypes {
            if self.columns.iter().any(|c| c == column) {
                self.rdf_datatypes
                    .entry(column.clone())
                    .or_insert_with(|| datatype.clone());
            }
        }
    }

    /// Restricts the table to `keep`, in the given order. Unknown names
    /// become columns of unbound values.
    pub fn project(&self, keep: &[String]) -> SolutionTable {
        let indices: Vec<Option<usize>> =
            keep.iter().map(|name| self.index_of(name)).collect();
        let mut result = SolutionTable::new(keep.to_vec());
        for row in &self.rows {
            result.push_row(
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| row[i].clone()))
                    .collect(),
            );
        }
        for name in keep {
            if let Some(datatype) = self.rdf_datatypes.get(name) {
                result.set_rdf_datatype(name.clone(), datatype.clone());
            }
        }
        result
    }

    /// Concatenates another table underneath this one, aligning columns by
    /// name and padding columns absent on either side with unbound values.
    pub fn concat(&mut self, other: SolutionTable) {
        for column in other.columns.clone() {
            if self.index_of(&column).is_none() {
                let unbound = vec![None; self.rows.len()];
                self.push_column(column, unbound);
            }
        }
        let indices: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|name| other.index_of(name))
            .collect();
        for row in other.rows {
            self.rows.push(
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| row[i].clone()))
                    .collect(),
            );
        }
        for (column, datatype) in other.rdf_datatypes {
            self.rdf_datatypes.entry(column).or_insert(datatype);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Literal;

    fn term(value: &str) -> Option<Term> {
        Some(Literal::new_simple_literal(value).into())
    }

    #[test]
    fn project_reorders_and_drops() {
        let mut table = SolutionTable::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![term("1"), term("2")]);
        let projected = table.project(&["b".into(), "a".into()]);
        assert_eq!(projected.columns(), &["b".to_owned(), "a".to_owned()]);
        assert_eq!(projected.rows()[0], vec![term("2"), term("1")]);
    }

    #[test]
    fn concat_aligns_columns_by_name() {
        let mut left = SolutionTable::new(vec!["a".into()]);
        left.push_row(vec![term("1")]);
        let mut right = SolutionTable::new(vec!["b".into(), "a".into()]);
        right.push_row(vec![term("2"), term("3")]);
        left.concat(right);
        assert_eq!(left.columns(), &["a".to_owned(), "b".to_owned()]);
        assert_eq!(left.rows()[0], vec![term("1"), None]);
        assert_eq!(left.rows()[1], vec![term("3"), term("2")]);
    }
}
