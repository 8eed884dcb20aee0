//! Result row sets
//!
//! A `RowSet` is what one statement returned: the column names in server
//! order and the rows, each a positional list of values. Row sets are never
//! mutated after a driver builds them; tests only read, compare and format them.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// One result row, positional
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Create a row from values
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    /// Value at a column ordinal
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the row has no cells
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the cells
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        &self.0[idx]
    }
}

impl<V: Into<Value>> FromIterator<V> for Row {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Row(iter.into_iter().map(Into::into).collect())
    }
}

/// Ordered rows returned by a query, with their column names
///
/// Column names are kept exactly as the server reported them, including
/// case and duplicates. An empty name means the driver had none; formatters
/// fall back to the column ordinal for those.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RowSet {
    /// Create a row set from column names and rows
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// A row set with no columns and no rows (DDL, `SET`, `BEGIN`, ...)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a row set from string column names and rows of convertible values
    ///
    /// ```
    /// use lockscope_core::{RowSet, Value};
    ///
    /// let rs = RowSet::from_rows(&["id", "user_type"], vec![vec![1, 1], vec![2, 1]]);
    /// assert_eq!(rs.value(1, "id"), Some(&Value::Int(2)));
    /// ```
    pub fn from_rows<V, R>(columns: &[&str], rows: R) -> Self
    where
        V: Into<Value>,
        R: IntoIterator<Item = Vec<V>>,
    {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows.into_iter().map(|r| r.into_iter().collect()).collect(),
        }
    }

    /// Column names in server order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in server order
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the statement returned no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ordinal of the first column with this exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (row, column name)
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// First cell of the first row, for single-value queries like `SELECT pg_backend_pid()`
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first()?.get(0)
    }

    /// Every cell of one column, top to bottom
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(idx) => self.rows.iter().filter_map(|r| r.get(idx)).collect(),
            None => Vec::new(),
        }
    }

    /// Iterate rows
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Rows as plain value vectors, handy for `assert_eq!` against literals
    pub fn to_vecs(&self) -> Vec<Vec<Value>> {
        self.rows.iter().map(|r| r.0.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
