//! Table assertions
//!
//! Expected tables are written as indented multi-line literals, so the
//! expected side is trimmed before comparing. The rendered side is compared
//! as is.

use crate::table::TableFormatter;
use lockscope_core::{HarnessError, HarnessResult, RowSet};

impl TableFormatter {
    /// Compare `actual` rendered with this formatter against `expected`
    pub fn compare(&self, expected: &str, actual: &RowSet) -> HarnessResult<()> {
        compare_text(expected, &self.format(actual))
    }

    /// Panic with both tables if `actual` does not render as `expected`
    #[track_caller]
    pub fn assert_eq(&self, expected: &str, actual: &RowSet) {
        if let Err(e) = self.compare(expected, actual) {
            panic!("{}", e);
        }
    }
}

/// Compare `actual` rendered with the default formatter against `expected`
///
/// ```
/// use lockscope_core::RowSet;
/// use lockscope_format::compare;
///
/// let rs = RowSet::from_rows(&["id"], vec![vec![1]]);
/// let expected = "
///     +------+
///     |   id |
///     |------|
///     |    1 |
///     +------+";
/// assert!(compare(expected, &rs).is_err()); // indentation inside the literal counts
///
/// let expected = "
/// +------+
/// |   id |
/// |------|
/// |    1 |
/// +------+
/// ";
/// assert!(compare(expected, &rs).is_ok());
/// ```
pub fn compare(expected: &str, actual: &RowSet) -> HarnessResult<()> {
    TableFormatter::default().compare(expected, actual)
}

/// Compare an already rendered table against `expected`
pub fn compare_text(expected: &str, actual: &str) -> HarnessResult<()> {
    let expected = expected.trim();
    if expected == actual {
        Ok(())
    } else {
        Err(HarnessError::AssertionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Panic with both tables if `actual` does not render as `expected`
#[track_caller]
pub fn assert_table_eq(expected: &str, actual: &RowSet) {
    TableFormatter::default().assert_eq(expected, actual)
}
