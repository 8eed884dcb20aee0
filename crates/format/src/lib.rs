//! Result table rendering and assertions for lockscope
//!
//! Row sets are rendered as psql-style grids so a test can pin the exact
//! output of a lock-introspection query in a string literal:
//!
//! ```
//! use lockscope_core::RowSet;
//! use lockscope_format::format_table;
//!
//! let rs = RowSet::from_rows(&["id", "user_type"], vec![vec![1, 1]]);
//! assert_eq!(
//!     format_table(&rs),
//!     "+------+-------------+\n\
//!      |   id |   user_type |\n\
//!      |------+-------------|\n\
//!      |    1 |           1 |\n\
//!      +------+-------------+"
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compare;
pub mod number;
pub mod table;

pub use compare::{assert_table_eq, compare, compare_text};
pub use table::{format_table, Align, TableFormatter};
