//! psql-style grid rendering of a RowSet
//!
//! ```text
//! +------+-------------+
//! |   id | user_type   |
//! |------+-------------|
//! |    1 | admin       |
//! +------+-------------+
//! ```
//!
//! Layout rules:
//! - column width is the widest aligned cell, but never less than the header
//!   plus two
//! - each column gets a type from its non-null cells: null < bool < int <
//!   float < bytes < text, the most generic one wins
//! - int and float columns are right-aligned on the decimal point, every
//!   other column uses the formatter's string alignment
//! - headers follow their column's alignment
//! - a cell containing a line break turns the whole table multi-line

use crate::number;
use lockscope_core::{RowSet, Value};
use std::fmt;

static NULL: Value = Value::Null;

/// Alignment of non-numeric columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Align {
    /// Pad on the right
    #[default]
    Left,
    /// Pad on the left
    Right,
}

/// Type of a column, ordered from least to most generic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnType {
    Null,
    Bool,
    Int,
    Float,
    Bytes,
    Text,
}

impl ColumnType {
    fn of(value: &Value) -> ColumnType {
        match value {
            Value::Null => ColumnType::Null,
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) | Value::UInt(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::Bytes(_) => ColumnType::Bytes,
            Value::Text(s) => {
                if s == "True" || s == "False" {
                    ColumnType::Bool
                } else if number::is_int_text(s) {
                    ColumnType::Int
                } else if number::is_number_text(s) {
                    ColumnType::Float
                } else {
                    ColumnType::Text
                }
            }
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float)
    }
}

/// How one column gets padded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnAlign {
    Left,
    Right,
    Decimal,
}

/// Renders row sets as psql-style grids
///
/// The default formatter left-aligns text columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableFormatter {
    str_align: Align,
}

impl TableFormatter {
    /// Formatter with the given string alignment
    pub fn new(str_align: Align) -> Self {
        Self { str_align }
    }

    /// Left-aligned text columns
    pub fn left() -> Self {
        Self::new(Align::Left)
    }

    /// Right-aligned text columns
    pub fn right() -> Self {
        Self::new(Align::Right)
    }

    /// String alignment of this formatter
    pub fn str_align(&self) -> Align {
        self.str_align
    }

    /// Render `rows` as a grid
    ///
    /// A row set without rows renders as the empty string. Blank column
    /// names are replaced by their ordinal position.
    pub fn format(&self, rows: &RowSet) -> String {
        if rows.is_empty() || rows.columns().is_empty() {
            return String::new();
        }

        let headers: Vec<String> = rows
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if name.is_empty() {
                    i.to_string()
                } else {
                    name.clone()
                }
            })
            .collect();
        let ncols = headers.len();

        let mut columns: Vec<Vec<&Value>> = vec![Vec::with_capacity(rows.len()); ncols];
        for row in rows {
            for (i, column) in columns.iter_mut().enumerate() {
                column.push(row.get(i).unwrap_or(&NULL));
            }
        }

        let types: Vec<ColumnType> = columns
            .iter()
            .map(|column| {
                column
                    .iter()
                    .map(|v| ColumnType::of(v))
                    .fold(ColumnType::Bool, Ord::max)
            })
            .collect();

        let cells: Vec<Vec<String>> = columns
            .iter()
            .zip(&types)
            .map(|(column, ty)| column.iter().map(|v| format_cell(v, *ty)).collect())
            .collect();

        let multiline = headers.iter().any(|h| has_line_break(h))
            || cells.iter().flatten().any(|c| has_line_break(c));

        let aligns: Vec<ColumnAlign> = types
            .iter()
            .map(|ty| {
                if ty.is_numeric() {
                    ColumnAlign::Decimal
                } else {
                    match self.str_align {
                        Align::Left => ColumnAlign::Left,
                        Align::Right => ColumnAlign::Right,
                    }
                }
            })
            .collect();

        let mut widths = Vec::with_capacity(ncols);
        let mut aligned = Vec::with_capacity(ncols);
        for ((column, align), header) in cells.into_iter().zip(&aligns).zip(&headers) {
            let min_width = text_width(header, multiline) + 2;
            let (width, padded) = align_column(column, *align, min_width, multiline);
            widths.push(width);
            aligned.push(padded);
        }

        let header_cells: Vec<String> = headers
            .iter()
            .zip(&aligns)
            .zip(&widths)
            .map(|((h, align), width)| align_header(h, *align, *width))
            .collect();

        let mut lines = Vec::with_capacity(rows.len() + 4);
        lines.push(rule('+', '+', '+', &widths));
        push_row(&mut lines, &header_cells, &widths, multiline);
        lines.push(rule('|', '+', '|', &widths));
        for r in 0..rows.len() {
            let row: Vec<String> = aligned.iter().map(|column| column[r].clone()).collect();
            push_row(&mut lines, &row, &widths, multiline);
        }
        lines.push(rule('+', '+', '+', &widths));
        lines.join("\n")
    }
}

/// Render with the default (left-aligned) formatter
pub fn format_table(rows: &RowSet) -> String {
    TableFormatter::default().format(rows)
}

fn format_cell(value: &Value, ty: ColumnType) -> String {
    match (value, ty) {
        (Value::Null, _) => String::new(),
        (_, ColumnType::Float) => match float_of(value) {
            Some(f) => number::general(f),
            None => display(value),
        },
        (Value::Bytes(b), ColumnType::Bytes) if b.is_ascii() => {
            String::from_utf8_lossy(b).into_owned()
        }
        _ => display(value),
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Null | Value::Bytes(_) => None,
    }
}

/// Plain text of a value outside a float column
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => number::shortest(*f),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => bytes_literal(b),
    }
}

/// `b'...'` literal for bytes that are not plain ASCII text
fn bytes_literal(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\'' if quote == '\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote);
    out
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn char_width(s: &str) -> usize {
    s.chars().count()
}

fn text_width(s: &str, multiline: bool) -> usize {
    if multiline {
        s.lines().map(char_width).max().unwrap_or(0)
    } else {
        char_width(s)
    }
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{:>width$}", s, width = width)
}

fn pad_right(s: &str, width: usize) -> String {
    format!("{:<width$}", s, width = width)
}

/// Pad every cell of a column to a common width, returning that width
fn align_column(
    cells: Vec<String>,
    align: ColumnAlign,
    min_width: usize,
    multiline: bool,
) -> (usize, Vec<String>) {
    let cells: Vec<String> = match align {
        ColumnAlign::Left | ColumnAlign::Right => {
            cells.into_iter().map(|c| c.trim().to_string()).collect()
        }
        ColumnAlign::Decimal => {
            let decimals: Vec<isize> = cells.iter().map(|c| number::after_point(c)).collect();
            let max_decimals = decimals.iter().copied().max().unwrap_or(-1);
            cells
                .into_iter()
                .zip(decimals)
                .map(|(c, d)| format!("{}{}", c, " ".repeat((max_decimals - d) as usize)))
                .collect()
        }
    };

    let width = cells
        .iter()
        .map(|c| text_width(c, multiline))
        .max()
        .unwrap_or(0)
        .max(min_width);

    let pad = |s: &str| match align {
        ColumnAlign::Left => pad_right(s, width),
        ColumnAlign::Right | ColumnAlign::Decimal => pad_left(s, width),
    };
    let padded = cells
        .iter()
        .map(|c| {
            if multiline {
                c.lines().map(pad).collect::<Vec<_>>().join("\n")
            } else {
                pad(c)
            }
        })
        .collect();
    (width, padded)
}

fn align_header(header: &str, align: ColumnAlign, width: usize) -> String {
    let pad = |s: &str| match align {
        ColumnAlign::Left => pad_right(s, width),
        ColumnAlign::Right | ColumnAlign::Decimal => pad_left(s, width),
    };
    if has_line_break(header) {
        header.lines().map(pad).collect::<Vec<_>>().join("\n")
    } else {
        pad(header)
    }
}

fn rule(begin: char, sep: char, end: char, widths: &[usize]) -> String {
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    format!("{}{}{}", begin, dashes.join(&sep.to_string()), end)
}

fn push_row(lines: &mut Vec<String>, cells: &[String], widths: &[usize], multiline: bool) {
    if !multiline {
        lines.push(data_line(cells.iter().map(String::as_str)));
        return;
    }

    // A row spans as many lines as its tallest cell; shorter cells are
    // filled with blank lines of their column's width.
    let split: Vec<Vec<&str>> = cells.iter().map(|c| c.lines().collect()).collect();
    let height = split.iter().map(Vec::len).max().unwrap_or(0);
    let blanks: Vec<String> = widths.iter().map(|w| " ".repeat(*w)).collect();
    for i in 0..height {
        let line = split
            .iter()
            .zip(&blanks)
            .map(|(cell, blank)| cell.get(i).copied().unwrap_or(blank.as_str()));
        lines.push(data_line(line));
    }
}

fn data_line<'a>(cells: impl Iterator<Item = &'a str>) -> String {
    let padded: Vec<String> = cells.map(|c| format!(" {} ", c)).collect();
    format!("|{}|", padded.join("|"))
}

impl fmt::Display for Align {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Align::Left => f.write_str("left"),
            Align::Right => f.write_str("right"),
        }
    }
}
