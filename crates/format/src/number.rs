//! Number recognition and rendering for table cells
//!
//! Two float renderings are needed:
//! - `general`: six significant digits, trailing zeros dropped, exponent
//!   outside `1e-4 <= |x| < 1e6`. Used for cells of float columns.
//! - `shortest`: shortest round-trip digits with a `.0` on integral values,
//!   exponent outside `1e-4 <= |x| < 1e16`. Used for floats that land in
//!   text columns.

/// Significant digits of the `general` rendering
const GENERAL_PRECISION: i32 = 6;

/// True if `s` reads as an integer: optional sign, then ASCII digits
pub fn is_int_text(s: &str) -> bool {
    let t = s.trim();
    let digits = t.strip_prefix(['+', '-']).unwrap_or(t);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// True if `s` reads as a number
///
/// Infinity and NaN only count when spelled `inf`, `-inf` or `nan` (any case).
pub fn is_number_text(s: &str) -> bool {
    let t = s.trim();
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() => true,
        Ok(_) => matches!(t.to_ascii_lowercase().as_str(), "inf" | "-inf" | "nan"),
        Err(_) => false,
    }
}

/// Characters after the decimal point (or exponent marker) of a numeric cell
///
/// Returns -1 for integers, non-numbers, and numbers with neither.
pub fn after_point(s: &str) -> isize {
    if !is_number_text(s) || is_int_text(s) {
        return -1;
    }
    let pos = s.rfind('.').or_else(|| s.to_ascii_lowercase().rfind('e'));
    match pos {
        Some(p) => (s.chars().count() - s[..p].chars().count()) as isize - 1,
        None => -1,
    }
}

/// Six-significant-digit rendering (`%g`)
///
/// ```
/// use lockscope_format::number::general;
///
/// assert_eq!(general(3.14159265), "3.14159");
/// assert_eq!(general(1234567.0), "1.23457e+06");
/// assert_eq!(general(10.0), "10");
/// ```
pub fn general(x: f64) -> String {
    if let Some(s) = non_finite(x) {
        return s;
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.*e}", (GENERAL_PRECISION - 1) as usize, x);
    let (mantissa, exp) = split_exponent(&sci);
    if exp < -4 || exp >= GENERAL_PRECISION {
        format!("{}{}", trim_fraction(mantissa), exponent_suffix(exp))
    } else {
        let decimals = (GENERAL_PRECISION - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", decimals, x)).to_string()
    }
}

/// Shortest round-trip rendering with a `.0` on integral values
///
/// ```
/// use lockscope_format::number::shortest;
///
/// assert_eq!(shortest(1.0), "1.0");
/// assert_eq!(shortest(0.1 + 0.2), "0.30000000000000004");
/// assert_eq!(shortest(1e20), "1e+20");
/// ```
pub fn shortest(x: f64) -> String {
    if let Some(s) = non_finite(x) {
        return s;
    }
    let sci = format!("{:e}", x);
    let (mantissa, exp) = split_exponent(&sci);
    if (-4..16).contains(&exp) {
        let fixed = format!("{}", x);
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        format!("{}{}", mantissa, exponent_suffix(exp))
    }
}

fn non_finite(x: f64) -> Option<String> {
    if x.is_nan() {
        Some("nan".to_string())
    } else if x.is_infinite() {
        Some(if x > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        None
    }
}

// Rust's `{:e}` never pads or signs the exponent: "1.5e-7", "1e20"
fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((m, e)) => (m, e.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn exponent_suffix(exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("e{}{:02}", sign, exp.abs())
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
