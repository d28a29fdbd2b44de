//! Monetary helpers: lenient input coercion, cent rounding and BRL display.
//!
//! Form fields arrive as whatever the operator typed. Anything that cannot
//! be read as a finite number becomes zero so the closing form stays usable
//! while a value is half-typed.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Coerce a JSON value to a monetary amount. Numbers pass through, strings
/// are read up to the first character that cannot continue a decimal
/// literal ("12.5abc" -> 12.5), everything else is 0.
pub fn parse_amount(v: &Value) -> f64 {
    let n = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_float_prefix(s).unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Like [`parse_amount`], but negative amounts become 0 (consumption).
pub fn parse_non_negative_amount(v: &Value) -> f64 {
    parse_amount(v).max(0.0)
}

/// Coerce a JSON value to a non-negative whole count (deliveries).
/// Fractions are truncated, negatives and garbage become 0.
pub fn parse_count(v: &Value) -> u32 {
    let n = match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i as f64
            } else {
                n.as_f64().unwrap_or(0.0).trunc()
            }
        }
        Value::String(s) => parse_int_prefix(s).map(|i| i as f64).unwrap_or(0.0),
        _ => 0.0,
    };
    if !n.is_finite() || n <= 0.0 {
        0
    } else if n >= u32::MAX as f64 {
        u32::MAX
    } else {
        n as u32
    }
}

/// Longest decimal literal at the start of `s` (after leading whitespace).
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    // Optional exponent, only consumed when complete ("1e" stays "1").
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok()
}

/// Longest integer literal at the start of `s` (after leading whitespace).
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    // Saturate instead of failing on absurdly long inputs.
    match s[..end].parse::<i64>() {
        Ok(i) => Some(i),
        Err(_) if s.starts_with('-') => Some(i64::MIN),
        Err(_) => Some(i64::MAX),
    }
}

// ---------------------------------------------------------------------------
// Serde adapters for persisted documents
// ---------------------------------------------------------------------------

/// Deserialize a monetary field leniently (missing/null/garbage -> 0).
pub fn de_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(parse_amount(&v))
}

/// Deserialize an amount that may not go below zero.
pub fn de_non_negative_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(parse_non_negative_amount(&v))
}

/// Deserialize a count field leniently (missing/null/garbage/negative -> 0).
pub fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(parse_count(&v))
}

/// Deserialize an optional monetary field: absent, null or non-numeric
/// values become `None` so callers can apply their own default.
pub fn de_opt_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(amount_if_numeric(&v))
}

/// `Some(amount)` when the value holds a readable finite number.
pub fn amount_if_numeric(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

// ---------------------------------------------------------------------------
// Rounding and display
// ---------------------------------------------------------------------------

/// Round to two fraction digits (half away from zero).
pub fn round_cents(v: f64) -> f64 {
    let r = (v * 100.0).round() / 100.0;
    // Avoid persisting "-0.0".
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Format as Brazilian reais: `R$ 1.234,56`, `-R$ 5,00`.
pub fn format_brl(v: f64) -> String {
    let v = if v.is_finite() { v } else { 0.0 };
    let cents = (v.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if v < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}R$ {grouped},{frac:02}")
}
