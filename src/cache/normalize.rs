//! Parameter normalization for cache keys
//!
//! Two parameter bags describing the same request must normalize to the
//! same value: keys are sorted, nulls dropped, scalar lists ordered and
//! equivalent scalars (`true`, `1`, `"1"`) collapsed to one string form.

use serde_json::{Map, Value};

/// Normalize a parameter bag. `null` normalizes to `{}`.
pub fn normalize(params: &Value) -> Value {
    match params {
        Value::Null => Value::Object(Map::new()),
        other => normalize_value(other).unwrap_or_else(|| Value::Object(Map::new())),
    }
}

/// Normalize a value, returning `None` for values that should be dropped.
fn normalize_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            // Sort explicitly: Map keeps insertion order under `preserve_order`
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut out = Map::new();
            for (k, v) in entries {
                if let Some(v) = normalize_value(v) {
                    out.insert(k.clone(), v);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items.iter().filter_map(normalize_value).collect();
            if out.iter().all(is_scalar) {
                out.sort_by(|a, b| scalar_str(a).cmp(scalar_str(b)));
            }
            Some(Value::Array(out))
        }
        scalar => Some(Value::String(canonical_scalar(scalar))),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar_str(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// Canonical string form of a scalar.
fn canonical_scalar(value: &Value) -> String {
    match value {
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                // f64 Display is the shortest exact form and never uses an exponent
                n.as_f64()
                    .map(|f| canonical_string(&f.to_string()))
                    .unwrap_or_else(|| n.to_string())
            }
        }
        Value::String(s) => canonical_string(s),
        _ => String::new(),
    }
}

fn canonical_string(s: &str) -> String {
    if s.eq_ignore_ascii_case("true") {
        return "1".to_string();
    }
    if s.eq_ignore_ascii_case("false") {
        return "0".to_string();
    }
    if is_plain_number(s) {
        return canonical_decimal(s);
    }
    s.to_string()
}

/// Exact textual canonical form of a plain decimal: trailing fraction
/// zeros dropped, `-0` folded into `0`. Digits are never rounded.
fn canonical_decimal(s: &str) -> String {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let trimmed = match digits.split_once('.') {
        Some((int_part, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                int_part.to_string()
            } else {
                format!("{}.{}", int_part, frac)
            }
        }
        None => digits.to_string(),
    };
    if negative && trimmed != "0" {
        format!("-{}", trimmed)
    } else {
        trimmed
    }
}

/// Matches `-?(0|[1-9][0-9]*)(\.[0-9]+)?`. Leading zeros ("007") and
/// exponents stay strings, since they are usually identifiers.
fn is_plain_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return false;
    }
    match frac_part {
        Some(f) => !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    }
}
