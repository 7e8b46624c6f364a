//! `key=value` request parameters

use serde_json::{Map, Value};
use std::str::FromStr;

/// One `-p key=value` argument.
///
/// Values that parse as JSON (numbers, booleans, arrays, objects) keep their
/// type; anything else is a string.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub key: String,
    pub value: Value,
}

impl FromStr for Param {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty parameter name in '{}'", s));
        }

        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Collect parameters into an object; later duplicates win
pub fn params_object(params: &[Param]) -> Value {
    let map: Map<String, Value> = params
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect();
    Value::Object(map)
}
