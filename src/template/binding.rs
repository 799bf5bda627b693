//! Values bound to template placeholders.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::fixtures::arr_str;

/// Placeholder name → value.
pub type Bindings = BTreeMap<String, BindingValue>;

/// A value substituted into a script.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    /// Inserted verbatim.
    Text(String),
    Integer(i128),
    /// Rendered as a compact array literal, e.g. `[5,12,13]`.
    Sequence(Vec<u64>),
    /// Rendered as compact JSON.
    Json(Value),
}

impl BindingValue {
    /// Parse a `--bind key=value` argument value: integers, then JSON arrays of
    /// non-negative integers, then any other JSON, else plain text.
    #[must_use]
    pub fn parse_cli(raw: &str) -> Self {
        if let Ok(n) = raw.parse::<i128>() {
            return Self::Integer(n);
        }
        if let Ok(seq) = serde_json::from_str::<Vec<u64>>(raw) {
            return Self::Sequence(seq);
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ (Value::Array(_) | Value::Object(_))) => Self::Json(value),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for BindingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Sequence(values) => f.write_str(&arr_str(values)),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for BindingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for BindingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for BindingValue {
    fn from(value: u64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<i64> for BindingValue {
    fn from(value: i64) -> Self {
        Self::Integer(i128::from(value))
    }
}

impl From<Vec<u64>> for BindingValue {
    fn from(value: Vec<u64>) -> Self {
        Self::Sequence(value)
    }
}

impl From<Value> for BindingValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
