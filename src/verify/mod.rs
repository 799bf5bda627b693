//! Final-state verification against declared expectations.
//!
//! `verify` never fails: it always returns a report, and callers decide whether
//! a mismatch is fatal (`VerificationReport::ensure_passed`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::{HarnessError, Result};

/// One expected field that the observed state did not satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub field: String,
    pub expected: Value,
    /// `None` when the field was absent from the observed state.
    pub observed: Option<Value>,
}

/// Pass/fail outcome for one expectation mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// What was verified (usually the template that produced the state).
    pub label: String,
    /// Number of expected fields checked.
    pub checked: usize,
    pub mismatches: Vec<FieldMismatch>,
}

impl VerificationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Names of the mismatched fields, in expectation order.
    #[must_use]
    pub fn failed_fields(&self) -> Vec<String> {
        self.mismatches.iter().map(|m| m.field.clone()).collect()
    }

    /// Turn a failed report into `VerificationFailed`.
    pub fn ensure_passed(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(HarnessError::VerificationFailed {
                report: Box::new(self),
            })
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.label.is_empty() {
            "state"
        } else {
            self.label.as_str()
        };
        if self.passed() {
            return write!(f, "{label}: {} field(s) verified", self.checked);
        }
        write!(
            f,
            "{label}: {} of {} field(s) mismatched",
            self.mismatches.len(),
            self.checked
        )?;
        for m in &self.mismatches {
            match &m.observed {
                Some(observed) => write!(
                    f,
                    "\n  {}: expected {}, observed {observed}",
                    m.field, m.expected
                )?,
                None => write!(f, "\n  {}: expected {}, missing", m.field, m.expected)?,
            }
        }
        Ok(())
    }
}

/// Compare every expected field against the observed state.
///
/// Extra observed fields are ignored. Numbers compare by value, so `30` and
/// `30.0` match; arrays and objects compare element by element.
#[must_use]
pub fn verify(actual: &Map<String, Value>, expected: &Map<String, Value>) -> VerificationReport {
    let mismatches = expected
        .iter()
        .filter_map(|(field, want)| match actual.get(field) {
            Some(got) if values_match(got, want) => None,
            observed => Some(FieldMismatch {
                field: field.clone(),
                expected: want.clone(),
                observed: observed.cloned(),
            }),
        })
        .collect();
    VerificationReport {
        label: String::new(),
        checked: expected.len(),
        mismatches,
    }
}

/// Structural equality with numeric normalization.
#[must_use]
pub fn values_match(got: &Value, want: &Value) -> bool {
    match (got, want) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                return x == y;
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_match(x, y)))
        }
        _ => got == want,
    }
}
