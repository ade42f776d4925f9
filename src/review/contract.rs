//! Output contract for model responses.
//!
//! The same checks run in two modes. [`validate_strict`] / [`parse_strict`]
//! return a [`ContractViolation`] so the caller can fail (and retry) the
//! analysis step. [`parse_lenient`] never fails: a violation becomes an
//! inconclusive [`AnalysisResult`] with `violation_found == None`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::report::types::{AnalysisResult, Severity, Violation};

pub const REQUIRED_FIELDS: [&str; 2] = ["violationFound", "explanation"];

pub const NOT_JSON_EXPLANATION: &str = "Model response was not valid JSON.";
pub const MISSING_FIELDS_EXPLANATION: &str =
    "Model response missing required fields (violationFound, explanation).";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("model response was empty")]
    Empty,

    #[error("model response was not valid JSON: {0}")]
    NotJson(String),

    #[error("model response is valid JSON but not an object")]
    NotObject,

    #[error("model response missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("model response field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl ContractViolation {
    /// Explanation shown to reviewers when the lenient parser gives up.
    pub fn explanation(&self) -> &'static str {
        match self {
            ContractViolation::Empty | ContractViolation::NotJson(_) => NOT_JSON_EXPLANATION,
            ContractViolation::NotObject
            | ContractViolation::MissingFields(_)
            | ContractViolation::WrongType { .. } => MISSING_FIELDS_EXPLANATION,
        }
    }
}

/// Check `raw` against the output contract without building a result.
pub fn validate_strict(raw: &str) -> Result<(), ContractViolation> {
    check(raw).map(|_| ())
}

/// Check `raw` and read it into an [`AnalysisResult`].
pub fn parse_strict(raw: &str) -> Result<AnalysisResult, ContractViolation> {
    let object = check(raw)?;
    Ok(read_result(&object))
}

/// Read `raw` into an [`AnalysisResult`], turning any contract violation
/// into an inconclusive result.
pub fn parse_lenient(raw: &str) -> AnalysisResult {
    match parse_strict(raw) {
        Ok(result) => result,
        Err(violation) => {
            warn!(error = %violation, response_chars = raw.len(), "could not read model response");
            AnalysisResult::inconclusive(violation.explanation())
        }
    }
}

fn check(raw: &str) -> Result<Map<String, Value>, ContractViolation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ContractViolation::Empty);
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| ContractViolation::NotJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ContractViolation::NotObject);
    };

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .into_iter()
        .filter(|name| field(&object, name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ContractViolation::MissingFields(missing));
    }

    if !matches!(field(&object, "violationFound"), Some(Value::Bool(_))) {
        return Err(ContractViolation::WrongType {
            field: "violationFound",
            expected: "a boolean",
        });
    }
    if !matches!(field(&object, "explanation"), Some(Value::String(_) | Value::Null)) {
        return Err(ContractViolation::WrongType {
            field: "explanation",
            expected: "a string",
        });
    }

    Ok(object)
}

/// Field lookup: exact name first, then case-insensitive.
fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn text(object: &Map<String, Value>, name: &str) -> String {
    match field(object, name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// Only called on objects that passed `check`.
fn read_result(object: &Map<String, Value>) -> AnalysisResult {
    let violations = match field(object, "violations") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| read_violation(index, item))
            .collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            warn!(kind = json_kind(other), "ignoring non-array violations field");
            Vec::new()
        }
    };

    let meta = match field(object, "meta") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
        _ => BTreeMap::new(),
    };

    AnalysisResult {
        violation_found: field(object, "violationFound").and_then(Value::as_bool),
        explanation: text(object, "explanation"),
        violations,
        meta,
    }
}

fn read_violation(index: usize, item: &Value) -> Option<Violation> {
    let Value::Object(object) = item else {
        warn!(index, kind = json_kind(item), "dropping violation entry that is not an object");
        return None;
    };

    let lines = match field(object, "lines") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|n| u32::try_from(n).ok())
            .collect(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).into_iter().collect(),
        _ => Vec::new(),
    };

    Some(Violation {
        rule: text(object, "rule"),
        principle: text(object, "principle"),
        severity: match field(object, "severity") {
            Some(Value::String(s)) => Severity::parse_lenient(s),
            _ => Severity::default(),
        },
        lines,
        evidence: text(object, "evidence"),
        suggestion: text(object, "suggestion"),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
