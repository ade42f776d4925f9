use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity the model assigns to a single violation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    /// Read a severity the way the model tends to write it. Anything that
    /// is not low/medium/high falls back to medium.
    pub fn parse_lenient(raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// A single rule breach reported by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Violation {
    /// Short name of the broken rule
    pub rule: String,
    /// Architectural principle behind the rule (e.g. "Onion/DI")
    pub principle: String,
    pub severity: Severity,
    /// 1-based line numbers within the reviewed code
    pub lines: Vec<u32>,
    pub evidence: String,
    pub suggestion: String,
}

/// Structured verdict for one review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    /// `Some(true)` violations found, `Some(false)` clean, `None` the
    /// verdict could not be determined. `None` is never "clean".
    pub violation_found: Option<bool>,
    pub explanation: String,
    pub violations: Vec<Violation>,
    /// Free-form metadata echoed by the model (layer, prompt version)
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl AnalysisResult {
    /// Result standing in for a response that could not be read.
    pub fn inconclusive(explanation: impl Into<String>) -> Self {
        Self {
            violation_found: None,
            explanation: explanation.into(),
            violations: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        self.violation_found.is_none()
    }
}
