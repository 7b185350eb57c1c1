//! Validation errors for proposed lane values.

use serde::Serialize;

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Dotted path of the offending field (e.g. `rules.2.match.textRegex`).
    pub field: String,
    pub message: String,
}

/// A proposed config, ruleset or theme failed schema validation.
///
/// Carries every issue found, not just the first, so the control surface can
/// highlight all offending fields at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("invalid {lane}: {}", summarize(.issues))]
pub struct ValidationError {
    pub lane: &'static str,
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Wraps a decoding failure of a proposed value (wrong type, unknown field).
    pub fn malformed(lane: &'static str, err: &serde_json::Error) -> Self {
        Self {
            lane,
            issues: vec![FieldIssue {
                field: lane.to_string(),
                message: err.to_string(),
            }],
        }
    }
}

fn summarize(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates issues while a validator walks a value.
#[derive(Debug, Default)]
pub(crate) struct Issues(Vec<FieldIssue>);

impl Issues {
    pub(crate) fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    pub(crate) fn finish(self, lane: &'static str) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                lane,
                issues: self.0,
            })
        }
    }
}
