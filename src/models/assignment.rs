use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::assessment::AssessmentError;

/// What a submission is graded against. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    pub required_line_count: usize,
    /// Expected text, one entry per required line.
    pub expected_lines: Vec<String>,
    #[serde(default)]
    pub style: AssignmentStyle,
}

/// Presentation metadata carried through to the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper: Option<String>,
}

impl AssignmentSpec {
    pub fn new(expected_lines: Vec<String>) -> Self {
        Self {
            assignment_id: None,
            required_line_count: expected_lines.len(),
            expected_lines,
            style: AssignmentStyle::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AssessmentError> {
        if self.required_line_count == 0 {
            return Err(AssessmentError::InvalidSpec(
                "required_line_count must be at least 1".into(),
            ));
        }
        if self.expected_lines.len() != self.required_line_count {
            return Err(AssessmentError::InvalidSpec(format!(
                "{} expected lines given for {} required lines",
                self.expected_lines.len(),
                self.required_line_count
            )));
        }
        if let Some(i) = self.expected_lines.iter().position(|l| l.trim().is_empty()) {
            return Err(AssessmentError::InvalidSpec(format!(
                "Expected line {} is empty",
                i + 1
            )));
        }
        Ok(())
    }

    /// Parse and validate.
    pub fn from_json(json: &str) -> Result<Self, AssessmentError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: &Path) -> Result<Self, AssessmentError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
