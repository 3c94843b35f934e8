use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::assessment::{
    BoundingBox, ExtractedLine, Finding, QualityGate, QualityMetrics, ScoreBreakdown,
};

/// Per-page metadata in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub metrics: QualityMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<String>,
    pub contrast_corrected: bool,
    pub detected_line_count: usize,
}

/// An extracted line without character-level detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSummary {
    pub line_index: usize,
    pub page_index: usize,
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl From<&ExtractedLine> for LineSummary {
    fn from(line: &ExtractedLine) -> Self {
        Self {
            line_index: line.line_index,
            page_index: line.page_index,
            text: line.text.clone(),
            confidence: line.confidence,
            bbox: line.bbox,
        }
    }
}

/// The payload handed to downstream consumers (signing, encryption, storage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    pub pages: Vec<PageSummary>,
    pub lines: Vec<LineSummary>,
    pub detected_line_count: usize,
    pub quality_gate: QualityGate,
    pub findings: Vec<Finding>,
    pub scores: ScoreBreakdown,
}

impl AssessmentReport {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
