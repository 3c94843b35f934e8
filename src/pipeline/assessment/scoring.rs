//! Converts findings and gate status into a bounded score.

use super::types::{Finding, FindingType, GateStatus, QualityGate, ScoreBreakdown};

/// Points lost per handwriting finding.
const HANDWRITING_PENALTY: f64 = 5.0;

const COMPLETENESS_WEIGHT: f64 = 0.2;
const CONTENT_WEIGHT: f64 = 0.5;
const HANDWRITING_WEIGHT: f64 = 0.3;

/// Score a graded submission. Arithmetic is `f64` throughout so halves
/// (e.g. 21 of 40 lines = 52.5) round up as the formula requires.
pub fn compute_score(
    gate: &QualityGate,
    extracted_line_count: usize,
    required_line_count: usize,
    findings: &[Finding],
) -> ScoreBreakdown {
    if gate.status == GateStatus::Ungradable || required_line_count == 0 {
        return ScoreBreakdown::zero();
    }
    let required = required_line_count as f64;

    let completeness = (extracted_line_count as f64 / required * 100.0).round().min(100.0);

    let mismatches = findings
        .iter()
        .filter(|f| f.finding_type == FindingType::ContentMismatch)
        .count() as f64;
    let content = (100.0 - mismatches * (100.0 / required)).round().max(0.0);

    let handwriting_issues = findings
        .iter()
        .filter(|f| f.finding_type.is_handwriting())
        .count() as f64;
    let handwriting = (100.0 - handwriting_issues * HANDWRITING_PENALTY).round().max(0.0);

    let overall = (completeness * COMPLETENESS_WEIGHT
        + content * CONTENT_WEIGHT
        + handwriting * HANDWRITING_WEIGHT)
        .round();

    ScoreBreakdown {
        completeness: to_score(completeness),
        content: to_score(content),
        handwriting: to_score(handwriting),
        overall: to_score(overall),
    }
}

fn to_score(value: f64) -> u8 {
    value.clamp(0.0, 100.0) as u8
}
