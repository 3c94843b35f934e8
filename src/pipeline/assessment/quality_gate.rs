//! Combines rejection, OCR and confidence signals into a single gradability status.
//!
//! Single pass. Terminal rules return immediately; the uncertain rules
//! collect every reason that applies.

use super::confidence::{confidence_coverage, thresholds};
use super::types::{ExtractedLine, Finding, FindingType, GateStatus, QualityGate};

/// Everything the gate looks at.
pub struct GateInputs<'a> {
    /// Per-page input rejections, already prefixed with the page number.
    pub rejections: &'a [String],
    /// Upstream OCR errors, one per failed page.
    pub ocr_failures: &'a [String],
    pub lines: &'a [ExtractedLine],
    pub required_line_count: usize,
    pub uncertain_count: usize,
    pub findings: &'a [Finding],
}

pub fn evaluate_gate(inputs: &GateInputs<'_>) -> QualityGate {
    let required = inputs.required_line_count;

    if !inputs.rejections.is_empty() {
        return ungradable(inputs.rejections.to_vec(), 0.0);
    }

    if !inputs.ocr_failures.is_empty() {
        let reasons = inputs
            .ocr_failures
            .iter()
            .map(|e| format!("Text recognition failed: {e}"))
            .collect();
        return ungradable(reasons, 0.0);
    }

    if required == 0 {
        return ungradable(vec!["Assignment requires no lines".into()], 0.0);
    }

    let extracted = inputs.lines.len();
    if (extracted as f32) < required as f32 * thresholds::MIN_LINE_RATIO {
        let coverage = (extracted as f32 / required as f32).min(1.0);
        return ungradable(
            vec![format!(
                "Only {extracted} of {required} required lines were detected"
            )],
            coverage,
        );
    }

    let coverage = confidence_coverage(inputs.lines, required).min(1.0);
    if coverage < thresholds::MIN_COVERAGE {
        return ungradable(
            vec![format!(
                "Only {:.0}% of required lines could be read with confidence (minimum {:.0}%)",
                coverage * 100.0,
                thresholds::MIN_COVERAGE * 100.0
            )],
            coverage,
        );
    }

    let mut reasons = Vec::new();
    if inputs.uncertain_count as f32 > required as f32 * thresholds::PERVASIVE_UNCERTAINTY_RATIO {
        reasons.push(format!(
            "{} of {} lines are uncertain; grading may be unreliable for this handwriting",
            inputs.uncertain_count, required
        ));
    } else {
        if inputs.uncertain_count > 0 {
            reasons.push(format!(
                "{} line(s) could not be verified with confidence",
                inputs.uncertain_count
            ));
        }
        let uncertain_findings = inputs
            .findings
            .iter()
            .filter(|f| f.finding_type == FindingType::ContentUncertain)
            .count();
        if uncertain_findings > 0 {
            reasons.push(format!("{uncertain_findings} uncertain content finding(s)"));
        }
    }

    let status = if reasons.is_empty() {
        GateStatus::Ok
    } else {
        GateStatus::Uncertain
    };
    QualityGate {
        status,
        reasons,
        confidence_coverage: coverage,
    }
}

fn ungradable(reasons: Vec<String>, coverage: f32) -> QualityGate {
    QualityGate {
        status: GateStatus::Ungradable,
        reasons,
        confidence_coverage: coverage,
    }
}
