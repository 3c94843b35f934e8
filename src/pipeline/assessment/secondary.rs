//! Optional second opinion on uncertain lines from a vision-based verifier.
//!
//! Only a high-tier verdict changes anything. A confirmed match drops the
//! uncertain finding; a confirmed non-match replaces it with a mismatch.
//! Findings are filtered or replaced, never edited.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{ExtractedLine, Finding, FindingType, PageRaster};
use super::AssessmentError;

/// Confidence of a mismatch confirmed by the secondary verifier.
const CONFIRMED_MISMATCH_CONFIDENCE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// What the verifier sees: one cropped line and the text it should contain.
#[derive(Debug, Clone)]
pub struct LineCrop {
    pub png_bytes: Vec<u8>,
    pub expected_text: String,
    pub line_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryVerdict {
    pub transcription: String,
    pub matches: bool,
    pub tier: ConfidenceTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Second-opinion verifier for a single line.
pub trait LineVerifier: Send + Sync {
    fn verify_line(&self, crop: &LineCrop) -> Result<SecondaryVerdict, AssessmentError>;
}

/// Result of folding one verdict into an uncertain finding.
#[derive(Debug, Clone, PartialEq)]
pub enum Folded {
    /// Verdict confirmed the text; drop the finding.
    Resolved,
    /// Verdict confirmed a mismatch; use this finding instead.
    Replaced(Finding),
    Kept,
}

/// Decide what a verdict does to one `content_uncertain` finding.
pub fn fold_verdict(finding: &Finding, verdict: &SecondaryVerdict) -> Folded {
    if finding.finding_type != FindingType::ContentUncertain || verdict.tier != ConfidenceTier::High
    {
        return Folded::Kept;
    }
    if verdict.matches {
        return Folded::Resolved;
    }

    let line_number = finding.line_index.map_or(0, |i| i + 1);
    let mut message = format!("Line {line_number} does not match the expected text (confirmed on review).");
    if let Some(reasoning) = verdict.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
        message = format!("{message} {reasoning}");
    }

    let mut replacement = Finding::new(
        FindingType::ContentMismatch,
        finding.page_index,
        finding.bbox,
        CONFIRMED_MISMATCH_CONFIDENCE,
        message,
    )
    .with_observed(verdict.transcription.as_str());
    if let Some(line) = finding.line_index {
        replacement = replacement.with_line(line);
    }
    if let Some(expected) = &finding.expected_text {
        replacement = replacement.with_expected(expected.as_str());
    }
    Folded::Replaced(replacement)
}

/// Offer every uncertain, line-bound finding to the verifier.
///
/// Returns the new finding list and the adjusted uncertain count. Verifier
/// errors leave the finding in place.
pub fn apply_secondary_verification(
    verifier: &dyn LineVerifier,
    findings: Vec<Finding>,
    uncertain_count: usize,
    lines: &[ExtractedLine],
    pages: &[PageRaster],
) -> (Vec<Finding>, usize) {
    let mut uncertain_count = uncertain_count;
    let mut out = Vec::with_capacity(findings.len());

    for finding in findings {
        let Some(crop) = crop_for(&finding, lines, pages) else {
            out.push(finding);
            continue;
        };

        let verdict = match verifier.verify_line(&crop) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = crop.line_index, error = %e, "Secondary verification failed");
                out.push(finding);
                continue;
            }
        };

        match fold_verdict(&finding, &verdict) {
            Folded::Resolved => {
                uncertain_count = uncertain_count.saturating_sub(1);
                debug!(line = crop.line_index, "Uncertain line confirmed on review");
            }
            Folded::Replaced(replacement) => {
                uncertain_count = uncertain_count.saturating_sub(1);
                debug!(line = crop.line_index, "Uncertain line confirmed as mismatch");
                out.push(replacement);
            }
            Folded::Kept => out.push(finding),
        }
    }

    (out, uncertain_count)
}

fn crop_for(finding: &Finding, lines: &[ExtractedLine], pages: &[PageRaster]) -> Option<LineCrop> {
    if finding.finding_type != FindingType::ContentUncertain {
        return None;
    }
    let line_index = finding.line_index?;
    let line = lines.iter().find(|l| l.line_index == line_index)?;
    let page = pages.iter().find(|p| p.page_index() == line.page_index)?;
    let png_bytes = page.crop_png(&line.bbox).ok()?;
    Some(LineCrop {
        png_bytes,
        expected_text: finding.expected_text.clone().unwrap_or_default(),
        line_index,
    })
}

// ── Mock for testing ──────────────────────────────────────

/// Returns the same verdict for every line.
pub struct MockLineVerifier {
    verdict: Result<SecondaryVerdict, String>,
}

impl MockLineVerifier {
    pub fn new(verdict: SecondaryVerdict) -> Self {
        Self { verdict: Ok(verdict) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            verdict: Err(message.to_string()),
        }
    }
}

impl LineVerifier for MockLineVerifier {
    fn verify_line(&self, _crop: &LineCrop) -> Result<SecondaryVerdict, AssessmentError> {
        self.verdict
            .clone()
            .map_err(AssessmentError::SecondaryVerifier)
    }
}
