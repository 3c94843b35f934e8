//! Fuzzy comparison of observed line text against the expected text.
//!
//! Only high-confidence OCR can support a mismatch. Anything between a clear
//! match and a clear mismatch is reported as uncertain.

use tracing::debug;

use super::confidence::thresholds;
use super::types::{BoundingBox, ExtractedLine, Finding, FindingType};

/// Findings for the content check plus the number of lines marked uncertain.
#[derive(Debug, Clone, Default)]
pub struct ContentVerification {
    pub findings: Vec<Finding>,
    pub uncertain_count: usize,
}

/// Lowercase, trim, collapse whitespace, fold common OCR digit confusions
/// (0 to o, 1 to l) and straighten quotes.
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' => 'l',
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{2032}' | '`' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => '"',
            other => other,
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Classic edit distance over chars (unit cost insert, delete, substitute).
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1] computed on normalized text.
pub fn similarity(a: &str, b: &str) -> f32 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    1.0 - levenshtein(&a, &b) as f32 / longest as f32
}

/// Compare each expected line with the extracted line at the same global index.
pub fn verify_content(lines: &[ExtractedLine], expected: &[String]) -> ContentVerification {
    let mut result = ContentVerification::default();

    for (i, expected_text) in expected.iter().enumerate() {
        let Some(line) = lines.get(i) else {
            // Attribute to the last page seen so the page index stays valid.
            let page_index = lines.last().map_or(0, |l| l.page_index);
            result.findings.push(
                Finding::new(
                    FindingType::ContentMismatch,
                    page_index,
                    BoundingBox::default(),
                    thresholds::MISSING_LINE_CONFIDENCE,
                    format!("Line {} missing.", i + 1),
                )
                .with_line(i)
                .with_expected(expected_text.as_str()),
            );
            continue;
        };

        if line.confidence < thresholds::UNCERTAIN_FLOOR {
            result.uncertain_count += 1;
            result.findings.push(uncertain(
                line,
                expected_text,
                format!(
                    "Line {} could not be read reliably (OCR confidence {:.2}).",
                    i + 1,
                    line.confidence
                ),
            ));
            continue;
        }

        if line.confidence < thresholds::HIGH_CONFIDENCE_FLOOR {
            result.uncertain_count += 1;
            result.findings.push(uncertain(
                line,
                expected_text,
                format!(
                    "Line {} was read with moderate confidence ({:.2}); not verified.",
                    i + 1,
                    line.confidence
                ),
            ));
            continue;
        }

        let sim = similarity(&line.text, expected_text);
        if sim >= thresholds::MATCH_SIMILARITY {
            continue;
        }

        let finding_confidence = line.confidence * (1.0 - sim);
        if finding_confidence >= thresholds::MISMATCH_FINDING_CONFIDENCE
            && sim < thresholds::MISMATCH_MAX_SIMILARITY
        {
            result.findings.push(
                Finding::new(
                    FindingType::ContentMismatch,
                    line.page_index,
                    line.bbox,
                    finding_confidence,
                    format!("Line {} does not match the expected text.", i + 1),
                )
                .with_line(line.line_index)
                .with_expected(expected_text.as_str())
                .with_observed(line.text.as_str()),
            );
        } else {
            result.uncertain_count += 1;
            result.findings.push(uncertain(
                line,
                expected_text,
                format!(
                    "Line {} partially matches the expected text (similarity {:.2}).",
                    i + 1,
                    sim
                ),
            ));
        }
    }

    debug!(
        expected = expected.len(),
        extracted = lines.len(),
        findings = result.findings.len(),
        uncertain = result.uncertain_count,
        "Content verified"
    );
    result
}

fn uncertain(line: &ExtractedLine, expected: &str, message: String) -> Finding {
    Finding::new(
        FindingType::ContentUncertain,
        line.page_index,
        line.bbox,
        line.confidence,
        message,
    )
    .with_line(line.line_index)
    .with_expected(expected)
    .with_observed(line.text.as_str())
}
