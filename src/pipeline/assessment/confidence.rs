use super::types::{CharacterObservation, ExtractedLine};

/// Grading thresholds. These drive accusations against a student's work,
/// so they are constants rather than configuration.
pub mod thresholds {
    /// Below this: OCR output is not trusted for verification ("uncertain floor").
    pub const UNCERTAIN_FLOOR: f32 = 0.70;

    /// At or above this: OCR output may support a mismatch finding.
    pub const HIGH_CONFIDENCE_FLOOR: f32 = 0.85;

    /// Similarity at or above this is an accepted match.
    pub const MATCH_SIMILARITY: f32 = 0.90;

    /// A mismatch needs at least this finding confidence...
    pub const MISMATCH_FINDING_CONFIDENCE: f32 = 0.92;

    /// ...and similarity below this.
    pub const MISMATCH_MAX_SIMILARITY: f32 = 0.70;

    /// Per-character floor for handwriting mechanics checks.
    pub const HANDWRITING_CHAR_FLOOR: f32 = 0.95;

    /// Handwriting finding confidence = character confidence x this.
    pub const HANDWRITING_CONFIDENCE_SCALE: f32 = 0.95;

    /// Confidence of a "line missing" finding.
    pub const MISSING_LINE_CONFIDENCE: f32 = 0.99;

    /// Gate: fewer extracted lines than required x this is ungradable.
    pub const MIN_LINE_RATIO: f32 = 0.5;

    /// Gate: confidence coverage below this is ungradable.
    pub const MIN_COVERAGE: f32 = 0.60;

    /// Gate: more uncertain lines than required x this flags pervasive uncertainty.
    pub const PERVASIVE_UNCERTAINTY_RATIO: f32 = 0.4;
}

/// Arithmetic mean of character confidences, 0 for an empty slice.
pub fn mean_confidence(characters: &[CharacterObservation]) -> f32 {
    if characters.is_empty() {
        return 0.0;
    }
    let sum: f32 = characters.iter().map(|c| c.confidence).sum();
    sum / characters.len() as f32
}

/// Fraction of required lines whose OCR confidence clears the uncertain floor.
pub fn confidence_coverage(lines: &[ExtractedLine], required_line_count: usize) -> f32 {
    if required_line_count == 0 {
        return 0.0;
    }
    let verifiable = lines
        .iter()
        .filter(|l| l.confidence >= thresholds::UNCERTAIN_FLOOR)
        .count();
    verifiable as f32 / required_line_count as f32
}
