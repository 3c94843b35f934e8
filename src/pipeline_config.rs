//! Tunable assessment parameters.
//!
//! Image-analysis knobs (ink thresholds, segmentation ratios, OCR endpoint)
//! live here. Grading thresholds do not: they are constants in
//! `pipeline::assessment::confidence::thresholds`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::assessment::line_segment::SegmentConfig;
use crate::pipeline::assessment::mechanics::MechanicsConfig;
use crate::pipeline::assessment::ocr::OcrConfig;
use crate::pipeline::assessment::pdf_renderer::DEFAULT_RENDER_DPI;
use crate::pipeline::assessment::preprocess::PreprocessConfig;
use crate::pipeline::assessment::AssessmentError;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub preprocess: PreprocessConfig,
    pub segment: SegmentConfig,
    pub mechanics: MechanicsConfig,
    pub ocr: OcrConfig,
    /// Offer uncertain lines to the secondary verifier, if one is installed.
    pub secondary_verification: bool,
    /// DPI for rendering PDF pages.
    pub render_dpi: u32,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            segment: SegmentConfig::default(),
            mechanics: MechanicsConfig::default(),
            ocr: OcrConfig::default(),
            secondary_verification: false,
            render_dpi: DEFAULT_RENDER_DPI,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl AssessmentConfig {
    /// Load a (possibly partial) JSON config over the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, AssessmentError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, AssessmentError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AssessmentError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AssessmentError> {
        let p = &self.preprocess;
        check_fraction("preprocess.min_ink_coverage", p.min_ink_coverage)?;
        check_fraction("preprocess.sharpness_floor", p.sharpness_floor)?;
        check_fraction("preprocess.glare_ceiling", p.glare_ceiling)?;
        check_fraction("preprocess.contrast_floor", p.contrast_floor)?;
        if p.blur_normalizer <= 0.0 {
            return Err(AssessmentError::Config(
                "preprocess.blur_normalizer must be positive".into(),
            ));
        }
        if p.max_contrast_gain < 1.0 {
            return Err(AssessmentError::Config(
                "preprocess.max_contrast_gain must be at least 1".into(),
            ));
        }

        let s = &self.segment;
        check_fraction("segment.projection_ratio", s.projection_ratio)?;
        if s.darkness_normalizer <= 0.0 {
            return Err(AssessmentError::Config(
                "segment.darkness_normalizer must be positive".into(),
            ));
        }
        if s.fallback_band_height == 0 {
            return Err(AssessmentError::Config(
                "segment.fallback_band_height must be at least 1".into(),
            ));
        }

        let m = &self.mechanics;
        check_fraction("mechanics.dot_ink_floor", m.dot_ink_floor)?;
        check_fraction("mechanics.cross_ink_floor", m.cross_ink_floor)?;
        check_fraction("mechanics.dot_width_fraction", m.dot_width_fraction)?;
        if m.dot_band.0 >= m.dot_band.1 || m.cross_band.0 >= m.cross_band.1 {
            return Err(AssessmentError::Config(
                "mechanics bands must be (start, end) with start < end".into(),
            ));
        }

        if self.ocr.endpoint.trim().is_empty() {
            return Err(AssessmentError::Config("ocr.endpoint must not be empty".into()));
        }
        if self.ocr.timeout_secs == 0 {
            return Err(AssessmentError::Config("ocr.timeout_secs must be positive".into()));
        }
        if !(36..=600).contains(&self.render_dpi) {
            return Err(AssessmentError::Config(format!(
                "render_dpi {} outside 36-600",
                self.render_dpi
            )));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f32) -> Result<(), AssessmentError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AssessmentError::Config(format!(
            "{name} must be within 0-1, got {value}"
        )))
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AssessmentConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            AssessmentConfig::from_json(r#"{"preprocess": {"auto_correct": false}}"#).unwrap();
        assert!(!config.preprocess.auto_correct);
        assert_eq!(config.preprocess.ink_threshold, 128);
        assert_eq!(config.segment, SegmentConfig::default());
        assert!(!config.secondary_verification);
    }

    #[test]
    fn out_of_range_fraction_rejected() {
        let err = AssessmentConfig::from_json(r#"{"preprocess": {"glare_ceiling": 1.5}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("glare_ceiling"));
    }

    #[test]
    fn inverted_band_rejected() {
        let err = AssessmentConfig::from_json(r#"{"mechanics": {"dot_band": [0.6, 0.2]}}"#)
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Config(_)));
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            AssessmentConfig::from_json("{"),
            Err(AssessmentError::Config(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"secondary_verification": true, "render_dpi": 150}"#).unwrap();
        let config = AssessmentConfig::from_json_file(&path).unwrap();
        assert!(config.secondary_verification);
        assert_eq!(config.render_dpi, 150);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = AssessmentConfig::from_json_file(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(AssessmentError::Io(_))));
    }
}
