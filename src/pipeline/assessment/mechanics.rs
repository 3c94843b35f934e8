//! Handwriting mechanics: dots on i and crosses on t.
//!
//! These findings are about the writer, not the OCR, so only characters read
//! at 0.95 confidence or better are inspected.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::confidence::thresholds;
use super::types::{BoundingBox, CharacterObservation, ExtractedLine, Finding, FindingType, PageRaster};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicsConfig {
    /// Luminance below this counts as ink.
    pub ink_threshold: u8,
    /// Dot search band above the glyph top, as fractions of glyph height.
    pub dot_band: (f32, f32),
    /// Horizontal share of the glyph width searched for the dot, centered.
    pub dot_width_fraction: f32,
    /// Ink fraction below this = dot missing.
    pub dot_ink_floor: f32,
    /// Cross search band below the glyph top, as fractions of glyph height.
    pub cross_band: (f32, f32),
    /// Left extension of the cross region, as a fraction of glyph width.
    pub cross_left_extension: f32,
    /// Cross region width as a multiple of glyph width.
    pub cross_width_factor: f32,
    /// Ink fraction below this = t uncrossed.
    pub cross_ink_floor: f32,
}

impl Default for MechanicsConfig {
    fn default() -> Self {
        Self {
            ink_threshold: 128,
            dot_band: (0.2, 0.6),
            dot_width_fraction: 0.6,
            dot_ink_floor: 0.05,
            cross_band: (0.15, 0.35),
            cross_left_extension: 0.25,
            cross_width_factor: 1.4,
            cross_ink_floor: 0.08,
        }
    }
}

/// Inspect every high-confidence 'i' and 't' in `lines` against its page.
pub fn check_mechanics(
    lines: &[ExtractedLine],
    pages: &[PageRaster],
    config: &MechanicsConfig,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for page in pages {
        let page_lines: Vec<&ExtractedLine> = lines
            .iter()
            .filter(|l| l.page_index == page.page_index())
            .collect();
        if page_lines.is_empty() {
            continue;
        }
        let gray = page.luminance();

        for line in page_lines {
            for ch in &line.characters {
                if ch.confidence < thresholds::HANDWRITING_CHAR_FLOOR || ch.bbox.is_empty() {
                    continue;
                }
                if let Some(finding) = inspect_character(ch, line, &gray, config) {
                    findings.push(finding);
                }
            }
        }
    }

    debug!(findings = findings.len(), "Handwriting mechanics checked");
    findings
}

fn inspect_character(
    ch: &CharacterObservation,
    line: &ExtractedLine,
    gray: &GrayImage,
    config: &MechanicsConfig,
) -> Option<Finding> {
    let glyph = ch.bbox;
    let (gx, gy) = (glyph.x as f32, glyph.y as f32);
    let (gw, gh) = (glyph.width as f32, glyph.height as f32);
    let confidence = ch.confidence * thresholds::HANDWRITING_CONFIDENCE_SCALE;

    match ch.text.as_str() {
        "i" | "I" => {
            let margin = (1.0 - config.dot_width_fraction) / 2.0;
            let region = BoundingBox::clamped(
                gx + gw * margin,
                gy - gh * config.dot_band.1,
                gw * config.dot_width_fraction,
                gh * (config.dot_band.1 - config.dot_band.0),
                gray.width(),
                gray.height(),
            );
            let ink = ink_fraction(gray, &region, config.ink_threshold)?;
            (ink < config.dot_ink_floor).then(|| {
                Finding::new(
                    FindingType::MissingIDot,
                    ch.page_index,
                    glyph,
                    confidence,
                    format!("Letter 'i' on line {} appears to be missing its dot.", line.line_index + 1),
                )
                .with_line(line.line_index)
            })
        }
        "t" => {
            let region = BoundingBox::clamped(
                gx - gw * config.cross_left_extension,
                gy + gh * config.cross_band.0,
                gw * config.cross_width_factor,
                gh * (config.cross_band.1 - config.cross_band.0),
                gray.width(),
                gray.height(),
            );
            let ink = ink_fraction(gray, &region, config.ink_threshold)?;
            (ink < config.cross_ink_floor).then(|| {
                Finding::new(
                    FindingType::UncrossedT,
                    ch.page_index,
                    glyph,
                    confidence,
                    format!("Letter 't' on line {} appears to be uncrossed.", line.line_index + 1),
                )
                .with_line(line.line_index)
            })
        }
        _ => None,
    }
}

/// Fraction of ink pixels in `region`. `None` when the region is empty after clamping.
fn ink_fraction(gray: &GrayImage, region: &BoundingBox, threshold: u8) -> Option<f32> {
    if region.is_empty() {
        return None;
    }
    let mut ink = 0u32;
    for y in region.y..region.bottom() {
        for x in region.x..region.right() {
            if gray.get_pixel(x, y).0[0] < threshold {
                ink += 1;
            }
        }
    }
    Some(ink as f32 / (region.width * region.height) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assessment::test_support::*;

    fn char_line(text: &str, confidence: f32, bbox: BoundingBox) -> ExtractedLine {
        ExtractedLine {
            line_index: 0,
            page_index: 0,
            text: text.into(),
            confidence,
            bbox: BoundingBox::new(0, 0, 100, 100),
            characters: vec![CharacterObservation {
                text: text.into(),
                confidence,
                bbox,
                line_index: 0,
                page_index: 0,
            }],
        }
    }

    fn i_page(with_dot: bool) -> PageRaster {
        let mut page = blank(100, 100, PAPER);
        fill_rect(&mut page, 44, 40, 2, 20, 0);
        if with_dot {
            fill_rect(&mut page, 43, 30, 4, 4, 0);
        }
        raster(page)
    }

    fn t_page(with_cross: bool) -> PageRaster {
        let mut page = blank(100, 100, PAPER);
        fill_rect(&mut page, 45, 30, 1, 30, 0);
        if with_cross {
            fill_rect(&mut page, 36, 36, 20, 2, 0);
        }
        raster(page)
    }

    const I_GLYPH: BoundingBox = BoundingBox {
        x: 40,
        y: 40,
        width: 10,
        height: 20,
    };

    const T_GLYPH: BoundingBox = BoundingBox {
        x: 40,
        y: 30,
        width: 10,
        height: 30,
    };

    #[test]
    fn dotless_i_is_flagged() {
        let lines = [char_line("i", 0.97, I_GLYPH)];
        let findings = check_mechanics(&lines, &[i_page(false)], &MechanicsConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].finding_type, FindingType::MissingIDot);
        assert!((findings[0].confidence - 0.97 * 0.95).abs() < 1e-6);
        assert_eq!(findings[0].bbox, I_GLYPH);
    }

    #[test]
    fn dotted_i_passes() {
        let lines = [char_line("i", 0.97, I_GLYPH)];
        assert!(check_mechanics(&lines, &[i_page(true)], &MechanicsConfig::default()).is_empty());
    }

    #[test]
    fn uppercase_i_is_checked_too() {
        let lines = [char_line("I", 0.99, I_GLYPH)];
        let findings = check_mechanics(&lines, &[i_page(false)], &MechanicsConfig::default());
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn uncrossed_t_is_flagged() {
        let lines = [char_line("t", 0.96, T_GLYPH)];
        let findings = check_mechanics(&lines, &[t_page(false)], &MechanicsConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].finding_type, FindingType::UncrossedT);
    }

    #[test]
    fn crossed_t_passes() {
        let lines = [char_line("t", 0.96, T_GLYPH)];
        assert!(check_mechanics(&lines, &[t_page(true)], &MechanicsConfig::default()).is_empty());
    }

    #[test]
    fn uppercase_t_is_not_checked() {
        let lines = [char_line("T", 0.99, T_GLYPH)];
        assert!(check_mechanics(&lines, &[t_page(false)], &MechanicsConfig::default()).is_empty());
    }

    #[test]
    fn below_evidence_bar_is_skipped() {
        let lines = [char_line("i", 0.94, I_GLYPH)];
        assert!(check_mechanics(&lines, &[i_page(false)], &MechanicsConfig::default()).is_empty());
    }

    #[test]
    fn region_above_page_is_skipped() {
        // Glyph at the top edge: the dot band lies entirely off-canvas
        let glyph = BoundingBox::new(40, 0, 10, 20);
        let lines = [char_line("i", 0.99, glyph)];
        assert!(check_mechanics(&lines, &[i_page(false)], &MechanicsConfig::default()).is_empty());
    }
}
