//! Text line detection from a horizontal darkness projection.
//!
//! Each row's mean ink density (255 - luminance) is compared against a
//! fraction of the densest row. Contiguous runs above that threshold become
//! lines. When nothing qualifies, the page is split into equal bands so OCR
//! always has geometry to target.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{BoundingBox, DetectedLine, PageRaster};

/// Fraction of the maximum row darkness a row must exceed to count as text.
const PROJECTION_RATIO: f32 = 0.20;

/// A run must be taller than this (px) to become a line.
const MIN_RUN_HEIGHT: u32 = 10;

/// Peak row darkness that maps to confidence 1.0.
const DARKNESS_NORMALIZER: f32 = 64.0;

/// Fallback bands are never thinner than this (px).
const FALLBACK_BAND_HEIGHT: u32 = 10;

/// Confidence assigned to every fallback band.
const FALLBACK_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub projection_ratio: f32,
    pub min_run_height: u32,
    pub darkness_normalizer: f32,
    pub fallback_band_height: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            projection_ratio: PROJECTION_RATIO,
            min_run_height: MIN_RUN_HEIGHT,
            darkness_normalizer: DARKNESS_NORMALIZER,
            fallback_band_height: FALLBACK_BAND_HEIGHT,
        }
    }
}

/// Detect lines on one page. `expected_lines` is only used by the fallback.
pub fn segment_lines(
    raster: &PageRaster,
    expected_lines: usize,
    config: &SegmentConfig,
) -> Vec<DetectedLine> {
    let gray = raster.luminance();
    let projection = row_darkness(&gray);

    let lines = projection_runs(&projection, gray.width(), config);
    if !lines.is_empty() {
        debug!(
            page = raster.page_index(),
            lines = lines.len(),
            "Lines detected from projection"
        );
        return lines;
    }

    let bands = fallback_bands(gray.width(), gray.height(), expected_lines, config);
    debug!(
        page = raster.page_index(),
        bands = bands.len(),
        expected = expected_lines,
        "No projection runs, using even bands"
    );
    bands
}

/// Mean ink density per row.
fn row_darkness(gray: &GrayImage) -> Vec<f32> {
    let w = gray.width();
    if w == 0 {
        return vec![0.0; gray.height() as usize];
    }
    (0..gray.height())
        .map(|y| {
            let sum: u32 = (0..w).map(|x| 255 - gray.get_pixel(x, y).0[0] as u32).sum();
            sum as f32 / w as f32
        })
        .collect()
}

fn projection_runs(projection: &[f32], width: u32, config: &SegmentConfig) -> Vec<DetectedLine> {
    let max = projection.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = max * config.projection_ratio;

    let mut lines = Vec::new();
    let mut run_start: Option<usize> = None;

    // Sentinel row past the end closes a trailing run.
    for y in 0..=projection.len() {
        let above = projection.get(y).is_some_and(|&d| d > threshold);
        match (above, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                let height = (y - start) as u32;
                if height > config.min_run_height {
                    let (peak_row, peak) = projection[start..y]
                        .iter()
                        .enumerate()
                        .fold((0, 0.0f32), |best, (i, &d)| if d > best.1 { (i, d) } else { best });
                    lines.push(DetectedLine {
                        line_index: lines.len(),
                        bbox: BoundingBox::new(0, start as u32, width, height),
                        baseline: (start + peak_row) as u32,
                        confidence: (peak / config.darkness_normalizer).min(1.0),
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }

    lines
}

/// Evenly divide the page into `min(expected, height / band)` bands, at least one.
fn fallback_bands(
    width: u32,
    height: u32,
    expected_lines: usize,
    config: &SegmentConfig,
) -> Vec<DetectedLine> {
    let by_height = (height / config.fallback_band_height.max(1)) as usize;
    let count = expected_lines.max(1).min(by_height).max(1);
    let band = height / count as u32;

    (0..count)
        .map(|i| {
            let top = i as u32 * band;
            // Last band absorbs the remainder rows.
            let h = if i + 1 == count { height - top } else { band };
            DetectedLine {
                line_index: i,
                bbox: BoundingBox::new(0, top, width, h),
                baseline: top + h / 2,
                confidence: FALLBACK_CONFIDENCE,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assessment::test_support::*;

    #[test]
    fn detects_each_written_row() {
        let page = written_page(200, 3, 20, 20);
        let lines = segment_lines(&raster(page), 3, &SegmentConfig::default());

        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line.line_index, i);
            assert_eq!(line.bbox.y, 20 + i as u32 * 40);
            assert_eq!(line.bbox.height, 20);
            assert_eq!(line.bbox.width, 200);
            assert!(line.baseline >= line.bbox.y && line.baseline < line.bbox.bottom());
            assert_eq!(line.confidence, 1.0);
        }
    }

    #[test]
    fn short_runs_are_ignored() {
        let mut page = written_page(200, 1, 20, 20);
        // 8 px tall scribble: too short to be a line
        stroke_band(&mut page, 50, 8, 3, 6);
        let lines = segment_lines(&raster(page), 1, &SegmentConfig::default());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bbox.y, 20);
    }

    #[test]
    fn run_touching_bottom_edge_is_closed() {
        let mut page = blank(100, 60, 255);
        fill_rect(&mut page, 0, 40, 100, 20, 0);
        let lines = segment_lines(&raster(page), 1, &SegmentConfig::default());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bbox.bottom(), 60);
    }

    #[test]
    fn faint_rows_get_lower_confidence() {
        let mut page = blank(100, 60, 255);
        // Darkness 32 across the row: half the normalizer
        fill_rect(&mut page, 0, 20, 100, 20, 223);
        let lines = segment_lines(&raster(page), 1, &SegmentConfig::default());
        assert_eq!(lines.len(), 1);
        assert!((lines[0].confidence - 0.5).abs() < 0.01);
    }

    #[test]
    fn blank_page_falls_back_to_even_bands() {
        let lines = segment_lines(&raster(blank(100, 100, 255)), 4, &SegmentConfig::default());
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.confidence == FALLBACK_CONFIDENCE));
        assert_eq!(lines[0].bbox.height, 25);
        assert_eq!(lines[3].bbox.bottom(), 100);
    }

    #[test]
    fn fallback_limited_by_page_height() {
        let lines = segment_lines(&raster(blank(50, 30, 255)), 10, &SegmentConfig::default());
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn fallback_never_empty() {
        let lines = segment_lines(&raster(blank(50, 5, 255)), 0, &SegmentConfig::default());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bbox.height, 5);
    }
}
