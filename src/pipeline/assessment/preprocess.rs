//! Per-page image quality analysis and optional contrast correction.
//!
//! A page is rejected (ungradable) when it is too blurry or washed out by
//! glare. Glare is judged against the paper tone, so a clean white scan
//! carries none. Otherwise, low-contrast pages may get one linear stretch around
//! the mean brightness before any downstream stage reads the pixels.
//!
//! Sharpness is judged only around ink: a mostly blank sheet says nothing
//! about focus, so pages with under 1% ink coverage report the maximal score.

use image::{GrayImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{PageRaster, QualityMetrics};

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Luminance below this counts as ink.
pub const INK_THRESHOLD: u8 = 128;

/// Below this fraction of ink pixels, blur is not assessed.
const MIN_INK_COVERAGE: f32 = 0.01;

/// Mean squared Laplacian that maps to a blur score of 1.0.
const BLUR_NORMALIZER: f32 = 1000.0;

/// Blur score below this = too blurry to grade.
const SHARPNESS_FLOOR: f32 = 0.10;

/// Luminance at or above this counts as glare.
const GLARE_CUTOFF: u8 = 250;

/// Glare must also be this much brighter than the paper tone.
const GLARE_PAPER_MARGIN: u8 = 12;

/// Glare fraction above this = washed out.
const GLARE_CEILING: f32 = 0.50;

/// Contrast below this triggers auto-correction.
const CONTRAST_FLOOR: f32 = 0.35;

/// Upper bound on the contrast stretch factor.
const MAX_CONTRAST_GAIN: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub ink_threshold: u8,
    pub min_ink_coverage: f32,
    pub blur_normalizer: f32,
    pub sharpness_floor: f32,
    pub glare_cutoff: u8,
    pub glare_paper_margin: u8,
    pub glare_ceiling: f32,
    pub contrast_floor: f32,
    pub max_contrast_gain: f32,
    /// Whether low-contrast pages may be stretched.
    pub auto_correct: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            ink_threshold: INK_THRESHOLD,
            min_ink_coverage: MIN_INK_COVERAGE,
            blur_normalizer: BLUR_NORMALIZER,
            sharpness_floor: SHARPNESS_FLOOR,
            glare_cutoff: GLARE_CUTOFF,
            glare_paper_margin: GLARE_PAPER_MARGIN,
            glare_ceiling: GLARE_CEILING,
            contrast_floor: CONTRAST_FLOOR,
            max_contrast_gain: MAX_CONTRAST_GAIN,
            auto_correct: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Result
// ═══════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct PreprocessOutcome {
    /// The page to use downstream. Replaced when contrast was stretched.
    pub raster: PageRaster,
    pub metrics: QualityMetrics,
    /// Empty if the page is gradable.
    pub rejections: Vec<String>,
    pub corrected: bool,
}

impl PreprocessOutcome {
    pub fn is_rejected(&self) -> bool {
        !self.rejections.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════
// Analysis
// ═══════════════════════════════════════════════════════════

/// Analyze one page and apply at most one contrast correction.
pub fn analyze_page(raster: PageRaster, config: &PreprocessConfig) -> PreprocessOutcome {
    let gray = raster.luminance();
    let stats = luminance_stats(&gray, config);

    let mut metrics = QualityMetrics {
        blur_score: 1.0,
        glare_score: stats.glare_fraction,
        skew_angle: detect_skew_angle(&gray).unwrap_or(0.0),
        brightness: stats.mean,
        contrast: stats.contrast(),
    };

    if stats.ink_fraction >= config.min_ink_coverage {
        metrics.blur_score = ink_sharpness(&gray, config);
    }

    let mut rejections = Vec::new();
    if metrics.blur_score < config.sharpness_floor {
        rejections.push(format!(
            "Image is too blurry to grade (sharpness {:.2}, minimum {:.2})",
            metrics.blur_score, config.sharpness_floor
        ));
    }
    if metrics.glare_score > config.glare_ceiling {
        rejections.push(format!(
            "Glare covers {:.0}% of the page (limit {:.0}%)",
            metrics.glare_score * 100.0,
            config.glare_ceiling * 100.0
        ));
    }

    let mut raster = raster;
    let mut corrected = false;
    if rejections.is_empty()
        && config.auto_correct
        && metrics.contrast > 0.0
        && metrics.contrast < config.contrast_floor
    {
        let gain = (config.contrast_floor / metrics.contrast).min(config.max_contrast_gain);
        let page_index = raster.page_index();
        let stretched = stretch_contrast(raster.into_image(), stats.mean, gain);
        raster = PageRaster::new(page_index, stretched);
        let before = metrics.contrast;
        metrics.contrast = luminance_stats(&raster.luminance(), config).contrast();
        corrected = true;
        debug!(
            page = page_index,
            gain,
            contrast_before = before,
            contrast_after = metrics.contrast,
            "Applied contrast stretch"
        );
    }

    debug!(
        page = raster.page_index(),
        blur = metrics.blur_score,
        glare = metrics.glare_score,
        skew = metrics.skew_angle,
        brightness = metrics.brightness,
        contrast = metrics.contrast,
        ink = stats.ink_fraction,
        rejected = !rejections.is_empty(),
        "Page quality assessed"
    );

    PreprocessOutcome {
        raster,
        metrics,
        rejections,
        corrected,
    }
}

struct LuminanceStats {
    min: u8,
    max: u8,
    mean: f32,
    ink_fraction: f32,
    glare_fraction: f32,
}

impl LuminanceStats {
    fn contrast(&self) -> f32 {
        (self.max.saturating_sub(self.min)) as f32 / 255.0
    }
}

fn luminance_stats(gray: &GrayImage, config: &PreprocessConfig) -> LuminanceStats {
    let total = (gray.width() as u64) * (gray.height() as u64);
    if total == 0 {
        return LuminanceStats {
            min: 0,
            max: 0,
            mean: 0.0,
            ink_fraction: 0.0,
            glare_fraction: 0.0,
        };
    }

    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let min = histogram.iter().position(|&n| n > 0).unwrap_or(0) as u8;
    let max = histogram.iter().rposition(|&n| n > 0).unwrap_or(0) as u8;
    let sum: u64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as u64 * n)
        .sum();
    let ink: u64 = histogram[..config.ink_threshold as usize].iter().sum();
    let glare: u64 = histogram
        .get(glare_cutoff(&histogram, config)..)
        .map_or(0, |bins| bins.iter().sum());

    LuminanceStats {
        min,
        max,
        mean: sum as f32 / total as f32,
        ink_fraction: ink as f32 / total as f32,
        glare_fraction: glare as f32 / total as f32,
    }
}

/// Luminance from which a pixel counts as glare.
///
/// The configured cutoff, raised to sit `glare_paper_margin` above the paper
/// tone (25th percentile of non-ink luminance). May exceed 255, in which case
/// the page has no glare.
fn glare_cutoff(histogram: &[u64; 256], config: &PreprocessConfig) -> usize {
    let first_paper = config.ink_threshold as usize;
    let paper = &histogram[first_paper..];
    let background: u64 = paper.iter().sum();

    let mut paper_tone = u8::MAX as usize;
    if background > 0 {
        let target = background.div_ceil(4);
        let mut seen = 0u64;
        for (offset, &n) in paper.iter().enumerate() {
            seen += n;
            if seen >= target {
                paper_tone = first_paper + offset;
                break;
            }
        }
    }

    (config.glare_cutoff as usize).max(paper_tone + config.glare_paper_margin as usize)
}

/// Mean squared 4-neighbour Laplacian over pixels at or next to ink, normalized to 0-1.
///
/// Kernel: `[0,1,0; 1,-4,1; 0,1,0]`. A pixel contributes when any pixel of its
/// 3x3 neighbourhood is ink, so both sides of each stroke edge are measured.
pub fn ink_sharpness(gray: &GrayImage, config: &PreprocessConfig) -> f32 {
    let (w, h) = (gray.width(), gray.height());
    if w < 3 || h < 3 {
        return 1.0;
    }

    let is_ink = |x: u32, y: u32| gray.get_pixel(x, y).0[0] < config.ink_threshold;

    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let near_ink = (y - 1..=y + 1).any(|ny| (x - 1..=x + 1).any(|nx| is_ink(nx, ny)));
            if !near_ink {
                continue;
            }
            let center = gray.get_pixel(x, y).0[0] as f64;
            let top = gray.get_pixel(x, y - 1).0[0] as f64;
            let bottom = gray.get_pixel(x, y + 1).0[0] as f64;
            let left = gray.get_pixel(x - 1, y).0[0] as f64;
            let right = gray.get_pixel(x + 1, y).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    if count == 0 {
        return 1.0;
    }

    let mean_sq = (sum_sq / count as f64) as f32;
    (mean_sq / config.blur_normalizer).clamp(0.0, 1.0)
}

/// Linear stretch of each colour channel around `mean` by `gain`.
pub fn stretch_contrast(mut img: RgbaImage, mean: f32, gain: f32) -> RgbaImage {
    for p in img.pixels_mut() {
        let [r, g, b, a] = p.0;
        let stretch = |v: u8| (mean + (v as f32 - mean) * gain).round().clamp(0.0, 255.0) as u8;
        *p = Rgba([stretch(r), stretch(g), stretch(b), a]);
    }
    img
}

/// Detect page skew angle via horizontal projection profile.
///
/// Tests candidate angles from -5 to +5 degrees. The angle producing the
/// crispest row transitions (highest projection variance) is the estimate.
///
/// Returns `None` if the image is too small, has insufficient content (< 2% ink),
/// or the detected angle is negligible (< 0.5 degrees).
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = (img.width(), img.height());
    if w < 50 || h < 50 {
        return None;
    }

    let dark_count = img.pixels().filter(|p| p.0[0] < INK_THRESHOLD).count();
    let total = (w as usize) * (h as usize);
    if (dark_count as f32 / total as f32) < 0.02 {
        return None;
    }

    let mut best_angle = 0.0f32;
    let mut best_score = f64::NEG_INFINITY;

    // 41 candidates in 0.25 degree steps
    for step in 0..=40 {
        let angle = -5.0 + step as f32 * 0.25;
        let score = projection_variance(img, angle);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    if best_angle.abs() < 0.5 {
        None
    } else {
        Some(best_angle)
    }
}

/// Sum of squared differences between adjacent row ink counts after shearing by `angle_deg`.
fn projection_variance(img: &GrayImage, angle_deg: f32) -> f64 {
    let (w, h) = (img.width(), img.height());
    let tan_a = (angle_deg.to_radians()).tan() as f64;
    let mut projection = vec![0u32; h as usize];

    for y in 0..h {
        let shift = (y as f64 * tan_a).round() as i64;
        let mut count = 0u32;
        // every 4th pixel
        let mut x = 0u32;
        while x < w {
            let sx = x as i64 + shift;
            if sx >= 0 && (sx as u32) < w && img.get_pixel(sx as u32, y).0[0] < INK_THRESHOLD {
                count += 1;
            }
            x += 4;
        }
        projection[y as usize] = count;
    }

    projection
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as f64 - pair[0] as f64;
            diff * diff
        })
        .sum()
}
