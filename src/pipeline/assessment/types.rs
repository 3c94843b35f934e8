//! Data types shared by the assessment stages: geometry, page rasters,
//! lines, findings, gate and score, plus the OCR provider payload.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AssessmentError;

// ═══════════════════════════════════════════════════════════
// Geometry
// ═══════════════════════════════════════════════════════════

/// Axis-aligned box in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from signed/fractional coordinates, clamped to the page.
    /// Negative origins are pulled to 0 and the extent is cut at the page edge.
    pub fn clamped(x: f32, y: f32, width: f32, height: f32, page_w: u32, page_h: u32) -> Self {
        let x0 = x.max(0.0).min(page_w as f32);
        let y0 = y.max(0.0).min(page_h as f32);
        let x1 = (x + width).max(0.0).min(page_w as f32);
        let y1 = (y + height).max(0.0).min(page_h as f32);

        let left = x0.floor() as u32;
        let top = y0.floor() as u32;
        let right = (x1.ceil() as u32).max(left);
        let bottom = (y1.ceil() as u32).max(top);

        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y as f32 + self.height as f32 / 2.0
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ═══════════════════════════════════════════════════════════
// Page raster
// ═══════════════════════════════════════════════════════════

/// One decoded page. Owned by the pipeline invocation that loaded it.
///
/// Contrast correction replaces the raster instead of editing it in place,
/// so every later stage reads the corrected pixels.
#[derive(Debug, Clone)]
pub struct PageRaster {
    page_index: usize,
    image: RgbaImage,
}

impl PageRaster {
    pub fn new(page_index: usize, image: RgbaImage) -> Self {
        Self { page_index, image }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// BT.601 luma per pixel, composited over a white background by alpha.
    pub fn luminance(&self) -> GrayImage {
        let (w, h) = (self.image.width(), self.image.height());
        let mut gray = GrayImage::new(w, h);
        for (x, y, p) in self.image.enumerate_pixels() {
            gray.put_pixel(x, y, Luma([luma_over_white(p.0)]));
        }
        gray
    }

    /// Encode the full page as PNG for collaborators.
    pub fn encode_png(&self) -> Result<Vec<u8>, AssessmentError> {
        encode_rgba_png(&self.image)
    }

    /// Encode the region under `bbox` as PNG. The box is cut at the page edge.
    pub fn crop_png(&self, bbox: &BoundingBox) -> Result<Vec<u8>, AssessmentError> {
        let x = bbox.x.min(self.width());
        let y = bbox.y.min(self.height());
        let w = bbox.width.min(self.width() - x);
        let h = bbox.height.min(self.height() - y);
        if w == 0 || h == 0 {
            return Err(AssessmentError::InvalidInput(format!(
                "Crop region {bbox:?} lies outside the page"
            )));
        }
        let cropped = image::imageops::crop_imm(&self.image, x, y, w, h).to_image();
        encode_rgba_png(&cropped)
    }
}

pub(crate) fn luma_over_white(rgba: [u8; 4]) -> u8 {
    let [r, g, b, a] = rgba;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    let alpha = a as f32 / 255.0;
    (luma * alpha + 255.0 * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8
}

fn encode_rgba_png(img: &RgbaImage) -> Result<Vec<u8>, AssessmentError> {
    let dynamic = DynamicImage::ImageRgba8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| AssessmentError::ImageDecode(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Stage outputs
// ═══════════════════════════════════════════════════════════

/// Image quality metrics for one page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// 0-1, higher = sharper. 1.0 when the page carries too little ink to judge.
    pub blur_score: f32,
    /// Fraction of near-white pixels.
    pub glare_score: f32,
    /// Degrees. Reported only, never corrected.
    pub skew_angle: f32,
    /// Mean luminance, 0-255.
    pub brightness: f32,
    /// (max - min) / 255 of luminance.
    pub contrast: f32,
}

/// Candidate text line found by the darkness projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLine {
    /// Page-local, 0-based, contiguous.
    pub line_index: usize,
    pub bbox: BoundingBox,
    /// Row of peak darkness.
    pub baseline: u32,
    pub confidence: f32,
}

/// One OCR symbol assigned to a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterObservation {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub line_index: usize,
    pub page_index: usize,
}

/// Line text reconciled from OCR words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLine {
    /// Global across all pages, assigned in page order.
    pub line_index: usize,
    pub page_index: usize,
    pub text: String,
    /// Mean of character confidences, 0 when the line has none.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub characters: Vec<CharacterObservation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    ContentMismatch,
    ContentUncertain,
    MissingIDot,
    UncrossedT,
    NumberingError,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentMismatch => "content_mismatch",
            Self::ContentUncertain => "content_uncertain",
            Self::MissingIDot => "missing_i_dot",
            Self::UncrossedT => "uncrossed_t",
            Self::NumberingError => "numbering_error",
        }
    }

    pub fn is_handwriting(&self) -> bool {
        matches!(self, Self::MissingIDot | Self::UncrossedT)
    }
}

impl std::fmt::Display for FindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single detected issue. Never mutated after construction; stages may
/// only filter findings or replace them with new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub page_index: usize,
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub bbox: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_text: Option<String>,
    pub confidence: f32,
    pub message: String,
}

impl Finding {
    pub fn new(
        finding_type: FindingType,
        page_index: usize,
        bbox: BoundingBox,
        confidence: f32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            page_index,
            finding_type,
            bbox,
            line_index: None,
            expected_text: None,
            observed_text: None,
            confidence: confidence.clamp(0.0, 1.0),
            message: message.into(),
        }
    }

    pub fn with_line(mut self, line_index: usize) -> Self {
        self.line_index = Some(line_index);
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected_text = Some(expected.into());
        self
    }

    pub fn with_observed(mut self, observed: impl Into<String>) -> Self {
        self.observed_text = Some(observed.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Ok,
    Uncertain,
    Ungradable,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Uncertain => "uncertain",
            Self::Ungradable => "ungradable",
        }
    }
}

/// Gradability classification of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGate {
    pub status: GateStatus,
    pub reasons: Vec<String>,
    pub confidence_coverage: f32,
}

/// All values are integers in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub completeness: u8,
    pub content: u8,
    pub handwriting: u8,
    pub overall: u8,
}

impl ScoreBreakdown {
    pub fn zero() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════
// OCR collaborator payload
// ═══════════════════════════════════════════════════════════

/// Box as reported by the OCR provider. May be fractional or reach past the page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl OcrBox {
    pub fn to_page_box(&self, page_w: u32, page_h: u32) -> BoundingBox {
        BoundingBox::clamped(self.x, self.y, self.width, self.height, page_w, page_h)
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSymbol {
    pub text: String,
    pub confidence: f32,
    pub bbox: OcrBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    /// Some providers omit word text; it is then rebuilt from the symbols.
    #[serde(default)]
    pub text: String,
    pub confidence: f32,
    pub bbox: OcrBox,
    #[serde(default)]
    pub symbols: Vec<OcrSymbol>,
}

impl OcrWord {
    pub fn display_text(&self) -> String {
        if self.text.trim().is_empty() {
            self.symbols.iter().map(|s| s.text.as_str()).collect()
        } else {
            self.text.clone()
        }
    }
}

/// Full OCR response for one page image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrPageResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<OcrWord>,
}
