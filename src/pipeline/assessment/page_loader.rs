//! Decodes uploads into per-page rasters.
//!
//! Raster images become one page each, with EXIF orientation applied so
//! phone photos are upright. PDFs are rendered page by page through a
//! `PdfPageRenderer`. Uploads are concatenated in the order given.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use super::pdf_renderer::{PdfPageRenderer, DEFAULT_RENDER_DPI};
use super::types::PageRaster;
use super::AssessmentError;

/// Maximum upload size (in bytes) before rejecting.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// One uploaded file.
#[derive(Debug, Clone)]
pub enum PageSource {
    Image(Vec<u8>),
    Pdf(Vec<u8>),
}

impl PageSource {
    /// Classify by magic bytes, not file extension.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.starts_with(b"%PDF") {
            Self::Pdf(bytes)
        } else {
            Self::Image(bytes)
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AssessmentError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Turns uploads into page rasters.
pub struct PageLoader {
    pdf_renderer: Option<Box<dyn PdfPageRenderer>>,
    render_dpi: u32,
}

impl Default for PageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLoader {
    /// Loader for raster images only. PDFs fail until a renderer is added.
    pub fn new() -> Self {
        Self {
            pdf_renderer: None,
            render_dpi: DEFAULT_RENDER_DPI,
        }
    }

    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn with_render_dpi(mut self, dpi: u32) -> Self {
        self.render_dpi = dpi;
        self
    }

    /// Decode all sources into pages with contiguous 0-based indices.
    pub fn load(&self, sources: &[PageSource]) -> Result<Vec<PageRaster>, AssessmentError> {
        if sources.is_empty() {
            return Err(AssessmentError::InvalidInput("No pages to assess".into()));
        }

        let mut pages = Vec::new();
        for source in sources {
            match source {
                PageSource::Image(bytes) => {
                    let img = decode_image(bytes)?;
                    pages.push(to_raster(pages.len(), img)?);
                }
                PageSource::Pdf(bytes) => {
                    let renderer = self.pdf_renderer.as_ref().ok_or_else(|| {
                        AssessmentError::InvalidInput(
                            "PDF upload received but no PDF renderer is configured".into(),
                        )
                    })?;
                    validate_upload_bytes(bytes)?;
                    let count = renderer.page_count(bytes)?;
                    if count == 0 {
                        return Err(AssessmentError::InvalidInput("PDF has no pages".into()));
                    }
                    for page_number in 0..count {
                        let img = renderer.render_page(bytes, page_number, self.render_dpi)?;
                        pages.push(to_raster(pages.len(), img)?);
                    }
                }
            }
        }

        debug!(pages = pages.len(), "Pages loaded");
        Ok(pages)
    }
}

/// Validate, decode and orient a single raster image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AssessmentError> {
    validate_upload_bytes(bytes)?;
    let img = image::load_from_memory(bytes)
        .map_err(|e| AssessmentError::ImageDecode(e.to_string()))?;
    let orientation = read_exif_orientation(bytes);
    Ok(apply_orientation(img, orientation))
}

fn to_raster(page_index: usize, img: DynamicImage) -> Result<PageRaster, AssessmentError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(AssessmentError::InvalidInput(format!(
            "Page {} has no pixels",
            page_index + 1
        )));
    }
    Ok(PageRaster::new(page_index, img.to_rgba8()))
}

/// Reject clearly invalid payloads before decoding.
pub fn validate_upload_bytes(bytes: &[u8]) -> Result<(), AssessmentError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(AssessmentError::InvalidInput(
            "Upload too small to be a valid image".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AssessmentError::InvalidInput(format!(
            "Upload exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
