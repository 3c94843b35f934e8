//! PDF submissions: page rasterization through PDFium.
//!
//! The PDFium handle is `!Send`, so `PdfiumRenderer` keeps only the resolved
//! library path and binds a fresh handle per call.

use std::path::Path;

use image::{DynamicImage, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::AssessmentError;

/// Default rendering DPI. Pen strokes stay several pixels wide at 200.
pub const DEFAULT_RENDER_DPI: u32 = 200;

/// Longest rendered side, in pixels.
const MAX_RENDER_SIDE: u32 = 4096;

const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Environment variable naming an explicit PDFium library file.
const PDFIUM_PATH_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Turns document pages into images.
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, AssessmentError>;

    /// Render one 0-based page at `dpi`.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<DynamicImage, AssessmentError>;
}

/// PDFium-backed renderer.
pub struct PdfiumRenderer {
    /// `None` = bind to the system library.
    library: Option<String>,
}

impl PdfiumRenderer {
    /// Locate PDFium and check that it binds.
    ///
    /// Looks at `PDFIUM_DYNAMIC_LIB_PATH`, then next to the executable
    /// (and its `lib/` subdirectory), then the system search path.
    pub fn new() -> Result<Self, AssessmentError> {
        let renderer = Self {
            library: locate_library(),
        };
        renderer.bind()?;
        Ok(renderer)
    }

    fn bind(&self) -> Result<Pdfium, AssessmentError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| {
            renderer_error(
                0,
                format!("PDFium could not be loaded ({e}). Set {PDFIUM_PATH_ENV} or install PDFium"),
            )
        })?;
        Ok(Pdfium::new(bindings))
    }

    fn with_document<T>(
        &self,
        pdf_bytes: &[u8],
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, AssessmentError>,
    ) -> Result<T, AssessmentError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(open_error)?;
        f(&document)
    }
}

fn locate_library() -> Option<String> {
    if let Ok(path) = std::env::var(PDFIUM_PATH_ENV) {
        debug!(path = %path, "Using PDFium from environment");
        return Some(path);
    }

    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    [exe_dir.clone(), exe_dir.join("lib")]
        .into_iter()
        .map(|dir| {
            let name = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
            Path::new(&name).to_string_lossy().into_owned()
        })
        .find(|candidate| Path::new(candidate).is_file())
        .inspect(|found| debug!(path = %found, "Found bundled PDFium"))
}

fn renderer_error(page: usize, reason: String) -> AssessmentError {
    AssessmentError::PdfRendering { page, reason }
}

fn open_error(e: PdfiumError) -> AssessmentError {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("password") || lowered.contains("encrypt") {
        renderer_error(0, "PDF is password-protected".into())
    } else {
        renderer_error(0, format!("Cannot open PDF: {text}"))
    }
}

/// Pixel size for a page of the given point size, longest side capped.
fn render_size(width_pt: f32, height_pt: f32, dpi: u32) -> (u32, u32) {
    let w = (width_pt * dpi as f32 / PDF_POINTS_PER_INCH).max(1.0);
    let h = (height_pt * dpi as f32 / PDF_POINTS_PER_INCH).max(1.0);
    let shrink = (MAX_RENDER_SIDE as f32 / w.max(h)).min(1.0);
    let side = |v: f32| ((v * shrink).round() as u32).clamp(1, MAX_RENDER_SIDE);
    (side(w), side(h))
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, AssessmentError> {
        self.with_document(pdf_bytes, |doc| Ok(doc.pages().len() as usize))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<DynamicImage, AssessmentError> {
        self.with_document(pdf_bytes, |doc| {
            let pages = doc.pages();
            let page = u16::try_from(page_number)
                .ok()
                .and_then(|i| pages.get(i).ok())
                .ok_or_else(|| {
                    renderer_error(
                        page_number,
                        format!("No page {} in a {}-page document", page_number + 1, pages.len()),
                    )
                })?;

            let (width_pt, height_pt) = (page.width().value, page.height().value);
            let (w, h) = render_size(width_pt, height_pt, dpi);
            if w.max(h) == MAX_RENDER_SIDE {
                warn!(page = page_number, width = w, height = h, "Page render size capped");
            }

            let bitmap = page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(w as i32)
                        .set_maximum_height(h as i32),
                )
                .map_err(|e| renderer_error(page_number, format!("Render failed: {e}")))?;
            debug!(page = page_number, width = w, height = h, dpi, "PDF page rendered");
            Ok(bitmap.as_image())
        })
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Produces blank white pages of a fixed size.
pub struct MockPdfPageRenderer {
    pages: usize,
    size: (u32, u32),
}

impl MockPdfPageRenderer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            size: (200, 260),
        }
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, AssessmentError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        _dpi: u32,
    ) -> Result<DynamicImage, AssessmentError> {
        if page_number >= self.pages {
            return Err(renderer_error(
                page_number,
                format!("No page {} in a {}-page document", page_number + 1, self.pages),
            ));
        }
        let (w, h) = self.size;
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            w,
            h,
            Rgba([255, 255, 255, 255]),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_page_at_default_dpi() {
        // 8.5 x 11 in
        let (w, h) = render_size(612.0, 792.0, DEFAULT_RENDER_DPI);
        assert_eq!((w, h), (1700, 2200));
    }

    #[test]
    fn lower_dpi_scales_down() {
        let (w, h) = render_size(612.0, 792.0, 72);
        assert_eq!((w, h), (612, 792));
    }

    #[test]
    fn oversized_page_keeps_aspect_ratio() {
        let (w, h) = render_size(3000.0, 6000.0, 200);
        assert_eq!(h, MAX_RENDER_SIDE);
        assert_eq!(w, MAX_RENDER_SIDE / 2);
    }

    #[test]
    fn zero_size_page_renders_one_pixel() {
        assert_eq!(render_size(0.0, 0.0, 200), (1, 1));
    }

    #[test]
    fn mock_rejects_page_past_end() {
        let renderer = MockPdfPageRenderer::new(2);
        assert_eq!(renderer.page_count(b"%PDF").unwrap(), 2);
        assert!(renderer.render_page(b"%PDF", 1, 200).is_ok());
        let err = renderer.render_page(b"%PDF", 2, 200).unwrap_err();
        assert!(matches!(err, AssessmentError::PdfRendering { page: 2, .. }));
        assert!(err.to_string().contains("No page 3"));
    }
}
