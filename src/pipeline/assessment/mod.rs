//! Handwriting assessment pipeline: one module per stage, wired together
//! by the orchestrator.

pub mod types;
pub mod confidence;
pub mod progress;
pub mod page_loader;
pub mod pdf_renderer;
pub mod preprocess;
pub mod line_segment;
pub mod ocr;
pub mod reconcile;
pub mod content_verify;
pub mod secondary;
pub mod mechanics;
pub mod quality_gate;
pub mod scoring;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use types::*;
pub use confidence::*;
pub use progress::*;
pub use page_loader::*;
pub use ocr::*;
pub use secondary::*;
pub use orchestrator::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("OCR provider error: {0}")]
    OcrProvider(String),

    #[error("Secondary verifier error: {0}")]
    SecondaryVerifier(String),

    #[error("Invalid assignment spec: {0}")]
    InvalidSpec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
