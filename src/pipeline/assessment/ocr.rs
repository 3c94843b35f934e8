//! OCR collaborator: turns one page image into words and symbol boxes.
//!
//! The pipeline never performs recognition itself. Providers are injected
//! through `OcrProvider`; any error they return is treated as an OCR failure
//! for that page rather than aborting the run.

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::OcrPageResponse;
use super::AssessmentError;

/// Environment variable consulted for the bearer key when none is configured.
pub const DEFAULT_API_KEY_ENV: &str = "SCRIPTGRADE_OCR_API_KEY";

/// Recognizes text on a single page.
pub trait OcrProvider: Send + Sync {
    fn recognize(
        &self,
        page_index: usize,
        png_bytes: &[u8],
    ) -> Result<OcrPageResponse, AssessmentError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090/v1/ocr".into(),
            timeout_secs: 60,
            api_key_env: DEFAULT_API_KEY_ENV.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// HTTP provider
// ═══════════════════════════════════════════════════════════

/// Request body: `{ "image": "<base64 PNG>" }`.
#[derive(Serialize)]
struct OcrRequest<'a> {
    image: &'a str,
}

/// Remote OCR service speaking JSON over HTTP.
pub struct HttpOcrProvider {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpOcrProvider {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, AssessmentError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AssessmentError::OcrProvider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: None,
            client,
            timeout_secs,
        })
    }

    /// Build from config, reading the key from the configured env var if set.
    pub fn from_config(config: &OcrConfig) -> Result<Self, AssessmentError> {
        let provider = Self::new(&config.endpoint, config.timeout_secs)?;
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(provider.with_api_key(key.trim())),
            _ => Ok(provider),
        }
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }
}

impl OcrProvider for HttpOcrProvider {
    fn recognize(
        &self,
        page_index: usize,
        png_bytes: &[u8],
    ) -> Result<OcrPageResponse, AssessmentError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest { image: &encoded });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                AssessmentError::OcrProvider(format!("Cannot reach OCR service at {}", self.endpoint))
            } else if e.is_timeout() {
                AssessmentError::OcrProvider(format!(
                    "OCR request timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                AssessmentError::OcrProvider(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AssessmentError::OcrProvider(format!(
                "OCR service returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: OcrPageResponse = response
            .json()
            .map_err(|e| AssessmentError::OcrProvider(format!("Malformed OCR response: {e}")))?;

        debug!(page = page_index, words = parsed.words.len(), "OCR response received");
        Ok(parsed)
    }
}

// ═══════════════════════════════════════════════════════════
// Replay provider
// ═══════════════════════════════════════════════════════════

/// Serves recorded responses, one per page, from a JSON array.
pub struct ReplayOcrProvider {
    pages: Vec<OcrPageResponse>,
}

impl ReplayOcrProvider {
    pub fn new(pages: Vec<OcrPageResponse>) -> Self {
        Self { pages }
    }

    pub fn from_json(json: &str) -> Result<Self, AssessmentError> {
        let pages: Vec<OcrPageResponse> = serde_json::from_str(json)?;
        Ok(Self::new(pages))
    }

    pub fn from_file(path: &Path) -> Result<Self, AssessmentError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl OcrProvider for ReplayOcrProvider {
    fn recognize(
        &self,
        page_index: usize,
        _png_bytes: &[u8],
    ) -> Result<OcrPageResponse, AssessmentError> {
        self.pages.get(page_index).cloned().ok_or_else(|| {
            AssessmentError::OcrProvider(format!(
                "No recorded OCR response for page {} ({} recorded)",
                page_index + 1,
                self.pages.len()
            ))
        })
    }
}

// ── Mocks for testing ─────────────────────────────────────

/// Returns the same response for every page.
pub struct MockOcrProvider {
    response: OcrPageResponse,
}

impl MockOcrProvider {
    pub fn new(response: OcrPageResponse) -> Self {
        Self { response }
    }

    /// A provider that recognizes nothing.
    pub fn empty() -> Self {
        Self::new(OcrPageResponse {
            text: String::new(),
            words: Vec::new(),
        })
    }
}

impl OcrProvider for MockOcrProvider {
    fn recognize(
        &self,
        _page_index: usize,
        _png_bytes: &[u8],
    ) -> Result<OcrPageResponse, AssessmentError> {
        Ok(self.response.clone())
    }
}

/// Always fails, simulating an unreachable service.
pub struct FailingOcrProvider {
    message: String,
}

impl FailingOcrProvider {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl OcrProvider for FailingOcrProvider {
    fn recognize(
        &self,
        _page_index: usize,
        _png_bytes: &[u8],
    ) -> Result<OcrPageResponse, AssessmentError> {
        Err(AssessmentError::OcrProvider(self.message.clone()))
    }
}
