//! Configuration structures for the extraction pipeline.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::schema::InvoiceSchema;

/// Main configuration for the invex pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvexConfig {
    /// Model provider configuration.
    pub model: ModelConfig,

    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// Batch scheduling configuration.
    pub batch: BatchConfig,

    /// Extraction and validation configuration.
    pub extraction: ExtractionConfig,
}

/// Hosted model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Which hosted model to call.
    pub model_identifier: String,

    /// Base URL of the generative language API.
    pub endpoint: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-call deadline in seconds.
    pub request_timeout_secs: u64,

    /// Retries after the first attempt, transport failures only.
    pub max_retries: usize,

    /// Initial backoff delay between retries.
    pub retry_min_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_identifier: "gemini-2.0-flash-lite".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_secs: 60,
            max_retries: 2,
            retry_min_delay_ms: 500,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_min_delay(&self) -> Duration {
        Duration::from_millis(self.retry_min_delay_ms)
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// DPI for rendering PDF pages to images.
    pub render_dpi: u32,

    /// Maximum pages to render (0 = unlimited).
    pub max_pages: usize,

    /// Minimum first-page text length to allow the text-only path.
    pub min_text_length: usize,

    /// Page rasterizer.
    pub renderer: PdfRenderer,

    /// Directory holding the pdfium shared library (system search path when unset).
    pub pdfium_library_dir: Option<String>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            render_dpi: 150,
            max_pages: 0,
            min_text_length: 20,
            renderer: PdfRenderer::Auto,
            pdfium_library_dir: None,
        }
    }
}

/// How PDF pages become images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfRenderer {
    /// pdfium when its library can be loaded, embedded images otherwise.
    #[default]
    Auto,
    /// pdfium only; documents fail when the library is missing.
    Pdfium,
    /// The largest embedded image of each page, no external library.
    Embedded,
}

/// Batch scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Documents processed concurrently.
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// Which representation of a document is sent to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityPolicy {
    /// Page images when every page rendered, otherwise the PDF file itself,
    /// otherwise first-page text.
    #[default]
    Auto,
    /// Always page images.
    Image,
    /// Always first-page text.
    Text,
    /// Always the original PDF file.
    Pdf,
}

/// Extraction and validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub modality: ModalityPolicy,

    /// Field set to extract.
    pub schema: InvoiceSchema,

    /// Allowed difference between quantity x price and amount.
    pub amount_tolerance: Decimal,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            modality: ModalityPolicy::Auto,
            schema: InvoiceSchema::default(),
            amount_tolerance: Decimal::new(1, 2),
        }
    }
}

impl InvexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        config
            .check()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Reject values the pipeline cannot run with.
    pub fn check(&self) -> Result<(), String> {
        if self.pdf.render_dpi == 0 {
            return Err("pdf.render_dpi must be positive".to_string());
        }
        if self.batch.max_concurrency == 0 {
            return Err("batch.max_concurrency must be at least 1".to_string());
        }
        if self.model.request_timeout_secs == 0 {
            return Err("model.request_timeout_secs must be positive".to_string());
        }
        if self.extraction.amount_tolerance.is_sign_negative() {
            return Err("extraction.amount_tolerance must not be negative".to_string());
        }
        self.extraction.schema.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InvexConfig::default();
        assert_eq!(config.pdf.render_dpi, 150);
        assert_eq!(config.model.max_retries, 2);
        assert_eq!(config.model.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.extraction.amount_tolerance, Decimal::new(1, 2));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: InvexConfig =
            serde_json::from_str(r#"{"batch":{"max_concurrency":8},"extraction":{"modality":"text"}}"#)
                .unwrap();
        assert_eq!(config.batch.max_concurrency, 8);
        assert_eq!(config.extraction.modality, ModalityPolicy::Text);
        assert_eq!(config.pdf.render_dpi, 150);
        assert_eq!(config.extraction.schema, InvoiceSchema::default());
        assert_eq!(config.pdf.renderer, PdfRenderer::Auto);
    }

    #[test]
    fn test_renderer_and_pdf_modality_from_json() {
        let config: InvexConfig = serde_json::from_str(
            r#"{"pdf":{"renderer":"embedded","pdfium_library_dir":"./lib"},"extraction":{"modality":"pdf"}}"#,
        )
        .unwrap();
        assert_eq!(config.pdf.renderer, PdfRenderer::Embedded);
        assert_eq!(config.pdf.pdfium_library_dir.as_deref(), Some("./lib"));
        assert_eq!(config.extraction.modality, ModalityPolicy::Pdf);
    }

    #[test]
    fn test_check_rejects_zero_concurrency() {
        let mut config = InvexConfig::default();
        config.batch.max_concurrency = 0;
        assert!(config.check().is_err());
    }
}
