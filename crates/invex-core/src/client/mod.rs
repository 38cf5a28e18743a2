//! Model provider adapter.
//!
//! One [`ExtractionRequest`] per document goes through an
//! [`ExtractionClient`]. Providers implement a single attempt;
//! [`RetryingClient`] adds the per-call deadline and bounded retries.

mod gemini;
mod prompt;
mod retry;

pub use gemini::GeminiClient;
pub use prompt::render_prompt;
pub use retry::RetryingClient;

use async_trait::async_trait;

use crate::error::{ClientError, InvexError, NormalizeError};
use crate::invoice::ExtractionReply;
use crate::models::document::NormalizedDocument;
use crate::normalize::Modality;

/// A PNG-encoded page ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub page_index: u32,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// Document content sent alongside the prompt.
#[derive(Debug, Clone)]
pub enum ExtractionPayload {
    Images(Vec<EncodedImage>),
    Text(String),
    /// The original PDF file.
    Pdf(Vec<u8>),
}

/// Prompt plus content for one document. Never empty.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    filename: String,
    prompt: String,
    payload: ExtractionPayload,
}

impl ExtractionRequest {
    /// Fails with [`ClientError::EmptyRequest`] when the payload has no
    /// pages, only blank text or an empty file.
    pub fn new(
        filename: impl Into<String>,
        prompt: impl Into<String>,
        payload: ExtractionPayload,
    ) -> Result<Self, ClientError> {
        let filename = filename.into();
        let empty = match &payload {
            ExtractionPayload::Images(images) => images.is_empty(),
            ExtractionPayload::Text(text) => text.trim().is_empty(),
            ExtractionPayload::Pdf(data) => data.is_empty(),
        };
        if empty {
            return Err(ClientError::EmptyRequest(filename));
        }
        Ok(Self {
            filename,
            prompt: prompt.into(),
            payload,
        })
    }

    /// Build the request for `doc` in the chosen modality.
    pub fn from_document(
        doc: &NormalizedDocument,
        modality: Modality,
        prompt: &str,
    ) -> Result<Self, InvexError> {
        let payload = match modality {
            Modality::Images => {
                let mut images = Vec::with_capacity(doc.pages.len());
                for page in &doc.pages {
                    let data = page.to_png().map_err(|e| {
                        NormalizeError::CorruptDocument(format!(
                            "failed to encode page {}: {}",
                            page.page_index, e
                        ))
                    })?;
                    images.push(EncodedImage {
                        page_index: page.page_index,
                        mime_type: "image/png",
                        data,
                    });
                }
                ExtractionPayload::Images(images)
            }
            Modality::Text => ExtractionPayload::Text(doc.first_page_text.clone().unwrap_or_default()),
            Modality::Pdf => ExtractionPayload::Pdf(doc.source_pdf.clone().unwrap_or_default()),
        };

        Ok(Self::new(doc.filename.clone(), prompt, payload)?)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn payload(&self) -> &ExtractionPayload {
        &self.payload
    }
}

/// A hosted multimodal model.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Perform one call and return the raw reply text.
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionReply, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{DocumentKind, PageImage};
    use image::DynamicImage;

    #[test]
    fn test_empty_requests_rejected() {
        let err = ExtractionRequest::new("a.pdf", "p", ExtractionPayload::Images(vec![])).unwrap_err();
        assert!(matches!(err, ClientError::EmptyRequest(f) if f == "a.pdf"));

        let err = ExtractionRequest::new("b.pdf", "p", ExtractionPayload::Text("  \n".into())).unwrap_err();
        assert!(matches!(err, ClientError::EmptyRequest(_)));
    }

    #[test]
    fn test_from_document_encodes_pages() {
        let doc = NormalizedDocument {
            filename: "two.pdf".to_string(),
            kind: DocumentKind::Pdf,
            pages: vec![
                PageImage::new(0, DynamicImage::new_rgb8(2, 2)),
                PageImage::new(1, DynamicImage::new_rgb8(2, 2)),
            ],
            first_page_text: Some("Invoice".to_string()),
            page_count: 2,
            source_pdf: Some(b"%PDF-1.5".to_vec()),
        };

        let request = ExtractionRequest::from_document(&doc, Modality::Images, "prompt").unwrap();
        match request.payload() {
            ExtractionPayload::Images(images) => {
                assert_eq!(images.len(), 2);
                assert_eq!(images[1].page_index, 1);
                assert_eq!(images[0].mime_type, "image/png");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let request = ExtractionRequest::from_document(&doc, Modality::Text, "prompt").unwrap();
        assert!(matches!(request.payload(), ExtractionPayload::Text(t) if t == "Invoice"));

        let request = ExtractionRequest::from_document(&doc, Modality::Pdf, "prompt").unwrap();
        assert!(matches!(request.payload(), ExtractionPayload::Pdf(d) if d.starts_with(b"%PDF")));
    }

    #[test]
    fn test_from_document_text_without_text_is_empty() {
        let doc = NormalizedDocument {
            filename: "img.png".to_string(),
            kind: DocumentKind::Image,
            pages: vec![],
            first_page_text: None,
            page_count: 1,
            source_pdf: None,
        };
        let err = ExtractionRequest::from_document(&doc, Modality::Text, "prompt").unwrap_err();
        assert!(matches!(err, InvexError::Client(ClientError::EmptyRequest(_))));

        let err = ExtractionRequest::from_document(&doc, Modality::Pdf, "prompt").unwrap_err();
        assert!(matches!(err, InvexError::Client(ClientError::EmptyRequest(_))));
    }
}
