//! Document normalization: uploaded artifact to ordered page images.

use tracing::{debug, warn};

use crate::error::NormalizeError;
use crate::models::config::{ModalityPolicy, PdfConfig, PdfRenderer};
use crate::models::document::{DocumentKind, NormalizedDocument, PageImage, RawDocument};
use crate::pdf::{PdfExtractor, PdfProcessor, PdfiumRenderer};

/// Representation of a document sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Rasterized page images.
    Images,
    /// First-page text only.
    Text,
    /// The original PDF file.
    Pdf,
}

/// Converts raw uploads into page images. Performs no network I/O.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: PdfConfig,
}

impl Normalizer {
    pub fn new(config: PdfConfig) -> Self {
        Self { config }
    }

    /// Normalize with the configured renderer.
    pub fn normalize(&self, doc: &RawDocument) -> Result<NormalizedDocument, NormalizeError> {
        if *doc.kind() != DocumentKind::Pdf {
            return self.normalize_with(doc, &mut PdfExtractor::new());
        }

        let library_dir = self.config.pdfium_library_dir.as_deref();
        match self.config.renderer {
            PdfRenderer::Embedded => self.normalize_embedded(doc),
            PdfRenderer::Pdfium => {
                let mut renderer = PdfiumRenderer::bind(library_dir).map_err(|e| {
                    NormalizeError::CorruptDocument(format!("pdfium is not available: {}", e))
                })?;
                self.normalize_with(doc, &mut renderer)
            }
            PdfRenderer::Auto => match PdfiumRenderer::bind(library_dir) {
                Ok(mut renderer) => self.normalize_with(doc, &mut renderer),
                Err(e) => {
                    debug!("pdfium not available ({}), using embedded page images", e);
                    self.normalize_embedded(doc)
                }
            },
        }
    }

    fn normalize_embedded(&self, doc: &RawDocument) -> Result<NormalizedDocument, NormalizeError> {
        let mut extractor = PdfExtractor::new();
        extractor.load(doc.bytes())?;
        extractor.cache_page_texts();
        self.normalize_pdf(doc, &extractor)
    }

    /// Normalize with a caller-supplied PDF processor.
    pub fn normalize_with<P: PdfProcessor>(
        &self,
        doc: &RawDocument,
        processor: &mut P,
    ) -> Result<NormalizedDocument, NormalizeError> {
        match doc.kind() {
            DocumentKind::Pdf => {
                processor.load(doc.bytes())?;
                self.normalize_pdf(doc, processor)
            }
            DocumentKind::Image => decode_image(doc),
            DocumentKind::Unsupported(kind) => Err(unsupported(kind)),
        }
    }

    fn normalize_pdf<P: PdfProcessor>(
        &self,
        doc: &RawDocument,
        processor: &P,
    ) -> Result<NormalizedDocument, NormalizeError> {
        let page_count = processor.page_count();
        let limit = match self.config.max_pages {
            0 => page_count,
            n => page_count.min(u32::try_from(n).unwrap_or(u32::MAX)),
        };

        let mut pages = Vec::with_capacity(limit as usize);
        for page in 1..=limit {
            match processor.render_page(page, self.config.render_dpi)? {
                Some(image) => pages.push(PageImage::new(page - 1, image)),
                None => warn!("{}: page {} has no raster content", doc.filename(), page),
            }
        }

        let first_page_text = match processor.extract_page_text(1) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!("{}: no first-page text: {}", doc.filename(), e);
                None
            }
        };

        debug!(
            "Normalized {}: {} of {} pages rendered at {} DPI, text={}",
            doc.filename(),
            pages.len(),
            page_count,
            self.config.render_dpi,
            first_page_text.as_ref().map(|t| t.len()).unwrap_or(0)
        );

        Ok(NormalizedDocument {
            filename: doc.filename().to_string(),
            kind: DocumentKind::Pdf,
            pages,
            first_page_text,
            page_count: limit,
            source_pdf: Some(doc.bytes().to_vec()),
        })
    }
}

fn decode_image(doc: &RawDocument) -> Result<NormalizedDocument, NormalizeError> {
    let image = image::load_from_memory(doc.bytes())
        .map_err(|e| NormalizeError::CorruptDocument(format!("failed to decode image: {}", e)))?;
    debug!(
        "Decoded image {} ({}x{})",
        doc.filename(),
        image.width(),
        image.height()
    );
    Ok(NormalizedDocument {
        filename: doc.filename().to_string(),
        kind: DocumentKind::Image,
        pages: vec![PageImage::new(0, image)],
        first_page_text: None,
        page_count: 1,
        source_pdf: None,
    })
}

fn unsupported(kind: &str) -> NormalizeError {
    if kind.is_empty() {
        NormalizeError::UnsupportedFormat("unknown".to_string())
    } else {
        NormalizeError::UnsupportedFormat(kind.to_string())
    }
}

/// Decide which representation of `doc` goes to the model.
///
/// `Auto` prefers page images when every page rendered. A PDF with pages
/// that could not be rasterized is sent as the file itself so no page is
/// lost; first-page text is the last resort.
pub fn select_modality(
    doc: &NormalizedDocument,
    policy: ModalityPolicy,
    min_text_length: usize,
) -> Result<Modality, NormalizeError> {
    let has_pages = !doc.pages.is_empty();
    let has_pdf = doc.source_pdf.as_ref().is_some_and(|pdf| !pdf.is_empty());
    let has_text = doc
        .first_page_text
        .as_deref()
        .map(|t| !t.trim().is_empty() && t.trim().chars().count() >= min_text_length)
        .unwrap_or(false);

    match policy {
        ModalityPolicy::Auto if doc.all_pages_rendered() => Ok(Modality::Images),
        ModalityPolicy::Auto if has_pdf => Ok(Modality::Pdf),
        ModalityPolicy::Auto if has_pages => Ok(Modality::Images),
        ModalityPolicy::Auto if has_text => Ok(Modality::Text),
        ModalityPolicy::Auto => Err(NormalizeError::CorruptDocument(
            "no extractable content".to_string(),
        )),
        ModalityPolicy::Image if has_pages => Ok(Modality::Images),
        ModalityPolicy::Image => Err(NormalizeError::CorruptDocument(
            "no renderable pages for image extraction".to_string(),
        )),
        ModalityPolicy::Text if has_text => Ok(Modality::Text),
        ModalityPolicy::Text => Err(NormalizeError::CorruptDocument(
            "no extractable text for text extraction".to_string(),
        )),
        ModalityPolicy::Pdf if has_pdf => Ok(Modality::Pdf),
        ModalityPolicy::Pdf => Err(NormalizeError::UnsupportedFormat(format!(
            "{:?} document for PDF extraction",
            doc.kind
        ))),
    }
}
