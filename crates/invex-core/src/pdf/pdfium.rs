//! Full page rasterization through the pdfium library.

use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use tracing::{debug, trace};

use super::{MAX_RENDER_SIDE, PdfProcessor, Result, page_pixels};
use crate::error::NormalizeError;

/// PDF processor backed by pdfium.
///
/// Unlike [`PdfExtractor`](super::PdfExtractor) it draws every page,
/// including vector graphics and text. pdfium is loaded at runtime, so
/// [`bind`](Self::bind) fails on hosts without the shared library.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
    data: Vec<u8>,
    page_texts: Vec<String>,
}

impl PdfiumRenderer {
    /// Bind pdfium from `library_dir`, falling back to the system library.
    pub fn bind(library_dir: Option<&str>) -> std::result::Result<Self, PdfiumError> {
        let bindings = match library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                .or_else(|_| Pdfium::bind_to_system_library())?,
            None => Pdfium::bind_to_system_library()?,
        };

        Ok(Self {
            pdfium: Pdfium::new(bindings),
            data: Vec::new(),
            page_texts: Vec::new(),
        })
    }

    fn open(&self) -> Result<PdfDocument<'_>> {
        self.pdfium
            .load_pdf_from_byte_slice(&self.data, None)
            .map_err(|e| corrupt("failed to parse PDF", e))
    }
}

impl PdfProcessor for PdfiumRenderer {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();

        let texts: Vec<String> = {
            let document = self.open()?;
            document
                .pages()
                .iter()
                .map(|page| page.text().map(|t| t.all()).unwrap_or_default())
                .collect()
        };

        if texts.is_empty() {
            return Err(NormalizeError::CorruptDocument("PDF has no pages".to_string()));
        }

        debug!("Loaded PDF with {} pages through pdfium", texts.len());
        self.page_texts = texts;
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.page_texts.len() as u32
    }

    fn extract_page_text(&self, page: u32) -> Result<String> {
        self.page_texts
            .get((page as usize).wrapping_sub(1))
            .map(|t| t.trim().to_string())
            .ok_or_else(|| NormalizeError::CorruptDocument(format!("invalid page number: {}", page)))
    }

    fn render_page(&self, page: u32, dpi: u32) -> Result<Option<DynamicImage>> {
        if page == 0 || page > self.page_count() {
            return Err(NormalizeError::CorruptDocument(format!("invalid page number: {}", page)));
        }

        let document = self.open()?;
        let index = u16::try_from(page - 1)
            .map_err(|_| NormalizeError::CorruptDocument(format!("invalid page number: {}", page)))?;
        let pdf_page = document
            .pages()
            .get(index)
            .map_err(|e| corrupt(&format!("failed to open page {}", page), e))?;

        let (width, height) = page_pixels(pdf_page.width().value as f64, pdf_page.height().value as f64, dpi);
        if width > MAX_RENDER_SIDE || height > MAX_RENDER_SIDE {
            return Err(NormalizeError::CorruptDocument(format!(
                "page {} renders to {}x{} pixels at {} DPI",
                page, width, height, dpi
            )));
        }

        let config = PdfRenderConfig::new()
            .set_target_size(width as i32, height as i32)
            .render_annotations(true);
        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|e| corrupt(&format!("failed to render page {}", page), e))?;

        trace!("Rendered page {} at {}x{}", page, bitmap.width(), bitmap.height());
        let image = RgbaImage::from_raw(bitmap.width() as u32, bitmap.height() as u32, bitmap.as_rgba_bytes())
            .ok_or_else(|| NormalizeError::CorruptDocument(format!("page {} bitmap has an unexpected size", page)))?;
        Ok(Some(DynamicImage::ImageRgba8(image)))
    }
}

fn corrupt(context: &str, err: PdfiumError) -> NormalizeError {
    NormalizeError::CorruptDocument(format!("{}: {}", context, err))
}
