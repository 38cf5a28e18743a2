//! PDF processing module.

mod extractor;
mod pdfium;

pub use extractor::PdfExtractor;
pub use pdfium::PdfiumRenderer;

#[cfg(test)]
pub(crate) use extractor::tests as extractor_tests;

use crate::error::NormalizeError;
use image::DynamicImage;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// PDF points per inch.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Upper bound on either side of a rendered page or embedded image.
pub(crate) const MAX_RENDER_SIDE: u32 = 12_000;

/// Trait for PDF processing implementations.
///
/// Page numbers are 1-indexed, matching the PDF page tree.
pub trait PdfProcessor {
    /// Load a PDF from bytes.
    fn load(&mut self, data: &[u8]) -> Result<()>;

    /// Get the number of pages in the PDF.
    fn page_count(&self) -> u32;

    /// Extract text from a specific page.
    fn extract_page_text(&self, page: u32) -> Result<String>;

    /// Render a page at the given DPI. `None` when the page carries nothing
    /// this processor can rasterize.
    fn render_page(&self, page: u32, dpi: u32) -> Result<Option<DynamicImage>>;
}

/// Pixel size of a page box at `dpi`.
pub fn page_pixels(width_pt: f64, height_pt: f64, dpi: u32) -> (u32, u32) {
    let scale = dpi as f64 / POINTS_PER_INCH;
    let w = (width_pt.abs() * scale).round().max(1.0) as u32;
    let h = (height_pt.abs() * scale).round().max(1.0) as u32;
    (w, h)
}
