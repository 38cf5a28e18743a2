//! Uploaded documents and their normalized page form.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Declared kind of an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Image,
    Pdf,
    /// Anything else; carries the declared MIME type or extension.
    Unsupported(String),
}

impl DocumentKind {
    /// Classify a MIME type such as `image/png` or `application/pdf`.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_lowercase();
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            "application/pdf" => DocumentKind::Pdf,
            "image/png" | "image/jpeg" | "image/jpg" | "image/webp" | "image/tiff"
            | "image/bmp" | "image/gif" => DocumentKind::Image,
            other => DocumentKind::Unsupported(other.to_string()),
        }
    }

    /// Guess the kind from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "pdf" => DocumentKind::Pdf,
            "png" | "jpg" | "jpeg" | "webp" | "tiff" | "tif" | "bmp" | "gif" => DocumentKind::Image,
            _ => DocumentKind::Unsupported(extension),
        }
    }
}

/// An uploaded document. Immutable once created.
#[derive(Debug, Clone)]
pub struct RawDocument {
    filename: String,
    kind: DocumentKind,
    bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(filename: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            kind,
            bytes,
        }
    }

    /// Read a file from disk, guessing its kind from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Self::new(filename, DocumentKind::from_path(path), bytes))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn kind(&self) -> &DocumentKind {
        &self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Same content under a different filename.
    pub(crate) fn renamed(mut self, filename: String) -> Self {
        self.filename = filename;
        self
    }
}

/// One rasterized page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based index of the source page.
    pub page_index: u32,
    pub bitmap: RgbaImage,
}

impl PageImage {
    pub fn new(page_index: u32, image: DynamicImage) -> Self {
        Self {
            page_index,
            bitmap: image.to_rgba8(),
        }
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Encode the page as PNG for the provider payload.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut data = Vec::new();
        self.bitmap
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)?;
        Ok(data)
    }
}

/// Normalizer output for one document.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub filename: String,
    pub kind: DocumentKind,
    /// Page indices are strictly increasing.
    pub pages: Vec<PageImage>,
    /// Text of the first PDF page, when any was extractable.
    pub first_page_text: Option<String>,
    /// Pages the normalizer attempted to render.
    pub page_count: u32,
    /// The original file, kept for PDFs so it can be sent as is.
    pub source_pdf: Option<Vec<u8>>,
}

impl NormalizedDocument {
    /// Whether every attempted page produced an image.
    pub fn all_pages_rendered(&self) -> bool {
        !self.pages.is_empty() && self.pages.len() as u32 == self.page_count
    }
}
