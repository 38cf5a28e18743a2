//! PDF page text and raster extraction using lopdf and pdf-extract.

use std::panic::{AssertUnwindSafe, catch_unwind};

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgba};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::{MAX_RENDER_SIDE, PdfProcessor, Result, page_pixels};
use crate::error::NormalizeError;

/// PDF extractor using lopdf.
///
/// Renders a page by taking its largest embedded raster image (scanned
/// invoices are one image per page) and resampling it to the page's
/// MediaBox at the requested DPI. Pages drawn from vectors and text have no
/// such image; [`PdfiumRenderer`](super::PdfiumRenderer) rasterizes those.
pub struct PdfExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
    page_texts: Option<Vec<String>>,
}

impl PdfExtractor {
    /// Create a new PDF extractor.
    pub fn new() -> Self {
        Self {
            document: None,
            raw_data: Vec::new(),
            page_texts: None,
        }
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or_else(|| NormalizeError::CorruptDocument("no document loaded".to_string()))
    }

    fn page_id(&self, page: u32) -> Result<ObjectId> {
        self.document()?
            .get_pages()
            .get(&page)
            .copied()
            .ok_or_else(|| NormalizeError::CorruptDocument(format!("invalid page number: {}", page)))
    }

    /// Page texts via pdf-extract. Its parser panics on some malformed
    /// inputs, so a panic is treated as "no text".
    fn load_page_texts(data: &[u8]) -> Option<Vec<String>> {
        match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(data))) {
            Ok(Ok(pages)) => Some(pages),
            Ok(Err(e)) => {
                debug!("PDF text extraction failed: {}", e);
                None
            }
            Err(_) => {
                warn!("PDF text extractor panicked, continuing without text");
                None
            }
        }
    }

    /// Images referenced from the page's XObject resources.
    fn page_images(&self, doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
        let mut images = Vec::new();

        let Some(resources) = inherited_dictionary(doc, page_id, b"Resources") else {
            return images;
        };

        if let Ok(xobjects) = resources.get(b"XObject") {
            if let Ok((_, Object::Dictionary(xobj_dict))) = doc.dereference(xobjects) {
                for (name, obj_ref) in xobj_dict.iter() {
                    if let Ok((_, obj)) = doc.dereference(obj_ref) {
                        if let Some(img) = decode_image_object(doc, obj) {
                            trace!("Decoded XObject {}", String::from_utf8_lossy(name));
                            images.push(img);
                        }
                    }
                }
            }
        }

        images
    }

    /// Width and height of the page MediaBox in points.
    fn media_box(&self, doc: &Document, page_id: ObjectId) -> Option<(f64, f64)> {
        let mut node_id = page_id;
        loop {
            let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
                return None;
            };
            if let Ok(obj) = dict.get(b"MediaBox") {
                let values: Vec<f64> = match doc.dereference(obj) {
                    Ok((_, Object::Array(arr))) => arr.iter().filter_map(number).collect(),
                    _ => Vec::new(),
                };
                if values.len() == 4 {
                    return Some((values[2] - values[0], values[3] - values[1]));
                }
                return None;
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent_id)) => node_id = *parent_id,
                _ => return None,
            }
        }
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor for PdfExtractor {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data)
            .map_err(|e| NormalizeError::CorruptDocument(format!("failed to parse PDF: {}", e)))?;

        // Handle PDFs with empty password encryption
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(NormalizeError::CorruptDocument("PDF is encrypted".to_string()));
            }
            debug!("Decrypted PDF with empty password");

            let mut decrypted_data = Vec::new();
            doc.save_to(&mut decrypted_data).map_err(|e| {
                NormalizeError::CorruptDocument(format!("failed to save decrypted PDF: {}", e))
            })?;
            self.raw_data = decrypted_data;
        } else {
            self.raw_data = data.to_vec();
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(NormalizeError::CorruptDocument("PDF has no pages".to_string()));
        }

        debug!("Loaded PDF with {} pages", page_count);
        self.document = Some(doc);
        self.page_texts = None;
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn extract_page_text(&self, page: u32) -> Result<String> {
        self.page_id(page)?;

        let texts = match &self.page_texts {
            Some(texts) => texts.clone(),
            None => Self::load_page_texts(&self.raw_data).unwrap_or_default(),
        };

        Ok(texts
            .get((page - 1) as usize)
            .map(|t| t.trim().to_string())
            .unwrap_or_default())
    }

    fn render_page(&self, page: u32, dpi: u32) -> Result<Option<DynamicImage>> {
        let doc = self.document()?;
        let page_id = self.page_id(page)?;

        let images = self.page_images(doc, page_id);
        let Some(largest) = images
            .into_iter()
            .max_by_key(|img| img.width() as u64 * img.height() as u64)
        else {
            debug!("Page {} has no raster content", page);
            return Ok(None);
        };

        let Some((width_pt, height_pt)) = self.media_box(doc, page_id) else {
            debug!("Page {} has no MediaBox, keeping native image size", page);
            return Ok(Some(largest));
        };

        let (width, height) = page_pixels(width_pt, height_pt, dpi);
        if width > MAX_RENDER_SIDE || height > MAX_RENDER_SIDE {
            return Err(NormalizeError::CorruptDocument(format!(
                "page {} renders to {}x{} pixels at {} DPI",
                page, width, height, dpi
            )));
        }

        trace!(
            "Resampling page {} from {}x{} to {}x{}",
            page,
            largest.width(),
            largest.height(),
            width,
            height
        );
        Ok(Some(largest.resize_exact(width, height, FilterType::Triangle)))
    }
}

impl PdfExtractor {
    /// Extract text for every page once, so repeated page lookups are cheap.
    pub fn cache_page_texts(&mut self) {
        if self.page_texts.is_none() {
            self.page_texts = Some(Self::load_page_texts(&self.raw_data).unwrap_or_default());
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Look up a dictionary-valued key on a page, walking up the page tree for
/// inherited attributes.
fn inherited_dictionary(doc: &Document, node_id: ObjectId, key: &[u8]) -> Option<Dictionary> {
    let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
        return None;
    };

    if let Ok(value) = dict.get(key) {
        if let Ok((_, Object::Dictionary(found))) = doc.dereference(value) {
            return Some(found.clone());
        }
    }

    match dict.get(b"Parent") {
        Ok(Object::Reference(parent_id)) => inherited_dictionary(doc, *parent_id, key),
        _ => None,
    }
}

fn decode_image_object(doc: &Document, obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;

    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = image_side(dict, b"Width")?;
    let height = image_side(dict, b"Height")?;

    if let Ok(filter) = dict.get(b"Filter") {
        let filter_name = match filter {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) if !arr.is_empty() => arr.last().and_then(|o| o.as_name().ok()),
            _ => None,
        };

        match filter_name {
            Some(b"DCTDecode") => {
                return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                    .ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                trace!("Skipping image with unsupported filter");
                return None;
            }
            _ => {}
        }
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
            Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);

    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    raw_to_rgba(&data, width, height, color_space)
}

/// A declared image dimension, rejected when it is not in `1..=MAX_RENDER_SIDE`.
fn image_side(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    let value = dict.get(key).ok()?.as_i64().ok()?;
    match u32::try_from(value) {
        Ok(side) if (1..=MAX_RENDER_SIDE).contains(&side) => Some(side),
        _ => {
            trace!("Rejecting image {} of {}", String::from_utf8_lossy(key), value);
            None
        }
    }
}

fn raw_to_rgba(data: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<DynamicImage> {
    let components = match color_space {
        b"DeviceRGB" | b"RGB" => 3,
        b"DeviceGray" | b"G" => 1,
        b"DeviceCMYK" | b"CMYK" => 4,
        _ => 0,
    };
    let pixels = (width as usize).checked_mul(height as usize)?;
    let expected = pixels.checked_mul(components)?;

    if components == 0 || data.len() < expected {
        trace!(
            "Could not decode {}x{} image, colorspace={:?}, data_len={}",
            width,
            height,
            String::from_utf8_lossy(color_space),
            data.len()
        );
        return None;
    }

    let mut rgba = Vec::with_capacity(pixels.checked_mul(4)?);
    match components {
        3 => {
            for chunk in data[..expected].chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
        }
        1 => {
            for &gray in &data[..expected] {
                rgba.extend_from_slice(&[gray, gray, gray, 255]);
            }
        }
        _ => {
            for chunk in data[..expected].chunks_exact(4) {
                let k = 255 - chunk[3] as u16;
                let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
                rgba.extend_from_slice(&[channel(chunk[0]), channel(chunk[1]), channel(chunk[2]), 255]);
            }
        }
    }

    ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba).map(DynamicImage::ImageRgba8)
}
