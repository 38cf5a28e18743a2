//! Core library for invoice extraction with hosted multimodal models.
//!
//! This crate provides:
//! - Document normalization (images and PDFs to page images plus text)
//! - A schema-parameterized extraction prompt and Gemini client with retries
//! - Balanced-brace JSON recovery from free-text model replies
//! - Schema validation and coercion into invoice records
//! - Concurrent batch processing with CSV and JSON export

pub mod batch;
pub mod client;
pub mod error;
pub mod invoice;
pub mod models;
pub mod normalize;
pub mod pdf;

pub use batch::{BatchInput, BatchResult, BatchRunner, CancelHandle, DocumentOutcome, ExportTable, ExtractionFailure, Pipeline};
pub use client::{ExtractionClient, ExtractionRequest, GeminiClient, RetryingClient, render_prompt};
pub use error::{FailureKind, InvexError, Result};
pub use invoice::{ExtractionReply, SchemaValidator, extract_json_object};
pub use models::config::InvexConfig;
pub use models::document::{DocumentKind, NormalizedDocument, PageImage, RawDocument};
pub use models::invoice::{InvoiceRecord, LineItem};
pub use models::schema::InvoiceSchema;
pub use normalize::{Modality, Normalizer, select_modality};
