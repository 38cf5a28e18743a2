//! Single-document pipeline and the bounded-concurrency batch runner.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::result::{BatchResult, DocumentOutcome, ExtractionFailure};
use crate::client::{ExtractionClient, ExtractionRequest, render_prompt};
use crate::error::{FailureKind, InvexError};
use crate::invoice::{ExtractionReply, SchemaValidator};
use crate::models::config::{InvexConfig, ModalityPolicy};
use crate::models::document::RawDocument;
use crate::normalize::{Normalizer, select_modality};

/// Stops a running batch from starting further documents.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize, prompt, call, parse and validate one document.
pub struct Pipeline {
    normalizer: Normalizer,
    validator: SchemaValidator,
    prompt: String,
    modality: ModalityPolicy,
    min_text_length: usize,
    client: Arc<dyn ExtractionClient>,
}

impl Pipeline {
    pub fn new(config: &InvexConfig, client: Arc<dyn ExtractionClient>) -> Self {
        let schema = config.extraction.schema.clone();
        Self {
            normalizer: Normalizer::new(config.pdf.clone()),
            prompt: render_prompt(&schema),
            validator: SchemaValidator::new(schema).with_tolerance(config.extraction.amount_tolerance),
            modality: config.extraction.modality,
            min_text_length: config.pdf.min_text_length,
            client,
        }
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Always yields an outcome; failures are scoped to this document.
    pub async fn process(&self, doc: RawDocument) -> DocumentOutcome {
        let filename = doc.filename().to_string();

        let normalizer = self.normalizer.clone();
        let normalized = match tokio::task::spawn_blocking(move || normalizer.normalize(&doc)).await {
            Ok(Ok(normalized)) => normalized,
            Ok(Err(e)) => return failed(&filename, FailureKind::from(&e), e.to_string()),
            Err(e) => {
                return failed(
                    &filename,
                    FailureKind::CorruptDocument,
                    format!("normalization task failed: {}", e),
                );
            }
        };

        let modality = match select_modality(&normalized, self.modality, self.min_text_length) {
            Ok(modality) => modality,
            Err(e) => return failed(&filename, FailureKind::from(&e), e.to_string()),
        };
        debug!("{}: sending {:?} to the model", filename, modality);

        let request = match ExtractionRequest::from_document(&normalized, modality, &self.prompt) {
            Ok(request) => request,
            Err(e) => return failed(&filename, FailureKind::from(&e), e.to_string()),
        };
        drop(normalized);

        match self.client.extract(&request).await {
            Ok(reply) => outcome_from_reply(&reply, &self.validator),
            Err(e) => {
                warn!("{}: extraction failed: {}", filename, e);
                failed(&filename, FailureKind::from(&e), e.to_string())
            }
        }
    }
}

/// Parse and validate a raw model reply.
///
/// Unparseable replies become [`FailureKind::MalformedReply`] with the raw
/// text preserved.
pub fn outcome_from_reply(reply: &ExtractionReply, validator: &SchemaValidator) -> DocumentOutcome {
    match reply.parse() {
        Ok(object) => {
            let record = validator.validate(&object);
            if record.has_warnings() {
                debug!("{}: {} warnings", reply.filename, record.warnings.len());
            }
            DocumentOutcome::Extracted(record)
        }
        Err(e) => {
            let error = InvexError::from(e);
            DocumentOutcome::Failed(
                ExtractionFailure::new(FailureKind::from(&error), &reply.filename, error.to_string())
                    .with_raw_reply(&reply.text),
            )
        }
    }
}

fn failed(filename: &str, kind: FailureKind, message: String) -> DocumentOutcome {
    DocumentOutcome::Failed(ExtractionFailure::new(kind, filename, message))
}

/// One batch entry.
#[derive(Debug, Clone)]
pub enum BatchInput {
    /// A document to run through the pipeline.
    Document(RawDocument),
    /// A document that failed before it could be read, recorded as is.
    Failed(ExtractionFailure),
}

impl BatchInput {
    pub fn filename(&self) -> &str {
        match self {
            BatchInput::Document(doc) => doc.filename(),
            BatchInput::Failed(failure) => &failure.filename,
        }
    }

    fn renamed(self, filename: String) -> Self {
        match self {
            BatchInput::Document(doc) => BatchInput::Document(doc.renamed(filename)),
            BatchInput::Failed(failure) => BatchInput::Failed(ExtractionFailure { filename, ..failure }),
        }
    }
}

impl From<RawDocument> for BatchInput {
    fn from(doc: RawDocument) -> Self {
        BatchInput::Document(doc)
    }
}

impl From<ExtractionFailure> for BatchInput {
    fn from(failure: ExtractionFailure) -> Self {
        BatchInput::Failed(failure)
    }
}

/// Drives many documents through one [`Pipeline`] concurrently.
pub struct BatchRunner {
    pipeline: Pipeline,
    result_template: BatchResult,
    max_concurrency: usize,
}

impl BatchRunner {
    pub fn new(config: &InvexConfig, client: Arc<dyn ExtractionClient>) -> Self {
        Self {
            pipeline: Pipeline::new(config, client),
            result_template: BatchResult::new(&config.extraction.schema),
            max_concurrency: config.batch.max_concurrency.max(1),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn run<D: Into<BatchInput>>(&self, docs: Vec<D>, cancel: CancelHandle) -> BatchResult {
        self.run_with_progress(docs, cancel, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_done` as each document completes.
    pub async fn run_with_progress<D, F>(&self, docs: Vec<D>, cancel: CancelHandle, mut on_done: F) -> BatchResult
    where
        D: Into<BatchInput>,
        F: FnMut(&str, &DocumentOutcome),
    {
        let docs = disambiguate(docs.into_iter().map(Into::into).collect());
        info!(
            "Processing {} documents with concurrency {}",
            docs.len(),
            self.max_concurrency
        );

        let pipeline = &self.pipeline;
        let mut outcomes = stream::iter(docs.into_iter().map(|input| {
            let cancel = cancel.clone();
            async move {
                let filename = input.filename().to_string();
                let doc = match input {
                    BatchInput::Document(doc) => doc,
                    BatchInput::Failed(failure) => return (filename, DocumentOutcome::Failed(failure)),
                };
                if cancel.is_cancelled() {
                    let failure = ExtractionFailure::cancelled(&filename);
                    return (filename, DocumentOutcome::Failed(failure));
                }
                let outcome = pipeline.process(doc).await;
                (filename, outcome)
            }
        }))
        .buffer_unordered(self.max_concurrency);

        let mut result = self.result_template.clone();
        while let Some((filename, outcome)) = outcomes.next().await {
            on_done(&filename, &outcome);
            if let Err(e) = result.insert(filename, outcome) {
                error!("{}", e);
            }
        }

        info!(
            "Batch finished: {} extracted, {} failed",
            result.extracted_count(),
            result.len() - result.extracted_count()
        );
        result
    }
}

/// Rename repeated filenames to `name#2`, `name#3`, ...
fn disambiguate(docs: Vec<BatchInput>) -> Vec<BatchInput> {
    let mut used = HashSet::new();
    docs.into_iter()
        .map(|doc| {
            if used.insert(doc.filename().to_string()) {
                return doc;
            }
            let base = doc.filename().to_string();
            let mut n = 2;
            let mut name = format!("{}#{}", base, n);
            while used.contains(&name) {
                n += 1;
                name = format!("{}#{}", base, n);
            }
            debug!("Renaming duplicate {} to {}", base, name);
            used.insert(name.clone());
            doc.renamed(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ExtractionPayload;
    use crate::error::ClientError;
    use crate::models::config::PdfRenderer;
    use crate::models::document::DocumentKind;
    use crate::pdf::extractor_tests::{TestPage, build_pdf};
    use async_trait::async_trait;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_REPLY: &str =
        "Here you go:\n{\"invoice_date\":\"2024-01-05\",\"total_amount\":\"120.00\"}\nThanks";

    /// Replies per filename; unknown files get [`SAMPLE_REPLY`].
    #[derive(Default)]
    struct MockClient {
        replies: HashMap<String, Result<String, String>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        payloads: Mutex<HashMap<String, ExtractionPayload>>,
        cancel_on_call: Option<CancelHandle>,
    }

    impl MockClient {
        fn reply(mut self, filename: &str, text: &str) -> Self {
            self.replies.insert(filename.to_string(), Ok(text.to_string()));
            self
        }

        fn quota(mut self, filename: &str) -> Self {
            self.replies.insert(filename.to_string(), Err("429".to_string()));
            self
        }
    }

    #[async_trait]
    impl ExtractionClient for MockClient {
        async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionReply, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.filename().to_string());
            self.payloads
                .lock()
                .unwrap()
                .insert(request.filename().to_string(), request.payload().clone());
            if let Some(cancel) = &self.cancel_on_call {
                cancel.cancel();
            }
            match self.replies.get(request.filename()) {
                Some(Ok(text)) => Ok(ExtractionReply::new(request.filename(), text.as_str())),
                Some(Err(msg)) => Err(ClientError::Quota(msg.clone())),
                None => Ok(ExtractionReply::new(request.filename(), SAMPLE_REPLY)),
            }
        }
    }

    fn png(name: &str) -> RawDocument {
        let mut data = Vec::new();
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();
        RawDocument::new(name, DocumentKind::Image, data)
    }

    fn corrupt(name: &str) -> RawDocument {
        RawDocument::new(name, DocumentKind::Image, b"not an image".to_vec())
    }

    fn pdf(name: &str, pages: &[TestPage]) -> RawDocument {
        RawDocument::new(name, DocumentKind::Pdf, build_pdf(pages))
    }

    /// Default config with the dependency-free renderer, so PDF results do
    /// not depend on pdfium being installed.
    fn embedded_config(modality: ModalityPolicy) -> InvexConfig {
        let mut config = InvexConfig::default();
        config.pdf.renderer = PdfRenderer::Embedded;
        config.extraction.modality = modality;
        config
    }

    fn runner(client: Arc<MockClient>, concurrency: usize) -> BatchRunner {
        let mut config = InvexConfig::default();
        config.batch.max_concurrency = concurrency;
        BatchRunner::new(&config, client)
    }

    #[tokio::test]
    async fn test_single_image_end_to_end() {
        let client = Arc::new(MockClient::default());
        let pipeline = Pipeline::new(&InvexConfig::default(), client.clone());

        let outcome = pipeline.process(png("scan.png")).await;
        let record = outcome.record().expect("record");

        assert_eq!(record.get("invoice_date"), Some("2024-01-05"));
        assert_eq!(record.get("total_amount"), Some("120.00"));
        assert_eq!(record.fields.filled(), 2);
        assert_eq!(record.fields.len(), 13);
        assert!(record.warnings.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scanned_pdf_sends_every_page() {
        let client = Arc::new(MockClient::default());
        let pipeline = Pipeline::new(&embedded_config(ModalityPolicy::Auto), client.clone());

        let outcome = pipeline
            .process(pdf("scan.pdf", &[TestPage::Scan(2, 2), TestPage::Scan(3, 3)]))
            .await;
        assert!(outcome.is_extracted());

        let payloads = client.payloads.lock().unwrap();
        match &payloads["scan.pdf"] {
            ExtractionPayload::Images(images) => {
                let indices: Vec<u32> = images.iter().map(|i| i.page_index).collect();
                assert_eq!(indices, vec![0, 1]);
                assert!(images.iter().all(|i| i.mime_type == "image/png"));
            }
            other => panic!("expected page images, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_digital_pdf_text_path() {
        let client = Arc::new(MockClient::default());
        let pipeline = Pipeline::new(&embedded_config(ModalityPolicy::Text), client.clone());

        let outcome = pipeline
            .process(pdf("digital.pdf", &[TestPage::Text("Invoice INV-7 total 120.00 EUR")]))
            .await;
        assert!(outcome.is_extracted());

        let payloads = client.payloads.lock().unwrap();
        match &payloads["digital.pdf"] {
            ExtractionPayload::Text(text) => assert!(text.contains("INV-7"), "{:?}", text),
            other => panic!("expected first-page text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vector_pdf_sent_whole_when_pages_cannot_render() {
        let client = Arc::new(MockClient::default());
        let pipeline = Pipeline::new(&embedded_config(ModalityPolicy::Auto), client.clone());
        let doc = pdf(
            "digital.pdf",
            &[TestPage::Text("Invoice INV-7"), TestPage::Text("Total 120.00 EUR")],
        );
        let bytes = doc.bytes().to_vec();

        let outcome = pipeline.process(doc).await;
        assert!(outcome.is_extracted());

        let payloads = client.payloads.lock().unwrap();
        assert!(matches!(&payloads["digital.pdf"], ExtractionPayload::Pdf(data) if *data == bytes));
    }

    #[tokio::test]
    async fn test_image_policy_on_vector_pdf_fails_before_call() {
        let client = Arc::new(MockClient::default());
        let pipeline = Pipeline::new(&embedded_config(ModalityPolicy::Image), client.clone());

        let outcome = pipeline.process(pdf("digital.pdf", &[TestPage::Text("Invoice")])).await;

        assert_eq!(outcome.failure().unwrap().kind, FailureKind::CorruptDocument);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extreme_line_item_values_stay_scoped() {
        let reply = r#"{"line_items": [{"quantity": "79228162514264337593543950335", "rate_or_unit_price": "1", "amount": "-1"}]}"#;
        let client = Arc::new(MockClient::default().reply("huge.png", reply));
        let runner = runner(client, 2);

        let result = runner.run(vec![png("huge.png"), png("ok.png")], CancelHandle::new()).await;

        assert_eq!(result.extracted_count(), 2);
        let record = result.get("huge.png").unwrap().record().unwrap();
        assert_eq!(record.line_items.len(), 1);
        assert!(record.warnings[0].contains("out of range"));
    }

    #[tokio::test]
    async fn test_failed_inputs_are_recorded_as_given() {
        let client = Arc::new(MockClient::default());
        let runner = runner(client.clone(), 2);
        let unreadable = ExtractionFailure::new(
            FailureKind::CorruptDocument,
            "a.png",
            "Permission denied (os error 13)",
        );

        let result = runner
            .run(
                vec![BatchInput::from(png("a.png")), BatchInput::from(unreadable)],
                CancelHandle::new(),
            )
            .await;

        assert_eq!(result.len(), 2);
        assert!(result.get("a.png").unwrap().is_extracted());
        let failure = result.get("a.png#2").unwrap().failure().unwrap();
        assert_eq!(failure.filename, "a.png#2");
        assert_eq!(failure.message, "Permission denied (os error 13)");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let client = Arc::new(MockClient::default());
        let runner = runner(client.clone(), 2);

        let result = runner
            .run(vec![png("1.png"), corrupt("2.png"), png("3.png")], CancelHandle::new())
            .await;

        assert_eq!(result.len(), 3);
        assert!(result.get("1.png").unwrap().is_extracted());
        assert!(result.get("3.png").unwrap().is_extracted());
        let failure = result.get("2.png").unwrap().failure().unwrap();
        assert_eq!(failure.kind, FailureKind::CorruptDocument);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_kinds_recorded() {
        let client = Arc::new(
            MockClient::default()
                .reply("prose.png", "I could not read this invoice.")
                .quota("limited.png"),
        );
        let runner = runner(client, 4);
        let docs = vec![
            png("prose.png"),
            png("limited.png"),
            RawDocument::new("notes.txt", DocumentKind::from_mime("text/plain"), b"hi".to_vec()),
        ];

        let result = runner.run(docs, CancelHandle::new()).await;

        let malformed = result.get("prose.png").unwrap().failure().unwrap();
        assert_eq!(malformed.kind, FailureKind::MalformedReply);
        assert_eq!(malformed.raw_reply.as_deref(), Some("I could not read this invoice."));

        let limited = result.get("limited.png").unwrap().failure().unwrap();
        assert_eq!(limited.kind, FailureKind::PolicyOrQuotaFailure);
        assert!(limited.raw_reply.is_none());

        let unsupported = result.get("notes.txt").unwrap().failure().unwrap();
        assert_eq!(unsupported.kind, FailureKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn test_duplicate_filenames_are_kept() {
        let client = Arc::new(MockClient::default());
        let runner = runner(client, 3);

        let result = runner
            .run(vec![png("a.png"), png("a.png"), png("a.png")], CancelHandle::new())
            .await;

        let names: Vec<&str> = result.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a.png", "a.png#2", "a.png#3"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let client = Arc::new(MockClient::default());
        let runner = runner(client.clone(), 2);
        let cancel = CancelHandle::new();
        cancel.cancel();

        let result = runner.run(vec![png("a.png"), png("b.png")], cancel).await;

        assert_eq!(result.len(), 2);
        assert!(result.failures().all(|f| f.kind == FailureKind::Cancelled));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_document_finish() {
        let cancel = CancelHandle::new();
        let client = Arc::new(MockClient {
            cancel_on_call: Some(cancel.clone()),
            ..MockClient::default()
        });
        let runner = runner(client.clone(), 1);

        let result = runner
            .run(vec![png("a.png"), png("b.png"), png("c.png")], cancel)
            .await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.extracted_count(), 1);
        assert_eq!(*client.seen.lock().unwrap(), vec!["a.png".to_string()]);
        assert_eq!(
            result.get("b.png").unwrap().failure().unwrap().kind,
            FailureKind::Cancelled
        );
    }

    #[tokio::test]
    async fn test_progress_callback_sees_every_document() {
        let runner = runner(Arc::new(MockClient::default()), 2);
        let mut seen = Vec::new();

        runner
            .run_with_progress(vec![png("a.png"), corrupt("b.png")], CancelHandle::new(), |name, _| {
                seen.push(name.to_string())
            })
            .await;

        seen.sort();
        assert_eq!(seen, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_outcome_from_reply() {
        let validator = SchemaValidator::new(Default::default());
        let outcome = outcome_from_reply(&ExtractionReply::new("a.png", SAMPLE_REPLY), &validator);
        assert_eq!(outcome.record().unwrap().get("invoice_number"), None);

        let outcome = outcome_from_reply(&ExtractionReply::new("a.png", "{\"a\": "), &validator);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::MalformedReply);
        assert_eq!(failure.raw_reply.as_deref(), Some("{\"a\": "));
    }
}
