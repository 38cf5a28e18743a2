//! Per-document outcomes and the flattened export table.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::error::{BatchError, FailureKind, InvexError, Result};
use crate::models::invoice::InvoiceRecord;
use crate::models::schema::InvoiceSchema;

/// Why a document produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    pub kind: FailureKind,
    pub filename: String,
    pub message: String,

    /// Model output that could not be parsed, kept for manual recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_reply: Option<String>,
}

impl ExtractionFailure {
    pub fn new(kind: FailureKind, filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            message: message.into(),
            raw_reply: None,
        }
    }

    pub fn with_raw_reply(mut self, raw_reply: impl Into<String>) -> Self {
        self.raw_reply = Some(raw_reply.into());
        self
    }

    pub fn cancelled(filename: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, filename, "batch cancelled before processing")
    }
}

/// Result of driving one document through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Extracted(InvoiceRecord),
    Failed(ExtractionFailure),
}

impl DocumentOutcome {
    pub fn is_extracted(&self) -> bool {
        matches!(self, DocumentOutcome::Extracted(_))
    }

    pub fn record(&self) -> Option<&InvoiceRecord> {
        match self {
            DocumentOutcome::Extracted(record) => Some(record),
            DocumentOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ExtractionFailure> {
        match self {
            DocumentOutcome::Extracted(_) => None,
            DocumentOutcome::Failed(failure) => Some(failure),
        }
    }

    fn status(&self) -> &'static str {
        match self {
            DocumentOutcome::Extracted(_) => "extracted",
            DocumentOutcome::Failed(_) => "failed",
        }
    }
}

/// All outcomes of one batch keyed by filename. Each filename is written once.
#[derive(Debug, Clone)]
pub struct BatchResult {
    columns: Vec<String>,
    entries: BTreeMap<String, DocumentOutcome>,
}

impl BatchResult {
    /// Empty result whose export columns follow `schema`.
    pub fn new(schema: &InvoiceSchema) -> Self {
        Self {
            columns: schema.field_names().map(str::to_string).collect(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, filename: impl Into<String>, outcome: DocumentOutcome) -> std::result::Result<(), BatchError> {
        let filename = filename.into();
        if self.entries.contains_key(&filename) {
            return Err(BatchError::AlreadyRecorded(filename));
        }
        self.entries.insert(filename, outcome);
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<&DocumentOutcome> {
        self.entries.get(filename)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocumentOutcome)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extracted_count(&self) -> usize {
        self.entries.values().filter(|o| o.is_extracted()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExtractionFailure> {
        self.entries.values().filter_map(DocumentOutcome::failure)
    }

    /// Flatten into one row per document, ordered by filename.
    pub fn finalize(&self) -> ExportTable {
        let mut header = vec!["filename".to_string(), "status".to_string(), "failure_kind".to_string()];
        header.extend(self.columns.iter().cloned());
        header.extend(["line_item_count", "warnings", "error"].map(String::from));

        let rows = self
            .entries
            .iter()
            .map(|(filename, outcome)| self.row(filename, outcome))
            .collect();

        ExportTable { header, rows }
    }

    fn row(&self, filename: &str, outcome: &DocumentOutcome) -> Vec<String> {
        let mut row = vec![filename.to_string(), outcome.status().to_string()];
        match outcome {
            DocumentOutcome::Extracted(record) => {
                row.push(String::new());
                row.extend(
                    self.columns
                        .iter()
                        .map(|c| record.get(c).unwrap_or_default().to_string()),
                );
                row.push(record.line_items.len().to_string());
                row.push(record.warnings.join("; "));
                row.push(String::new());
            }
            DocumentOutcome::Failed(failure) => {
                row.push(failure.kind.to_string());
                row.extend(self.columns.iter().map(|_| String::new()));
                row.push(String::new());
                row.push(String::new());
                row.push(failure.message.clone());
            }
        }
        row
    }

    /// Full records, line items and raw replies as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Serialize for BatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Flat table ready for CSV serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(&self.header)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner().map_err(|e| InvexError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::{FieldMap, LineItem};
    use pretty_assertions::assert_eq;

    fn record(number: &str) -> InvoiceRecord {
        let schema = InvoiceSchema::default();
        let mut fields = FieldMap::new();
        for name in schema.field_names() {
            fields.insert(name, None);
        }
        fields.insert("invoice_number", Some(number.to_string()));
        fields.insert("total_amount", Some("1,200.00".to_string()));
        InvoiceRecord {
            fields,
            line_items: vec![LineItem::default(), LineItem::default()],
            warnings: vec!["a".to_string(), "b".to_string()],
        }
    }

    fn sample() -> BatchResult {
        let mut result = BatchResult::new(&InvoiceSchema::default());
        result.insert("b.pdf", DocumentOutcome::Extracted(record("INV-2"))).unwrap();
        result
            .insert(
                "a.png",
                DocumentOutcome::Failed(
                    ExtractionFailure::new(FailureKind::MalformedReply, "a.png", "reply contains no JSON object")
                        .with_raw_reply("sorry"),
                ),
            )
            .unwrap();
        result
    }

    #[test]
    fn test_insert_is_write_once() {
        let mut result = sample();
        let err = result
            .insert("b.pdf", DocumentOutcome::Failed(ExtractionFailure::cancelled("b.pdf")))
            .unwrap_err();
        assert!(matches!(err, BatchError::AlreadyRecorded(f) if f == "b.pdf"));
        assert_eq!(result.len(), 2);
        assert!(result.get("b.pdf").unwrap().is_extracted());
    }

    #[test]
    fn test_finalize_rows() {
        let table = sample().finalize();

        assert_eq!(table.header.len(), 3 + 13 + 3);
        assert_eq!(table.header[3], "invoice_date");
        assert_eq!(table.header.last().unwrap(), "error");

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], "a.png");
        assert_eq!(table.rows[0][1], "failed");
        assert_eq!(table.rows[0][2], "malformed_reply");
        assert_eq!(table.rows[0][18], "reply contains no JSON object");

        let row = &table.rows[1];
        assert_eq!(row[0], "b.pdf");
        assert_eq!(row[1], "extracted");
        assert_eq!(row[4], "INV-2");
        assert_eq!(row[16], "2");
        assert_eq!(row[17], "a; b");
        assert!(row.iter().all(|cell| !cell.contains("null")));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let result = sample();
        let first = result.finalize().to_csv().unwrap();
        let second = result.finalize().to_csv().unwrap();
        assert_eq!(first, second);

        let csv = String::from_utf8(first).unwrap();
        assert!(csv.starts_with("filename,status,failure_kind,invoice_date,"));
        assert!(csv.contains("\"1,200.00\""));
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_json_export_keeps_raw_reply() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["a.png"]["status"], "failed");
        assert_eq!(json["a.png"]["kind"], "malformed_reply");
        assert_eq!(json["a.png"]["raw_reply"], "sorry");
        assert_eq!(json["b.pdf"]["status"], "extracted");
        assert_eq!(json["b.pdf"]["fields"]["invoice_number"], "INV-2");
        assert!(json["b.pdf"]["fields"]["currency"].is_null());
        assert_eq!(json["b.pdf"]["line_items"].as_array().unwrap().len(), 2);
    }
}
