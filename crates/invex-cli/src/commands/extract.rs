//! Extract command - run one invoice file through the pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use invex_core::models::config::ModalityPolicy;
use invex_core::{BatchResult, DocumentKind, DocumentOutcome, InvexConfig, InvoiceRecord, Pipeline, RawDocument};

use super::build_client;

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Declared MIME type (default: guessed from the extension)
    #[arg(long)]
    mime: Option<String>,

    /// Override the configured modality
    #[arg(long, value_enum)]
    modality: Option<ModalityArg>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ModalityArg {
    /// Page images when every page renders, otherwise the PDF file
    Auto,
    /// Always page images
    Image,
    /// Always first-page text
    Text,
    /// Always the original PDF file
    Pdf,
}

impl From<ModalityArg> for ModalityPolicy {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Auto => ModalityPolicy::Auto,
            ModalityArg::Image => ModalityPolicy::Image,
            ModalityArg::Text => ModalityPolicy::Text,
            ModalityArg::Pdf => ModalityPolicy::Pdf,
        }
    }
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = super::config::load(config_path)?;
    if let Some(modality) = args.modality {
        config.extraction.modality = modality.into();
    }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let doc = read_document(&args.input, args.mime.as_deref())?;
    info!("Processing file: {}", args.input.display());

    let pipeline = Pipeline::new(&config, build_client(&config.model)?);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Extracting {}", doc.filename()));

    let filename = doc.filename().to_string();
    let outcome = pipeline.process(doc).await;

    pb.finish_and_clear();

    let output = format_outcome(&filename, &outcome, args.format, &config)?;
    write_output(args.output.as_deref(), &output)?;

    match &outcome {
        DocumentOutcome::Extracted(record) => {
            print_warnings(record);
            info!("Extracted {} in {:?}", filename, start.elapsed());
            Ok(())
        }
        DocumentOutcome::Failed(failure) => {
            anyhow::bail!("{}: {} ({})", failure.filename, failure.message, failure.kind)
        }
    }
}

/// Read `path`, declaring its kind from `mime` when given.
pub fn read_document(path: &Path, mime: Option<&str>) -> anyhow::Result<RawDocument> {
    let doc = RawDocument::from_path(path)?;
    Ok(match mime {
        Some(mime) => RawDocument::new(doc.filename(), DocumentKind::from_mime(mime), doc.bytes().to_vec()),
        None => doc,
    })
}

pub fn format_outcome(
    filename: &str,
    outcome: &DocumentOutcome,
    format: OutputFormat,
    config: &InvexConfig,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(outcome)?),
        OutputFormat::Csv => {
            let mut result = BatchResult::new(&config.extraction.schema);
            result.insert(filename, outcome.clone())?;
            Ok(String::from_utf8(result.finalize().to_csv()?)?)
        }
        OutputFormat::Text => Ok(format_text(filename, outcome)),
    }
}

fn format_text(filename: &str, outcome: &DocumentOutcome) -> String {
    let mut output = format!("File: {}\n", filename);

    match outcome {
        DocumentOutcome::Extracted(record) => {
            output.push('\n');
            for (name, value) in record.fields.iter() {
                output.push_str(&format!("  {:<24} {}\n", name, value.unwrap_or("-")));
            }

            if !record.line_items.is_empty() {
                output.push_str(&format!("\nLine items ({}):\n", record.line_items.len()));
                for (i, item) in record.line_items.iter().enumerate() {
                    let cells: Vec<String> = item
                        .0
                        .iter()
                        .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, v)))
                        .collect();
                    output.push_str(&format!("  {}. {}\n", i + 1, cells.join(", ")));
                }
            }
        }
        DocumentOutcome::Failed(failure) => {
            output.push_str(&format!("Failed: {} ({})\n", failure.message, failure.kind));
            if let Some(raw) = &failure.raw_reply {
                output.push_str("\nRaw reply:\n");
                output.push_str(raw);
                output.push('\n');
            }
        }
    }

    output
}

pub fn write_output(path: Option<&Path>, output: &str) -> anyhow::Result<()> {
    if let Some(output_path) = path {
        fs::write(output_path, output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }
    Ok(())
}

pub fn print_warnings(record: &InvoiceRecord) {
    if record.has_warnings() {
        eprintln!("{}", style("Validation warnings:").yellow());
        for warning in &record.warnings {
            eprintln!("  - {}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invex_core::ExtractionFailure;
    use invex_core::FailureKind;

    #[test]
    fn test_text_format_of_failure_shows_raw_reply() {
        let outcome = DocumentOutcome::Failed(
            ExtractionFailure::new(FailureKind::MalformedReply, "a.png", "no JSON").with_raw_reply("sorry"),
        );
        let text = format_text("a.png", &outcome);
        assert!(text.contains("Failed: no JSON (malformed_reply)"));
        assert!(text.ends_with("sorry\n"));
    }

    #[test]
    fn test_csv_format_has_header_and_row() {
        let outcome = DocumentOutcome::Failed(ExtractionFailure::new(FailureKind::CorruptDocument, "a.png", "bad"));
        let csv = format_outcome("a.png", &outcome, OutputFormat::Csv, &InvexConfig::default()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("filename,status,failure_kind"));
        assert!(lines.next().unwrap().starts_with("a.png,failed,corrupt_document"));
    }
}
