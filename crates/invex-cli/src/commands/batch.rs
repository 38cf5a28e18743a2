//! Batch processing command for multiple invoice files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use invex_core::{BatchInput, BatchRunner, CancelHandle, DocumentOutcome, ExtractionFailure, FailureKind, RawDocument};

use super::build_client;

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// CSV output path (one row per document)
    #[arg(short, long, default_value = "invoices.csv")]
    output: PathBuf,

    /// Also write full records, line items and raw replies as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Number of documents processed concurrently
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = super::config::load(config_path)?;
    if let Some(jobs) = args.jobs {
        config.batch.max_concurrency = jobs.max(1);
    }

    let files = expand_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No matching files found for: {}", args.inputs.join(" "));
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    let docs: Vec<BatchInput> = files.iter().map(|path| read_input(path)).collect();

    let runner = BatchRunner::new(&config, build_client(&config.model)?);

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{} Cancelling: waiting for in-flight documents",
                style("!").yellow()
            );
            on_interrupt.cancel();
        }
    });

    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("=>-"),
    );

    let result = runner
        .run_with_progress(docs, cancel, |filename, outcome| {
            if let DocumentOutcome::Failed(failure) = outcome {
                debug!("{} failed: {}", filename, failure.message);
            }
            pb.set_message(filename.to_string());
            pb.inc(1);
        })
        .await;

    pb.finish_with_message("Complete");

    fs::write(&args.output, result.finalize().to_csv()?)?;
    println!(
        "{} Table written to {}",
        style("✓").green(),
        args.output.display()
    );

    if let Some(json_path) = &args.json {
        fs::write(json_path, result.to_json()?)?;
        println!(
            "{} Records written to {}",
            style("✓").green(),
            json_path.display()
        );
    }

    let extracted = result.extracted_count();
    let failed: Vec<_> = result.failures().collect();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        result.len(),
        start.elapsed()
    );
    println!(
        "   {} extracted, {} failed",
        style(extracted).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for failure in &failed {
            println!("  - {} [{}]: {}", failure.filename, failure.kind, failure.message);
        }
    }

    Ok(())
}

/// Read one file; unreadable files still get a row carrying the read error.
fn read_input(path: &Path) -> BatchInput {
    match RawDocument::from_path(path) {
        Ok(doc) => doc.into(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("document");
            ExtractionFailure::new(
                FailureKind::CorruptDocument,
                name,
                format!("failed to read file: {}", e),
            )
            .into()
        }
    }
}

/// Expand each input as a glob pattern; plain paths match themselves.
fn expand_inputs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let before = files.len();
        files.extend(glob(input)?.filter_map(|r| r.ok()).filter(|p| p.is_file()));
        if files.len() == before {
            warn!("No files match {}", input);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_inputs_keeps_duplicates_and_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("b.pdf"), b"y").unwrap();

        let pattern = dir.path().join("*").display().to_string();
        let single = dir.path().join("a.png").display().to_string();
        let files = expand_inputs(&[pattern, single]).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.pdf", "a.png"]);
    }

    #[test]
    fn test_unreadable_file_keeps_read_error() {
        let dir = tempfile::tempdir().unwrap();

        // a directory cannot be read as a file
        match read_input(dir.path()) {
            BatchInput::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::CorruptDocument);
                assert!(failure.message.starts_with("failed to read file: "));
            }
            BatchInput::Document(_) => panic!("directory read as a document"),
        }

        let path = dir.path().join("scan.png");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(read_input(&path), BatchInput::Document(doc) if doc.filename() == "scan.png"));
    }
}
