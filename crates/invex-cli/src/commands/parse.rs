//! Parse command - validate a saved model reply without calling the model.

use std::io::Read;
use std::path::PathBuf;

use clap::Args;

use invex_core::batch::outcome_from_reply;
use invex_core::{DocumentOutcome, ExtractionReply, SchemaValidator};

use super::extract::{OutputFormat, format_outcome, print_warnings, write_output};

/// Arguments for the parse command.
#[derive(Args)]
pub struct ParseArgs {
    /// File holding the raw model reply ("-" for stdin)
    #[arg(required = true)]
    reply: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,
}

pub fn run(args: ParseArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::config::load(config_path)?;

    let (filename, text) = if args.reply.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        ("stdin".to_string(), text)
    } else {
        let text = std::fs::read_to_string(&args.reply)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.reply.display(), e))?;
        let name = args
            .reply
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("reply")
            .to_string();
        (name, text)
    };

    let validator = SchemaValidator::new(config.extraction.schema.clone())
        .with_tolerance(config.extraction.amount_tolerance);
    let outcome = outcome_from_reply(&ExtractionReply::new(&filename, text), &validator);

    let output = format_outcome(&filename, &outcome, args.format, &config)?;
    write_output(args.output.as_deref(), &output)?;

    match &outcome {
        DocumentOutcome::Extracted(record) => {
            print_warnings(record);
            Ok(())
        }
        DocumentOutcome::Failed(failure) => anyhow::bail!("{}: {}", failure.filename, failure.message),
    }
}
