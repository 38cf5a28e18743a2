//! Subcommand implementations.

pub mod batch;
pub mod config;
pub mod extract;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use invex_core::models::config::ModelConfig;
use invex_core::{ExtractionClient, GeminiClient, RetryingClient};

/// Gemini client with deadline and retries, keyed from the environment.
pub fn build_client(config: &ModelConfig) -> anyhow::Result<Arc<dyn ExtractionClient>> {
    let client = GeminiClient::from_env(config)?;
    Ok(Arc::new(RetryingClient::new(client, config)))
}
