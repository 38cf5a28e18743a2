//! Prompt command - print the extraction prompt for the configured schema.

use invex_core::render_prompt;

pub fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::config::load(config_path)?;
    print!("{}", render_prompt(&config.extraction.schema));
    Ok(())
}
