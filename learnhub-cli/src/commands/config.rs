//! `learnhub config`: writes a default configuration file.

use std::fs;

use anyhow::{Result, bail};
use shared::config::Config;

/// Writes the default configuration to `learnhub.<format>` in the current
/// directory.
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let config = Config::with_defaults();
    let serialized = match format {
        "yaml" => serde_yml::to_string(&config)?,
        "json" => serde_json::to_string_pretty(&config)?,
        "toml" => toml::to_string_pretty(&config)?,
        _ => bail!("Unsupported format '{format}'. Use 'yaml', 'json' or 'toml'."),
    };

    let file_name = format!("learnhub.{format}");
    fs::write(&file_name, serialized)?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
