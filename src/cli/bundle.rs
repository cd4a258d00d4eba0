use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use clap::Subcommand;

use crate::config::Config;
use crate::models::directive::BlockStorageDirective;
use crate::services::validation;

#[derive(Subcommand)]
pub enum BundleCommands {
    /// Validate a bundle's test-config file without running anything
    Validate {
        /// Path to test-config.yaml or test-config.json
        #[arg(short, long)]
        file: PathBuf,
    },
}

pub async fn handle_command(command: BundleCommands, _config: &Config) -> anyhow::Result<()> {
    match command {
        BundleCommands::Validate { file } => validate_file(&file),
    }
}

fn validate_file(file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let directive: BlockStorageDirective = match file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
    {
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        "json" => serde_json::from_str(&raw)?,
        other => bail!("Unsupported directive file extension '{}'", other),
    };

    match validation::validate_topic_directives(&directive.topic_directives) {
        Ok(()) => {
            println!(
                "OK: {} topic directive(s), bucket '{}'",
                directive.topic_directives.len(),
                directive.bucket
            );
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("error: {}", error);
            }
            bail!("{} validation error(s)", errors.len());
        }
    }
}
