//! Config Commands

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;

use testforge_compiler::config::ForgeConfig;

use crate::output::{print_document, print_success, OutputFormat};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn execute(cmd: ConfigCommands, config: ForgeConfig, path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let shown = redacted(config);
            match format {
                OutputFormat::Json | OutputFormat::Yaml => print_document(&shown, format),
                OutputFormat::Table | OutputFormat::Plain => {
                    println!("# {}", path.display());
                    print!("{}", toml::to_string_pretty(&shown)?);
                }
            }
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ForgeConfig::default().save(path)?;
            print_success(&format!("Wrote default configuration to {}", path.display()));
        }
    }
    Ok(())
}

fn redacted(mut config: ForgeConfig) -> ForgeConfig {
    if config.gemini.api_key.is_some() {
        config.gemini.api_key = Some("<redacted>".to_string());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_is_redacted() {
        let mut config = ForgeConfig::default();
        config.gemini.api_key = Some("secret".to_string());
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        execute(ConfigCommands::Init { force: false }, ForgeConfig::default(), &path, OutputFormat::Table)
            .await
            .unwrap();
        assert!(path.exists());

        let again = execute(
            ConfigCommands::Init { force: false },
            ForgeConfig::default(),
            &path,
            OutputFormat::Table,
        )
        .await;
        assert!(again.is_err());

        execute(ConfigCommands::Init { force: true }, ForgeConfig::default(), &path, OutputFormat::Table)
            .await
            .unwrap();
    }
}
