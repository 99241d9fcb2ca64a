//! testforge CLI - Main Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use testforge_cli::commands::{compile, config, generate, repair};
use testforge_cli::output;
use testforge_compiler::config::{default_config_path, ForgeConfig};

/// testforge - natural-language objectives to Playwright tests
#[derive(Parser)]
#[command(name = "testforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ~/.testforge/config.toml)
    #[arg(long, global = true, env = "TESTFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, repair and compile tests for an objective
    Generate(generate::GenerateArgs),

    /// Compile a scenario file into spec files
    Compile(compile::CompileArgs),

    /// Repair the selectors of a scenario file against a live page
    Repair(repair::RepairArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let forge_config = ForgeConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match cli.command {
        Commands::Generate(args) => generate::execute(args, forge_config, cli.format).await?,
        Commands::Compile(args) => compile::execute(args, forge_config, cli.format).await?,
        Commands::Repair(args) => repair::execute(args, forge_config, cli.format).await?,
        Commands::Config(cmd) => config::execute(cmd, forge_config, &config_path, cli.format).await?,
        Commands::Version => {
            println!("testforge v{}", env!("CARGO_PKG_VERSION"));
            println!("Scenario IR v{}", testforge_common::VERSION);
        }
    }

    Ok(())
}
