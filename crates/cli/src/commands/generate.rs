//! Generate Command
//!
//! Runs the full pipeline: scenario generation, live selector repair and code
//! generation, then writes the bundle to each output directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use testforge_common::Credentials;
use testforge_compiler::config::ForgeConfig;
use testforge_compiler::{GenerationRequest, Pipeline, PipelineOutput};

use super::{CodegenArgs, ScenarioRow};
use crate::output::{
    is_structured, print_document, print_info, print_rows, print_success, print_warning,
    OutputFormat,
};
use crate::persist;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// What the tests should cover, in plain language
    pub objective: String,

    /// Page the scenarios start from
    #[arg(short, long)]
    pub url: String,

    /// Login username made available to the scenarios
    #[arg(long)]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "TESTFORGE_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,

    /// Base run id (a UUID by default)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Directory to write snapshots and spec files into (repeatable)
    #[arg(short, long = "output-dir")]
    pub output_dirs: Vec<PathBuf>,

    /// Skip live selector repair
    #[arg(long)]
    pub no_repair: bool,

    #[command(flatten)]
    pub codegen: CodegenArgs,
}

pub async fn execute(args: GenerateArgs, mut config: ForgeConfig, format: OutputFormat) -> Result<()> {
    args.codegen.apply(&mut config);
    if args.no_repair {
        config.repair.enabled = false;
    }

    let pipeline = Pipeline::from_config(&config).context("Failed to set up pipeline")?;

    let mut request = GenerationRequest::new(args.objective, args.url);
    if let Some(username) = args.username {
        request = request.with_credentials(Credentials::new(username, args.password));
    }
    if let Some(run_id) = args.run_id {
        request = request.with_run_id(run_id);
    }

    let structured = is_structured(format);
    if !structured {
        print_info(&format!(
            "Generating scenarios for {} with {}",
            request.target_url.cyan(),
            config.gemini.model
        ));
    }

    let output = pipeline.run(&request).await.context("Generation failed")?;
    let written = persist::persist(&output, &args.output_dirs)?;

    if structured {
        print_document(&output, format);
    } else {
        summarize(&output, written.len(), format);
    }
    Ok(())
}

fn summarize(output: &PipelineOutput, written: usize, format: OutputFormat) {
    let rows: Vec<ScenarioRow> = match &output.repair {
        Some(report) => report.scenarios.iter().map(ScenarioRow::from_repair).collect(),
        None => output
            .post_repair
            .scenarios
            .iter()
            .map(|s| ScenarioRow::new(s, "not repaired"))
            .collect(),
    };
    print_rows(&rows, "No scenarios generated", format);

    let metadata = &output.post_repair.metadata;
    println!("{} {}", "Run:".bold(), output.run_id);
    if output.repair.is_some() && !metadata.validation_succeeded {
        print_warning("Selector validation incomplete; unrepaired steps were kept as generated");
    }
    if output.files.is_empty() {
        print_warning("No scenarios were generated");
    } else if written == 0 {
        for file in &output.files {
            println!("{}", format!("// {}", file.file_name).dimmed());
            println!("{}", file.source);
        }
    } else {
        print_success(&format!(
            "{} spec file(s), {} improved step(s), {} file(s) written in {} ms",
            output.files.len(),
            metadata.improved_steps,
            written,
            metadata.total_time_ms
        ));
    }
}
