//! Compile Command
//!
//! Emits Playwright spec files from a scenario file without any network
//! access.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use testforge_compiler::config::ForgeConfig;
use testforge_compiler::pipeline::compile_all;

use super::CodegenArgs;
use crate::output::{is_structured, print_document, print_rows, print_success, OutputFormat, TableDisplay};
use crate::persist;

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Snapshot or scenario list (JSON)
    pub input: PathBuf,

    /// Directory to write spec files into (repeatable)
    #[arg(short, long = "output-dir")]
    pub output_dirs: Vec<PathBuf>,

    #[command(flatten)]
    pub codegen: CodegenArgs,
}

/// Compiled file summary for display
#[derive(Serialize, Clone)]
pub struct FileRow {
    pub scenario: String,
    pub file: String,
    pub lines: usize,
}

impl TableDisplay for FileRow {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "File", "Lines"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.scenario.clone(), self.file.clone(), self.lines.to_string()]
    }
}

pub async fn execute(args: CompileArgs, mut config: ForgeConfig, format: OutputFormat) -> Result<()> {
    args.codegen.apply(&mut config);

    let scenarios = persist::load_scenarios(&args.input)?;
    let files = compile_all(&scenarios, &config.codegen.options(), Utc::now());

    let mut written = 0;
    for dir in &args.output_dirs {
        std::fs::create_dir_all(dir)?;
        written += persist::write_files(&files, dir)?.len();
    }

    if is_structured(format) {
        print_document(&files, format);
        return Ok(());
    }

    if args.output_dirs.is_empty() {
        for file in &files {
            println!("{}", format!("// {}", file.file_name).dimmed());
            println!("{}", file.source);
        }
        return Ok(());
    }

    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            scenario: f.scenario_id.clone(),
            file: f.file_name.clone(),
            lines: f.source.lines().count(),
        })
        .collect();
    print_rows(&rows, "No files compiled", format);
    print_success(&format!("{} file(s) written", written));
    Ok(())
}
