//! Repair Command
//!
//! Replays existing scenarios against a live browser and writes the repaired
//! scenario list.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use testforge_compiler::config::ForgeConfig;
use testforge_compiler::mcp::McpBackend;
use testforge_compiler::{AutomationSession, SelectorRepairer};

use super::ScenarioRow;
use crate::output::{is_structured, print_document, print_rows, print_success, print_warning, OutputFormat};
use crate::persist;

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Snapshot or scenario list (JSON)
    pub input: PathBuf,

    /// Page the scenarios start from
    #[arg(short, long)]
    pub url: String,

    /// Where to write the repaired scenarios (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: RepairArgs, config: ForgeConfig, format: OutputFormat) -> Result<()> {
    let scenarios = persist::load_scenarios(&args.input)?;

    let backend = Box::new(McpBackend::new(config.automation.clone()));
    let mut session = AutomationSession::new(backend, config.automation.tools.clone());
    let report = SelectorRepairer::from_config(&config.repair)
        .repair_within(&mut session, &args.url, &scenarios, config.repair.overall_timeout())
        .await;

    if is_structured(format) {
        print_document(&report, format);
    } else {
        let rows: Vec<ScenarioRow> = report.scenarios.iter().map(ScenarioRow::from_repair).collect();
        print_rows(&rows, "No scenarios to repair", format);
        if !report.validation_succeeded() {
            print_warning("Selector validation incomplete; unrepaired scenarios were kept");
        }
    }

    if let Some(path) = args.output {
        let repaired = report.into_scenarios();
        let content = serde_json::to_string_pretty(&repaired)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !is_structured(format) {
            print_success(&format!("Repaired scenarios written to {}", path.display()));
        }
    }
    Ok(())
}
