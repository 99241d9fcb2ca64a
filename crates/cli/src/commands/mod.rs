//! CLI Commands

pub mod compile;
pub mod config;
pub mod generate;
pub mod repair;

use clap::{Args, ValueEnum};
use serde::Serialize;

use testforge_common::Scenario;
use testforge_compiler::config::ForgeConfig;
use testforge_compiler::repair::ScenarioRepair;
use testforge_compiler::{SelectorStrategy, TargetLanguage};

use crate::output::TableDisplay;

/// How element targets are emitted
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Role and text locators where the target allows it
    RoleFirst,
    /// Raw selectors only
    Css,
}

/// Emitted source language
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LanguageArg {
    Ts,
    Js,
}

/// Code generation overrides shared by several commands
#[derive(Args, Debug, Clone)]
pub struct CodegenArgs {
    /// Selector emission strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Output language
    #[arg(long, value_enum)]
    pub language: Option<LanguageArg>,
}

impl CodegenArgs {
    pub fn apply(&self, config: &mut ForgeConfig) {
        if let Some(strategy) = self.strategy {
            config.codegen.selector_strategy = match strategy {
                StrategyArg::RoleFirst => SelectorStrategy::RoleFirst,
                StrategyArg::Css => SelectorStrategy::Css,
            };
        }
        if let Some(language) = self.language {
            config.codegen.language = match language {
                LanguageArg::Ts => TargetLanguage::TypeScript,
                LanguageArg::Js => TargetLanguage::JavaScript,
            };
        }
    }
}

/// Scenario summary for display
#[derive(Serialize, Clone)]
pub struct ScenarioRow {
    pub id: String,
    pub name: String,
    pub steps: usize,
    pub tags: String,
    pub status: String,
    pub time: String,
}

impl ScenarioRow {
    pub fn new(scenario: &Scenario, status: impl Into<String>) -> Self {
        Self {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            steps: scenario.steps.len(),
            tags: scenario.tags.iter().cloned().collect::<Vec<_>>().join(", "),
            status: status.into(),
            time: scenario
                .time_taken_to_compile
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        }
    }

    pub fn from_repair(repair: &ScenarioRepair) -> Self {
        let status = match repair.outcome.reason() {
            Some(reason) => format!("kept: {}", reason),
            None => format!(
                "repaired ({} improved, {} kept)",
                repair.improved_steps,
                repair.degraded_steps()
            ),
        };
        Self::new(repair.scenario(), status)
    }
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Steps", "Tags", "Status", "Time"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.steps.to_string(),
            self.tags.clone(),
            self.status.clone(),
            self.time.clone(),
        ]
    }
}
