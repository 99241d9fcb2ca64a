//! End-to-end compile pipeline
//!
//! objective ─▶ generate ─▶ snapshot `<run>-gemini` ─▶ repair ─▶ compile
//!                                                      └─▶ snapshot `<run>-mcp`

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use testforge_common::{Credentials, GenerationRun, RunMetadata, RunSource, RunStage, Scenario};

use crate::codegen::{self, CompileOptions};
use crate::config::{ForgeConfig, RepairConfig, ToolMap};
use crate::error::ForgeResult;
use crate::gemini::GeminiClient;
use crate::generator::{ScenarioGenerator, TextService};
use crate::mcp::McpBackend;
use crate::repair::{RepairReport, SelectorRepairer};
use crate::session::{AutomationBackend, AutomationSession};

/// Creates a fresh backend for each repair run
pub type BackendFactory = Box<dyn Fn() -> Box<dyn AutomationBackend> + Send + Sync>;

/// One compile request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub objective: String,
    pub target_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Base run id; a UUID is assigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(objective: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            target_url: target_url.into(),
            credentials: None,
            run_id: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Emitted test source for one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub scenario_id: String,
    pub file_name: String,
    pub source: String,
}

/// Compile scenarios into test files stamped with `timestamp`
pub fn compile_all(
    scenarios: &[Scenario],
    options: &CompileOptions,
    timestamp: DateTime<Utc>,
) -> Vec<GeneratedFile> {
    scenarios
        .iter()
        .map(|scenario| {
            if let Err(e) = scenario.validate() {
                warn!("Emitting generic calls for {}: {}", scenario.id, e);
            }
            GeneratedFile {
                scenario_id: scenario.id.clone(),
                file_name: codegen::suggested_file_name(scenario, timestamp, options.language),
                source: codegen::compile(scenario, options),
            }
        })
        .collect()
}

/// Everything one run produced, handed to whoever persists it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub run_id: String,
    pub pre_repair: GenerationRun,
    pub post_repair: GenerationRun,
    pub files: Vec<GeneratedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairReport>,
}

/// The three-stage compiler
pub struct Pipeline {
    generator: ScenarioGenerator,
    backend_factory: Option<BackendFactory>,
    tools: ToolMap,
    repair: RepairConfig,
    options: CompileOptions,
}

impl Pipeline {
    /// Pipeline without live repair
    pub fn new(generator: ScenarioGenerator, options: CompileOptions) -> Self {
        Self {
            generator,
            backend_factory: None,
            tools: ToolMap::default(),
            repair: RepairConfig {
                enabled: false,
                ..Default::default()
            },
            options,
        }
    }

    /// Enable live repair through backends made by `factory`
    pub fn with_repair(mut self, factory: BackendFactory, tools: ToolMap, config: RepairConfig) -> Self {
        self.backend_factory = Some(factory);
        self.tools = tools;
        self.repair = config;
        self
    }

    /// Gemini for generation, an MCP server process for repair
    pub fn from_config(config: &ForgeConfig) -> ForgeResult<Self> {
        let service: Arc<dyn TextService> = Arc::new(GeminiClient::new(&config.gemini)?);
        let generator = ScenarioGenerator::new(service, config.generator.clone());
        let automation = config.automation.clone();

        Ok(Self::new(generator, config.codegen.options()).with_repair(
            Box::new(move || Box::new(McpBackend::new(automation.clone())) as Box<dyn AutomationBackend>),
            config.automation.tools.clone(),
            config.repair.clone(),
        ))
    }

    pub fn repair_enabled(&self) -> bool {
        self.repair.enabled && self.backend_factory.is_some()
    }

    /// Run all stages. Only a failed text-service call is an error; repair
    /// and compile problems degrade the result instead.
    pub async fn run(&self, request: &GenerationRequest) -> ForgeResult<PipelineOutput> {
        let started = Instant::now();
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("Run {}: generating scenarios for {}", run_id, request.target_url);

        let scenarios = self
            .generator
            .generate(
                &request.objective,
                &request.target_url,
                request.credentials.as_ref(),
            )
            .await?;

        let pre_repair = GenerationRun::capture(
            &run_id,
            scenarios.clone(),
            self.metadata(RunSource::GeminiOnly, RunStage::Generated, started),
        );

        let (repaired, report) = match &self.backend_factory {
            Some(factory) if self.repair.enabled && !scenarios.is_empty() => {
                let report = self.repair_stage(factory, &request.target_url, &scenarios).await;
                (report.clone().into_scenarios(), Some(report))
            }
            _ => (scenarios, None),
        };

        let files = compile_all(&repaired, &self.options, Utc::now());

        let mut metadata = self.metadata(
            RunSource::GeminiPlusMcp,
            if report.is_some() {
                RunStage::Repaired
            } else {
                RunStage::RepairSkipped
            },
            started,
        );
        if let Some(report) = &report {
            metadata.validation_succeeded = report.validation_succeeded();
            metadata.improved_steps = report.improved_steps();
            metadata.degraded_steps = report.degraded_steps();
            metadata.degraded_scenarios = report.degraded_scenarios();
        }
        metadata.compiled_files = files.len();
        let post_repair = GenerationRun::capture(&run_id, repaired, metadata);

        info!(
            "Run {}: {} scenario(s), {} file(s) in {} ms",
            run_id,
            post_repair.scenarios.len(),
            files.len(),
            post_repair.metadata.total_time_ms
        );

        Ok(PipelineOutput {
            run_id,
            pre_repair,
            post_repair,
            files,
            repair: report,
        })
    }

    async fn repair_stage(
        &self,
        factory: &BackendFactory,
        url: &str,
        scenarios: &[Scenario],
    ) -> RepairReport {
        let mut session = AutomationSession::new(factory(), self.tools.clone());
        SelectorRepairer::from_config(&self.repair)
            .repair_within(&mut session, url, scenarios, self.repair.overall_timeout())
            .await
    }

    fn metadata(&self, source: RunSource, stage: RunStage, started: Instant) -> RunMetadata {
        RunMetadata {
            generated_at: Utc::now(),
            model_id: self.generator.model_id().to_string(),
            total_time_ms: started.elapsed().as_millis() as u64,
            source,
            validation_succeeded: false,
            stage,
            scenario_count: 0,
            step_count: 0,
            improved_steps: 0,
            degraded_steps: 0,
            degraded_scenarios: 0,
            compiled_files: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use testforge_common::{Action, Step};

    #[test]
    fn test_compile_all_names_files() {
        let scenarios = vec![
            Scenario::new("a", "Login: happy path")
                .with_steps(vec![Step::new(Action::Goto, "https://x.test")]),
            Scenario::new("b", "Odd").with_steps(vec![Step::new(Action::parse("drag"), "#x")]),
        ];
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();

        let files = compile_all(&scenarios, &CompileOptions::default(), at);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].scenario_id, "a");
        assert!(files[0].file_name.ends_with("_2024-05-01T12-30-15-000Z.spec.ts"));
        assert!(files[1].source.contains("drag"));
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("log in", "https://x.test")
            .with_credentials(Credentials::new("bob", Some("pw".into())))
            .with_run_id("run-1");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["targetUrl"], "https://x.test");
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["credentials"]["username"], "bob");
    }
}
