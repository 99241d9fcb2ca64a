//! Writing run output to disk
//!
//! Every run writes the same bundle into each requested directory:
//! `scenarios_<runId>-gemini.json`, `scenarios_<runId>-mcp.json` and one
//! `.spec.<ext>` file per scenario.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::debug;

use testforge_common::{GenerationRun, Scenario};
use testforge_compiler::{GeneratedFile, PipelineOutput};

/// File name of a snapshot
pub fn snapshot_file_name(run: &GenerationRun) -> String {
    format!("scenarios_{}.json", run.run_id)
}

/// Write one snapshot into `dir`
pub fn write_snapshot(run: &GenerationRun, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(snapshot_file_name(run));
    let content = serde_json::to_string_pretty(run)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Write generated spec files into `dir`
pub fn write_files(files: &[GeneratedFile], dir: &Path) -> Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|file| {
            let path = dir.join(&file.file_name);
            std::fs::write(&path, &file.source)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}

/// Persist a pipeline run into every directory in `dirs`
pub fn persist(output: &PipelineOutput, dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for dir in dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        written.push(write_snapshot(&output.pre_repair, dir)?);
        written.push(write_snapshot(&output.post_repair, dir)?);
        written.extend(write_files(&output.files, dir)?);
        debug!("Wrote run {} to {}", output.run_id, dir.display());
    }
    Ok(written)
}

/// Load scenarios from a snapshot file, a `{"scenarios": [...]}` object or a
/// bare array
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let scenarios = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("scenarios") {
            Some(scenarios) => scenarios,
            None => bail!("{} has no scenarios", path.display()),
        },
        _ => bail!("{} has no scenarios", path.display()),
    };

    serde_json::from_value(scenarios)
        .with_context(|| format!("{} contains malformed scenarios", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use testforge_common::{Action, RunMetadata, RunSource, RunStage, Step};

    fn run(source: RunSource, scenarios: Vec<Scenario>) -> GenerationRun {
        GenerationRun::capture(
            "run-7",
            scenarios,
            RunMetadata {
                generated_at: Utc::now(),
                model_id: "m".to_string(),
                total_time_ms: 10,
                source,
                validation_succeeded: false,
                stage: RunStage::Generated,
                scenario_count: 0,
                step_count: 0,
                improved_steps: 0,
                degraded_steps: 0,
                degraded_scenarios: 0,
                compiled_files: 0,
            },
        )
    }

    fn scenarios() -> Vec<Scenario> {
        vec![Scenario::new("s1", "Search").with_steps(vec![
            Step::new(Action::Goto, "https://x.test"),
            Step::new(Action::Fill, "#q").with_data("rust"),
        ])]
    }

    fn output() -> PipelineOutput {
        PipelineOutput {
            run_id: "run-7".to_string(),
            pre_repair: run(RunSource::GeminiOnly, scenarios()),
            post_repair: run(RunSource::GeminiPlusMcp, scenarios()),
            files: vec![GeneratedFile {
                scenario_id: "s1".to_string(),
                file_name: "search_2024-01-01T00-00-00-000Z.spec.ts".to_string(),
                source: "test('Search', async ({ page }) => {});\n".to_string(),
            }],
            repair: None,
        }
    }

    #[test]
    fn test_persist_to_each_directory() {
        let root = tempfile::tempdir().unwrap();
        let dirs = vec![root.path().join("primary"), root.path().join("mirror/nested")];

        let written = persist(&output(), &dirs).unwrap();
        assert_eq!(written.len(), 6);

        for dir in &dirs {
            assert!(dir.join("scenarios_run-7-gemini.json").exists());
            assert!(dir.join("scenarios_run-7-mcp.json").exists());
            let spec = std::fs::read_to_string(dir.join("search_2024-01-01T00-00-00-000Z.spec.ts"))
                .unwrap();
            assert!(spec.starts_with("test('Search'"));
        }
    }

    #[test]
    fn test_no_directories_writes_nothing() {
        assert!(persist(&output(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_load_scenarios_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let snapshot = write_snapshot(&run(RunSource::GeminiOnly, scenarios()), dir.path()).unwrap();
        assert_eq!(load_scenarios(&snapshot).unwrap(), scenarios());

        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, serde_json::to_string(&scenarios()).unwrap()).unwrap();
        assert_eq!(load_scenarios(&bare).unwrap(), scenarios());

        let wrong = dir.path().join("wrong.json");
        std::fs::write(&wrong, r#"{"runs": []}"#).unwrap();
        assert!(load_scenarios(&wrong).is_err());

        assert!(load_scenarios(&dir.path().join("absent.json")).is_err());
    }
}
