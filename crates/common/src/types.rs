//! Scenario IR types for testforge

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Selector used when a step has no meaningful element target.
pub const ROOT_SELECTOR: &str = "body";

/// Tag applied to generated scenarios that arrive without tags.
pub const DEFAULT_TAG: &str = "generated";

/// Abstract UI action a step performs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Goto,
    Fill,
    Click,
    Expect,
    Wait,
    Type,
    Select,
    Hover,
    /// Unrecognized action name, kept verbatim
    Other(String),
}

impl Action {
    /// All recognized action kinds
    pub const RECOGNIZED: [Action; 8] = [
        Action::Goto,
        Action::Fill,
        Action::Click,
        Action::Expect,
        Action::Wait,
        Action::Type,
        Action::Select,
        Action::Hover,
    ];

    /// Parse an action name. Matching is case-insensitive and never fails;
    /// unknown names become `Action::Other`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "goto" => Action::Goto,
            "fill" => Action::Fill,
            "click" => Action::Click,
            "expect" => Action::Expect,
            "wait" => Action::Wait,
            "type" => Action::Type,
            "select" => Action::Select,
            "hover" => Action::Hover,
            _ => Action::Other(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Goto => "goto",
            Action::Fill => "fill",
            Action::Click => "click",
            Action::Expect => "expect",
            Action::Wait => "wait",
            Action::Type => "type",
            Action::Select => "select",
            Action::Hover => "hover",
            Action::Other(name) => name,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Action::Other(_))
    }

    /// Actions whose target is an element selector
    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            Action::Fill
                | Action::Click
                | Action::Expect
                | Action::Wait
                | Action::Type
                | Action::Select
                | Action::Hover
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Action::parse(&name))
    }
}

/// One abstract UI action in a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,

    /// Selector, URL, or symbolic role expression depending on the action
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default)]
    pub description: String,
}

impl Step {
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            description: format!("{} {}", action, target),
            action,
            target,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Copy of this step pointing at a different target
    pub fn retarget(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    /// Check the step's action is one of the recognized kinds
    pub fn validate(&self) -> Result<()> {
        if !self.action.is_recognized() {
            return Err(Error::UnrecognizedAction(self.action.to_string()));
        }
        Ok(())
    }

    pub fn targets_root(&self) -> bool {
        self.target.trim() == ROOT_SELECTOR
    }
}

/// A single test case: an ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_to_compile: Option<String>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            tags: BTreeSet::from([DEFAULT_TAG.to_string()]),
            time_taken_to_compile: None,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Copy of this scenario with its steps replaced
    pub fn with_replaced_steps(&self, steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..self.clone()
        }
    }

    /// Validate every step, reporting the first failure
    pub fn validate(&self) -> Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|e| Error::InvalidStep {
                scenario: self.id.clone(),
                index,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Login credentials embedded in the generation prompt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which pipeline stages produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    GeminiOnly,
    GeminiPlusMcp,
}

impl RunSource {
    /// Suffix appended to the run id for this snapshot
    pub fn run_id_suffix(&self) -> &'static str {
        match self {
            RunSource::GeminiOnly => "gemini",
            RunSource::GeminiPlusMcp => "mcp",
        }
    }
}

impl fmt::Display for RunSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunSource::GeminiOnly => write!(f, "gemini_only"),
            RunSource::GeminiPlusMcp => write!(f, "gemini_plus_mcp"),
        }
    }
}

/// Pipeline stage a snapshot was captured at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Generated,
    Repaired,
    RepairSkipped,
    Compiled,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Generated => write!(f, "generated"),
            RunStage::Repaired => write!(f, "repaired"),
            RunStage::RepairSkipped => write!(f, "repair_skipped"),
            RunStage::Compiled => write!(f, "compiled"),
        }
    }
}

/// Metadata describing how a snapshot was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub model_id: String,
    pub total_time_ms: u64,
    pub source: RunSource,
    pub validation_succeeded: bool,
    pub stage: RunStage,
    #[serde(default)]
    pub scenario_count: usize,
    #[serde(default)]
    pub step_count: usize,
    #[serde(default)]
    pub improved_steps: usize,
    #[serde(default)]
    pub degraded_steps: usize,
    #[serde(default)]
    pub degraded_scenarios: usize,
    #[serde(default)]
    pub compiled_files: usize,
}

/// An immutable snapshot of a scenario set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRun {
    pub run_id: String,
    pub scenarios: Vec<Scenario>,
    pub metadata: RunMetadata,
}

impl GenerationRun {
    /// Capture a snapshot. The run id gets the source's suffix so that the
    /// pre- and post-repair snapshots of one run pair up.
    pub fn capture(base_run_id: &str, scenarios: Vec<Scenario>, metadata: RunMetadata) -> Self {
        Self {
            run_id: format!("{}-{}", base_run_id, metadata.source.run_id_suffix()),
            metadata: RunMetadata {
                scenario_count: scenarios.len(),
                step_count: scenarios.iter().map(|s| s.steps.len()).sum(),
                ..metadata
            },
            scenarios,
        }
    }

    /// Run id without the snapshot suffix
    pub fn base_run_id(&self) -> &str {
        let suffix = self.metadata.source.run_id_suffix();
        self.run_id
            .strip_suffix(suffix)
            .and_then(|s| s.strip_suffix('-'))
            .unwrap_or(&self.run_id)
    }
}
