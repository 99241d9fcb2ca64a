//! Automation session over a browser-automation backend
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected ──call──▶ Connected
//!      ▲                          │                  │
//!      └────────────failed────────┘                  └─transport lost─▶ Disconnected
//!
//! any state ──disconnect()──▶ Closed   (terminal, never reconnects)
//! ```
//!
//! Step and validation failures are reported in the returned result, not as
//! errors. Only a lost or missing connection is an `Err`, since it makes
//! every following call fail too.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use testforge_common::Action;

use crate::config::{ToolMap, ToolSpec};
use crate::error::{ForgeError, ForgeResult};
use crate::generator::first_balanced_object;

/// Reply to a single backend tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolReply {
    /// Backend flagged the call as failed
    pub is_error: bool,
    /// Concatenated text content of the reply
    pub text: String,
}

impl ToolReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
        }
    }
}

/// A live browser-automation backend
#[async_trait]
pub trait AutomationBackend: Send {
    /// Establish the backend channel
    async fn connect(&mut self) -> ForgeResult<()>;

    /// Invoke a named tool
    async fn call_tool(&mut self, name: &str, arguments: Value) -> ForgeResult<ToolReply>;

    /// Release the channel. Must be safe to call more than once.
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is {0}, not connected")]
    NotConnected(SessionState),

    #[error("automation backend connection lost: {0}")]
    Lost(String),
}

/// Result of executing one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of validating one selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improved_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Structured reply some backends send as text content
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "improved_selector", alias = "locator", alias = "selector")]
    improved_selector: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_structured(text: &str) -> Option<StructuredReply> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).ok();
    }
    // Some servers wrap the payload, e.g. an evaluate result under a heading
    let object = first_balanced_object(trimmed)?;
    serde_json::from_str::<StructuredReply>(object)
        .ok()
        .filter(|reply| reply.success.is_some() || reply.improved_selector.is_some())
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{(target_json|data_json|target|data)\}").expect("placeholder pattern is valid")
    })
}

/// Expand a [`ToolSpec`] argument template for one call
fn render_arguments(template: &Value, target: &str, data: Option<&str>) -> Value {
    match template {
        Value::String(s) if s == "{values}" => json!(data.map(|d| vec![d]).unwrap_or_default()),
        Value::String(s) => {
            let rendered = placeholder().replace_all(s, |caps: &Captures| match &caps[1] {
                "target" => target.to_string(),
                "data" => data.unwrap_or_default().to_string(),
                "target_json" => Value::from(target).to_string(),
                _ => Value::from(data.unwrap_or_default()).to_string(),
            });
            Value::String(rendered.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_arguments(item, target, data))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_arguments(value, target, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Keep a suggested selector only if it is a real alternative to `original`
fn better_selector(candidate: Option<String>, original: &str) -> Option<String> {
    candidate
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != original.trim())
}

/// One connection to an automation backend
pub struct AutomationSession {
    backend: Box<dyn AutomationBackend>,
    tools: ToolMap,
    state: SessionState,
    connect_attempted: bool,
}

impl std::fmt::Debug for AutomationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSession")
            .field("state", &self.state)
            .finish()
    }
}

impl AutomationSession {
    pub fn new(backend: Box<dyn AutomationBackend>, tools: ToolMap) -> Self {
        Self {
            backend,
            tools,
            state: SessionState::Disconnected,
            connect_attempted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Connect to the backend. `false` means validation is unavailable; it is
    /// never fatal to the caller.
    pub async fn connect(&mut self) -> bool {
        match self.state {
            SessionState::Connected => return true,
            SessionState::Closed => {
                warn!("Refusing to reconnect a closed automation session");
                return false;
            }
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        self.state = SessionState::Connecting;
        self.connect_attempted = true;

        match self.backend.connect().await {
            Ok(()) => {
                info!("Automation session connected");
                self.state = SessionState::Connected;
                true
            }
            Err(e) => {
                warn!("Automation backend unavailable: {}", e);
                self.state = SessionState::Disconnected;
                false
            }
        }
    }

    /// Close the session. Idempotent, and safe without a prior `connect()`.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.connect_attempted {
            self.backend.close().await;
            debug!("Automation session closed");
        }
        self.state = SessionState::Closed;
    }

    fn tool_for(&self, action: &Action) -> Option<&ToolSpec> {
        match action {
            Action::Goto => Some(&self.tools.navigate),
            Action::Click => Some(&self.tools.click),
            Action::Fill => Some(&self.tools.fill),
            Action::Expect => Some(&self.tools.assert_visible),
            Action::Wait => Some(&self.tools.wait_for),
            Action::Type => Some(&self.tools.type_text),
            Action::Select => Some(&self.tools.select_option),
            Action::Hover => Some(&self.tools.hover),
            Action::Other(_) => None,
        }
    }

    /// Issue one backend call, classifying transport loss
    async fn call(&mut self, tool: &str, arguments: Value) -> Result<ForgeResult<ToolReply>, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected(self.state));
        }
        match self.backend.call_tool(tool, arguments).await {
            Err(ForgeError::Connection(msg)) => {
                self.state = SessionState::Disconnected;
                Err(SessionError::Lost(msg))
            }
            Err(ForgeError::Io(e)) => {
                self.state = SessionState::Disconnected;
                Err(SessionError::Lost(e.to_string()))
            }
            other => Ok(other),
        }
    }

    /// Execute one action against the live page
    pub async fn execute_step(
        &mut self,
        action: &Action,
        target: &str,
        data: Option<&str>,
    ) -> Result<StepResult, SessionError> {
        let Some(spec) = self.tool_for(action) else {
            return Ok(StepResult::failed(format!("unsupported action: {}", action)));
        };
        let tool = spec.name.clone();
        let arguments = render_arguments(&spec.arguments, target, data);

        let start = Instant::now();
        let reply = self.call(&tool, arguments).await?;
        let elapsed = elapsed_ms(start.elapsed());

        let mut result = match reply {
            Err(e) => StepResult::failed(e.to_string()),
            Ok(reply) if reply.is_error => StepResult::failed(reply.text),
            Ok(reply) => match parse_structured(&reply.text) {
                Some(structured) if structured.success == Some(false) => StepResult::failed(
                    structured.error.unwrap_or_else(|| format!("{} failed", action)),
                ),
                Some(structured) => StepResult {
                    success: true,
                    improved_selector: better_selector(structured.improved_selector, target),
                    ..Default::default()
                },
                None => StepResult {
                    success: true,
                    ..Default::default()
                },
            },
        };
        result.execution_time_ms = Some(elapsed);

        debug!(
            "{} {} -> {} ({} ms)",
            action,
            target,
            if result.success { "ok" } else { "failed" },
            elapsed
        );
        Ok(result)
    }

    /// Ask the backend whether `target` resolves, and for a sturdier
    /// alternative. A reply that is not structured is taken as the improved
    /// selector text verbatim.
    pub async fn validate_selector(&mut self, target: &str) -> Result<ValidationResult, SessionError> {
        let spec = &self.tools.validate_selector;
        let tool = spec.name.clone();
        let arguments = render_arguments(&spec.arguments, target, None);
        let reply = self.call(&tool, arguments).await?;

        let result = match reply {
            Err(e) => ValidationResult::failed(e.to_string()),
            Ok(reply) if reply.is_error => ValidationResult::failed(reply.text),
            Ok(reply) => match parse_structured(&reply.text) {
                Some(structured) if structured.success == Some(false) => ValidationResult::failed(
                    structured
                        .error
                        .unwrap_or_else(|| format!("selector {} did not resolve", target)),
                ),
                Some(structured) => ValidationResult {
                    success: true,
                    improved_selector: better_selector(structured.improved_selector, target),
                    error: None,
                },
                None => ValidationResult {
                    success: true,
                    improved_selector: better_selector(Some(reply.text), target),
                    error: None,
                },
            },
        };
        Ok(result)
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}
