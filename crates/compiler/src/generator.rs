//! Scenario generation from a natural-language objective
//!
//! The text service reply is free-form text that should contain one JSON
//! object of the shape `{ "scenarios": [...] }`. Parsing is fail-soft: any
//! reply that cannot be read as that shape yields an empty scenario list.
//! Only a failure of the outbound call itself is reported as an error.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use testforge_common::{Action, Credentials, Scenario, Step, DEFAULT_TAG, ROOT_SELECTOR};

use crate::config::GeneratorConfig;
use crate::error::ForgeResult;

/// A generative text service: send a prompt, get text back
#[async_trait]
pub trait TextService: Send + Sync {
    /// Model identifier recorded in run metadata
    fn model_id(&self) -> &str;

    async fn complete(&self, prompt: &str) -> ForgeResult<String>;
}

/// Turns objectives into scenario IR through a text service
pub struct ScenarioGenerator {
    service: Arc<dyn TextService>,
    config: GeneratorConfig,
}

impl ScenarioGenerator {
    pub fn new(service: Arc<dyn TextService>, config: GeneratorConfig) -> Self {
        Self { service, config }
    }

    pub fn model_id(&self) -> &str {
        self.service.model_id()
    }

    /// Ask the text service for scenarios covering `objective` on `target_url`
    pub async fn generate(
        &self,
        objective: &str,
        target_url: &str,
        credentials: Option<&Credentials>,
    ) -> ForgeResult<Vec<Scenario>> {
        let prompt = build_prompt(objective, target_url, credentials, self.config.min_scenarios);
        debug!("Requesting scenarios from {}", self.service.model_id());

        let reply = self.service.complete(&prompt).await?;
        let scenarios = parse_scenarios(&reply);

        if scenarios.is_empty() {
            warn!("Text service reply contained no usable scenarios");
        } else if scenarios.len() < self.config.min_scenarios {
            info!(
                "Received {} scenario(s), fewer than the {} requested",
                scenarios.len(),
                self.config.min_scenarios
            );
        } else {
            info!("Generated {} scenario(s)", scenarios.len());
        }

        Ok(scenarios)
    }
}

/// Build the generation prompt
pub fn build_prompt(
    objective: &str,
    target_url: &str,
    credentials: Option<&Credentials>,
    min_scenarios: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a senior QA engineer writing end-to-end browser tests.\n\n");
    prompt.push_str(&format!("Test objective: {}\n", objective.trim()));
    prompt.push_str(&format!("Application URL: {}\n", target_url.trim()));

    if let Some(creds) = credentials {
        prompt.push_str(&format!("Login username: {}\n", creds.username));
        if let Some(password) = &creds.password {
            prompt.push_str(&format!("Login password: {}\n", password));
        }
    }

    let actions: Vec<String> = Action::RECOGNIZED.iter().map(Action::to_string).collect();
    prompt.push_str(&format!(
        r##"
Propose at least {min} distinct test scenarios (never fewer than 2) covering the
objective, including negative and edge cases.

Respond with a single JSON object and nothing else:
{{
  "scenarios": [
    {{
      "id": "scenario_1",
      "name": "Short descriptive name",
      "tags": ["smoke"],
      "steps": [
        {{ "action": "goto", "target": "{url}", "description": "Open the application" }},
        {{ "action": "fill", "target": "#username", "data": "value", "description": "Enter the username" }}
      ]
    }}
  ]
}}

Rules:
- "action" must be one of: {actions}.
- The first step of every scenario is a "goto" to the application URL.
- When you do not know the exact selector, use an identifier-style target such as "#login".
- "expect" steps put the assertion in "data", e.g. "visible" or "text 'Welcome'".
- Use "body" as the target of a "wait" step that only waits for the page to settle.
"##,
        min = min_scenarios,
        url = target_url.trim(),
        actions = actions.join(", "),
    ));
    prompt
}

/// Parse a text service reply into scenarios. Never fails: anything that is
/// not the expected shape yields an empty list.
pub fn parse_scenarios(reply: &str) -> Vec<Scenario> {
    let Some(json) = extract_json(reply) else {
        debug!("No JSON object found in reply");
        return Vec::new();
    };

    let value: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            debug!("Reply JSON did not parse: {}", e);
            return Vec::new();
        }
    };

    let Some(entries) = value.get("scenarios").and_then(Value::as_array) else {
        debug!("Reply JSON has no scenarios array");
        return Vec::new();
    };

    let mut scenarios = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match scenario_from_value(entry, index) {
            Some(scenario) => scenarios.push(scenario),
            None => {
                debug!("Scenario {} does not match the expected shape", index + 1);
                return Vec::new();
            }
        }
    }

    dedupe_ids(&mut scenarios);
    scenarios
}

/// Locate the JSON payload: the first fenced code block, otherwise the first
/// balanced `{...}` substring
fn extract_json(reply: &str) -> Option<&str> {
    if let Some(block) = first_fenced_block(reply) {
        if let Some(object) = first_balanced_object(block) {
            return Some(object);
        }
    }
    first_balanced_object(reply)
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an info string such as `json`
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

pub(crate) fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + idx + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(scalar_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn scenario_from_value(value: &Value, index: usize) -> Option<Scenario> {
    let map = value.as_object()?;
    let ordinal = index + 1;

    let steps = match map.get("steps") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut steps = Vec::with_capacity(items.len());
            for item in items {
                if let Some(step) = step_from_value(item)? {
                    steps.push(step);
                }
            }
            steps
        }
        Some(_) => return None,
    };

    let mut tags: Vec<String> = match map.get("tags") {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
        _ => Vec::new(),
    };
    if tags.is_empty() {
        tags.push(DEFAULT_TAG.to_string());
    }

    Some(
        Scenario::new(
            non_empty(map, "id").unwrap_or_else(|| format!("scenario_{}", ordinal)),
            non_empty(map, "name").unwrap_or_else(|| format!("Scenario {}", ordinal)),
        )
        .with_steps(steps)
        .with_tags(tags),
    )
}

/// `None` on a shape mismatch, `Some(None)` for a step that is dropped
fn step_from_value(value: &Value) -> Option<Option<Step>> {
    let map = value.as_object()?;

    let action = non_empty(map, "action")
        .map(|name| Action::parse(&name))
        .unwrap_or(Action::Click);
    let target = non_empty(map, "target").unwrap_or_else(|| ROOT_SELECTOR.to_string());

    let mut step = Step::new(action, target);
    if let Err(e) = step.validate() {
        warn!("Dropping generated step: {}", e);
        return Some(None);
    }

    step.data = map.get("data").and_then(scalar_string);
    if let Some(description) = non_empty(map, "description") {
        step.description = description;
    }
    Some(Some(step))
}

fn dedupe_ids(scenarios: &mut [Scenario]) {
    let mut seen = HashSet::new();
    for scenario in scenarios.iter_mut() {
        if seen.insert(scenario.id.clone()) {
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}-{}", scenario.id, n);
        while !seen.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{}-{}", scenario.id, n);
        }
        scenario.id = candidate;
    }
}
