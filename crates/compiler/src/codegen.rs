//! Playwright test source generation from scenario IR
//!
//! `compile` is a pure function: identical scenarios and options always
//! produce byte-identical source. Unknown actions never abort a file; they
//! are emitted as a generic page call with the step description attached.

use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use testforge_common::{Action, Scenario, Step};

/// Prefix marking a text-match target, e.g. `text=Sign in`
pub const TEXT_PREFIX: &str = "text=";

/// How element targets are turned into locators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorStrategy {
    /// Prefer `getByRole` for `role=<Role>[name='<Name>']` targets
    #[default]
    RoleFirst,
    /// Emit every non-text target as a raw selector
    Css,
}

/// Source language of the emitted test file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[default]
    TypeScript,
    JavaScript,
}

impl TargetLanguage {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetLanguage::TypeScript => "ts",
            TargetLanguage::JavaScript => "js",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub selector_strategy: SelectorStrategy,
    pub language: TargetLanguage,
}

impl CompileOptions {
    pub fn css() -> Self {
        Self {
            selector_strategy: SelectorStrategy::Css,
            ..Default::default()
        }
    }
}

/// How a step target resolves to a Playwright locator
#[derive(Debug, Clone, PartialEq, Eq)]
enum Locator<'a> {
    Role { role: String, name: String },
    Text(&'a str),
    Raw(&'a str),
}

fn role_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^role=([A-Za-z]+)\[name=(?:'([^']*)'|"([^"]*)")\]$"#)
            .expect("role pattern is valid")
    })
}

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("quoted pattern is valid")
    })
}

fn resolve(target: &str, strategy: SelectorStrategy) -> Locator<'_> {
    let target = target.trim();
    if strategy == SelectorStrategy::RoleFirst {
        if let Some(caps) = role_pattern().captures(target) {
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Locator::Role {
                role: caps[1].to_ascii_lowercase(),
                name,
            };
        }
    }
    if let Some(text) = target.strip_prefix(TEXT_PREFIX) {
        return Locator::Text(text.trim_matches(|c| c == '\'' || c == '"'));
    }
    Locator::Raw(target)
}

/// Quote a string as a single-quoted JS literal
fn js_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Collapse a description onto one comment line
fn comment_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn locator_expr(locator: &Locator<'_>) -> String {
    match locator {
        Locator::Role { role, name } => format!(
            "page.getByRole({}, {{ name: {} }})",
            js_str(role),
            js_str(name)
        ),
        Locator::Text(text) => format!("page.getByText({})", js_str(text)),
        Locator::Raw(selector) => format!("page.locator({})", js_str(selector)),
    }
}

/// Emit the statement for one step
fn step_to_js(step: &Step, strategy: SelectorStrategy) -> String {
    let data = step.data.as_deref().unwrap_or("");
    match &step.action {
        Action::Goto => format!("  await page.goto({});", js_str(&step.target)),
        Action::Click => match resolve(&step.target, strategy) {
            Locator::Raw(selector) => format!("  await page.click({});", js_str(selector)),
            other => format!("  await {}.click();", locator_expr(&other)),
        },
        Action::Fill | Action::Type => match resolve(&step.target, strategy) {
            Locator::Raw(selector) => {
                format!("  await page.fill({}, {});", js_str(selector), js_str(data))
            }
            other => format!("  await {}.fill({});", locator_expr(&other), js_str(data)),
        },
        Action::Expect => {
            let locator = locator_expr(&resolve(&step.target, strategy));
            let lowered = data.to_ascii_lowercase();
            if lowered.contains("visible") {
                format!("  await expect({}).toBeVisible();", locator)
            } else if let Some(text) = lowered
                .contains("text")
                .then(|| quoted_span(data))
                .flatten()
            {
                format!("  await expect({}).toContainText({});", locator, js_str(text))
            } else {
                format!("  await expect({}).toBeVisible();", locator)
            }
        }
        Action::Wait => format!("  await page.waitForSelector({});", js_str(&step.target)),
        Action::Select => match resolve(&step.target, strategy) {
            Locator::Raw(selector) => format!(
                "  await page.selectOption({}, {});",
                js_str(selector),
                js_str(data)
            ),
            other => format!(
                "  await {}.selectOption({});",
                locator_expr(&other),
                js_str(data)
            ),
        },
        Action::Hover => match resolve(&step.target, strategy) {
            Locator::Raw(selector) => format!("  await page.hover({});", js_str(selector)),
            other => format!("  await {}.hover();", locator_expr(&other)),
        },
        Action::Other(name) => {
            let method = generic_method_name(name);
            let args = match &step.data {
                Some(d) => format!("{}, {}", js_str(&step.target), js_str(d)),
                None => js_str(&step.target),
            };
            format!(
                "  // Unrecognized action '{}': {}\n  await page.{}({});",
                comment_text(name),
                comment_text(&step.description),
                method,
                args
            )
        }
    }
}

/// First quoted span in `data`, single or double quotes
fn quoted_span(data: &str) -> Option<&str> {
    let caps = quoted_pattern().captures(data)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// Reduce an arbitrary action name to a JS identifier
fn generic_method_name(name: &str) -> String {
    let mut method: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if method.is_empty() || method.starts_with(|c: char| c.is_ascii_digit()) {
        method.insert_str(0, "action_");
    }
    method
}

fn header(language: TargetLanguage) -> &'static str {
    match language {
        TargetLanguage::TypeScript => "import { test, expect } from '@playwright/test';\n",
        TargetLanguage::JavaScript => "const { test, expect } = require('@playwright/test');\n",
    }
}

fn test_block(scenario: &Scenario, strategy: SelectorStrategy) -> String {
    let mut block = String::new();
    block.push_str(&format!(
        "test({}, async ({{ page }}) => {{\n",
        js_str(&scenario.name)
    ));
    for (i, step) in scenario.steps.iter().enumerate() {
        block.push_str(&format!(
            "  // Step {}: {}\n",
            i + 1,
            comment_text(&step.description)
        ));
        block.push_str(&step_to_js(step, strategy));
        block.push('\n');
    }
    block.push_str("});\n");
    block
}

/// Compile one scenario into a complete test file
pub fn compile(scenario: &Scenario, options: &CompileOptions) -> String {
    let mut source = String::new();
    source.push_str(header(options.language));
    source.push('\n');
    if !scenario.tags.is_empty() {
        let tags: Vec<&str> = scenario.tags.iter().map(String::as_str).collect();
        source.push_str(&format!("// Tags: {}\n", tags.join(", ")));
    }
    source.push_str(&test_block(scenario, options.selector_strategy));
    source
}

/// Lowercase `name`, replacing every non-alphanumeric char with `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Suggested file name: `<name>_<timestamp>.spec.<ext>`, with ':' and '.'
/// in the ISO timestamp replaced by '-'
pub fn suggested_file_name(
    scenario: &Scenario,
    timestamp: DateTime<Utc>,
    language: TargetLanguage,
) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "{}_{}.spec.{}",
        sanitize_name(&scenario.name),
        stamp,
        language.extension()
    )
}
