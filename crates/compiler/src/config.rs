//! Pipeline configuration

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codegen::{CompileOptions, SelectorStrategy, TargetLanguage};
use crate::error::ForgeResult;

/// Environment variable holding the Gemini API key
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable overriding the Gemini model
pub const GEMINI_MODEL_ENV: &str = "TESTFORGE_GEMINI_MODEL";
/// Environment variable overriding the automation server command
pub const MCP_COMMAND_ENV: &str = "TESTFORGE_MCP_COMMAND";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Text-generation service
    pub gemini: GeminiConfig,

    /// Scenario prompt settings
    pub generator: GeneratorConfig,

    /// Browser automation backend
    pub automation: AutomationConfig,

    /// Selector repair
    pub repair: RepairConfig,

    /// Code generation
    pub codegen: CodegenConfig,
}

/// Gemini client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Base endpoint, or a full `:generateContent` URL
    pub endpoint: String,

    /// Model id
    pub model: String,

    /// API key; falls back to `GEMINI_API_KEY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request timeout (seconds)
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: Some(0.2),
        }
    }
}

/// Scenario prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of scenarios requested from the text service
    pub min_scenarios: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { min_scenarios: 5 }
    }
}

/// Automation server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Program that starts the MCP server
    pub command: String,

    /// Arguments passed to `command`
    pub args: Vec<String>,

    /// Timeout for a single backend call (ms)
    pub call_timeout_ms: u64,

    /// Timeout for the initialize handshake (ms)
    pub connect_timeout_ms: u64,

    /// Tool names invoked for each action
    pub tools: ToolMap,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec![
                "@playwright/mcp@latest".to_string(),
                "--headless".to_string(),
                "--caps=testing".to_string(),
            ],
            call_timeout_ms: 30_000,
            connect_timeout_ms: 60_000,
            tools: ToolMap::default(),
        }
    }
}

impl AutomationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// One backend tool and the shape of its arguments.
///
/// `arguments` is a JSON template. String values are expanded per call:
/// `{target}` and `{data}` insert the raw step target and data,
/// `{target_json}` and `{data_json}` insert them as quoted JSON string
/// literals (for embedding in scripts), and a value that is exactly
/// `"{values}"` becomes `[data]`, or `[]` when the step has no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    fn evaluate(body: &str) -> Self {
        Self::new(
            "browser_evaluate",
            json!({ "function": format!("async () => {{ {} {} }}", FIND_ELEMENT, body) }),
        )
    }
}

// Resolves `{target_json}` to an element; `text=` targets match on text content.
const FIND_ELEMENT: &str = "const sel = {target_json}; \
let el = null; \
try { el = sel.startsWith('text=') \
? Array.from(document.querySelectorAll('body *')).find(e => e.children.length === 0 && (e.textContent || '').includes(sel.slice(5))) || null \
: document.querySelector(sel); } \
catch (e) { return { success: false, error: String(e) }; }";

const REQUIRE_ELEMENT: &str =
    "if (!el) return { success: false, error: 'no element matches ' + sel };";

/// Backend tool per operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolMap {
    pub navigate: ToolSpec,
    pub click: ToolSpec,
    pub fill: ToolSpec,
    pub type_text: ToolSpec,
    pub assert_visible: ToolSpec,
    pub wait_for: ToolSpec,
    pub select_option: ToolSpec,
    pub hover: ToolSpec,
    pub validate_selector: ToolSpec,
}

impl Default for ToolMap {
    fn default() -> Self {
        Self::playwright_mcp()
    }
}

impl ToolMap {
    /// `@playwright/mcp`. Its element tools address snapshot refs rather than
    /// selectors, so everything past navigation runs through
    /// `browser_evaluate` against the live page.
    pub fn playwright_mcp() -> Self {
        let set_value = |event: &str| {
            ToolSpec::evaluate(&format!(
                "{} el.focus && el.focus(); el.value = {{data_json}}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('{}', {{ bubbles: true }})); \
                 return {{ success: true }};",
                REQUIRE_ELEMENT, event
            ))
        };

        Self {
            navigate: ToolSpec::new("browser_navigate", json!({ "url": "{target}" })),
            click: ToolSpec::evaluate(&format!(
                "{} el.click(); return {{ success: true }};",
                REQUIRE_ELEMENT
            )),
            fill: set_value("change"),
            type_text: set_value("keyup"),
            assert_visible: ToolSpec::evaluate(&format!(
                "{} const box = el.getBoundingClientRect(); \
                 return box.width > 0 && box.height > 0 \
                 ? {{ success: true }} : {{ success: false, error: sel + ' is not visible' }};",
                REQUIRE_ELEMENT
            )),
            wait_for: ToolSpec::new(
                "browser_evaluate",
                json!({
                    "function": "async () => { const sel = {target_json}; \
                        const deadline = Date.now() + 10000; \
                        while (Date.now() < deadline) { \
                        try { if (document.querySelector(sel)) return { success: true }; } \
                        catch (e) { return { success: false, error: String(e) }; } \
                        await new Promise(r => setTimeout(r, 100)); } \
                        return { success: false, error: 'timed out waiting for ' + sel }; }"
                }),
            ),
            select_option: set_value("change"),
            hover: ToolSpec::evaluate(&format!(
                "{} for (const type of ['mouseover', 'mouseenter']) \
                 el.dispatchEvent(new MouseEvent(type, {{ bubbles: true }})); \
                 return {{ success: true }};",
                REQUIRE_ELEMENT
            )),
            validate_selector: ToolSpec::evaluate(&format!(
                "{} const unique = s => {{ try {{ return document.querySelectorAll(s).length === 1; }} catch (e) {{ return false; }} }}; \
                 const testId = el.getAttribute('data-testid'); \
                 const candidates = []; \
                 if (testId) candidates.push('[data-testid=\"' + testId + '\"]'); \
                 if (el.id) candidates.push('#' + CSS.escape(el.id)); \
                 const improved = candidates.find(unique) || sel; \
                 return {{ success: true, improvedSelector: improved }};",
                REQUIRE_ELEMENT
            )),
        }
    }

    /// Servers whose tools take a CSS selector directly:
    /// `{ "selector": <target> }`, plus `text` or `values` where the action
    /// carries data. Validation replies with
    /// `{ "success": bool, "improvedSelector"?: string }`.
    pub fn selector_server() -> Self {
        let element = |name: &str| ToolSpec::new(name, json!({ "selector": "{target}" }));
        let with_text = |name: &str| {
            ToolSpec::new(name, json!({ "selector": "{target}", "text": "{data}" }))
        };

        Self {
            navigate: ToolSpec::new("navigate", json!({ "url": "{target}" })),
            click: element("click"),
            fill: with_text("fill"),
            type_text: with_text("type"),
            assert_visible: element("assert_visible"),
            wait_for: element("wait_for_selector"),
            select_option: ToolSpec::new(
                "select_option",
                json!({ "selector": "{target}", "values": "{values}" }),
            ),
            hover: element("hover"),
            validate_selector: element("validate_selector"),
        }
    }
}

/// Selector repair configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Run the live repair stage at all
    pub enabled: bool,

    /// Pause between steps to let dynamic content settle (ms)
    pub step_delay_ms: u64,

    /// Upper bound on the whole repair stage (seconds, 0 = unbounded)
    pub overall_timeout_secs: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_delay_ms: 1000,
            overall_timeout_secs: 600,
        }
    }
}

impl RepairConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        (self.overall_timeout_secs > 0).then(|| Duration::from_secs(self.overall_timeout_secs))
    }
}

/// Code generation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    pub selector_strategy: SelectorStrategy,
    pub language: TargetLanguage,
}

impl CodegenConfig {
    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            selector_strategy: self.selector_strategy,
            language: self.language,
        }
    }
}

impl ForgeConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> ForgeResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> ForgeResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if self.gemini.api_key.is_none() {
            self.gemini.api_key = std::env::var(GEMINI_API_KEY_ENV).ok();
        }
        if let Ok(model) = std::env::var(GEMINI_MODEL_ENV) {
            self.gemini.model = model;
        }
        if let Ok(command) = std::env::var(MCP_COMMAND_ENV) {
            let mut parts = command.split_whitespace().map(String::from);
            if let Some(program) = parts.next() {
                self.automation.command = program;
                self.automation.args = parts.collect();
            }
        }
        self
    }
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".testforge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ForgeConfig = toml::from_str(
            r#"
[gemini]
model = "gemini-1.5-pro"

[repair]
step_delay_ms = 0

[codegen]
selector_strategy = "css"
"#,
        )
        .unwrap();

        assert_eq!(config.gemini.model, "gemini-1.5-pro");
        assert_eq!(config.gemini.timeout_secs, 120);
        assert_eq!(config.repair.step_delay(), Duration::ZERO);
        assert!(config.repair.enabled);
        assert_eq!(config.codegen.selector_strategy, SelectorStrategy::Css);
        assert_eq!(config.automation.tools, ToolMap::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ForgeConfig::default();
        config.generator.min_scenarios = 3;
        config.automation.tools = ToolMap::selector_server();
        config.automation.tools.navigate.name = "nav".to_string();
        config.save(&path).unwrap();

        let loaded = ForgeConfig::load(&path).unwrap();
        assert_eq!(loaded.generator.min_scenarios, 3);
        assert_eq!(loaded.automation.tools.navigate.name, "nav");
        assert_eq!(loaded.automation.tools.select_option.arguments["values"], "{values}");
    }

    #[test]
    fn test_default_tools_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        ForgeConfig::default().save(&path).unwrap();

        let loaded = ForgeConfig::load(&path).unwrap();
        assert_eq!(loaded.automation.tools, ToolMap::playwright_mcp());
    }

    #[test]
    fn test_custom_tool_shape_from_file() {
        let config: ForgeConfig = toml::from_str(
            r#"
[automation.tools.click]
name = "press"
arguments = { locator = "{target}", force = true }
"#,
        )
        .unwrap();

        let click = &config.automation.tools.click;
        assert_eq!(click.name, "press");
        assert_eq!(click.arguments, json!({ "locator": "{target}", "force": true }));
        assert_eq!(config.automation.tools.navigate, ToolMap::default().navigate);
    }

    #[test]
    fn test_playwright_tools_take_no_snapshot_refs() {
        let tools = ToolMap::playwright_mcp();
        assert_eq!(tools.navigate.name, "browser_navigate");
        for spec in [&tools.click, &tools.fill, &tools.validate_selector, &tools.wait_for] {
            assert_eq!(spec.name, "browser_evaluate");
            let function = spec.arguments["function"].as_str().unwrap();
            assert!(function.starts_with("async () => {"));
            assert!(function.contains("{target_json}"));
            assert!(spec.arguments.get("ref").is_none());
        }
        assert!(tools.fill.arguments["function"].as_str().unwrap().contains("{data_json}"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.generator.min_scenarios, 5);
        assert_eq!(config.repair.overall_timeout(), Some(Duration::from_secs(600)));
    }
}
