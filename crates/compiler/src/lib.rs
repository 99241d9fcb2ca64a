//! testforge compiler
//!
//! Turns a natural-language test objective into Playwright test files:
//! - Asks a text-generation service for scenarios (Scenario IR)
//! - Replays them against a live browser over MCP, repairing selectors
//! - Emits one test source file per scenario
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Pipeline                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioGenerator ── TextService (GeminiClient)            │
//! │    └── generate(objective, url, credentials) -> [Scenario]  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SelectorRepairer                                           │
//! │    └── repair(session, url, [Scenario]) -> RepairReport     │
//! │  AutomationSession ── AutomationBackend (McpBackend)        │
//! │    ├── connect() / disconnect()                             │
//! │    ├── validate_selector(target)                            │
//! │    └── execute_step(action, target, data)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  codegen                                                    │
//! │    └── compile(Scenario, CompileOptions) -> String          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod codegen;
pub mod config;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod mcp;
pub mod pipeline;
pub mod repair;
pub mod session;

pub use codegen::{compile, CompileOptions, SelectorStrategy, TargetLanguage};
pub use config::ForgeConfig;
pub use error::{ForgeError, ForgeResult};
pub use generator::{ScenarioGenerator, TextService};
pub use pipeline::{GeneratedFile, GenerationRequest, Pipeline, PipelineOutput};
pub use repair::{RepairReport, SelectorRepairer};
pub use session::{AutomationBackend, AutomationSession, SessionState, ToolReply};
