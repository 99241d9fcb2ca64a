//! Error types for the testforge pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Text service returned {status}: {body}")]
    TextService { status: u16, body: String },

    #[error("Automation backend unavailable: {0}")]
    Connection(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("MCP server returned error {code}: {message}")]
    McpRemote { code: i64, message: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ForgeResult<T> = Result<T, ForgeError>;
