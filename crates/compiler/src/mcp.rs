//! MCP (Model Context Protocol) client for the Playwright automation server
//!
//! Spawns the server as a child process and speaks newline-delimited
//! JSON-RPC 2.0 over its stdio.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::config::AutomationConfig;
use crate::error::{ForgeError, ForgeResult};
use crate::session::{AutomationBackend, ToolReply};

/// Protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const JSONRPC_VERSION: &str = "2.0";
const METHOD_NOT_FOUND: i64 = -32601;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Any inbound message: response, notification or server request
#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `tools/call` result
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Content>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Content {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl From<CallToolResult> for ToolReply {
    fn from(result: CallToolResult) -> Self {
        let text = result
            .content
            .into_iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text),
                Content::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        ToolReply {
            is_error: result.is_error,
            text,
        }
    }
}

/// Copy of an outbound message for logging, with tool argument values
/// blanked out since they carry step data such as passwords
fn redacted(message: &Value) -> Value {
    let mut message = message.clone();
    if let Some(arguments) = message
        .pointer_mut("/params/arguments")
        .and_then(Value::as_object_mut)
    {
        for value in arguments.values_mut() {
            *value = Value::String("<redacted>".to_string());
        }
    }
    message
}

struct Channel {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    child: Option<Child>,
}

impl Channel {
    async fn send(&mut self, message: &impl Serialize) -> ForgeResult<()> {
        let value = serde_json::to_value(message)?;
        trace!("MCP -> {}", redacted(&value));
        let line = value.to_string();
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> ForgeResult<Message> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(ForgeError::Connection(
                    "automation server closed its output".to_string(),
                ));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => {
                    // Replies can echo tool arguments back, so only the envelope is logged
                    trace!(
                        "MCP <- id={:?} method={:?} ({} bytes)",
                        message.id,
                        message.method,
                        line.len()
                    );
                    return Ok(message);
                }
                // Servers occasionally print banners on stdout
                Err(_) => trace!("MCP non-protocol output: {}", line),
            }
        }
    }

    /// Reply to a request initiated by the server
    async fn answer(&mut self, id: Value, method: &str) -> ForgeResult<()> {
        let reply = if method == "ping" {
            json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
        } else {
            debug!("Declining server request {}", method);
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": { "code": METHOD_NOT_FOUND, "message": format!("Method not found: {}", method) }
            })
        };
        self.send(&reply).await
    }

    async fn shutdown(self) {
        let Channel { writer, child, .. } = self;
        // Closing stdin asks the server to exit
        drop(writer);
        if let Some(mut child) = child {
            if tokio::time::timeout(CLOSE_GRACE, child.wait()).await.is_err() {
                warn!("Automation server did not exit, killing it");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill automation server: {}", e);
                }
            }
        }
    }
}

/// Automation backend backed by an MCP server process
pub struct McpBackend {
    config: AutomationConfig,
    channel: Option<Channel>,
    initialized: bool,
    next_id: u64,
}

impl McpBackend {
    /// Create a backend (does not spawn)
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            channel: None,
            initialized: false,
            next_id: 1,
        }
    }

    #[cfg(test)]
    fn over<R, W>(config: AutomationConfig, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut backend = Self::new(config);
        backend.channel = Some(Channel {
            reader: BufReader::new(Box::new(reader) as BoxedReader),
            writer: Box::new(writer),
            child: None,
        });
        backend
    }

    fn spawn(&self) -> ForgeResult<Channel> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ForgeError::Connection(format!("failed to start {}: {}", self.config.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ForgeError::Connection("automation server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ForgeError::Connection("automation server stdout unavailable".into()))?;

        debug!("Spawned automation server: {} {}", self.config.command, self.config.args.join(" "));
        Ok(Channel {
            reader: BufReader::new(Box::new(stdout) as BoxedReader),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    /// Send a request and wait for its response, answering server requests
    /// and skipping notifications in between
    async fn request(&mut self, method: &str, params: Value, limit: Duration) -> ForgeResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ForgeError::Connection("not connected".to_string()))?;

        let exchange = async {
            channel
                .send(&Request {
                    jsonrpc: JSONRPC_VERSION,
                    id: Some(id),
                    method,
                    params: Some(params),
                })
                .await?;

            let expected = Value::from(id);
            loop {
                let message = channel.receive().await?;
                match (message.id, message.method) {
                    (Some(msg_id), None) if msg_id == expected => {
                        if let Some(error) = message.error {
                            return Err(ForgeError::McpRemote {
                                code: error.code,
                                message: error.message,
                            });
                        }
                        return Ok(message.result.unwrap_or(Value::Null));
                    }
                    (Some(msg_id), Some(server_method)) => {
                        channel.answer(msg_id, &server_method).await?;
                    }
                    (None, Some(notification)) => trace!("MCP notification: {}", notification),
                    (Some(stale), None) => trace!("Ignoring response to request {}", stale),
                    (None, None) => trace!("Ignoring malformed MCP message"),
                }
            }
        };

        tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ForgeError::Timeout(format!("{} after {:?}", method, limit)))?
    }

    async fn notify(&mut self, method: &str) -> ForgeResult<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ForgeError::Connection("not connected".to_string()))?;
        channel
            .send(&Request {
                jsonrpc: JSONRPC_VERSION,
                id: None,
                method,
                params: None,
            })
            .await
    }

    async fn initialize(&mut self) -> ForgeResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "testforge", "version": testforge_common::VERSION }
        });
        let result = self
            .request("initialize", params, self.config.connect_timeout())
            .await?;

        let server = result["serverInfo"]["name"].as_str().unwrap_or("unknown");
        let version = result["protocolVersion"].as_str().unwrap_or("unknown");
        info!("Connected to MCP server {} (protocol {})", server, version);

        self.notify("notifications/initialized").await?;
        self.initialized = true;
        Ok(())
    }
}

#[async_trait]
impl AutomationBackend for McpBackend {
    async fn connect(&mut self) -> ForgeResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.channel.is_none() {
            self.channel = Some(self.spawn()?);
        }
        if let Err(e) = self.initialize().await {
            self.close().await;
            return Err(match e {
                ForgeError::Connection(_) => e,
                other => ForgeError::Connection(other.to_string()),
            });
        }
        Ok(())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> ForgeResult<ToolReply> {
        if !self.initialized {
            return Err(ForgeError::Connection("not connected".to_string()));
        }
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .request("tools/call", params, self.config.call_timeout())
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| ForgeError::Mcp(format!("invalid tools/call result: {}", e)))?;
        Ok(result.into())
    }

    async fn close(&mut self) {
        self.initialized = false;
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
            debug!("Automation server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, split, DuplexStream};

    /// Minimal scripted server on the far end of a duplex pipe
    fn serve<F>(stream: DuplexStream, script: F) -> Arc<Mutex<Vec<Value>>>
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            let (read, mut write) = split(stream);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                for reply in script(&message) {
                    write.write_all(reply.as_bytes()).await.unwrap();
                    write.write_all(b"\n").await.unwrap();
                }
                log.lock().unwrap().push(message);
            }
        });
        seen
    }

    fn initialize_reply(message: &Value) -> Option<String> {
        (message["method"] == "initialize").then(|| {
            json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "Playwright", "version": "0.0.1" }
                }
            })
            .to_string()
        })
    }

    fn backend<F>(script: F) -> (McpBackend, Arc<Mutex<Vec<Value>>>)
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        let (client, server) = duplex(16 * 1024);
        let seen = serve(server, script);
        let (read, write) = split(client);
        let config = AutomationConfig {
            call_timeout_ms: 200,
            connect_timeout_ms: 200,
            ..Default::default()
        };
        (McpBackend::over(config, read, write), seen)
    }

    #[test]
    fn test_call_result_parsing() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "clicked" },
                { "type": "image", "data": "AAAA", "mimeType": "image/png" },
                { "type": "text", "text": "done" }
            ]
        }))
        .unwrap();
        let reply = ToolReply::from(result);
        assert!(!reply.is_error);
        assert_eq!(reply.text, "clicked\ndone");

        let failed: CallToolResult =
            serde_json::from_value(json!({ "content": [], "isError": true })).unwrap();
        assert!(ToolReply::from(failed).is_error);
    }

    #[test]
    fn test_notification_has_no_id() {
        let request = Request {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: "notifications/initialized",
            params: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
        );
    }

    #[test]
    fn test_logged_tool_arguments_are_redacted() {
        let request = serde_json::to_value(Request {
            jsonrpc: JSONRPC_VERSION,
            id: Some(4),
            method: "tools/call",
            params: Some(json!({
                "name": "browser_type",
                "arguments": { "selector": "#password", "text": "hunter2" }
            })),
        })
        .unwrap();

        let logged = redacted(&request);
        assert!(!logged.to_string().contains("hunter2"));
        assert_eq!(logged["params"]["name"], "browser_type");
        assert_eq!(logged["params"]["arguments"]["text"], "<redacted>");
        assert_eq!(request["params"]["arguments"]["text"], "hunter2");

        let initialize = json!({ "method": "initialize", "params": { "protocolVersion": PROTOCOL_VERSION } });
        assert_eq!(redacted(&initialize), initialize);
    }

    #[tokio::test]
    async fn test_handshake_and_tool_call() {
        let (mut backend, seen) = backend(|message: &Value| {
            if let Some(reply) = initialize_reply(message) {
                return vec![reply];
            }
            if message["method"] == "tools/call" {
                return vec![
                    "Browser started".to_string(),
                    json!({ "jsonrpc": "2.0", "method": "notifications/message", "params": {} })
                        .to_string(),
                    json!({ "jsonrpc": "2.0", "id": 99, "method": "ping" }).to_string(),
                    json!({
                        "jsonrpc": "2.0",
                        "id": message["id"],
                        "result": { "content": [{ "type": "text", "text": "Clicked #login" }] }
                    })
                    .to_string(),
                ];
            }
            Vec::new()
        });

        backend.connect().await.unwrap();
        let reply = backend
            .call_tool("browser_click", json!({ "selector": "#login" }))
            .await
            .unwrap();
        assert_eq!(reply, ToolReply::ok("Clicked #login"));
        backend.close().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = seen.lock().unwrap();
        let methods: Vec<&str> = seen.iter().filter_map(|m| m["method"].as_str()).collect();
        assert_eq!(methods, vec!["initialize", "notifications/initialized", "tools/call"]);
        assert_eq!(seen[2]["params"]["name"], "browser_click");
        // ping answered with an empty result
        assert_eq!(seen[3]["id"], 99);
        assert_eq!(seen[3]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (mut backend, _) = backend(|message: &Value| {
            if let Some(reply) = initialize_reply(message) {
                return vec![reply];
            }
            if message["method"] == "tools/call" {
                return vec![json!({
                    "jsonrpc": "2.0",
                    "id": message["id"],
                    "error": { "code": -32602, "message": "unknown tool" }
                })
                .to_string()];
            }
            Vec::new()
        });

        backend.connect().await.unwrap();
        match backend.call_tool("nope", json!({})).await {
            Err(ForgeError::McpRemote { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown tool");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let (mut backend, _) = backend(|message: &Value| {
            initialize_reply(message).into_iter().collect()
        });

        backend.connect().await.unwrap();
        let err = backend.call_tool("browser_wait_for", json!({})).await.unwrap_err();
        assert!(matches!(err, ForgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_silent_server_fails_connect() {
        let (mut backend, _) = backend(|_: &Value| Vec::new());
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(err, ForgeError::Connection(_)));
        assert!(matches!(
            backend.call_tool("browser_click", json!({})).await,
            Err(ForgeError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_output_is_connection_loss() {
        let (client, server) = duplex(1024);
        drop(server);
        let (read, write) = split(client);
        let mut backend = McpBackend::over(AutomationConfig::default(), read, write);
        assert!(matches!(
            backend.connect().await,
            Err(ForgeError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_command_fails_connect() {
        let mut backend = McpBackend::new(AutomationConfig {
            command: "/nonexistent/testforge-mcp-server".to_string(),
            args: Vec::new(),
            ..Default::default()
        });
        assert!(matches!(
            backend.connect().await,
            Err(ForgeError::Connection(_))
        ));
        backend.close().await;
    }
}
