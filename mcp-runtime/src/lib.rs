use std::time::Duration;

use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

mod client;
mod config;
mod error;
mod tools;

#[cfg(test)]
mod test_support;

pub use client::{ApiClient, QueryParameters, SYSPARM_LIMIT};
pub use config::{
    ConfigError, Credentials, DEFAULT_INSTANCE, INSTANCE_ENV, PASSWORD_ENV, USERNAME_ENV,
};
pub use error::ToolError;
pub use tools::{
    ContentBlock, INCIDENT_NOT_FOUND_TEXT, INCIDENT_TABLE_PATH, KNOWLEDGE_TABLE_PATH,
    NO_ARTICLES_TEXT, ToolDefinition, ToolRegistry, ToolResult,
};

const MCP_SERVER_NAME: &str = "servicenow-mcp";
const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";
const SUPPORTED_PROTOCOL_VERSIONS: [&str; 2] = [LATEST_PROTOCOL_VERSION, "2024-11-05"];
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the ServiceNow MCP server over stdio
    Serve,
    /// Print the tool table (name, description, input schema) as JSON
    Tools,
    /// Invoke one tool and print its text output
    Call(McpCallArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpCallArgs {
    /// Tool name, e.g. get-incident-by-number
    pub name: String,
    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,
}

pub async fn run(timeout: Option<Duration>, command: McpCommands) -> i32 {
    match command {
        McpCommands::Tools => {
            println!("{}", to_pretty_json(&ToolRegistry::builtin().list_payload()));
            0
        }
        McpCommands::Serve => {
            let runtime = match McpRuntime::from_env(timeout) {
                Ok(runtime) => runtime,
                Err(err) => return report_config_error(&err),
            };
            tracing::info!(
                event = "mcp_stdio_started",
                server = MCP_SERVER_NAME,
                version = env!("CARGO_PKG_VERSION"),
                instance = runtime.credentials.base_url(),
                "MCP stdio server ready"
            );
            match runtime.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Call(args) => {
            let runtime = match McpRuntime::from_env(timeout) {
                Ok(runtime) => runtime,
                Err(err) => return report_config_error(&err),
            };
            let raw_args: Value = match serde_json::from_str(&args.args) {
                Ok(value) => value,
                Err(e) => {
                    let payload = json!({
                        "error": snow_core::error::codes::VALIDATION_FAILED,
                        "message": format!("--args is not valid JSON: {e}"),
                        "field": "args",
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    return 1;
                }
            };
            match runtime.call_tool(&args.name, &raw_args).await {
                Ok(result) => {
                    println!("{}", result.joined_text());
                    0
                }
                Err(err) => {
                    eprintln!("{}", to_pretty_json(&err.payload().to_value()));
                    1
                }
            }
        }
    }
}

/// Print a startup configuration failure and return the exit code.
pub fn report_config_error(err: &ConfigError) -> i32 {
    let payload = json!({
        "error": snow_core::error::codes::CONFIGURATION_ERROR,
        "message": err.to_string(),
    });
    eprintln!("{}", to_pretty_json(&payload));
    1
}

/// Process-wide tool runtime: read-only after construction, shared by every
/// inbound call.
#[derive(Debug)]
pub struct McpRuntime {
    credentials: Credentials,
    api: ApiClient,
    registry: &'static ToolRegistry,
}

impl McpRuntime {
    pub fn new(credentials: Credentials, timeout: Option<Duration>) -> Result<Self, ConfigError> {
        Ok(Self {
            credentials,
            api: ApiClient::new(timeout)?,
            registry: ToolRegistry::builtin(),
        })
    }

    pub fn from_env(timeout: Option<Duration>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), timeout)
    }

    fn from_lookup<F>(lookup: F, timeout: Option<Duration>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(Credentials::load_with(lookup)?, timeout)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn registry(&self) -> &'static ToolRegistry {
        self.registry
    }

    pub async fn call_tool(&self, name: &str, raw_args: &Value) -> Result<ToolResult, ToolError> {
        self.registry
            .dispatch(&self.api, &self.credentials, name, raw_args)
            .await
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        let reader = BufReader::new(io::stdin());
        self.serve(reader, io::stdout()).await
    }

    async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let incoming = read_message(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = match incoming.payload {
                Ok(message) => self.handle_incoming_message(message).await,
                Err(err) => vec![error_response(Value::Null, err)],
            };
            for response in responses {
                write_message(&mut writer, incoming.framing, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
            if incoming.discard_bytes > 0 {
                let mut body = (&mut reader).take(incoming.discard_bytes);
                io::copy(&mut body, &mut io::sink())
                    .await
                    .map_err(|e| format!("Failed to skip oversized MCP message: {e}"))?;
            }
        }

        Ok(())
    }

    /// Entry point shared by the stdio loop and HTTP hosts. Returns one
    /// response per request; notifications produce none.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Client response; this server never issues requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let id = obj.get("id").cloned()?;
        Some(match self.handle_request(method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.registry.list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self, params: &Value) -> Value {
        json!({
            "protocolVersion": negotiate_protocol_version(params),
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Read-only access to ServiceNow: list-incidents for recent incidents, get-incident-by-number for one incident's state, search-knowledge for knowledge base articles."
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let result = self.call_tool(name, &args).await?;
        Ok(result.to_value())
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let code = if err.is_caller_error() { -32602 } else { -32603 };
        Self {
            code,
            message: err.to_string(),
            data: Some(err.payload().to_value()),
        }
    }
}

fn negotiate_protocol_version(params: &Value) -> &'static str {
    let requested = params.get("protocolVersion").and_then(Value::as_str);
    SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|supported| Some(*supported) == requested)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// One JSON message per line
    Line,
    /// `Content-Length` headers followed by the JSON body
    ContentLength,
}

struct IncomingMessage {
    framing: Framing,
    payload: Result<Value, RpcError>,
    /// Body bytes still unread after a rejected oversized frame
    discard_bytes: u64,
}

fn parse_payload(result: Result<Value, serde_json::Error>) -> Result<Value, RpcError> {
    result.map_err(|e| RpcError::parse_error(format!("Parse error: {e}")))
}

async fn read_message<R>(reader: &mut R) -> Result<Option<IncomingMessage>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut in_headers = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !in_headers {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if !in_headers {
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                return Ok(Some(IncomingMessage {
                    framing: Framing::Line,
                    payload: parse_payload(serde_json::from_str(trimmed)),
                    discard_bytes: 0,
                }));
            }
            in_headers = true;
        }

        if trimmed.is_empty() {
            break;
        }
        if trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = trimmed
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    if content_length > MAX_FRAME_BYTES {
        return Ok(Some(IncomingMessage {
            framing: Framing::ContentLength,
            payload: Err(RpcError::invalid_request(format!(
                "Message of {content_length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
            ))),
            discard_bytes: content_length as u64,
        }));
    }
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    Ok(Some(IncomingMessage {
        framing: Framing::ContentLength,
        payload: parse_payload(serde_json::from_slice(&payload)),
        discard_bytes: 0,
    }))
}

async fn write_message<W>(
    writer: &mut W,
    framing: Framing,
    value: &Value,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
