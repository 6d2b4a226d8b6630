use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value, json};
use snow_core::records::RemoteRecord;
use uuid::Uuid;

use crate::client::{ApiClient, QueryParameters};
use crate::config::Credentials;
use crate::error::ToolError;

pub const INCIDENT_TABLE_PATH: &str = "/api/now/table/incident";
pub const KNOWLEDGE_TABLE_PATH: &str = "/api/now/table/kb_knowledge";
pub const INCIDENT_NOT_FOUND_TEXT: &str = "Incident not found.";
pub const NO_ARTICLES_TEXT: &str = "No articles found.";

const LIST_INCIDENTS_LIMIT: u32 = 5;
const GET_INCIDENT_LIMIT: u32 = 1;
const SEARCH_KNOWLEDGE_LIMIT: u32 = 5;

static BUILTIN_TOOLS: LazyLock<ToolRegistry> =
    LazyLock::new(|| ToolRegistry::from_definitions(tool_definitions()));

/// Normalized tool output: an ordered list of content blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// All text blocks joined, for terminal output.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "content": [] }))
    }
}

/// One entry of the fixed tool table: validate → query → project.
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub table_path: &'static str,
    input_schema: fn() -> Value,
    build_query: fn(&Map<String, Value>) -> Result<QueryParameters, ToolError>,
    project: fn(&[Value]) -> String,
}

impl ToolDefinition {
    pub fn input_schema(&self) -> Value {
        (self.input_schema)()
    }

    /// Validate arguments and build the outbound query. No I/O.
    pub fn query(&self, args: &Map<String, Value>) -> Result<QueryParameters, ToolError> {
        (self.build_query)(args)
    }

    pub fn project(&self, records: &[Value]) -> String {
        (self.project)(records)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("table_path", &self.table_path)
            .finish_non_exhaustive()
    }
}

/// Immutable name → tool lookup, fixed at build time.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn builtin() -> &'static ToolRegistry {
        &BUILTIN_TOOLS
    }

    fn from_definitions(tools: Vec<ToolDefinition>) -> Self {
        let mut by_name = HashMap::with_capacity(tools.len());
        for (index, tool) in tools.iter().enumerate() {
            let previous = by_name.insert(tool.name, index);
            assert!(previous.is_none(), "duplicate tool name '{}'", tool.name);
        }
        Self { tools, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }

    pub fn list_payload(&self) -> Value {
        let tools: Vec<Value> = self.iter().map(ToolDefinition::to_value).collect();
        json!({ "tools": tools })
    }

    /// Resolve, validate, fetch, project. Validation errors are returned
    /// before any request is built.
    pub async fn dispatch(
        &self,
        api: &ApiClient,
        credentials: &Credentials,
        name: &str,
        raw_args: &Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = arguments_object(raw_args)?;
        let query = tool.query(&args)?;

        let call_id = Uuid::now_v7();
        let started = Instant::now();
        tracing::info!(
            event = "tool_call_started",
            tool = tool.name,
            call_id = %call_id,
            table_path = tool.table_path,
            "ServiceNow tool call started"
        );

        let outcome = api
            .fetch_table(tool.table_path, &query, credentials)
            .await
            .and_then(|body| {
                let records = result_records(&body)?;
                Ok((records.len(), tool.project(records)))
            });
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((record_count, text)) => {
                tracing::info!(
                    event = "tool_call_completed",
                    tool = tool.name,
                    call_id = %call_id,
                    record_count,
                    elapsed_ms,
                    "ServiceNow tool call completed"
                );
                Ok(ToolResult::text(text))
            }
            Err(err) => {
                tracing::warn!(
                    event = "tool_call_failed",
                    tool = tool.name,
                    call_id = %call_id,
                    error = err.code(),
                    elapsed_ms,
                    "ServiceNow tool call failed: {err}"
                );
                Err(err)
            }
        }
    }
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list-incidents",
            description: "List ServiceNow incidents",
            table_path: INCIDENT_TABLE_PATH,
            input_schema: || {
                json!({
                    "type": "object",
                    "properties": {}
                })
            },
            build_query: |_| Ok(QueryParameters::new().with_limit(LIST_INCIDENTS_LIMIT)),
            project: project_incident_lines,
        },
        ToolDefinition {
            name: "get-incident-by-number",
            description: "Get a ServiceNow incident by number",
            table_path: INCIDENT_TABLE_PATH,
            input_schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "number": {
                            "type": "string",
                            "description": "Incident number, e.g. INC0010001"
                        }
                    },
                    "required": ["number"]
                })
            },
            build_query: |args| {
                let number = required_string(args, "number")?;
                Ok(QueryParameters::new()
                    .with("number", number)
                    .with_limit(GET_INCIDENT_LIMIT))
            },
            project: project_incident_detail,
        },
        ToolDefinition {
            name: "search-knowledge",
            description: "Search ServiceNow knowledge articles by keyword",
            table_path: KNOWLEDGE_TABLE_PATH,
            input_schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "keyword": {
                            "type": "string",
                            "description": "Keyword to search in knowledge articles"
                        }
                    },
                    "required": ["keyword"]
                })
            },
            build_query: |args| {
                let keyword = required_string(args, "keyword")?;
                Ok(QueryParameters::new()
                    .with("text", keyword)
                    .with_limit(SEARCH_KNOWLEDGE_LIMIT))
            },
            project: project_knowledge_articles,
        },
    ]
}

fn project_incident_lines(records: &[Value]) -> String {
    records
        .iter()
        .map(|value| {
            let record = RemoteRecord::new(value);
            format!(
                "{}: {}",
                record.text("number"),
                record.text("short_description")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn project_incident_detail(records: &[Value]) -> String {
    let Some(first) = records.first() else {
        return INCIDENT_NOT_FOUND_TEXT.to_string();
    };
    let record = RemoteRecord::new(first);
    format!(
        "Number: {}\nShort Description: {}\nState: {}",
        record.text("number"),
        record.text("short_description"),
        record.text("state")
    )
}

fn project_knowledge_articles(records: &[Value]) -> String {
    if records.is_empty() {
        return NO_ARTICLES_TEXT.to_string();
    }
    records
        .iter()
        .map(|value| {
            let record = RemoteRecord::new(value);
            format!("{}: {}", record.label(), record.text("short_description"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn result_records(body: &Value) -> Result<&[Value], ToolError> {
    body.get("result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            ToolError::MalformedResponse("response is missing the 'result' array".to_string())
        })
}

fn arguments_object(raw: &Value) -> Result<Map<String, Value>, ToolError> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        _ => Err(ToolError::invalid_argument(
            "arguments",
            "'arguments' must be an object",
        )),
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::invalid_argument(key, format!("Missing required field '{key}'"))
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::invalid_argument(
            key,
            format!("'{key}' must not be empty"),
        )),
        _ => Err(ToolError::invalid_argument(
            key,
            format!("'{key}' must be a string"),
        )),
    }
}
