use serde_json::json;
use snow_core::error::{ErrorPayload, codes};
use thiserror::Error;

/// Failure of a single tool invocation. Never fatal to the process.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{message}")]
    InvalidArguments { field: String, message: String },
    #[error("Failed to reach ServiceNow API: {0}")]
    Transport(String),
    #[error("ServiceNow API error: {status}")]
    RemoteApi { status: u16, detail: Option<String> },
    #[error("Malformed ServiceNow response: {0}")]
    MalformedResponse(String),
}

impl ToolError {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => codes::UNKNOWN_TOOL,
            ToolError::InvalidArguments { .. } => codes::VALIDATION_FAILED,
            ToolError::Transport(_) => codes::TRANSPORT_ERROR,
            ToolError::RemoteApi { .. } => codes::REMOTE_API_ERROR,
            ToolError::MalformedResponse(_) => codes::MALFORMED_RESPONSE,
        }
    }

    /// True for errors caused by the caller rather than the remote side.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. }
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        let payload = ErrorPayload::new(self.code(), self.to_string());
        match self {
            ToolError::UnknownTool(name) => payload
                .with_field("name")
                .with_details(json!({ "tool": name })),
            ToolError::InvalidArguments { field, .. } => payload.with_field(field.clone()),
            ToolError::RemoteApi { status, detail } => {
                let mut details = json!({ "status": status });
                if let Some(detail) = detail {
                    details["detail"] = json!(detail);
                }
                payload.with_details(details)
            }
            ToolError::Transport(_) | ToolError::MalformedResponse(_) => payload,
        }
    }
}
