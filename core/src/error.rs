use serde::Serialize;
use serde_json::Value;

/// Structured error body attached to protocol error responses.
/// Carries enough for an agent to tell a bad call from a remote outage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which argument caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Extra diagnostics, e.g. the upstream HTTP status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Error codes used across the runtime and hosts
pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const REMOTE_API_ERROR: &str = "remote_api_error";
    pub const MALFORMED_RESPONSE: &str = "malformed_response";
}
