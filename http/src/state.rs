use std::sync::Arc;

use snow_mcp_runtime::McpRuntime;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<McpRuntime>,
}
