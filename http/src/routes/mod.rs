use axum::Router;

use crate::state::AppState;

pub mod health;
pub mod mcp_http;

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(mcp_http::router())
        .with_state(state)
}
