use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snow_mcp_runtime::{DEFAULT_TIMEOUT_SECS, McpRuntime, report_config_error};

mod routes;
mod state;

#[derive(Parser)]
#[command(
    name = "snow-mcp-http",
    version,
    about = "ServiceNow MCP server — stateless streamable HTTP on /mcp"
)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Per-request timeout for ServiceNow API calls, in seconds
    #[arg(
        long,
        env = "SERVICENOW_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "snow_mcp_http=info,snow_mcp_runtime=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    // No partial startup: missing credentials stop the process here.
    let runtime = match McpRuntime::from_env(Some(Duration::from_secs(cli.timeout_secs))) {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(event = "startup_config_error", error = %err, "Refusing to start");
            std::process::exit(report_config_error(&err));
        }
    };
    tracing::info!(
        event = "servicenow_instance_configured",
        instance = runtime.credentials().base_url(),
        "ServiceNow instance configured"
    );

    let app_state = state::AppState {
        runtime: Arc::new(runtime),
    };
    let app =
        routes::app(app_state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::new(cli.bind, cli.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(event = "bind_failed", %addr, error = %err, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!("ServiceNow MCP HTTP server listening on {}", addr);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(event = "server_error", error = %err, "HTTP server stopped");
        std::process::exit(1);
    }
}
