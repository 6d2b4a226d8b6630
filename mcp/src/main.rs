use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snow_mcp_runtime::{DEFAULT_TIMEOUT_SECS, McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "snow-mcp",
    version,
    about = "ServiceNow MCP server — incidents and knowledge base over stdio"
)]
struct Cli {
    /// Per-request timeout for ServiceNow API calls, in seconds
    #[arg(
        long,
        env = "SERVICENOW_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    timeout_secs: u64,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snow_mcp_runtime=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout_secs);

    let code = run_mcp(Some(timeout), cli.command).await;
    std::process::exit(code);
}
