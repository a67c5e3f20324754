use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use pagefeed_mcp_agent::coordinator::Coordinator;
use pagefeed_mcp_agent::server::FeedbackAgent;
use pagefeed_mcp_agent::utils::{init_logging, DEFAULT_FEEDBACK_PORT};
use rmcp::{
    transport::stdio,
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    },
    ServiceExt,
};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pagefeed MCP Server - relay browser feedback to coding agents via Model Context Protocol"
)]
struct Args {
    /// Transport mode to use
    #[arg(short, long, value_enum, default_value = "stdio")]
    transport: TransportMode,

    /// Port to listen on (only used for the HTTP transport)
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to (only used for the HTTP transport)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Shared feedback relay port. The first instance to bind it serves the
    /// widget and the queue; later instances proxy to it.
    #[arg(long, env = "PAGEFEED_PORT", default_value_t = DEFAULT_FEEDBACK_PORT)]
    feedback_port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum TransportMode {
    /// Standard I/O transport (default)
    Stdio,
    /// Streamable HTTP transport for HTTP-based clients
    Http,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging()?;

    tracing::info!("Initializing Pagefeed MCP server...");
    tracing::info!("Transport mode: {:?}", args.transport);

    let coordinator = Arc::new(Coordinator::start(args.feedback_port).await?);
    tracing::info!(
        "Feedback relay role: {} (port {})",
        coordinator.role(),
        coordinator.port()
    );

    match args.transport {
        TransportMode::Stdio => {
            tracing::info!("Starting stdio transport...");
            let agent = FeedbackAgent::new(coordinator);
            let service = agent.serve(stdio()).await.inspect_err(|e| {
                tracing::error!("Serving error: {:?}", e);
            })?;

            service.waiting().await?;
        }
        TransportMode::Http => {
            let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
            tracing::info!("Starting streamable HTTP server on http://{}", addr);

            let agent = FeedbackAgent::new(coordinator);
            let service = StreamableHttpService::new(
                move || Ok(agent.clone()),
                LocalSessionManager::default().into(),
                Default::default(),
            );

            let router = axum::Router::new()
                .route("/health", axum::routing::get(health_check))
                .nest_service("/mcp", service);
            let tcp_listener = tokio::net::TcpListener::bind(addr).await?;

            println!("Streamable HTTP server running on http://{}", addr);
            println!("Connect your MCP client to: http://{}/mcp", addr);
            println!("Press Ctrl+C to stop");

            axum::serve(tcp_listener, router)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await?;

            tracing::info!("Shutting down HTTP server");
        }
    }

    Ok(())
}

async fn health_check() -> impl axum::response::IntoResponse {
    (
        axum::http::StatusCode::OK,
        axum::Json(serde_json::json!({"status": "ok"})),
    )
}
