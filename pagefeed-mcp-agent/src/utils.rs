use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::{schemars, schemars::JsonSchema};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::coordinator::Coordinator;

/// Default shared port for the feedback relay. Overridable with
/// `PAGEFEED_PORT` or `--feedback-port`.
pub const DEFAULT_FEEDBACK_PORT: u16 = 8766;

/// Default bound on blocking feedback waits, in seconds.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;

#[derive(Clone)]
pub struct FeedbackAgent {
    pub coordinator: Arc<Coordinator>,
    pub tool_router: rmcp::handler::server::tool::ToolRouter<Self>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EmptyArgs {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WaitForFeedbackArgs {
    #[schemars(
        description = "How long to wait for the user to submit feedback, in seconds. Defaults to 300."
    )]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetPendingFeedbackArgs {
    #[schemars(
        description = "Whether to clear the pending queue after reading. Defaults to true."
    )]
    pub clear: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeletePendingFeedbackArgs {
    #[schemars(description = "Id of the pending feedback item to delete")]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WaitForMultipleFeedbackArgs {
    #[schemars(
        description = "Prompt shown to the user in the browser widget asking for annotations"
    )]
    pub message: Option<String>,
    #[schemars(
        description = "Overall bound on the collection session, in seconds. Defaults to 300."
    )]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RequestAnnotationArgs {
    #[schemars(description = "Prompt shown to the user in the browser widget")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InstallWidgetArgs {
    #[schemars(description = "Path to the HTML file to inject the feedback widget into")]
    pub html_path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UninstallWidgetArgs {
    #[schemars(description = "Path to the HTML file to remove the feedback widget from")]
    pub html_path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct OpenUrlArgs {
    #[schemars(description = "The http(s) URL to open in the default browser")]
    pub url: String,
}

pub fn init_logging() -> Result<()> {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

pub fn wait_timeout(timeout_secs: Option<u64>) -> Duration {
    Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_WAIT_TIMEOUT_SECS))
}
