pub use crate::utils::FeedbackAgent;
use crate::utils::{
    wait_timeout, DeletePendingFeedbackArgs, EmptyArgs, GetPendingFeedbackArgs, InstallWidgetArgs,
    OpenUrlArgs, RequestAnnotationArgs, UninstallWidgetArgs, WaitForFeedbackArgs,
    WaitForMultipleFeedbackArgs,
};
use std::future::Future;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, Error as McpError, ServerHandler};
use serde_json::json;

use crate::coordinator::{Coordinator, RelayError};
use crate::inject::{self, InstallOutcome, UninstallOutcome};
use crate::protocol::ServerMessage;

const DEFAULT_ANNOTATION_PROMPT: &str =
    "Please select the element you want to give feedback on and describe the issue.";
const DEFAULT_MULTI_PROMPT: &str =
    "Please annotate each issue you see, then press Done when finished.";

/// Converts a relay failure into a descriptive (non-error) tool result.
/// Timeouts and an unreachable sibling are expected outcomes, not faults the
/// assistant should see as protocol errors.
fn degraded(action: &str, error: RelayError) -> Result<CallToolResult, McpError> {
    let status = match &error {
        RelayError::Timeout(_) => "timeout",
        RelayError::Unreachable(_) => "unreachable",
    };
    Ok(CallToolResult::success(vec![Content::json(json!({
        "action": action,
        "status": status,
        "message": error.to_string(),
    }))?]))
}

#[tool_router]
impl FeedbackAgent {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Block until the user submits one feedback item from the browser widget (element selection, description, console logs, optional screenshot). Returns the item, or a timeout notice if nothing arrives."
    )]
    pub async fn wait_for_feedback(
        &self,
        Parameters(args): Parameters<WaitForFeedbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        let timeout = wait_timeout(args.timeout_secs);
        match self.coordinator.wait_one(timeout).await {
            Ok(item) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "wait_for_feedback",
                "status": "success",
                "feedback": item,
            }))?])),
            Err(e) => degraded("wait_for_feedback", e),
        }
    }

    #[tool(
        description = "Read all pending feedback items without blocking. Clears the queue by default; pass clear=false to peek. This is a read-only operation when clear=false."
    )]
    pub async fn get_pending_feedback(
        &self,
        Parameters(args): Parameters<GetPendingFeedbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        let clear = args.clear.unwrap_or(true);
        match self.coordinator.read_feedback(clear).await {
            Ok(feedback) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "get_pending_feedback",
                "status": "success",
                "count": feedback.len(),
                "cleared": clear,
                "feedback": feedback,
            }))?])),
            Err(e) => degraded("get_pending_feedback", e),
        }
    }

    #[tool(
        description = "Preview pending feedback as a lightweight summary (id, timestamp, truncated description, selector) without screenshots or console logs. This is a read-only operation."
    )]
    pub async fn preview_pending_feedback(
        &self,
        Parameters(_args): Parameters<EmptyArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.coordinator.summarize().await {
            Ok(summary) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "preview_pending_feedback",
                "status": "success",
                "summary": summary,
            }))?])),
            Err(e) => degraded("preview_pending_feedback", e),
        }
    }

    #[tool(description = "Delete one pending feedback item by its id.")]
    pub async fn delete_pending_feedback(
        &self,
        Parameters(args): Parameters<DeletePendingFeedbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.coordinator.delete(&args.id).await {
            Ok(deleted) => {
                let message = if deleted {
                    "Feedback deleted".to_string()
                } else {
                    format!("No pending feedback with id {}", args.id)
                };
                Ok(CallToolResult::success(vec![Content::json(json!({
                    "action": "delete_pending_feedback",
                    "status": if deleted { "success" } else { "not_found" },
                    "id": args.id,
                    "message": message,
                }))?]))
            }
            Err(e) => degraded("delete_pending_feedback", e),
        }
    }

    #[tool(
        description = "Ask the user for multiple annotations in one session: clears the queue, prompts every connected browser, and collects items until the user presses Done (or the timeout expires). Returns everything collected."
    )]
    pub async fn wait_for_multiple_feedback(
        &self,
        Parameters(args): Parameters<WaitForMultipleFeedbackArgs>,
    ) -> Result<CallToolResult, McpError> {
        let message = args
            .message
            .unwrap_or_else(|| DEFAULT_MULTI_PROMPT.to_string());
        let timeout = wait_timeout(args.timeout_secs);
        match self.coordinator.wait_multiple(&message, timeout).await {
            Ok(items) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "wait_for_multiple_feedback",
                "status": "success",
                "count": items.len(),
                "feedback": items,
            }))?])),
            Err(e) => degraded("wait_for_multiple_feedback", e),
        }
    }

    #[tool(
        description = "Report whether browsers are connected to the feedback relay and how many items are pending, plus whether this instance owns the relay or proxies to a sibling. This is a read-only operation."
    )]
    pub async fn get_connection_status(
        &self,
        Parameters(_args): Parameters<EmptyArgs>,
    ) -> Result<CallToolResult, McpError> {
        match self.coordinator.status().await {
            Ok(status) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "get_connection_status",
                "status": "success",
                "role": self.coordinator.role(),
                "port": self.coordinator.port(),
                "connected_clients": status.connected_clients,
                "pending_feedback": status.pending_feedback,
            }))?])),
            Err(e) => degraded("get_connection_status", e),
        }
    }

    #[tool(
        description = "Push an annotation request to every connected browser widget, without waiting for a response."
    )]
    pub async fn request_annotation(
        &self,
        Parameters(args): Parameters<RequestAnnotationArgs>,
    ) -> Result<CallToolResult, McpError> {
        let message = args
            .message
            .unwrap_or_else(|| DEFAULT_ANNOTATION_PROMPT.to_string());
        match self
            .coordinator
            .broadcast(&ServerMessage::RequestAnnotation { message })
            .await
        {
            Ok(count) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "request_annotation",
                "status": "success",
                "client_count": count,
                "message": if count == 0 {
                    "No browsers are connected; open the instrumented page first"
                } else {
                    "Annotation request sent"
                },
            }))?])),
            Err(e) => degraded("request_annotation", e),
        }
    }

    #[tool(
        description = "Inject the feedback widget script tag into an HTML file so the page loads the widget from this server. Idempotent."
    )]
    pub async fn install_feedback_widget(
        &self,
        Parameters(args): Parameters<InstallWidgetArgs>,
    ) -> Result<CallToolResult, McpError> {
        let port = self.coordinator.port();
        match inject::install_widget(Path::new(&args.html_path), port) {
            Ok(outcome) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "install_feedback_widget",
                "status": "success",
                "html_path": args.html_path,
                "message": match outcome {
                    InstallOutcome::Installed => "Widget script tag installed",
                    InstallOutcome::AlreadyInstalled => "Widget already installed, nothing to do",
                },
            }))?])),
            Err(e) => Err(McpError::internal_error(
                "Failed to install widget",
                Some(json!({"reason": e.to_string(), "html_path": args.html_path})),
            )),
        }
    }

    #[tool(
        description = "Remove the feedback widget script tag from an HTML file. Idempotent."
    )]
    pub async fn uninstall_feedback_widget(
        &self,
        Parameters(args): Parameters<UninstallWidgetArgs>,
    ) -> Result<CallToolResult, McpError> {
        match inject::uninstall_widget(Path::new(&args.html_path)) {
            Ok(outcome) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "uninstall_feedback_widget",
                "status": "success",
                "html_path": args.html_path,
                "message": match outcome {
                    UninstallOutcome::Removed => "Widget script tag removed",
                    UninstallOutcome::NotInstalled => "Widget was not installed, nothing to do",
                },
            }))?])),
            Err(e) => Err(McpError::internal_error(
                "Failed to uninstall widget",
                Some(json!({"reason": e.to_string(), "html_path": args.html_path})),
            )),
        }
    }

    #[tool(description = "Open an http(s) URL in the user's default browser.")]
    pub async fn open_url(
        &self,
        Parameters(args): Parameters<OpenUrlArgs>,
    ) -> Result<CallToolResult, McpError> {
        if !args.url.starts_with("http://") && !args.url.starts_with("https://") {
            return Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "open_url",
                "status": "invalid_url",
                "message": format!("Refusing to open non-http(s) URL: {}", args.url),
            }))?]));
        }
        match open_in_browser(&args.url) {
            Ok(()) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "open_url",
                "status": "success",
                "url": args.url,
            }))?])),
            Err(e) => Ok(CallToolResult::success(vec![Content::json(json!({
                "action": "open_url",
                "status": "failed",
                "message": format!("Could not open browser: {e}"),
            }))?])),
        }
    }
}

fn open_in_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = Command::new("open");
        c.arg(url);
        c
    };
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };
    command.spawn().map(|_| ())
}

#[tool_handler]
impl ServerHandler for FeedbackAgent {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(get_server_instructions()),
        }
    }
}

fn get_server_instructions() -> String {
    "
You relay visual feedback from a human testing a locally running web app.

**Typical workflow**

1. Call `install_feedback_widget` on the page the user is working on (or ask
   them to add the script tag), then `open_url` so they can see it.
2. Call `get_connection_status` to confirm a browser is connected before
   waiting on feedback.
3. Use `wait_for_feedback` to block for a single annotation, or
   `wait_for_multiple_feedback` when you expect the user to mark up several
   issues in one pass.
4. Each feedback item carries the selected element (selector, tag, text,
   bounding rect), the page URL and viewport, recent console logs, a free-text
   description, and sometimes a screenshot. Use the selector and console logs
   to locate the offending code before guessing.
5. `preview_pending_feedback` is a cheap way to see what is queued without
   pulling screenshots; `get_pending_feedback` with clear=false peeks at full
   items; `delete_pending_feedback` discards one you have already handled.

Waits time out with a descriptive result rather than an error; a timeout
usually means the user has not submitted anything, not that the relay is
broken. If results report the feedback server as unreachable, the owning
instance has likely exited and this instance must be restarted.
"
    .to_string()
}
