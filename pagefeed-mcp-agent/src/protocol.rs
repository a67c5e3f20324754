use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::{FeedbackItem, SummaryEntry};

// ============================================================================
// WebSocket Messages (browser -> server)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// A new feedback submission. The payload is kept as raw JSON here so a
    /// structurally broken item can be logged and dropped without tearing
    /// down the channel.
    #[serde(rename = "feedback")]
    Feedback { payload: Value },

    #[serde(rename = "delete_feedback")]
    DeleteFeedback { id: String },

    /// Sentinel from the widget's "Done" button, ending a multi-feedback
    /// session.
    #[serde(rename = "feedback_batch_complete")]
    FeedbackBatchComplete {
        #[serde(default)]
        count: Option<usize>,
    },

    #[serde(rename = "ping")]
    Ping,

    /// Unrecognized message types land here and are logged, never fatal.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// WebSocket Messages (server -> browser)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { message: String },

    #[serde(rename = "pending_status")]
    PendingStatus {
        count: usize,
        items: Vec<SummaryEntry>,
    },

    #[serde(rename = "feedback_received")]
    FeedbackReceived { id: String },

    #[serde(rename = "feedback_deleted")]
    FeedbackDeleted { id: String, success: bool },

    #[serde(rename = "request_annotation")]
    RequestAnnotation { message: String },

    #[serde(rename = "request_multiple_annotations")]
    RequestMultipleAnnotations { message: String },

    #[serde(rename = "pong")]
    Pong,
}

// ============================================================================
// HTTP Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackQuery {
    /// Whether to clear the queue after reading. Defaults to true.
    pub clear: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub connected_clients: usize,
    pub pending_feedback: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub feedback: Vec<FeedbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub success: bool,
    pub client_count: usize,
}
