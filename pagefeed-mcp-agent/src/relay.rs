use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::{
    BroadcastResponse, ClientMessage, DeleteResponse, FeedbackQuery, FeedbackResponse,
    ServerMessage, StatusResponse,
};
use crate::queue::{FeedbackItem, FeedbackQueue, PendingSummary};
use crate::registry::ConnectionRegistry;

/// Placeholder in the widget script replaced with the live WebSocket URL.
pub const WS_URL_PLACEHOLDER: &str = "__PAGEFEED_WS_URL__";

const WIDGET_TEMPLATE: &str = include_str!("../assets/widget.js");

/// Shared state behind the relay endpoint: the feedback queue, the set of
/// open browser connections, and the batch-completion notifier observed by
/// multi-feedback waits.
pub struct RelayState {
    pub queue: FeedbackQueue,
    pub registry: ConnectionRegistry,
    batch_complete: broadcast::Sender<usize>,
    port: u16,
}

impl RelayState {
    pub fn new(port: u16) -> Self {
        let (batch_complete, _) = broadcast::channel(16);
        Self {
            queue: FeedbackQueue::new(),
            registry: ConnectionRegistry::new(),
            batch_complete,
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Deletes by id; broadcasts a status update only when something was
    /// actually removed.
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.queue.delete_by_id(id).await;
        if removed {
            self.broadcast_pending_status().await;
        }
        removed
    }

    pub async fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "ok".to_string(),
            connected_clients: self.registry.count().await,
            pending_feedback: self.queue.len().await,
        }
    }

    pub async fn broadcast_pending_status(&self) {
        let PendingSummary { count, items } = self.queue.summarize().await;
        self.registry
            .broadcast(&ServerMessage::PendingStatus { count, items })
            .await;
    }

    pub fn subscribe_batch_complete(&self) -> broadcast::Receiver<usize> {
        self.batch_complete.subscribe()
    }

    pub fn notify_batch_complete(&self, count: usize) {
        // No receivers just means nobody is waiting for a batch right now.
        let _ = self.batch_complete.send(count);
    }
}

/// Builds the relay router: the HTTP surface plus the persistent WebSocket
/// channel, all CORS-permissive since the widget runs on the app's origin.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/widget.js", get(widget_script))
        .route("/status", get(status))
        .route("/feedback", get(read_feedback))
        .route("/pending-summary", get(pending_summary))
        .route("/feedback/{id}", delete(delete_feedback))
        .route("/broadcast", post(broadcast_message))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// HTTP Handlers
// ============================================================================

async fn widget_script(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let ws_url = format!("ws://localhost:{}/ws", state.port());
    let script = WIDGET_TEMPLATE.replace(WS_URL_PLACEHOLDER, &ws_url);
    ([(header::CONTENT_TYPE, "application/javascript")], script)
}

async fn status(State(state): State<Arc<RelayState>>) -> Json<StatusResponse> {
    Json(state.status().await)
}

async fn read_feedback(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<FeedbackQuery>,
) -> Json<FeedbackResponse> {
    let clear = query.clear.unwrap_or(true);
    let feedback = state.queue.drain(clear).await;
    if clear && !feedback.is_empty() {
        state.broadcast_pending_status().await;
    }
    Json(FeedbackResponse { feedback })
}

async fn pending_summary(State(state): State<Arc<RelayState>>) -> Json<PendingSummary> {
    Json(state.queue.summarize().await)
}

async fn delete_feedback(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<String>,
) -> Response {
    if state.delete(&id).await {
        Json(DeleteResponse {
            success: true,
            message: format!("Feedback {id} deleted"),
        })
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(DeleteResponse {
                success: false,
                message: format!("No pending feedback with id {id}"),
            }),
        )
            .into_response()
    }
}

async fn broadcast_message(
    State(state): State<Arc<RelayState>>,
    Json(body): Json<Value>,
) -> Response {
    // The body must be one of the typed channel messages; anything else is a
    // client error, not something to fan out blindly.
    let message: ServerMessage = match serde_json::from_value(body) {
        Ok(message) => message,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("unrecognized broadcast message: {e}"),
                    "accepted": [
                        "connected",
                        "pending_status",
                        "feedback_received",
                        "feedback_deleted",
                        "request_annotation",
                        "request_multiple_annotations",
                        "pong",
                    ],
                })),
            )
                .into_response();
        }
    };
    let client_count = state.registry.broadcast(&message).await;
    Json(BroadcastResponse {
        success: true,
        client_count,
    })
    .into_response()
}

// ============================================================================
// WebSocket Channel
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Registers a connection and sends the opening handshake (`connected`, then
/// the current `pending_status`). Split out from the socket loop so the
/// channel semantics can be exercised without a live socket.
pub async fn register_connection(
    state: &RelayState,
    sender: mpsc::UnboundedSender<ServerMessage>,
) -> Uuid {
    let id = Uuid::new_v4();
    state.registry.add(id, sender.clone()).await;
    let _ = sender.send(ServerMessage::Connected {
        message: "Connected to pagefeed".to_string(),
    });
    let PendingSummary { count, items } = state.queue.summarize().await;
    let _ = sender.send(ServerMessage::PendingStatus { count, items });
    id
}

/// One exhaustive match over the inbound protocol. Malformed payloads are
/// logged and dropped; the channel stays open.
pub async fn process_client_message(
    state: &RelayState,
    reply: &mpsc::UnboundedSender<ServerMessage>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Feedback { payload } => {
            match serde_json::from_value::<FeedbackItem>(payload) {
                Ok(item) => {
                    let stamped = state.queue.submit(item).await;
                    debug!("Feedback received: {}", stamped.id);
                    // Ack the sender first, then fan the new status out to
                    // everyone (the sender included).
                    let _ = reply.send(ServerMessage::FeedbackReceived { id: stamped.id });
                    state.broadcast_pending_status().await;
                }
                Err(e) => warn!("Dropping malformed feedback payload: {e}"),
            }
        }
        ClientMessage::DeleteFeedback { id } => {
            let success = state.delete(&id).await;
            let _ = reply.send(ServerMessage::FeedbackDeleted { id, success });
        }
        ClientMessage::FeedbackBatchComplete { count } => {
            let count = count.unwrap_or(0);
            debug!("Feedback batch complete, {count} item(s) announced");
            state.notify_batch_complete(count);
        }
        ClientMessage::Ping => {
            let _ = reply.send(ServerMessage::Pong);
        }
        ClientMessage::Unknown => {
            warn!("Ignoring message with unknown type");
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: everything addressed to this connection funnels through
    // one mpsc so the registry never touches the socket directly.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let id = register_connection(&state, tx.clone()).await;
    info!("🔌 Browser connected: {id}");

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(parsed) => process_client_message(&state, &tx, parsed).await,
                Err(e) => warn!("Ignoring malformed channel message: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.remove(id).await;
    drop(tx);
    let _ = writer.await;
    info!("🔌 Browser disconnected: {id}");
}
