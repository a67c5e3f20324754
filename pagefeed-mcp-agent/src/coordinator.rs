use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{
    BroadcastResponse, DeleteResponse, FeedbackResponse, ServerMessage, StatusResponse,
};
use crate::queue::{FeedbackItem, PendingSummary};
use crate::relay::{self, RelayState};

/// Interval between remote reads when a proxy instance has to poll for
/// feedback instead of blocking on an in-process waiter.
const PROXY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// In a proxy-mode multi-feedback session, this much silence after the first
/// collected item is treated as the human being done. The owning instance
/// observes the widget's explicit batch-complete message instead; a proxy has
/// no cross-process way to see it, so this heuristic stands in for it.
const PROXY_BATCH_IDLE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no feedback received within {0:?}")]
    Timeout(Duration),
    #[error("feedback server at {0} not reachable - is the pagefeed server running?")]
    Unreachable(String),
}

enum Backend {
    /// This process bound the shared port and holds the authoritative queue.
    Owner {
        relay: Arc<RelayState>,
        _server: JoinHandle<()>,
    },
    /// A sibling process owns the port; every operation goes over HTTP.
    Proxy {
        http: reqwest::Client,
        base_url: String,
    },
}

/// Decides once, at startup, whether this instance owns the relay endpoint
/// or proxies to the sibling that does, and routes every queue/connection
/// operation through that decision. There is no re-election: if the owner
/// exits, proxy calls keep failing with [`RelayError::Unreachable`] until the
/// proxy is restarted.
pub struct Coordinator {
    backend: Backend,
    port: u16,
}

impl Coordinator {
    /// Binds the shared port if possible. An address-in-use error is not a
    /// failure - it means a sibling instance already owns the relay, and this
    /// instance becomes a proxy. Any other bind error propagates.
    pub async fn start(port: u16) -> anyhow::Result<Self> {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                info!("✅ Relay endpoint listening on http://127.0.0.1:{port} (owner mode)");
                let relay = Arc::new(RelayState::new(port));
                let app = relay::router(relay.clone());
                let server = tokio::spawn(async move {
                    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                        tokio::signal::ctrl_c().await.ok();
                    });
                    if let Err(e) = serve.await {
                        warn!("Relay server stopped: {e}");
                    }
                });
                Ok(Self {
                    backend: Backend::Owner {
                        relay,
                        _server: server,
                    },
                    port,
                })
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let base_url = format!("http://127.0.0.1:{port}");
                info!("Port {port} already held by a sibling instance, proxying to {base_url}");
                Ok(Self {
                    backend: Backend::Proxy {
                        http: reqwest::Client::new(),
                        base_url,
                    },
                    port,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.backend, Backend::Owner { .. })
    }

    pub fn role(&self) -> &'static str {
        if self.is_owner() {
            "owner"
        } else {
            "proxy"
        }
    }

    /// Owner-mode relay state, exposed for the in-process channel tests.
    pub fn relay(&self) -> Option<&Arc<RelayState>> {
        match &self.backend {
            Backend::Owner { relay, .. } => Some(relay),
            Backend::Proxy { .. } => None,
        }
    }

    pub async fn status(&self) -> Result<StatusResponse, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => Ok(relay.status().await),
            Backend::Proxy { http, base_url } => {
                let response = http
                    .get(format!("{base_url}/status"))
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                response.json().await.map_err(|e| self.unreachable(e))
            }
        }
    }

    pub async fn read_feedback(&self, clear: bool) -> Result<Vec<FeedbackItem>, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => {
                let items = relay.queue.drain(clear).await;
                if clear && !items.is_empty() {
                    relay.broadcast_pending_status().await;
                }
                Ok(items)
            }
            Backend::Proxy { http, base_url } => {
                let response = http
                    .get(format!("{base_url}/feedback"))
                    .query(&[("clear", clear)])
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                let body: FeedbackResponse =
                    response.json().await.map_err(|e| self.unreachable(e))?;
                Ok(body.feedback)
            }
        }
    }

    pub async fn summarize(&self) -> Result<PendingSummary, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => Ok(relay.queue.summarize().await),
            Backend::Proxy { http, base_url } => {
                let response = http
                    .get(format!("{base_url}/pending-summary"))
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                response.json().await.map_err(|e| self.unreachable(e))
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => Ok(relay.delete(id).await),
            Backend::Proxy { http, base_url } => {
                let response = http
                    .delete(format!("{base_url}/feedback/{id}"))
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                // 404 is the NotFound result, not a transport failure.
                let body: DeleteResponse =
                    response.json().await.map_err(|e| self.unreachable(e))?;
                Ok(body.success)
            }
        }
    }

    /// Fans a message out to every connected browser; returns how many were
    /// reached.
    pub async fn broadcast(&self, message: &ServerMessage) -> Result<usize, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => Ok(relay.registry.broadcast(message).await),
            Backend::Proxy { http, base_url } => {
                let response = http
                    .post(format!("{base_url}/broadcast"))
                    .json(message)
                    .send()
                    .await
                    .map_err(|e| self.unreachable(e))?;
                let body: BroadcastResponse =
                    response.json().await.map_err(|e| self.unreachable(e))?;
                Ok(body.client_count)
            }
        }
    }

    /// Blocks until one feedback item arrives or the timeout expires. Owner
    /// mode registers an in-process waiter; proxy mode polls the sibling's
    /// read-and-clear endpoint.
    pub async fn wait_one(&self, timeout: Duration) -> Result<FeedbackItem, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => relay
                .queue
                .wait_one(timeout)
                .await
                .map_err(|_| RelayError::Timeout(timeout)),
            Backend::Proxy { .. } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let mut items = self.read_feedback(true).await?;
                    if !items.is_empty() {
                        return Ok(items.remove(0));
                    }
                    if Instant::now() >= deadline {
                        return Err(RelayError::Timeout(timeout));
                    }
                    tokio::time::sleep_until(deadline.min(Instant::now() + PROXY_POLL_INTERVAL))
                        .await;
                }
            }
        }
    }

    /// Multi-feedback session: clear whatever is pending, ask every connected
    /// browser for annotations, then collect until the session completes or
    /// the timeout expires.
    pub async fn wait_multiple(
        &self,
        message: &str,
        timeout: Duration,
    ) -> Result<Vec<FeedbackItem>, RelayError> {
        match &self.backend {
            Backend::Owner { relay, .. } => {
                relay.queue.drain(true).await;
                // Subscribe before broadcasting so a fast Done click is not
                // missed.
                let mut done = relay.subscribe_batch_complete();
                relay
                    .registry
                    .broadcast(&ServerMessage::RequestMultipleAnnotations {
                        message: message.to_string(),
                    })
                    .await;

                match tokio::time::timeout(timeout, done.recv()).await {
                    Ok(Ok(count)) => {
                        debug!("Batch complete signal received ({count} announced)");
                        let items = relay.queue.drain(true).await;
                        relay.broadcast_pending_status().await;
                        Ok(items)
                    }
                    Ok(Err(_)) | Err(_) => Err(RelayError::Timeout(timeout)),
                }
            }
            Backend::Proxy { .. } => {
                self.read_feedback(true).await?;
                self.broadcast(&ServerMessage::RequestMultipleAnnotations {
                    message: message.to_string(),
                })
                .await?;

                let deadline = Instant::now() + timeout;
                let mut collected: Vec<FeedbackItem> = Vec::new();
                let mut last_new = Instant::now();
                loop {
                    tokio::time::sleep(PROXY_POLL_INTERVAL).await;
                    let items = self.read_feedback(true).await?;
                    if !items.is_empty() {
                        collected.extend(items);
                        last_new = Instant::now();
                    }
                    // Silence after at least one item means the human is done.
                    if !collected.is_empty() && last_new.elapsed() >= PROXY_BATCH_IDLE {
                        return Ok(collected);
                    }
                    if Instant::now() >= deadline {
                        if collected.is_empty() {
                            return Err(RelayError::Timeout(timeout));
                        }
                        return Ok(collected);
                    }
                }
            }
        }
    }

    fn unreachable(&self, e: reqwest::Error) -> RelayError {
        debug!("Proxy call failed: {e}");
        RelayError::Unreachable(format!("http://127.0.0.1:{}", self.port))
    }
}
