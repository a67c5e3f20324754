use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// Maximum characters of a feedback description shown in summaries.
const SUMMARY_DESCRIPTION_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub pixel_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub rect: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_styles: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    #[serde(rename = "type", default)]
    pub log_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One annotation submitted by a browser client. The `id` is client-generated
/// and only required to be unique among currently pending items; `received_at`
/// is stamped by the server on arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub element: Option<ElementInfo>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub console_logs: Vec<ConsoleLogEntry>,
}

/// Lightweight projection of a pending item. Deliberately omits the
/// screenshot and console logs so status pushes stay small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub id: String,
    pub timestamp: Option<String>,
    pub description: String,
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSummary {
    pub count: usize,
    pub items: Vec<SummaryEntry>,
}

/// Raised when a blocking wait expires before any feedback arrives.
#[derive(Debug, thiserror::Error)]
#[error("no feedback received within {0:?}")]
pub struct WaitTimeout(pub Duration);

#[derive(Default)]
struct QueueState {
    items: VecDeque<FeedbackItem>,
    waiters: VecDeque<oneshot::Sender<FeedbackItem>>,
}

/// Ordered in-memory store of submitted feedback plus the set of callers
/// currently blocked in [`FeedbackQueue::wait_one`].
///
/// Waiters are resolved strictly oldest-first, and an item is either handed
/// to exactly one waiter or stored - never both. A waiter whose receiver was
/// dropped (its wait timed out) is skipped and discarded during submit, which
/// is what makes timeout cancellation race-free.
#[derive(Default)]
pub struct FeedbackQueue {
    state: Mutex<QueueState>,
}

impl FeedbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `received_at`, then resolves the oldest live waiter or stores
    /// the item. Returns the stamped item so callers can acknowledge it.
    pub async fn submit(&self, mut item: FeedbackItem) -> FeedbackItem {
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        item.received_at = Some(Utc::now().to_rfc3339());

        let mut state = self.state.lock().await;
        let mut pending = item.clone();
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => match waiter.send(pending) {
                    // Delivered to the oldest waiter; nothing is stored.
                    Ok(()) => break,
                    // Receiver already dropped (timed out), try the next one.
                    Err(returned) => pending = returned,
                },
                None => {
                    state.items.push_back(pending);
                    break;
                }
            }
        }
        item
    }

    /// Removes and returns the oldest stored item, if any. Non-blocking.
    pub async fn take_one(&self) -> Option<FeedbackItem> {
        self.state.lock().await.items.pop_front()
    }

    /// Returns the oldest stored item immediately, or suspends until the next
    /// submission resolves this caller. Exactly one of resolution and timeout
    /// occurs per call.
    pub async fn wait_one(&self, timeout: Duration) -> Result<FeedbackItem, WaitTimeout> {
        let receiver = {
            let mut state = self.state.lock().await;
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(item)) => Ok(item),
            // Dropping the receiver on the timeout path is the cancellation:
            // submit() will observe the closed channel and skip this waiter.
            _ => Err(WaitTimeout(timeout)),
        }
    }

    /// Snapshot of all stored items, optionally clearing the queue.
    pub async fn drain(&self, clear: bool) -> Vec<FeedbackItem> {
        let mut state = self.state.lock().await;
        if clear {
            state.items.drain(..).collect()
        } else {
            state.items.iter().cloned().collect()
        }
    }

    /// Removes the item with the given id. Returns whether anything was
    /// removed; calling twice with the same id yields `true` then `false`.
    pub async fn delete_by_id(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.items.iter().position(|item| item.id == id) {
            Some(index) => {
                state.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Read-only projection used for previews and `pending_status` pushes.
    pub async fn summarize(&self) -> PendingSummary {
        let state = self.state.lock().await;
        let items = state
            .items
            .iter()
            .map(|item| SummaryEntry {
                id: item.id.clone(),
                timestamp: item.received_at.clone().or_else(|| item.timestamp.clone()),
                description: truncate_chars(&item.description, SUMMARY_DESCRIPTION_LIMIT),
                selector: item
                    .element
                    .as_ref()
                    .and_then(|element| element.selector.clone()),
            })
            .collect::<Vec<_>>();
        PendingSummary {
            count: items.len(),
            items,
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}
