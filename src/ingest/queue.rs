//! JSONL-based triage event queue with at-least-once delivery.
//!
//! Follows the run-log pattern: append-only JSONL with state derived from
//! replay. Each ticket-created event is one queue item; its id is a
//! content hash of the ticket id, so duplicate deliveries of the same
//! creation event dedupe, and the run id pinned at first enqueue keeps
//! every redelivery pointed at the same run log.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

/// Errors that can occur with the triage queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The queue item id (ticket-id hash)
    pub item_id: String,

    /// Type of queue event
    pub event_type: QueueEventType,

    /// Additional data (depends on event type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Event added to the queue
    Enqueued,

    /// A delivery attempt started
    DeliveryStarted,

    /// The run reached a terminal disposition
    Completed,

    /// The delivery attempt failed (retriable)
    Failed,

    /// Reset for redelivery
    ResetForRetry,

    /// Retry budget exhausted, given up on
    Abandoned,
}

/// Delivery state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Done,
    Failed,
    Abandoned,
}

/// Payload of a ticket-created event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageEvent {
    /// The ticket to triage
    pub ticket_id: Uuid,

    /// Run identity, fixed at first enqueue and reused on redelivery
    pub run_id: Uuid,

    /// When the event was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// A queue item with current state (derived from replaying events)
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Unique id (ticket-id hash, 12 hex chars)
    pub id: String,

    /// Current delivery state
    pub status: DeliveryStatus,

    /// The triage event payload
    pub event: TriageEvent,

    /// When the latest delivery attempt started (if any)
    pub started_at: Option<DateTime<Utc>>,

    /// When the item reached a terminal state (if it has)
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message (if failed)
    pub error: Option<String>,

    /// Number of redeliveries so far
    pub retry_count: u32,
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Fresh event queued
    Queued(String),

    /// Duplicate delivery of an event already awaiting processing
    AlreadyQueued(String),

    /// Duplicate delivery of an event already processed
    AlreadyProcessed(String),

    /// A failed event was reset for another attempt
    ResetForRetry(String),
}

/// JSONL-based triage queue
pub struct TriageQueue {
    /// Path to the queue JSONL file
    queue_path: PathBuf,
}

impl TriageQueue {
    /// Create a queue over an explicit file
    pub fn new(queue_path: PathBuf) -> Self {
        Self { queue_path }
    }

    /// Open the queue in its default location under the state home
    pub async fn open_default() -> Result<Self> {
        let path = crate::config::queue_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self::new(path))
    }

    /// Deterministic item id for a ticket's creation event
    pub fn item_id(ticket_id: Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ticket_id.as_bytes());
        hex::encode(&hasher.finalize()[..6])
    }

    /// Append an event to the queue log
    async fn append_event(&self, event: &QueueEvent) -> Result<(), QueueError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events to build current state
    pub async fn replay(&self) -> Result<HashMap<String, QueueItem>, QueueError> {
        let mut items: HashMap<String, QueueItem> = HashMap::new();

        if !self.queue_path.exists() {
            return Ok(items);
        }

        let file = File::open(&self.queue_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: QueueEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut items, event);
        }

        Ok(items)
    }

    /// Apply a single event to the state
    fn apply_event(items: &mut HashMap<String, QueueItem>, event: QueueEvent) {
        match event.event_type {
            QueueEventType::Enqueued => {
                if let Some(data) = event.data {
                    if let Ok(triage_event) = serde_json::from_value::<TriageEvent>(data) {
                        items.insert(
                            event.item_id.clone(),
                            QueueItem {
                                id: event.item_id,
                                status: DeliveryStatus::Pending,
                                event: triage_event,
                                started_at: None,
                                completed_at: None,
                                error: None,
                                retry_count: 0,
                            },
                        );
                    }
                }
            }
            QueueEventType::DeliveryStarted => {
                if let Some(item) = items.get_mut(&event.item_id) {
                    item.status = DeliveryStatus::Delivering;
                    item.started_at = Some(event.timestamp);
                }
            }
            QueueEventType::Completed => {
                if let Some(item) = items.get_mut(&event.item_id) {
                    item.status = DeliveryStatus::Done;
                    item.completed_at = Some(event.timestamp);
                }
            }
            QueueEventType::Failed => {
                if let Some(item) = items.get_mut(&event.item_id) {
                    item.status = DeliveryStatus::Failed;
                    item.completed_at = Some(event.timestamp);
                    if let Some(data) = event.data {
                        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
                            item.error = Some(error.to_string());
                        }
                    }
                }
            }
            QueueEventType::ResetForRetry => {
                if let Some(item) = items.get_mut(&event.item_id) {
                    item.status = DeliveryStatus::Pending;
                    item.retry_count += 1;
                    item.error = None;
                    item.started_at = None;
                    item.completed_at = None;
                }
            }
            QueueEventType::Abandoned => {
                if let Some(item) = items.get_mut(&event.item_id) {
                    item.status = DeliveryStatus::Abandoned;
                    item.completed_at = Some(event.timestamp);
                    if let Some(data) = event.data {
                        if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
                            item.error = Some(error.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Enqueue a ticket-created event (idempotent).
    ///
    /// A duplicate delivery of an event that is pending, delivering, or
    /// done is a no-op. A failed event resets for another attempt. An
    /// abandoned event re-enqueues fresh, with a new run id and a clean
    /// retry count (operator-initiated revival).
    pub async fn enqueue(&self, ticket_id: Uuid) -> Result<EnqueueResult, QueueError> {
        let id = Self::item_id(ticket_id);

        let items = self.replay().await?;
        if let Some(existing) = items.get(&id) {
            match existing.status {
                DeliveryStatus::Done => {
                    return Ok(EnqueueResult::AlreadyProcessed(id));
                }
                DeliveryStatus::Failed => {
                    let event = QueueEvent {
                        timestamp: Utc::now(),
                        item_id: id.clone(),
                        event_type: QueueEventType::ResetForRetry,
                        data: None,
                    };
                    self.append_event(&event).await?;
                    return Ok(EnqueueResult::ResetForRetry(id));
                }
                DeliveryStatus::Abandoned => {
                    // fall through to a fresh enqueue below
                }
                _ => {
                    return Ok(EnqueueResult::AlreadyQueued(id));
                }
            }
        }

        let triage_event = TriageEvent {
            ticket_id,
            run_id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
        };

        let event = QueueEvent {
            timestamp: Utc::now(),
            item_id: id.clone(),
            event_type: QueueEventType::Enqueued,
            data: Some(serde_json::to_value(&triage_event)?),
        };
        self.append_event(&event).await?;

        Ok(EnqueueResult::Queued(id))
    }

    /// Get all pending items, oldest first
    pub async fn pending(&self) -> Result<Vec<QueueItem>, QueueError> {
        let items = self.replay().await?;
        let mut pending: Vec<QueueItem> = items
            .into_values()
            .filter(|item| item.status == DeliveryStatus::Pending)
            .collect();

        pending.sort_by(|a, b| a.event.enqueued_at.cmp(&b.event.enqueued_at));

        Ok(pending)
    }

    /// Look up a single item
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueError> {
        Ok(self.replay().await?.remove(id))
    }

    /// Mark an item as being delivered
    pub async fn mark_delivering(&self, id: &str) -> Result<(), QueueError> {
        self.transition(id, QueueEventType::DeliveryStarted, None).await
    }

    /// Mark an item's run as terminally disposed
    pub async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.transition(id, QueueEventType::Completed, None).await
    }

    /// Record a failed delivery attempt
    pub async fn fail(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.transition(
            id,
            QueueEventType::Failed,
            Some(serde_json::json!({ "error": error })),
        )
        .await
    }

    /// Reset a failed item for redelivery
    pub async fn reset_for_retry(&self, id: &str) -> Result<(), QueueError> {
        self.transition(id, QueueEventType::ResetForRetry, None).await
    }

    /// Give up on an item whose retry budget is spent
    pub async fn abandon(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.transition(
            id,
            QueueEventType::Abandoned,
            Some(serde_json::json!({ "error": error })),
        )
        .await
    }

    async fn transition(
        &self,
        id: &str,
        event_type: QueueEventType,
        data: Option<serde_json::Value>,
    ) -> Result<(), QueueError> {
        let items = self.replay().await?;
        if !items.contains_key(id) {
            return Err(QueueError::NotFound(id.to_string()));
        }

        let event = QueueEvent {
            timestamp: Utc::now(),
            item_id: id.to_string(),
            event_type,
            data,
        };
        self.append_event(&event).await
    }
}
