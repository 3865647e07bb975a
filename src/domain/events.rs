//! Run-log events for the event-sourced triage pipeline.
//!
//! All state changes of a run are recorded as immutable events in an
//! append-only log. A step's memoized output rides on its StepCompleted
//! event, so the value and the fact of completion commit in one append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a run's append-only log.
///
/// Events are the source of truth: the current state of a run is
/// reconstructed by replaying its events in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// The ticket the run is triaging
    pub ticket_id: Uuid,

    /// Step name (if applicable)
    pub step: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Memoization key, "{run_id}:{step}" for step events
    pub idempotency_key: String,

    /// Human-readable summary (no secrets)
    pub summary: String,

    /// Current status of the step/run
    pub status: StepStatus,

    /// Time taken in milliseconds (for completed steps)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Memoized step output (StepCompleted only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        ticket_id: Uuid,
        step: Option<String>,
        event_type: EventType,
        idempotency_key: String,
        summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            ticket_id,
            step,
            event_type,
            idempotency_key,
            summary,
            status,
            duration_ms: None,
            error: None,
            result: None,
        }
    }

    /// Attach duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a memoized step result
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Types of events that can occur during a triage run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A delivery attempt has started
    RunStarted,

    /// The run completed successfully
    RunCompleted,

    /// The run halted on a non-retriable failure
    RunFailed,

    /// The run exhausted its retry budget and was given up on
    RunAbandoned,

    /// A step has started execution
    StepStarted,

    /// A step completed and its result was committed
    StepCompleted,

    /// A step failed (the run may be redelivered)
    StepFailed,

    /// A step was skipped because its result was already committed
    StepSkipped,
}

/// Status of a step or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (memoized result reused)
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}
