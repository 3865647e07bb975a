//! Event ingress for the triage pipeline.
//!
//! Ticket-created events arrive through an at-least-once queue; the
//! worker in `cli` drains it and applies the retry budget.

pub mod queue;

pub use queue::{DeliveryStatus, EnqueueResult, QueueItem, TriageEvent, TriageQueue};
