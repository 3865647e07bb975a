//! deskflow - event-sourced ticket triage and assignment pipeline
//!
//! When a ticket is created, its id is enqueued as a triage event. A
//! worker delivers each event at least once to the triage pipeline, which
//! runs four durable steps: fetch the ticket, classify it, assign a
//! moderator by skill match, and notify the assignee. Every step result is
//! committed to an append-only run log, so a redelivered run never repeats
//! completed work.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - All run state changes are recorded as immutable events
//! - Current state is derived by replaying events
//! - Step results commit with a first-writer-wins append, making
//!   redelivery safe
//!
//! # Modules
//!
//! - `adapters`: collaborator seams (ticket store, classifier, directory, mailer)
//! - `core`: run log, step executor, assignment engine, triage pipeline
//! - `domain`: data structures (Ticket, Account, Event, Run)
//! - `ingest`: at-least-once triage event queue
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create a ticket (also queues it for triage)
//! deskflow ticket new --title "DB pool exhaustion" --description "..."
//!
//! # Drain the triage queue once
//! deskflow worker --once
//!
//! # Check a run
//! deskflow status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use crate::core::{
    matches_skill_pattern, select_assignee, step_key, AssignmentResult, RunDisposition, RunLog,
    StepError, StepExecutor, TriagePipeline,
};
pub use adapters::{
    Classification, Classifier, FileDirectory, FileTicketStore, HttpClassifier, HttpMailer,
    ModeratorDirectory, Notifier, TicketRepository,
};
pub use domain::{
    Account, Event, EventType, Priority, Role, Run, RunOutcome, RunState, StepStatus, Ticket,
    TicketDelta, TicketResponse, TicketStatus,
};
pub use ingest::{DeliveryStatus, EnqueueResult, TriageQueue};
