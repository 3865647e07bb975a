//! Run state, reconstruction from events, and the reported outcome.
//!
//! A Run is one durable execution of the triage pipeline for a single
//! ticket-created event, across however many delivery attempts it takes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StepStatus};

/// A triage pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// The ticket being triaged
    pub ticket_id: Uuid,

    /// Current state of the run
    pub state: RunState,

    /// When the first delivery attempt started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state (if it has)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of delivery attempts seen so far
    pub attempts: u32,

    /// Status of each step (step name -> status)
    pub step_statuses: HashMap<String, StepStatus>,
}

impl Run {
    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;

        let mut run = Self {
            id: first.run_id,
            ticket_id: first.ticket_id,
            state: RunState::Running,
            started_at: first.timestamp,
            completed_at: None,
            attempts: 0,
            step_statuses: HashMap::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                if self.attempts == 0 {
                    self.started_at = event.timestamp;
                }
                self.attempts += 1;
                self.state = RunState::Running;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunAbandoned => {
                self.state = RunState::Abandoned {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StepStarted => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Running);
                }
            }
            EventType::StepCompleted => {
                if let Some(ref step) = event.step {
                    self.step_statuses
                        .insert(step.clone(), StepStatus::Completed);
                }
            }
            EventType::StepFailed => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Failed);
                }
            }
            EventType::StepSkipped => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Skipped);
                }
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Check if the run has reached a terminal state
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Check if a step has durably succeeded (completed or reused)
    pub fn is_step_completed(&self, step: &str) -> bool {
        matches!(
            self.step_statuses.get(step),
            Some(StepStatus::Completed) | Some(StepStatus::Skipped)
        )
    }
}

/// State of a triage run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing (or awaiting redelivery)
    Running,

    /// Completed successfully
    Completed,

    /// Halted on a non-retriable failure
    Failed { error: String },

    /// Retry budget exhausted
    Abandoned { error: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

/// Terminal outcome reported to the hosting system.
///
/// Every run ends in exactly one of these; no raw error crosses the
/// pipeline boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Whether triage completed end to end
    pub success: bool,

    /// The ticket the run was triaging
    pub ticket_id: Uuid,

    /// Email of the assignee, when one was chosen and notified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    /// Failure reason, when the run did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RunOutcome {
    /// Successful outcome with the notified assignee
    pub fn success(ticket_id: Uuid, assigned_to: String) -> Self {
        Self {
            success: true,
            ticket_id,
            assigned_to: Some(assigned_to),
            reason: None,
        }
    }

    /// Failure outcome with a reason
    pub fn failure(ticket_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            ticket_id,
            assigned_to: None,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_event(run_id: Uuid, ticket_id: Uuid, step: &str, event_type: EventType, status: StepStatus) -> Event {
        Event::new(
            run_id,
            ticket_id,
            Some(step.to_string()),
            event_type,
            format!("{}:{}", run_id, step),
            format!("Step '{}'", step),
            status,
        )
    }

    #[test]
    fn test_run_from_events() {
        let run_id = Uuid::new_v4();
        let ticket_id = Uuid::new_v4();

        let events = vec![
            Event::new(
                run_id,
                ticket_id,
                None,
                EventType::RunStarted,
                format!("{}:start", run_id),
                "Triage started".to_string(),
                StepStatus::Running,
            ),
            step_event(run_id, ticket_id, "fetch-ticket", EventType::StepStarted, StepStatus::Running),
            step_event(run_id, ticket_id, "fetch-ticket", EventType::StepCompleted, StepStatus::Completed),
            Event::new(
                run_id,
                ticket_id,
                None,
                EventType::RunCompleted,
                format!("{}:complete", run_id),
                "Triage completed".to_string(),
                StepStatus::Completed,
            ),
        ];

        let run = Run::from_events(&events).unwrap();

        assert_eq!(run.id, run_id);
        assert_eq!(run.ticket_id, ticket_id);
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.attempts, 1);
        assert!(run.is_step_completed("fetch-ticket"));
        assert!(run.is_finished());
    }

    #[test]
    fn test_redelivery_counts_attempts_and_keeps_first_start() {
        let run_id = Uuid::new_v4();
        let ticket_id = Uuid::new_v4();

        let first = Event::new(
            run_id,
            ticket_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            "attempt 1".to_string(),
            StepStatus::Running,
        );
        let started_at = first.timestamp;
        let second = Event::new(
            run_id,
            ticket_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            "attempt 2".to_string(),
            StepStatus::Running,
        );

        let run = Run::from_events(&[first, second]).unwrap();
        assert_eq!(run.attempts, 2);
        assert_eq!(run.started_at, started_at);
        assert!(run.is_running());
    }

    #[test]
    fn test_abandoned_is_terminal() {
        let run_id = Uuid::new_v4();
        let ticket_id = Uuid::new_v4();

        let events = vec![
            Event::new(
                run_id,
                ticket_id,
                None,
                EventType::RunStarted,
                format!("{}:start", run_id),
                "attempt 1".to_string(),
                StepStatus::Running,
            ),
            Event::new(
                run_id,
                ticket_id,
                None,
                EventType::RunAbandoned,
                format!("{}:abandon", run_id),
                "Run abandoned".to_string(),
                StepStatus::Failed,
            )
            .with_error("mail API unreachable".to_string()),
        ];

        let run = Run::from_events(&events).unwrap();
        assert_eq!(
            run.state,
            RunState::Abandoned {
                error: "mail API unreachable".to_string()
            }
        );
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_skipped_step_counts_as_completed() {
        let run_id = Uuid::new_v4();
        let ticket_id = Uuid::new_v4();

        let events = vec![step_event(
            run_id,
            ticket_id,
            "classify",
            EventType::StepSkipped,
            StepStatus::Skipped,
        )];

        let run = Run::from_events(&events).unwrap();
        assert!(run.is_step_completed("classify"));
    }
}
