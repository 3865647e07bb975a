//! The triage pipeline: fetch → classify → assign → notify.
//!
//! Each stage runs as a durable step, so a redelivered run resumes from
//! the first step that has not committed. Every run terminates in a
//! structured disposition; no raw error escapes this module.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Classifier, ModeratorDirectory, Notifier, TicketRepository};
use crate::domain::{
    Event, EventType, Priority, RunOutcome, StepStatus, Ticket, TicketDelta, TicketStatus,
};

use super::assignment::{select_assignee, AssignmentResult};
use super::executor::{StepError, StepExecutor};
use super::run_log::RunLog;

/// Steps, in declared order
pub const STEP_FETCH: &str = "fetch-ticket";
pub const STEP_CLASSIFY: &str = "classify";
pub const STEP_ASSIGN: &str = "assign-moderator";
pub const STEP_NOTIFY: &str = "notify";

/// Sentinel stored when the classifier has nothing to say
const NO_RESPONSE: &str = "No response";

/// How a delivery attempt ended, from the hosting system's point of view.
#[derive(Debug)]
pub enum RunDisposition {
    /// Terminal: success or non-retriable failure, outcome recorded
    Finished(RunOutcome),

    /// Transient failure; the ingress queue decides whether to redeliver
    Retry { error: String },
}

/// Orchestrates one triage run over the four collaborator seams.
pub struct TriagePipeline {
    repository: Arc<dyn TicketRepository>,
    classifier: Arc<dyn Classifier>,
    directory: Arc<dyn ModeratorDirectory>,
    notifier: Arc<dyn Notifier>,

    /// Base URL used to build the deep link in notifications
    base_url: String,
}

impl TriagePipeline {
    /// Create a pipeline over the given collaborators
    pub fn new(
        repository: Arc<dyn TicketRepository>,
        classifier: Arc<dyn Classifier>,
        directory: Arc<dyn ModeratorDirectory>,
        notifier: Arc<dyn Notifier>,
        base_url: String,
    ) -> Self {
        Self {
            repository,
            classifier,
            directory,
            notifier,
            base_url,
        }
    }

    /// Execute one delivery attempt, using the run log in the configured
    /// state home.
    pub async fn run(&self, run_id: Uuid, ticket_id: Uuid) -> RunDisposition {
        let log = match RunLog::open(run_id).await {
            Ok(log) => log,
            Err(err) => {
                return RunDisposition::Retry {
                    error: format!("{:#}", err),
                }
            }
        };
        self.run_with_log(&log, run_id, ticket_id).await
    }

    /// Execute one delivery attempt against an explicit run log.
    #[instrument(skip_all, fields(%run_id, %ticket_id))]
    pub async fn run_with_log(
        &self,
        log: &RunLog,
        run_id: Uuid,
        ticket_id: Uuid,
    ) -> RunDisposition {
        let started = Event::new(
            run_id,
            ticket_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            format!("Triage started for ticket {}", ticket_id),
            StepStatus::Running,
        );
        if let Err(err) = log.append(&started).await {
            return RunDisposition::Retry {
                error: format!("{:#}", err),
            };
        }

        match self.execute(log, run_id, ticket_id).await {
            Ok(outcome) => {
                let completed = Event::new(
                    run_id,
                    ticket_id,
                    None,
                    EventType::RunCompleted,
                    format!("{}:complete", run_id),
                    format!(
                        "Ticket assigned to {}",
                        outcome.assigned_to.as_deref().unwrap_or("<unknown>")
                    ),
                    StepStatus::Completed,
                );
                if let Err(err) = log.append(&completed).await {
                    // All steps are committed; a redelivery will skip them
                    // and only re-record completion.
                    return RunDisposition::Retry {
                        error: format!("{:#}", err),
                    };
                }

                info!(
                    assigned_to = outcome.assigned_to.as_deref().unwrap_or("<unknown>"),
                    "triage run completed"
                );
                RunDisposition::Finished(outcome)
            }
            Err(StepError::NonRetriable(reason)) => {
                error!(%reason, "triage run halted");

                let failed = Event::new(
                    run_id,
                    ticket_id,
                    None,
                    EventType::RunFailed,
                    format!("{}:complete", run_id),
                    format!("Triage halted: {}", reason),
                    StepStatus::Failed,
                )
                .with_error(reason.clone());
                if let Err(err) = log.append(&failed).await {
                    warn!(error = %err, "failed to record run failure");
                }

                RunDisposition::Finished(RunOutcome::failure(ticket_id, reason))
            }
            Err(StepError::Retriable(err)) => {
                warn!(error = %format!("{:#}", err), "triage attempt failed, run may be redelivered");
                RunDisposition::Retry {
                    error: format!("{:#}", err),
                }
            }
        }
    }

    /// Record that the run's retry budget is spent and report the failure
    /// outcome. The ticket keeps its last durably committed state.
    pub async fn abandon(&self, run_id: Uuid, ticket_id: Uuid, error: &str) -> RunOutcome {
        let outcome = RunOutcome::failure(
            ticket_id,
            format!("retry budget exhausted: {}", error),
        );

        match RunLog::open(run_id).await {
            Ok(log) => {
                let event = Event::new(
                    run_id,
                    ticket_id,
                    None,
                    EventType::RunAbandoned,
                    format!("{}:abandon", run_id),
                    "Run abandoned after exhausting retries".to_string(),
                    StepStatus::Failed,
                )
                .with_error(error.to_string());
                if let Err(err) = log.append(&event).await {
                    warn!(error = %err, "failed to record run abandonment");
                }
            }
            Err(err) => warn!(error = %err, "failed to open run log for abandonment"),
        }

        outcome
    }

    async fn execute(
        &self,
        log: &RunLog,
        run_id: Uuid,
        ticket_id: Uuid,
    ) -> Result<RunOutcome, StepError> {
        let executor = StepExecutor::new(log, run_id, ticket_id);

        // Step 1: fetch the ticket. A vanished ticket is a dead end, not a
        // transient fault.
        let ticket: Ticket = executor
            .run(STEP_FETCH, async {
                self.repository
                    .fetch(ticket_id)
                    .await
                    .context("ticket store fetch failed")?
                    .ok_or_else(|| StepError::non_retriable("ticket not found"))
            })
            .await?;

        // Step 2: classify and persist. An unavailable classifier is not an
        // error; triage continues with defaults and the fallback assignment
        // handles the empty skill list.
        let related_skills: Vec<String> = executor
            .run(STEP_CLASSIFY, async {
                let classification = self
                    .classifier
                    .classify(&ticket.title, &ticket.description)
                    .await
                    .context("classification call failed")?;

                let (priority, notes, skills) = match classification {
                    Some(c) => (
                        Priority::sanitize(c.priority.as_deref().unwrap_or("")),
                        c.helpful_notes
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or_else(|| NO_RESPONSE.to_string()),
                        c.related_skills.unwrap_or_default(),
                    ),
                    None => {
                        warn!("classifier unavailable, triaging with defaults");
                        (Priority::Medium, NO_RESPONSE.to_string(), Vec::new())
                    }
                };

                self.repository
                    .update(
                        ticket_id,
                        TicketDelta {
                            status: Some(TicketStatus::InProgress),
                            priority: Some(priority),
                            helpful_notes: Some(notes),
                            related_skills: Some(skills.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("ticket store update failed")?;

                Ok(skills)
            })
            .await?;

        // Step 3: pick an assignee and persist. The admin is only looked up
        // when no moderator scores.
        let assignment: AssignmentResult = executor
            .run(STEP_ASSIGN, async {
                let pool = if related_skills.is_empty() {
                    Vec::new()
                } else {
                    self.directory
                        .find_by_role_and_skill_pattern(
                            crate::domain::Role::Moderator,
                            &related_skills,
                        )
                        .await
                        .context("moderator lookup failed")?
                };

                let assignment = match select_assignee(&related_skills, &pool, None) {
                    Some(assignment) => assignment,
                    None => {
                        let admin = self
                            .directory
                            .find_admin()
                            .await
                            .context("admin lookup failed")?;
                        select_assignee(&related_skills, &pool, admin.as_ref()).ok_or_else(
                            || StepError::non_retriable("no assignee available"),
                        )?
                    }
                };

                if assignment.fallback {
                    info!(assignee = %assignment.email, "no scoring moderator, falling back to admin");
                }

                self.repository
                    .update(
                        ticket_id,
                        TicketDelta {
                            status: Some(TicketStatus::Assigned),
                            assigned_to: Some(assignment.account_id),
                            ..Default::default()
                        },
                    )
                    .await
                    .context("ticket store update failed")?;

                Ok(assignment)
            })
            .await?;

        // Step 4: notify the assignee. Delivery failure is retriable and
        // never undoes the assignment; memoization prevents a resend once
        // this step has committed.
        executor
            .run(STEP_NOTIFY, async {
                let link = format!(
                    "{}/tickets/{}",
                    self.base_url.trim_end_matches('/'),
                    ticket_id
                );
                let body = format!(
                    "A new ticket titled \"{}\" has been assigned to you.\n\nView it at: {}",
                    ticket.title, link
                );

                self.notifier
                    .send(&assignment.email, "Ticket assigned", &body)
                    .await
                    .context("notification delivery failed")?;

                Ok(())
            })
            .await?;

        Ok(RunOutcome::success(ticket_id, assignment.email))
    }
}
