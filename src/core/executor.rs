//! Durable step execution with memoization.
//!
//! The ingress queue delivers the same run at least once; the executor
//! guarantees each named step's work happens at most once per run by
//! committing results to the run log and reusing them on redelivery.

use std::future::Future;
use std::time::Instant;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Event, EventType, StepStatus};

use super::run_log::{step_key, RunLog};

/// Failure classification for pipeline steps.
#[derive(Debug, Error)]
pub enum StepError {
    /// Semantic dead end; the run halts immediately and is never
    /// redelivered.
    #[error("{0}")]
    NonRetriable(String),

    /// Transient failure; the ingress queue may redeliver the whole run,
    /// up to its retry budget.
    #[error(transparent)]
    Retriable(#[from] anyhow::Error),
}

impl StepError {
    /// Build a non-retriable failure with a reason
    pub fn non_retriable(reason: impl Into<String>) -> Self {
        Self::NonRetriable(reason.into())
    }

    /// Whether a redelivery could make this step succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// Executes named steps exactly once per run, memoizing results in the
/// run log.
pub struct StepExecutor<'a> {
    log: &'a RunLog,
    run_id: Uuid,
    ticket_id: Uuid,
}

impl<'a> StepExecutor<'a> {
    /// Create an executor bound to one run
    pub fn new(log: &'a RunLog, run_id: Uuid, ticket_id: Uuid) -> Self {
        Self {
            log,
            run_id,
            ticket_id,
        }
    }

    /// Run a named step once per run.
    ///
    /// A previously committed result is deserialized and returned without
    /// invoking `fut`. Otherwise `fut` runs and, on success, its result is
    /// committed with a first-writer-wins append; on failure the error
    /// propagates unpersisted.
    pub async fn run<T, F>(&self, step: &str, fut: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = Result<T, StepError>>,
    {
        let key = step_key(self.run_id, step);

        if let Some(value) = self
            .log
            .step_result(&key)
            .await
            .map_err(StepError::Retriable)?
        {
            debug!(step, "step already completed, reusing memoized result");
            let skip = self.event(
                step,
                EventType::StepSkipped,
                StepStatus::Skipped,
                &key,
                format!("Step '{}' skipped (memoized)", step),
            );
            self.log.append(&skip).await.map_err(StepError::Retriable)?;

            return serde_json::from_value(value)
                .with_context(|| format!("Failed to decode memoized result for step '{}'", step))
                .map_err(StepError::Retriable);
        }

        let started = self.event(
            step,
            EventType::StepStarted,
            StepStatus::Running,
            &key,
            format!("Step '{}' started", step),
        );
        self.log
            .append(&started)
            .await
            .map_err(StepError::Retriable)?;

        let step_start = Instant::now();

        match fut.await {
            Ok(value) => {
                let duration_ms = step_start.elapsed().as_millis() as u64;
                let json = serde_json::to_value(&value)
                    .with_context(|| format!("Failed to serialize result of step '{}'", step))
                    .map_err(StepError::Retriable)?;

                let completed = self
                    .event(
                        step,
                        EventType::StepCompleted,
                        StepStatus::Completed,
                        &key,
                        format!("Step '{}' completed in {}ms", step, duration_ms),
                    )
                    .with_duration(duration_ms)
                    .with_result(json);

                let committed = self
                    .log
                    .record_step_result(&completed)
                    .map_err(StepError::Retriable)?;

                if committed {
                    return Ok(value);
                }

                // Lost the commit race; the first writer's value is the
                // durable one, so discard ours and read it back.
                debug!(step, "step result already committed by an earlier writer");
                let value = self
                    .log
                    .step_result(&key)
                    .await
                    .map_err(StepError::Retriable)?
                    .context("step result vanished after losing commit race")
                    .map_err(StepError::Retriable)?;
                serde_json::from_value(value)
                    .with_context(|| format!("Failed to decode memoized result for step '{}'", step))
                    .map_err(StepError::Retriable)
            }
            Err(err) => {
                let duration_ms = step_start.elapsed().as_millis() as u64;
                let failed = self
                    .event(
                        step,
                        EventType::StepFailed,
                        StepStatus::Failed,
                        &key,
                        format!("Step '{}' failed: {}", step, err),
                    )
                    .with_duration(duration_ms)
                    .with_error(err.to_string());

                if let Err(log_err) = self.log.append(&failed).await {
                    warn!(step, error = %log_err, "failed to record step failure");
                }

                Err(err)
            }
        }
    }

    fn event(
        &self,
        step: &str,
        event_type: EventType,
        status: StepStatus,
        key: &str,
        summary: String,
    ) -> Event {
        Event::new(
            self.run_id,
            self.ticket_id,
            Some(step.to_string()),
            event_type,
            key.to_string(),
            summary,
            status,
        )
    }
}
