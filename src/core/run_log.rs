//! Append-only per-run event log with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity and
//! easy inspection. The step-result commit is a first-writer-wins
//! compare-and-set: an exclusive file lock, a re-check of the log, then the
//! append. Redelivered runs rely on this to never double-commit a step.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType, Run};

/// Memoization key for a step within a run
pub fn step_key(run_id: Uuid, step: &str) -> String {
    format!("{}:{}", run_id, step)
}

/// File-based run log using JSONL format
pub struct RunLog {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl RunLog {
    /// Create or open the log for a run under the configured state home
    pub async fn open(run_id: Uuid) -> Result<Self> {
        let base_dir = crate::config::runs_dir()?;
        Self::open_in(&base_dir, run_id).await
    }

    /// Create or open a run log under an explicit base directory
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Check whether a step's result has been committed
    pub async fn is_step_completed(&self, idempotency_key: &str) -> Result<bool> {
        Ok(self.step_result(idempotency_key).await?.is_some())
    }

    /// Get the memoized result for a step, if one has been committed
    pub async fn step_result(&self, idempotency_key: &str) -> Result<Option<serde_json::Value>> {
        let events = self.replay().await?;

        Ok(events
            .into_iter()
            .find(|e| {
                e.idempotency_key == idempotency_key
                    && matches!(e.event_type, EventType::StepCompleted)
            })
            .map(|e| e.result.unwrap_or(serde_json::Value::Null)))
    }

    /// Commit a step result, first writer wins.
    ///
    /// Holds an exclusive lock on the log file, re-checks that no
    /// StepCompleted event with this key exists, and appends. Returns false
    /// when an earlier writer already committed; the caller must then read
    /// back the committed value instead of its own.
    pub fn record_step_result(&self, event: &Event) -> Result<bool> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.events_path)
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        file.lock_exclusive()
            .context("Failed to acquire file lock on events.jsonl")?;

        let mut commit = || -> Result<bool> {
            let mut existing = String::new();
            file.read_to_string(&mut existing)
                .context("Failed to read events file")?;

            let already_committed = existing
                .lines()
                .filter(|l| !l.trim().is_empty())
                .any(|line| {
                    serde_json::from_str::<Event>(line)
                        .map(|e| {
                            e.idempotency_key == event.idempotency_key
                                && matches!(e.event_type, EventType::StepCompleted)
                        })
                        .unwrap_or(false)
                });

            if already_committed {
                return Ok(false);
            }

            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            writeln!(file, "{}", json).context("Failed to write event")?;
            file.flush().context("Failed to flush event")?;
            Ok(true)
        };

        let result = commit();
        let _ = FileExt::unlock(&file);
        result
    }

    /// Reconstruct a run's state from its log, if it has any events
    pub async fn load(run_id: Uuid) -> Result<Option<Run>> {
        let log = Self::open(run_id).await?;
        let events = log.replay().await?;
        Ok(Run::from_events(&events))
    }

    /// List all run IDs in the base directory
    pub async fn list_runs() -> Result<Vec<Uuid>> {
        let base_dir = crate::config::runs_dir()?;

        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}
