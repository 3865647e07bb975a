//! File-backed ticket store.
//!
//! One JSON document per ticket under `<home>/tickets/`. Updates merge a
//! per-step delta and replace the document via temp-file rename while
//! holding an exclusive lock on a sidecar lock file, so two steps writing
//! different fields cannot lose each other's writes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::domain::{Ticket, TicketDelta};

use super::TicketRepository;

/// Ticket store with one JSON file per ticket
pub struct FileTicketStore {
    tickets_dir: PathBuf,
}

impl FileTicketStore {
    /// Open the store under the configured state home
    pub async fn open() -> Result<Self> {
        let tickets_dir = crate::config::tickets_dir()?;
        tokio::fs::create_dir_all(&tickets_dir)
            .await
            .with_context(|| {
                format!("Failed to create tickets directory: {}", tickets_dir.display())
            })?;
        Ok(Self::new(tickets_dir))
    }

    /// Create a store over an explicit directory
    pub fn new(tickets_dir: PathBuf) -> Self {
        Self { tickets_dir }
    }

    fn ticket_path(&self, id: Uuid) -> PathBuf {
        self.tickets_dir.join(format!("{}.json", id))
    }

    fn lock_path(&self) -> PathBuf {
        self.tickets_dir.join(".lock")
    }

    /// Run `f` under the store-wide exclusive lock
    fn with_lock<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())
            .with_context(|| format!("Failed to open lock file in {}", self.tickets_dir.display()))?;

        lock_file
            .lock_exclusive()
            .context("Failed to acquire ticket store lock")?;

        let result = f();
        let _ = FileExt::unlock(&lock_file);
        result
    }
}

/// Replace `path` with the serialized ticket via temp-file rename
fn write_atomic(path: &Path, ticket: &Ticket) -> Result<()> {
    let dir = path
        .parent()
        .context("ticket path has no parent directory")?;

    let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temp file")?;
    serde_json::to_writer_pretty(&mut tmp, ticket).context("Failed to serialize ticket")?;
    tmp.as_file()
        .sync_all()
        .context("Failed to sync ticket file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to persist ticket file: {}", path.display()))?;

    Ok(())
}

#[async_trait]
impl TicketRepository for FileTicketStore {
    async fn insert(&self, ticket: &Ticket) -> Result<()> {
        let path = self.ticket_path(ticket.id);
        self.with_lock(|| {
            if path.exists() {
                anyhow::bail!("ticket {} already exists", ticket.id);
            }
            write_atomic(&path, ticket)
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Ticket>> {
        let path = self.ticket_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read ticket file: {}", path.display()))?;

        let ticket = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse ticket file: {}", path.display()))?;

        Ok(Some(ticket))
    }

    async fn update(&self, id: Uuid, delta: TicketDelta) -> Result<()> {
        let path = self.ticket_path(id);
        self.with_lock(|| {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("ticket {} not found", id))?;
            let mut ticket: Ticket = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse ticket file: {}", path.display()))?;

            ticket.apply(&delta);
            write_atomic(&path, &ticket)
        })
    }
}
