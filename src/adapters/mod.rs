//! Collaborator seams for the triage pipeline.
//!
//! Each external system is reached through a narrow async trait so the
//! pipeline can be exercised against in-memory fakes. The file and HTTP
//! implementations live in the submodules.

pub mod classifier;
pub mod directory;
pub mod mailer;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Account, Role, Ticket, TicketDelta};

// Re-export the concrete adapters
pub use classifier::HttpClassifier;
pub use directory::FileDirectory;
pub use mailer::HttpMailer;
pub use store::FileTicketStore;

/// What the classification collaborator knows about a ticket.
///
/// Field names keep the collaborator's wire spelling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Suggested priority; sanitized by the pipeline
    #[serde(default)]
    pub priority: Option<String>,

    /// Notes to help the assignee
    #[serde(default, rename = "helpfulNotes")]
    pub helpful_notes: Option<String>,

    /// Skills relevant to the ticket, most relevant first
    #[serde(default, rename = "relatedSkills")]
    pub related_skills: Option<Vec<String>>,
}

/// Atomic fetch/merge of ticket records.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Store a new ticket
    async fn insert(&self, ticket: &Ticket) -> Result<()>;

    /// Fetch a ticket by id
    async fn fetch(&self, id: Uuid) -> Result<Option<Ticket>>;

    /// Merge a partial update. Unrelated concurrently-written fields must
    /// survive; the merge is atomic per ticket.
    async fn update(&self, id: Uuid, delta: TicketDelta) -> Result<()>;
}

/// Black-box ticket classification.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a ticket. `Ok(None)` means the collaborator is
    /// unavailable; that is not an error and triage proceeds with
    /// defaults.
    async fn classify(&self, title: &str, description: &str) -> Result<Option<Classification>>;
}

/// Account lookups for assignment.
#[async_trait]
pub trait ModeratorDirectory: Send + Sync {
    /// Accounts of `role` whose skills loosely match the alternation of
    /// `related_skills`, in stable retrieval order.
    async fn find_by_role_and_skill_pattern(
        &self,
        role: Role,
        related_skills: &[String],
    ) -> Result<Vec<Account>>;

    /// Any single admin account
    async fn find_admin(&self) -> Result<Option<Account>>;
}

/// Assignment message delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message; failures are transient from the pipeline's point
    /// of view.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}
