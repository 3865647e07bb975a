//! Ticket records and the triage status state machine.
//!
//! Status strings on the wire stay in the upper-case form the rest of the
//! product uses (TODO, IN_PROGRESS, ...). Status order is the triage order;
//! merges never move a ticket backward.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A support ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: Uuid,

    /// Short summary entered by the reporter
    pub title: String,

    /// Full problem description
    pub description: String,

    /// Lifecycle state
    #[serde(default)]
    pub status: TicketStatus,

    /// Account that reported the ticket
    pub created_by: Uuid,

    /// Account the ticket is assigned to, once triage has picked one
    #[serde(default)]
    pub assigned_to: Option<Uuid>,

    /// Moderator response, once one has been recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TicketResponse>,

    /// Triage priority
    #[serde(default)]
    pub priority: Priority,

    /// Notes produced by classification to help the assignee
    #[serde(default)]
    pub helpful_notes: Option<String>,

    /// Skills classification considers relevant to the ticket
    #[serde(default)]
    pub related_skills: Vec<String>,

    /// When the ticket was created
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Create a fresh ticket in the initial state
    pub fn new(title: String, description: String, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            status: TicketStatus::Todo,
            created_by,
            assigned_to: None,
            response: None,
            priority: Priority::Medium,
            helpful_notes: None,
            related_skills: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Merge a per-step delta into the record.
    ///
    /// Status only ever advances; a stale delta carrying an earlier status
    /// keeps the stored one while its remaining fields still apply.
    pub fn apply(&mut self, delta: &TicketDelta) {
        if let Some(status) = delta.status {
            if status > self.status {
                self.status = status;
            }
        }
        if let Some(priority) = delta.priority {
            self.priority = priority;
        }
        if let Some(ref notes) = delta.helpful_notes {
            self.helpful_notes = Some(notes.clone());
        }
        if let Some(ref skills) = delta.related_skills {
            self.related_skills = skills.clone();
        }
        if let Some(assignee) = delta.assigned_to {
            self.assigned_to = Some(assignee);
        }
        if let Some(ref response) = delta.response {
            self.response = Some(response.clone());
        }
    }
}

/// A human response recorded against a ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResponse {
    /// Response text
    pub text: String,

    /// Account that wrote the response
    pub created_by: Uuid,

    /// When the response was written
    pub created_at: DateTime<Utc>,

    /// Whether the reporter accepted the response
    #[serde(default)]
    pub satisfied: bool,
}

/// Lifecycle states, in triage order.
///
/// The pipeline drives TODO → IN_PROGRESS → ASSIGNED; RESOLVED and CLOSED
/// belong to later human actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "TODO")]
    Todo,

    #[serde(rename = "IN_PROGRESS")]
    InProgress,

    #[serde(rename = "ASSIGNED")]
    Assigned,

    #[serde(rename = "RESOLVED")]
    Resolved,

    #[serde(rename = "CLOSED")]
    Closed,
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Assigned => "ASSIGNED",
            Self::Resolved => "RESOLVED",
            Self::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Triage priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// Parse a collaborator-supplied value; anything outside
    /// low/medium/high coerces to Medium rather than failing.
    pub fn sanitize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Partial update produced by a single pipeline step (or a later human
/// action), merged atomically by the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub helpful_notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_skills: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TicketResponse>,
}
