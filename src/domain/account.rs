//! Accounts that can report tickets and take triage assignments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user, moderator, or admin account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: Uuid,

    /// Notification address
    pub email: String,

    /// Account role
    pub role: Role,

    /// Skills a moderator can be matched on
    #[serde(default)]
    pub skills: Vec<String>,

    /// When the account was created
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account
    pub fn new(email: String, role: Role, skills: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            role,
            skills,
            created_at: Utc::now(),
        }
    }
}

/// Account roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}
