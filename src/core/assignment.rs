//! Moderator selection over classification output.
//!
//! Two different matching rules meet here, and the difference is load
//! bearing: pool membership uses a loose case-insensitive containment test
//! against the alternation of related skills, while scoring counts exact
//! (case-insensitive) matches only. A candidate can pass the pool filter
//! and still score zero, in which case the admin fallback wins.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Account;

/// Outcome of moderator selection; memoized as the assign step's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    /// Chosen account
    pub account_id: Uuid,

    /// Chosen account's notification address
    pub email: String,

    /// Number of exact skill matches
    pub score: usize,

    /// True when an admin took the ticket because no moderator scored
    pub fallback: bool,
}

/// Loose pool-membership test: does any of `skills` contain one of
/// `related_skills` as a case-insensitive substring?
pub fn matches_skill_pattern(skills: &[String], related_skills: &[String]) -> bool {
    let branches: Vec<String> = related_skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    if branches.is_empty() {
        return false;
    }

    skills.iter().any(|skill| {
        let skill = skill.to_lowercase();
        branches.iter().any(|branch| skill.contains(branch.as_str()))
    })
}

/// Strict score: count of a candidate's skills exactly matching some
/// related skill, ignoring case.
fn match_count(skills: &[String], related_skills: &[String]) -> usize {
    skills
        .iter()
        .filter(|skill| {
            related_skills
                .iter()
                .any(|rs| skill.to_lowercase() == rs.to_lowercase())
        })
        .count()
}

/// Pick an assignee from an already-retrieved candidate pool.
///
/// The strictly highest score wins; ties keep the first-encountered
/// candidate in retrieval order. When nobody scores above zero (including
/// an empty pool or empty related skills), any admin takes the ticket as
/// a fallback. Returns None when no scoring candidate and no admin exist.
pub fn select_assignee(
    related_skills: &[String],
    moderators: &[Account],
    admin: Option<&Account>,
) -> Option<AssignmentResult> {
    let mut best: Option<(&Account, usize)> = None;
    let mut max_matches = 0usize;

    for candidate in moderators {
        let score = match_count(&candidate.skills, related_skills);
        if score > max_matches {
            max_matches = score;
            best = Some((candidate, score));
        }
    }

    if let Some((account, score)) = best {
        return Some(AssignmentResult {
            account_id: account.id,
            email: account.email.clone(),
            score,
            fallback: false,
        });
    }

    admin.map(|account| AssignmentResult {
        account_id: account.id,
        email: account.email.clone(),
        score: 0,
        fallback: true,
    })
}
