//! Account directory backed by a single JSON file.
//!
//! Accounts live in `<home>/accounts.json` in insertion order; retrieval
//! order is therefore stable, which the assignment tie-break relies on.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::core::assignment::matches_skill_pattern;
use crate::domain::{Account, Role};

use super::ModeratorDirectory;

/// File-backed account directory
pub struct FileDirectory {
    accounts_path: PathBuf,
}

impl FileDirectory {
    /// Open the directory under the configured state home
    pub async fn open() -> Result<Self> {
        let accounts_path = crate::config::accounts_path()?;
        if let Some(parent) = accounts_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }
        Ok(Self::new(accounts_path))
    }

    /// Create a directory over an explicit accounts file
    pub fn new(accounts_path: PathBuf) -> Self {
        Self { accounts_path }
    }

    async fn load(&self) -> Result<Vec<Account>> {
        if !self.accounts_path.exists() {
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.accounts_path)
            .await
            .with_context(|| {
                format!("Failed to read accounts file: {}", self.accounts_path.display())
            })?;

        serde_json::from_str(&raw).with_context(|| {
            format!("Failed to parse accounts file: {}", self.accounts_path.display())
        })
    }

    fn save(&self, accounts: &[Account]) -> Result<()> {
        let dir = self
            .accounts_path
            .parent()
            .context("accounts path has no parent directory")?;

        let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temp file")?;
        serde_json::to_writer_pretty(&mut tmp, accounts)
            .context("Failed to serialize accounts")?;
        tmp.persist(&self.accounts_path).map_err(|e| e.error).with_context(|| {
            format!("Failed to persist accounts file: {}", self.accounts_path.display())
        })?;

        Ok(())
    }

    /// Add an account; emails are unique
    pub async fn add(&self, account: Account) -> Result<()> {
        let mut accounts = self.load().await?;

        if accounts
            .iter()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            anyhow::bail!("account {} already exists", account.email);
        }

        accounts.push(account);
        self.save(&accounts)
    }

    /// List all accounts in insertion order
    pub async fn list(&self) -> Result<Vec<Account>> {
        self.load().await
    }
}

#[async_trait]
impl ModeratorDirectory for FileDirectory {
    async fn find_by_role_and_skill_pattern(
        &self,
        role: Role,
        related_skills: &[String],
    ) -> Result<Vec<Account>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|a| a.role == role && matches_skill_pattern(&a.skills, related_skills))
            .collect())
    }

    async fn find_admin(&self) -> Result<Option<Account>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|a| a.role == Role::Admin))
    }
}
