//! Configuration for deskflow paths and collaborators.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DESKFLOW_HOME, DESKFLOW_BASE_URL)
//! 2. Config file (.deskflow/config.yaml)
//! 3. Defaults (~/.deskflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .deskflow/config.yaml
//! - The home path in the config file is relative to the .deskflow directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Default deep-link base when nothing is configured
const DEFAULT_BASE_URL: &str = "http://localhost:5173";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub app: Option<AppConfig>,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub mailer: Option<MailerConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State home directory (relative to the config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Base URL for ticket deep links
    pub base_url: Option<String>,
}

/// Classification collaborator endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Mail HTTP API endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    pub endpoint: String,
    pub token: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub poll_interval_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the deskflow state home
    pub home: PathBuf,
    /// Base URL for ticket deep links
    pub base_url: String,
    /// Classification collaborator (required to run triage)
    pub classifier: Option<ClassifierConfig>,
    /// Mail collaborator (required to run triage)
    pub mailer: Option<MailerConfig>,
    /// Redelivery settings
    pub retry: RetrySettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Redeliveries allowed after the first attempt
    pub max_retries: u32,
    /// Worker poll interval
    pub poll_interval_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            poll_interval_seconds: 5,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".deskflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".deskflow");

    let config_file = find_config_file();

    let (home, base_url, classifier, mailer, retry) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // home is relative to the .deskflow/ directory
        let home = if let Ok(env_home) = std::env::var("DESKFLOW_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            let deskflow_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(deskflow_dir, home_path)
        } else {
            default_home.clone()
        };

        let base_url = std::env::var("DESKFLOW_BASE_URL")
            .ok()
            .or_else(|| config.app.as_ref().and_then(|a| a.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let retry = RetrySettings {
            max_retries: config
                .retry
                .as_ref()
                .and_then(|r| r.max_retries)
                .unwrap_or(2),
            poll_interval_seconds: config
                .retry
                .as_ref()
                .and_then(|r| r.poll_interval_seconds)
                .unwrap_or(5),
        };

        (home, base_url, config.classifier, config.mailer, retry)
    } else {
        let home = std::env::var("DESKFLOW_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let base_url = std::env::var("DESKFLOW_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        (home, base_url, None, None, RetrySettings::default())
    };

    Ok(ResolvedConfig {
        home,
        base_url,
        classifier,
        mailer,
        retry,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the deskflow state home directory
pub fn deskflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($DESKFLOW_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the tickets directory ($DESKFLOW_HOME/tickets)
pub fn tickets_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("tickets"))
}

/// Get the accounts file path ($DESKFLOW_HOME/accounts.json)
pub fn accounts_path() -> Result<PathBuf> {
    Ok(config()?.home.join("accounts.json"))
}

/// Get the triage queue path ($DESKFLOW_HOME/triage_queue.jsonl)
pub fn queue_path() -> Result<PathBuf> {
    Ok(config()?.home.join("triage_queue.jsonl"))
}

/// Get the base URL for ticket deep links
pub fn base_url() -> Result<String> {
    Ok(config()?.base_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let deskflow_dir = temp.path().join(".deskflow");
        std::fs::create_dir_all(&deskflow_dir).unwrap();

        let config_path = deskflow_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
app:
  base_url: https://desk.example.com
classifier:
  endpoint: http://localhost:8080/classify
mailer:
  endpoint: https://send.api.mailtrap.io/api/send
  token: test-token
  from: desk@example.com
retry:
  max_retries: 3
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(
            config.app.unwrap().base_url,
            Some("https://desk.example.com".to_string())
        );
        assert_eq!(
            config.classifier.unwrap().endpoint,
            "http://localhost:8080/classify"
        );
        assert_eq!(config.mailer.unwrap().from, "desk@example.com");
        assert_eq!(config.retry.unwrap().max_retries, Some(3));
    }

    #[test]
    fn test_retry_defaults() {
        let settings = RetrySettings::default();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.poll_interval_seconds, 5);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        // Relative paths that don't exist yet resolve under the base
        assert_eq!(
            resolve_path(&base, "state"),
            PathBuf::from("/home/user/project/state")
        );
    }
}
