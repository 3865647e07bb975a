//! HTTP classification collaborator.
//!
//! POSTs the ticket text to the configured endpoint and parses the
//! classification JSON. A non-success status is the collaborator saying
//! "unavailable" and maps to `Ok(None)`; only transport and decode
//! failures surface as errors (retriable upstream).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::config::ClassifierConfig;

use super::{Classification, Classifier};

/// Classification client over a JSON HTTP endpoint
pub struct HttpClassifier {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    title: &'a str,
    description: &'a str,
}

impl HttpClassifier {
    /// Create a classifier client
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, title: &str, description: &str) -> Result<Option<Classification>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { title, description });

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send classification request")?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "classifier unavailable");
            return Ok(None);
        }

        let classification = response
            .json::<Classification>()
            .await
            .context("Failed to parse classification response")?;

        Ok(Some(classification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parses_wire_field_names() {
        let json = r#"{
            "priority": "critical",
            "helpfulNotes": "Looks like connection pool exhaustion.",
            "relatedSkills": ["database", "postgres"]
        }"#;

        let classification: Classification = serde_json::from_str(json).unwrap();
        assert_eq!(classification.priority.as_deref(), Some("critical"));
        assert_eq!(
            classification.related_skills,
            Some(vec!["database".to_string(), "postgres".to_string()])
        );
    }

    #[test]
    fn test_classification_fields_are_optional() {
        let classification: Classification = serde_json::from_str("{}").unwrap();
        assert!(classification.priority.is_none());
        assert!(classification.helpful_notes.is_none());
        assert!(classification.related_skills.is_none());
    }
}
