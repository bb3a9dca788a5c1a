//! Safety classifier client (OpenAI moderation endpoint, multi-modal model).

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const MODERATION_API_URL: &str = "https://api.openai.com/v1/moderations";
pub const MODERATION_MODEL: &str = "omni-moderation-latest";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("moderation API key is not configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrlRef {
    pub url: String,
}

/// One entry of a multi-modal classification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationInput {
    Text { text: String },
    ImageUrl { image_url: ImageUrlRef },
}

impl ModerationInput {
    pub fn text(text: impl Into<String>) -> Self {
        ModerationInput::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ModerationInput::ImageUrl {
            image_url: ImageUrlRef { url: url.into() },
        }
    }
}

/// Result merged over every input entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub flagged: bool,
    pub categories: BTreeSet<String>,
}

#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    /// One classification call covering all inputs. No retries here.
    async fn classify(&self, inputs: &[ModerationInput]) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    model: &'a str,
    input: &'a [ModerationInput],
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: std::collections::HashMap<String, bool>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// ORs `flagged` and unions the raised categories across results.
fn merge_results(results: &[ModerationResult]) -> Classification {
    results.iter().fold(Classification::default(), |mut acc, r| {
        acc.flagged |= r.flagged;
        acc.categories.extend(
            r.categories
                .iter()
                .filter(|(_, raised)| **raised)
                .map(|(code, _)| code.clone()),
        );
        acc
    })
}

#[derive(Clone)]
pub struct OpenAiModerationClient {
    client: Client,
    api_key: Option<String>,
}

impl OpenAiModerationClient {
    /// Timeouts are applied per attempt by the caller's retry policy.
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl ModerationClassifier for OpenAiModerationClient {
    async fn classify(&self, inputs: &[ModerationInput]) -> Result<Classification, ClassifierError> {
        let api_key = self.api_key.as_deref().ok_or(ClassifierError::MissingApiKey)?;

        let response = self
            .client
            .post(MODERATION_API_URL)
            .bearer_auth(api_key)
            .json(&ModerationRequest {
                model: MODERATION_MODEL,
                input: inputs,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ModerationResponse = serde_json::from_str(&body)?;
        let classification = merge_results(&parsed.results);
        debug!(
            "Moderation call succeeded: flagged={}, categories={:?}",
            classification.flagged, classification.categories
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inputs_serialize_in_api_shape() {
        let inputs = vec![
            ModerationInput::text("hello"),
            ModerationInput::image("https://img/a.png"),
        ];
        assert_eq!(
            serde_json::to_value(&inputs).unwrap(),
            json!([
                {"type": "text", "text": "hello"},
                {"type": "image_url", "image_url": {"url": "https://img/a.png"}}
            ])
        );
    }

    #[test]
    fn test_results_are_merged() {
        let parsed: ModerationResponse = serde_json::from_value(json!({
            "id": "modr-1",
            "model": "omni-moderation-latest",
            "results": [
                {"flagged": false, "categories": {"hate": false, "violence": false}},
                {"flagged": true, "categories": {"hate": false, "violence/graphic": true}},
                {"flagged": false, "categories": {"harassment": true}}
            ]
        }))
        .unwrap();

        let merged = merge_results(&parsed.results);
        assert!(merged.flagged);
        assert_eq!(
            merged.categories.into_iter().collect::<Vec<_>>(),
            vec!["harassment".to_string(), "violence/graphic".to_string()]
        );
    }

    #[test]
    fn test_clean_results_are_not_flagged() {
        let parsed: ModerationResponse = serde_json::from_value(json!({
            "results": [{"flagged": false, "categories": {"hate": false}}]
        }))
        .unwrap();
        assert_eq!(merge_results(&parsed.results), Classification::default());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let client = OpenAiModerationClient::new(Client::new(), None);
        let err = client
            .classify(&[ModerationInput::text("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::MissingApiKey));
    }
}
