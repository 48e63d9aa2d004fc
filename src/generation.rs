use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::config::Config;
use crate::session::{Message, Role};

/// Coarse failure classes surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ServiceUnavailable,
    RateLimited,
    InvalidResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("generation service rate limited the request")]
    RateLimited,
    #[error("generation service returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            GenerationError::RateLimited => ErrorKind::RateLimited,
            GenerationError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }
}

/// Anything that can turn a conversation plus a new prompt into a reply.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GenerationError>;
}

// Structures matching Gemini's models/{model}:generateContent endpoint
#[derive(Serialize, Debug)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

/// Client for the hosted Gemini model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, GenerationError> {
        Self::with_settings(&config.api_base, &config.model, &config.api_key, config.timeout)
    }

    pub fn with_settings(
        api_base: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::ServiceUnavailable(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            api_base.trim_end_matches('/'),
            model
        );
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    fn build_request<'a>(history: &'a [Message], prompt: &'a str) -> GenerateContentRequest<'a> {
        let mut contents: Vec<Content<'a>> = history
            .iter()
            .map(|msg| Content {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                },
                parts: vec![Part { text: &msg.text }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part { text: prompt }],
        });
        GenerateContentRequest { contents }
    }

    /// One HTTP round trip. The bool is whether the failure is worth a retry.
    async fn attempt(&self, body: &GenerateContentRequest<'_>) -> Result<String, (GenerationError, bool)> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {}", e)
                };
                (GenerationError::ServiceUnavailable(reason), true)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Gemini API request failed");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => (GenerationError::RateLimited, false),
                s if s.is_server_error() => (
                    GenerationError::ServiceUnavailable(format!("status {}", s)),
                    true,
                ),
                s => (
                    GenerationError::ServiceUnavailable(format!("status {}", s)),
                    false,
                ),
            });
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| (GenerationError::InvalidResponse(format!("malformed JSON: {}", e)), false))?;

        extract_text(parsed).map_err(|e| (e, false))
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::InvalidResponse("no candidates in response".to_string()))?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse("candidate has no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl GenerationService for GeminiClient {
    #[instrument(skip_all, fields(turns = history.len()))]
    async fn generate(&self, history: &[Message], prompt: &str) -> Result<String, GenerationError> {
        let body = Self::build_request(history, prompt);
        debug!(contents = body.contents.len(), "Sending Gemini request");

        match self.attempt(&body).await {
            Ok(text) => Ok(text),
            Err((err, true)) => {
                warn!(error = %err, "Transient Gemini failure, retrying once");
                self.attempt(&body).await.map_err(|(err, _)| err)
            }
            Err((err, false)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_maps_roles_and_appends_prompt() {
        let history = vec![
            Message::new(Role::User, "hi\n\nRespond in English"),
            Message::new(Role::Assistant, "Hello!"),
        ];
        let body = GeminiClient::build_request(&history, "how are you");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi\n\nRespond in English"}]},
                    {"role": "model", "parts": [{"text": "Hello!"}]},
                    {"role": "user", "parts": [{"text": "how are you"}]},
                ]
            })
        );
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Take a "}, {"text": "deep breath."}]}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Take a deep breath.");
    }

    #[test]
    fn test_extract_text_without_candidates() {
        let response: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert_eq!(
            extract_text(response).unwrap_err().kind(),
            ErrorKind::InvalidResponse
        );
    }

    #[test]
    fn test_extract_text_blocked_candidate() {
        // Safety-blocked candidates come back without content.
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(matches!(
            extract_text(response),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = GeminiClient::with_settings(
            "http://localhost:1234/v1beta/",
            "gemini-1.5-flash-latest",
            "key",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint,
            "http://localhost:1234/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );
    }
}
