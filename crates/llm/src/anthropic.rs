//! Anthropic Messages API adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use pipeline::{GenerationError, GenerationRequest, GenerationResponse, GenerationService};

use crate::prompt::render;
use crate::reply::parse_reply;

const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for [`AnthropicGenerator`]. Loaded from the `[llm]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// API origin, without the `/v1/messages` path.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Upper bound on reply tokens.
    pub max_tokens: u32,
    /// HTTP-level timeout. The run's own step timeout still applies.
    pub timeout_secs: u64,
    /// Character budget shared by a request's weighted inputs.
    pub prompt_budget_chars: usize,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 4096,
            timeout_secs: 120,
            prompt_budget_chars: 24_000,
        }
    }
}

/// Errors raised while constructing the adapter.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was supplied.
    #[error("missing API key")]
    MissingApiKey,
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// [`GenerationService`] backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: Client,
    config: AnthropicConfig,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGenerator {
    /// Builds the adapter.
    ///
    /// # Errors
    ///
    /// [`LlmError::MissingApiKey`] for a blank key; [`LlmError::Client`] if
    /// the TLS backend fails to initialise.
    pub fn new(config: AnthropicConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let prompt = render(request, self.config.prompt_budget_chars);
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": prompt.system,
            "messages": [{ "role": "user", "content": prompt.user }],
        })
    }
}

/// Maps a non-success HTTP status to a generation error.
fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GenerationError::Timeout
    } else {
        GenerationError::Unavailable(detail)
    }
}

fn classify_transport(err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Unavailable(err.to_string())
    }
}

/// Concatenates the text blocks of a Messages reply.
fn reply_text(response: MessagesResponse) -> Result<String, GenerationError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.trim().is_empty() {
        return Err(GenerationError::InvalidResponse("reply has no text content".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl GenerationService for AnthropicGenerator {
    #[instrument(
        skip_all,
        fields(step = %request.step, attempt = request.attempt, model = %self.config.model)
    )]
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "generation request rejected");
            return Err(classify_status(status, &body));
        }

        let decoded: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        let text = reply_text(decoded)?;
        debug!(chars = text.len(), "generation reply received");
        parse_reply(&text)
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{CalendarConfig, Phase, RequestContext, RunId, StepId};

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            run_id: RunId::new_random(),
            step: StepId::FIRST,
            phase: Phase::Foundation,
            step_name: "content_strategy".into(),
            purpose: "Set the calendar's strategy.".into(),
            attempt: 1,
            calendar: CalendarConfig::default(),
            inputs: Vec::new(),
            context: RequestContext {
                text: String::new(),
                weight: 0.0,
                as_of: None,
            },
            feedback: Vec::new(),
            required_fields: Vec::new(),
            recommended_fields: Vec::new(),
        }
    }

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(matches!(
            AnthropicGenerator::new(AnthropicConfig::default(), "  "),
            Err(LlmError::MissingApiKey)
        ));
    }

    #[test]
    fn body_carries_model_and_rendered_prompt() {
        let generator = AnthropicGenerator::new(AnthropicConfig::default(), "key").unwrap();
        let body = generator.body(&request());
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("content_strategy"));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let config = AnthropicConfig {
            base_url: "http://localhost:8080/".into(),
            ..AnthropicConfig::default()
        };
        let generator = AnthropicGenerator::new(config, "key").unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn statuses_map_to_generation_errors() {
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT, ""), GenerationError::Timeout);
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GenerationError::Unavailable(msg) if msg.contains("slow down")
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            GenerationError::Unavailable(_)
        ));
    }

    #[test]
    fn non_text_blocks_are_ignored() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "{\"a\": 1}" }
            ]
        }))
        .unwrap();
        assert_eq!(reply_text(response).unwrap(), "{\"a\": 1}");

        let empty: MessagesResponse = serde_json::from_value(json!({ "content": [] })).unwrap();
        assert!(matches!(reply_text(empty), Err(GenerationError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let config = AnthropicConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 5,
            ..AnthropicConfig::default()
        };
        let generator = AnthropicGenerator::new(config, "key").unwrap();
        let err = generator.generate(request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_) | GenerationError::Timeout));
    }
}
