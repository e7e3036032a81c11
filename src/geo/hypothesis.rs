// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Geo hypothesis client: turns an image into a ranked location guess plus
//! prioritized cue phrases via an OpenAI-compatible vision model sidecar.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use reqwest::Client;
use tracing::{debug, warn};

use super::types::{LocationGuess, PipelineError, Stage};

/// Capability interface for the location-hypothesis model.
///
/// Implementations wrap a non-deterministic, network-bound service behind a
/// strict input/output contract so the orchestration stays testable against
/// fakes.
#[async_trait]
pub trait GeoHypothesis: Send + Sync {
    /// Produce a location guess with at least one cue phrase for the image.
    async fn guess(&self, image: &[u8]) -> Result<LocationGuess, PipelineError>;
}

/// Bounded-retry policy for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// First backoff delay; doubles each retry
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Per-attempt timeout; expiry counts as upstream-unavailable
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(20),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// Run `call` under the retry policy, retrying only upstream-unavailable
/// failures. Backoff is exponential with ±25% jitter.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    stage: Stage,
    mut call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::upstream(
                stage,
                format!("request timed out after {}ms", policy.attempt_timeout.as_millis()),
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let exp = policy
                    .base_delay
                    .saturating_mul(1u32 << (attempt - 1).min(16))
                    .min(policy.max_delay);
                let jitter = 1.0 + rand::thread_rng().gen_range(-0.25..0.25);
                let sleep = exp.mul_f64(jitter);
                warn!(
                    "[retry {}/{}] {} transient error: {}; sleeping {}ms",
                    attempt,
                    policy.max_attempts,
                    stage,
                    e,
                    sleep.as_millis()
                );
                tokio::time::sleep(sleep).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// --- OpenAI-compatible serde structs ---

#[derive(serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct ChatMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(serde::Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const GUESS_SYSTEM_PROMPT: &str = r#"You predict the geographic location of a photograph from its visual and textual cues.

Respond with a single JSON object, no prose, with exactly these fields:
{"confidence": <float 0.0-1.0>, "country": <string>, "city": <string>, "region_label": <string>, "query_string": <string>, "cues": [{"priority": <int, 1 is most critical>, "phrase": <string>, "rationale": <string>}]}

Rules:
- Always pick the most specific named place you can reasonably infer. Never return vague regions like "Western Europe" or categories like "likely a temple".
- Cue phrases must name concrete, detectable objects ("red post box", "street name sign"), kept as short as possible.
- query_string contains only core geographic identifiers (city, region, country) with no filler descriptors, so it works as a gazetteer query.
- Return at least one cue."#;

const GUESS_USER_PROMPT: &str =
    "Guess where this image was taken, as specifically as possible, and list the cues to remove.";

/// HTTP client for the hypothesis model sidecar.
///
/// Temperature is pinned to zero so repeated calls on the same image return
/// near-identical output; residual variance is the model's, not ours.
pub struct VlmGeoClient {
    client: Client,
    endpoint: String,
    model_name: String,
    api_key: Option<String>,
}

impl VlmGeoClient {
    /// Create a new hypothesis client
    pub fn new(
        endpoint: &str,
        model_name: &str,
        api_key: Option<String>,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PipelineError::upstream(Stage::Hypothesis, e.to_string()))?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        debug!("geo hypothesis client configured: endpoint={}, model={}", endpoint, model_name);

        Ok(Self {
            client,
            endpoint,
            model_name: model_name.to_string(),
            api_key,
        })
    }

    async fn chat(&self, image: &[u8]) -> Result<String, PipelineError> {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(image));

        let request = ChatRequest {
            model: self.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: serde_json::Value::String(GUESS_SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::json!([
                        {"type": "text", "text": GUESS_USER_PROMPT},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]),
                },
            ],
            max_tokens: 1024,
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            PipelineError::upstream(Stage::Hypothesis, e.to_string())
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(PipelineError::upstream(
                Stage::Hypothesis,
                format!("upstream returned {}", status),
            ));
        }
        if !status.is_success() {
            return Err(PipelineError::malformed(
                Stage::Hypothesis,
                format!("upstream rejected request with {}", status),
            ));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            PipelineError::malformed(Stage::Hypothesis, format!("undecodable body: {}", e))
        })?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::malformed(Stage::Hypothesis, "no choices in response"))
    }
}

#[async_trait]
impl GeoHypothesis for VlmGeoClient {
    async fn guess(&self, image: &[u8]) -> Result<LocationGuess, PipelineError> {
        let content = self.chat(image).await?;
        parse_guess(&content)
    }
}

/// Parse the model's JSON output into a `LocationGuess`, enforcing the hard
/// contract: required fields present, confidence within range, at least one
/// cue phrase.
pub fn parse_guess(content: &str) -> Result<LocationGuess, PipelineError> {
    let body = strip_code_fences(content);
    let guess: LocationGuess = serde_json::from_str(body).map_err(|e| {
        PipelineError::malformed(Stage::Hypothesis, format!("unparsable guess: {}", e))
    })?;

    if !(0.0..=1.0).contains(&guess.confidence) {
        return Err(PipelineError::malformed(
            Stage::Hypothesis,
            format!("confidence {} outside [0, 1]", guess.confidence),
        ));
    }
    if guess.cues.is_empty() {
        return Err(PipelineError::malformed(Stage::Hypothesis, "no cue phrases"));
    }

    Ok(guess)
}

/// Models wrap JSON in markdown fences even when told not to.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}
