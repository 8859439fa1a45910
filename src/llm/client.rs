use super::stream::StreamAccumulator;
use super::{ChatModel, Completion, Message};
use crate::config::{Config, ModelRole, Profile, Provider};
use crate::display::Display;
use crate::error::LlmError;
use crate::util::truncate;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Error body some providers return with a 200 status.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// HTTP client for both model roles.
pub struct ModelClient {
    http: reqwest::Client,
    analysis: Profile,
    apply: Option<Profile>,
    timeout: Duration,
    stream_analysis: bool,
    display: Option<Display>,
}

impl ModelClient {
    pub fn new(config: &Config, display: Option<Display>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            http,
            analysis: config.analysis.clone(),
            apply: config.apply.clone(),
            timeout: config.timeout,
            stream_analysis: config.stream,
            display,
        })
    }

    /// Point streamed output at a different display (or none).
    pub fn set_display(&mut self, display: Option<Display>) {
        self.display = display;
    }

    fn profile(&self, role: ModelRole) -> Result<&Profile, LlmError> {
        match role {
            ModelRole::Analysis => Ok(&self.analysis),
            ModelRole::Apply => self
                .apply
                .as_ref()
                .ok_or_else(|| LlmError::Parse("no apply model configured".to_string())),
        }
    }

    async fn call(
        &self,
        profile: &Profile,
        messages: &[Message],
        stream: bool,
    ) -> Result<Completion, LlmError> {
        let request = ChatRequest {
            model: &profile.model,
            messages,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            stream,
        };
        tracing::debug!(
            provider = profile.provider.name(),
            model = %profile.model,
            stream,
            messages = messages.len(),
            "sending chat request"
        );

        let response = self.send_with_retry(profile, &request).await?;

        if stream {
            let display = self.display.as_ref();
            let mut accumulator = StreamAccumulator::new();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                accumulator.push(&chunk?, display)?;
                if accumulator.is_done() {
                    break;
                }
            }
            return accumulator.finish(display);
        }

        let text = response.text().await?;
        parse_completion(&text)
    }

    /// Send with automatic retry on rate limits, server errors and connection
    /// failures. Returns the first successful response.
    async fn send_with_retry(
        &self,
        profile: &Profile,
        request: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut retry_count = 0;

        loop {
            let mut builder = self
                .http
                .post(&profile.url)
                .bearer_auth(&profile.api_key)
                .json(request);
            if profile.provider == Provider::OpenRouter {
                builder = builder.header("X-Title", "mender");
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    if err.is_connect() && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        let wait = backoff_secs(retry_count);
                        tracing::warn!(
                            "{} unreachable ({}). Retrying in {}s (attempt {}/{})",
                            profile.provider.name(),
                            err,
                            wait,
                            retry_count,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    return Err(LlmError::Transport(err));
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let text = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                tracing::warn!(
                    "{} returned {}. Retrying in {}s (attempt {}/{})",
                    profile.provider.name(),
                    status,
                    wait,
                    retry_count,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let body = match status.as_u16() {
                401 => format!(
                    "invalid API key for {}; check {}",
                    profile.provider.name(),
                    profile.provider.env_var()
                ),
                429 => format!(
                    "rate limited by {} after {} retries",
                    profile.provider.name(),
                    retry_count
                ),
                _ => sanitize_api_response(&text),
            };
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
    }
}

impl ChatModel for ModelClient {
    async fn complete(&self, role: ModelRole, messages: &[Message]) -> Result<Completion, LlmError> {
        let profile = self.profile(role)?;
        let stream = role == ModelRole::Analysis && self.stream_analysis;
        timeout(self.timeout, self.call(profile, messages, stream))
            .await
            .map_err(|_| LlmError::Timeout {
                secs: self.timeout.as_secs(),
            })?
    }
}

fn parse_completion(text: &str) -> Result<Completion, LlmError> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(text) {
        return Err(LlmError::Api {
            status: 200,
            body: truncate(&envelope.error.message, MAX_ERROR_CONTENT_LEN),
        });
    }
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| LlmError::Parse(format!("{}: {}", e, sanitize_api_response(text))))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::Parse("response has no choices".to_string()))?;

    Ok(Completion {
        content: message.content.unwrap_or_default(),
        reasoning: message
            .reasoning_content
            .or(message.reasoning)
            .unwrap_or_default(),
    })
}

fn backoff_secs(retry_count: u32) -> u64 {
    INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1))
}

/// Extract a retry-after hint like "retry after 7 seconds" from an error body.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &["api_key", "apikey", "secret", "password", "bearer", "sk-"];

    let truncated = truncate(content.trim(), MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}
