//! Language model backends.
//!
//! Defines the [`LanguageModel`] trait and its implementations:
//! - **[`OpenAiModel`]** — OpenAI-compatible `POST {base_url}/chat/completions`.
//! - **[`OllamaModel`]** — a local Ollama instance's `POST /api/chat`.
//! - **[`DisabledModel`]** — fails every request; used when `provider = "disabled"`.
//!
//! Use [`create_model`] to pick one from [`LlmConfig`].
//!
//! # Retry Strategy
//!
//! Each HTTP attempt is classified:
//! - HTTP 408, 429, 5xx and network errors → retry with exponential backoff
//! - HTTP 401/403 or missing credentials → [`AnalysisError::Authentication`], no retry
//! - Any other 4xx → [`AnalysisError::BackendUnavailable`], no retry
//!
//! A 200 reply whose envelope does not decode, or that carries no message
//! text (a refusal, a tool call), is returned as the raw body so the parser
//! can record it as a degraded result.
//!
//! The backoff starts at `initial_backoff_ms` and doubles per attempt up to
//! `max_backoff_ms`. The whole retry loop runs under `request_timeout_secs`;
//! when that expires the call fails with `BackendUnavailable`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::AnalysisError;
use crate::prompt::Prompt;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// A backend that turns a [`Prompt`] into raw response text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier recorded with each analysis (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Fail fast when a request could not be sent at all (missing
    /// credentials, disabled backend). Never touches the network.
    fn ready(&self) -> Result<(), AnalysisError> {
        Ok(())
    }

    /// Send the prompt and return the response text unmodified.
    async fn complete(&self, prompt: &Prompt) -> Result<String, AnalysisError>;
}

/// Backoff schedule and overall deadline for one completion.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            deadline: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Transient(String),
    Auth(String),
    Fatal(String),
}

/// Map a non-success HTTP status to an [`AttemptError`].
pub fn classify_status(status: StatusCode, body: &str) -> AttemptError {
    let message = format!("HTTP {}: {}", status, body.trim());
    match status.as_u16() {
        401 | 403 => AttemptError::Auth(message),
        408 | 429 => AttemptError::Transient(message),
        _ if status.is_server_error() => AttemptError::Transient(message),
        _ => AttemptError::Fatal(message),
    }
}

/// Run `attempt` until it succeeds, fails permanently, or retries run out.
///
/// The whole loop, sleeps included, is bounded by `policy.deadline`.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<String, AnalysisError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<String, AttemptError>> + Send,
{
    let schedule = *policy;
    let looped = async move {
        let mut last_err = String::from("no attempts made");

        for n in 0..=schedule.max_retries {
            if n > 0 {
                let delay = schedule.delay_for(n);
                warn!(attempt = n, delay_ms = delay.as_millis() as u64, error = %last_err, "retrying model request");
                tokio::time::sleep(delay).await;
            }

            match attempt().await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Transient(msg)) => {
                    last_err = msg;
                    continue;
                }
                Err(AttemptError::Auth(msg)) => return Err(AnalysisError::Authentication(msg)),
                Err(AttemptError::Fatal(msg)) => return Err(AnalysisError::BackendUnavailable(msg)),
            }
        }

        Err(AnalysisError::BackendUnavailable(format!(
            "gave up after {} attempts: {}",
            schedule.max_retries + 1,
            last_err
        )))
    };

    match tokio::time::timeout(schedule.deadline, looped).await {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::BackendUnavailable(format!(
            "no response within {}s",
            schedule.deadline.as_secs()
        ))),
    }
}

fn http_client(policy: &RetryPolicy) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(policy.deadline).build()?)
}

async fn send_json<T: Serialize + ?Sized>(
    request: reqwest::RequestBuilder,
    body: &T,
) -> Result<String, AttemptError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| AttemptError::Transient(format!("request failed: {}", e)))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AttemptError::Transient(format!("failed to read response body: {}", e)))?;

    if status.is_success() {
        Ok(text)
    } else {
        Err(classify_status(status, &text))
    }
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

fn messages(prompt: &Prompt) -> Vec<Message> {
    vec![
        Message {
            role: "system".to_string(),
            content: prompt.system.clone(),
        },
        Message {
            role: "user".to_string(),
            content: prompt.user.clone(),
        },
    ]
}

// ============ OpenAI ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

/// Message in a reply envelope; `content` is null for refusals and tool calls.
#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

/// The message text, or the whole body when there is none to extract.
fn reply_text(content: Option<String>, raw: String) -> String {
    match content.filter(|c| !c.trim().is_empty()) {
        Some(text) => text,
        None => {
            warn!(bytes = raw.len(), "reply carried no message text; keeping raw body");
            raw
        }
    }
}

/// Chat completions against the OpenAI API or any compatible endpoint.
///
/// The key comes from `OPENAI_API_KEY`; a missing key fails the first
/// request with [`AnalysisError::Authentication`].
pub struct OpenAiModel {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let policy = RetryPolicy::from_config(config);
        Ok(Self {
            client: http_client(&policy)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            policy,
        })
    }

    fn key(&self) -> Result<&str, AnalysisError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AnalysisError::Authentication("OPENAI_API_KEY not set".to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn ready(&self) -> Result<(), AnalysisError> {
        self.key().map(|_| ())
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, AnalysisError> {
        let api_key = self.key()?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: messages(prompt),
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };
        debug!(url = %url, model = %self.model, "sending chat completion");

        let raw = with_retry(&self.policy, || {
            let request = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key));
            send_json(request, &body)
        })
        .await?;

        let content = serde_json::from_str::<ChatResponse>(&raw)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message.content);
        Ok(reply_text(content, raw))
    }
}

// ============ Ollama ============

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ReplyMessage,
}

/// Chat against a local Ollama server. No authentication.
pub struct OllamaModel {
    client: reqwest::Client,
    model: String,
    max_tokens: u32,
    base_url: String,
    policy: RetryPolicy,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let policy = RetryPolicy::from_config(config);
        Ok(Self {
            client: http_client(&policy)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            policy,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, AnalysisError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            messages: messages(prompt),
            stream: false,
            options: OllamaOptions {
                num_predict: self.max_tokens,
            },
        };
        debug!(url = %url, model = %self.model, "sending ollama chat");

        let raw = with_retry(&self.policy, || send_json(self.client.post(&url), &body)).await?;

        let content = serde_json::from_str::<OllamaResponse>(&raw)
            .ok()
            .and_then(|r| r.message.content);
        Ok(reply_text(content, raw))
    }
}

// ============ Disabled ============

/// A backend that refuses every request.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn ready(&self) -> Result<(), AnalysisError> {
        Err(AnalysisError::BackendUnavailable(
            "model backend is disabled (llm.provider = \"disabled\")".to_string(),
        ))
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String, AnalysisError> {
        self.ready().map(|_| String::new())
    }
}

/// Build the backend named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
            Ok(Arc::new(OpenAiModel::new(config, key)?))
        }
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledModel)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}
