//! Generation service clients.
//!
//! [`GenerationClient`] is the seam between the batch engine and the external
//! text generation service. It returns the raw model text; turning that into a
//! record is the item generator's job.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    error::{BatchError, Result},
    request::SamplingParams,
};

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";
/// Default OpenAI-compatible API base.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
/// Default per-call request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One outbound generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub system_prompt: String,
    pub user_prompt: String,
    pub sampling: SamplingParams,
}

/// Abstract interface over the text generation backend.
///
/// Implementations must be safe to call concurrently; the batch engine shares
/// one handle across all in-flight items of a job.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Issue one call and return the raw response text.
    async fn generate(&self, call: &GenerationCall) -> Result<String>;
}

#[async_trait]
impl<C: GenerationClient + ?Sized> GenerationClient for Arc<C> {
    async fn generate(&self, call: &GenerationCall) -> Result<String> {
        (**self).generate(call).await
    }
}

/// Handler used to short-circuit requests during tests.
///
/// The handler receives a lightweight view of the call and returns the raw text
/// the "model" would have produced.
pub type MockHandler = Arc<dyn Fn(MockRequest) -> Result<String> + Send + Sync>;

/// Minimal view of a generation call passed to [`MockHandler`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub sampling: SamplingParams,
}

/// Client that answers every call from a closure, without network access.
#[derive(Clone)]
pub struct MockClient {
    handler: MockHandler,
    latency: Option<Duration>,
}

impl MockClient {
    pub fn new(handler: impl Fn(MockRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            latency: None,
        }
    }

    /// Delay every response, so concurrent calls overlap in time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn generate(&self, call: &GenerationCall) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.handler)(MockRequest {
            system_prompt: call.system_prompt.clone(),
            user_prompt: call.user_prompt.clone(),
            sampling: call.sampling,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    top_p: f64,
    presence_penalty: f64,
    frequency_penalty: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Builder for [`OpenAiClient`].
pub struct OpenAiClientBuilder {
    api_key: String,
    api_base: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClientBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Per-call request timeout (default: 120s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<OpenAiClient> {
        if self.api_key.trim().is_empty() {
            return Err(BatchError::Config("API key must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(BatchError::Config(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BatchError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(OpenAiClient {
            http,
            api_key: self.api_key,
            endpoint: format!("{}/chat/completions", self.api_base.trim_end_matches('/')),
            model: self.model,
        })
    }
}

/// Chat-completions client for OpenAI-compatible services.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn builder(api_key: impl Into<String>) -> OpenAiClientBuilder {
        OpenAiClientBuilder::new(api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, call: &GenerationCall) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &call.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &call.user_prompt,
                },
            ],
            temperature: call.sampling.temperature,
            top_p: call.sampling.top_p,
            presence_penalty: call.sampling.presence_penalty,
            frequency_penalty: call.sampling.frequency_penalty,
            max_tokens: call.sampling.max_tokens,
        };

        debug!(endpoint = %self.endpoint, "Sending chat completion request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BatchError::service(status.as_u16(), &text));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(BatchError::EmptyResponse)
    }
}
