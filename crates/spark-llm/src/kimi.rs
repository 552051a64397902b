//! Kimi (Moonshot) chat-completions provider.
//!
//! OpenAI-compatible endpoint with Bearer auth. Streams `delta.content`
//! fragments out of the SSE response.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use spark_core::{ChatMessage, ChunkStream, CompletionError, CompletionProvider};
use tracing::{debug, error, instrument, warn};

use crate::sse::parse_sse_lines;

pub const DEFAULT_BASE_URL: &str = "https://api.kimi.com/coding";
pub const DEFAULT_MODEL: &str = "moonshot-v1-8k";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct KimiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl KimiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

pub struct KimiProvider {
    config: KimiConfig,
    client: reqwest::Client,
}

impl KimiProvider {
    pub fn new(config: KimiConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn build_headers(&self) -> Result<HeaderMap, CompletionError> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = format!("Bearer {}", self.config.api_key.expose_secret());
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| CompletionError::AuthenticationFailed(format!("invalid API key header: {e}")))?,
        );
        Ok(headers)
    }
}

/// Content fragment of one SSE payload, if it carries any.
fn delta_content(line: &str) -> Option<String> {
    match serde_json::from_str::<StreamChunk>(line) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty()),
        Err(e) => {
            warn!(line = %line, error = %e, "Failed to parse Kimi SSE event");
            None
        }
    }
}

#[async_trait]
impl CompletionProvider for KimiProvider {
    fn name(&self) -> &str {
        "kimi"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "kimi", model = %self.config.model))]
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        debug!(message_count = messages.len(), "Sending Kimi request");

        let response = self
            .client
            .post(self.config.endpoint())
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Kimi API error");
            return Err(CompletionError::from_status(status.as_u16(), body));
        }

        let chunks = parse_sse_lines(response.bytes_stream()).filter_map(|item| {
            std::future::ready(match item {
                Ok(line) => delta_content(&line).map(Ok),
                Err(e) => Some(Err(e)),
            })
        });

        Ok(Box::pin(chunks))
    }
}
