use super::{AnalysisBackend, AnalysisError, AnalysisRequest, BackendKind, BackendReply};
use crate::config::AnthropicConfig;
use crate::post::Post;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const USER_PROMPT_PREAMBLE: &str =
    "Please analyze the following tweets and provide a curated summary of the most valuable insights:\n\n";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Fixed-delay retry for the direct API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl From<&AnthropicConfig> for RetryPolicy {
    fn from(config: &AnthropicConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Builds the user turn: one `Author / Content / Time / URL` block per post.
pub fn build_user_prompt(posts: &[Post]) -> String {
    let blocks: Vec<String> = posts.iter().map(Post::to_prompt_block).collect();
    format!("{}{}", USER_PROMPT_PREAMBLE, blocks.join("\n"))
}

/// Vendor messages endpoint called with the user's own key.
pub struct DirectBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl DirectBackend {
    pub fn new(config: &AnthropicConfig) -> Self {
        Self::with_endpoint(
            config.messages_url(),
            config.model.clone(),
            config.max_tokens,
            RetryPolicy::from(config),
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            max_tokens,
            retry,
        }
    }

    async fn attempt(
        &self,
        api_key: &str,
        body: &MessagesRequest<'_>,
    ) -> Result<String, AnalysisError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AnalysisError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::InvalidResponse(format!("messages body: {e}")))?;
        parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AnalysisError::InvalidResponse("no text in content[0]".to_string()))
    }
}

#[async_trait]
impl AnalysisBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<BackendReply, AnalysisError> {
        let api_key = request.api_key.ok_or(AnalysisError::MissingApiKey)?;
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: request.system_prompt,
            messages: vec![Message {
                role: "user",
                content: build_user_prompt(request.posts),
            }],
        };

        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            debug!(attempt, max_attempts, model = %self.model, "Calling messages API");
            match self.attempt(api_key, &body).await {
                Ok(text) => {
                    info!(attempt, chars = text.len(), "Direct API analysis succeeded");
                    return Ok(BackendReply { text, usage: None });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        error = %err,
                        "Retryable direct API error"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Direct API request failed");
                    return Err(err);
                }
            }
        }
    }
}
