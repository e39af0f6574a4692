use super::{AnalysisBackend, AnalysisError, AnalysisRequest, BackendKind, BackendReply, Usage};
use crate::config::ProxyConfig;
use crate::post::Post;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("vibereader/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    tweets: &'a [Post],
    system_prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ProxySuccess {
    analysis: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct ProxyFailure {
    error: Option<String>,
    usage: Option<Usage>,
}

/// Operator-run relay holding its own vendor key. One attempt per call.
pub struct ProxyBackend {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ProxyBackend {
    pub fn new(config: &ProxyConfig) -> Self {
        Self::with_endpoint(config.analyze_url(), Duration::from_secs(config.timeout_secs))
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn send(&self, request: &AnalysisRequest<'_>) -> Result<BackendReply, AnalysisError> {
        let body = ProxyRequest {
            tweets: request.posts,
            system_prompt: request.system_prompt,
            user_id: request.user_id,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(user_id) = request.user_id {
            builder = builder.header("X-User-ID", user_id);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let failure: ProxyFailure = serde_json::from_str(&text).unwrap_or_default();
            if let Some(usage) = failure.usage {
                info!(
                    current = usage.current,
                    limit = usage.limit,
                    remaining = usage.remaining,
                    "Proxy usage on failure"
                );
            }
            let message = failure
                .error
                .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_string()))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(AnalysisError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let success: ProxySuccess = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::InvalidResponse(format!("proxy body: {e}")))?;
        let analysis = success
            .analysis
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| AnalysisError::InvalidResponse("missing analysis field".to_string()))?;

        Ok(BackendReply {
            text: analysis,
            usage: success.usage,
        })
    }
}

#[async_trait]
impl AnalysisBackend for ProxyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Proxy
    }

    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<BackendReply, AnalysisError> {
        let started = Instant::now();
        debug!(endpoint = %self.endpoint, posts = request.posts.len(), "Sending proxy request");

        let result = match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout(self.timeout)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(reply) => info!(elapsed_ms, chars = reply.text.len(), "Proxy analysis succeeded"),
            Err(e) => warn!(elapsed_ms, error = %e, "Proxy analysis failed"),
        }
        result
    }
}
