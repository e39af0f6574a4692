pub mod direct;
pub mod error;
pub mod proxy;
pub mod templates;

pub use error::{AnalysisError, ErrorKind, NetworkCause};

use crate::config::Config;
use crate::post::Post;
use crate::settings::{keys, Settings, SettingsStore};
use async_trait::async_trait;
use chrono::Utc;
use direct::DirectBackend;
use proxy::ProxyBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Which backend path the dispatcher tries first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// Hosted proxy, falling back to the direct API when a key is configured.
    #[default]
    Proxy,
    /// Direct API with the user's own key.
    Own,
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiMode::Proxy => f.write_str("proxy"),
            ApiMode::Own => f.write_str("own"),
        }
    }
}

impl FromStr for ApiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(ApiMode::Proxy),
            "own" => Ok(ApiMode::Own),
            other => Err(format!("unknown api mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Proxy,
    Direct,
}

/// Shared-quota snapshot reported by the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub text: String,
    pub backend: BackendKind,
    pub usage: Option<Usage>,
}

/// Everything a backend needs for one analysis call.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub posts: &'a [Post],
    pub system_prompt: &'a str,
    pub api_key: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    /// Never empty.
    pub text: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<BackendReply, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub mode: ApiMode,
    pub api_key: Option<String>,
    /// Local cap on proxy analyses; 0 disables the check.
    pub free_usage_limit: u64,
}

impl DispatcherConfig {
    fn usable_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Sends a finished collection to the proxy or the direct API.
pub struct Dispatcher {
    proxy: Arc<dyn AnalysisBackend>,
    direct: Arc<dyn AnalysisBackend>,
    store: Arc<dyn SettingsStore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: &Config, store: Arc<dyn SettingsStore>) -> Self {
        let settings = Settings::load(store.as_ref());
        let mut dispatcher = Self::with_backends(
            Arc::new(ProxyBackend::new(&config.proxy)),
            Arc::new(DirectBackend::new(&config.anthropic)),
            store,
            DispatcherConfig {
                mode: ApiMode::default(),
                api_key: None,
                free_usage_limit: config.proxy.free_usage_limit,
            },
        );
        dispatcher.apply_settings(&settings);
        dispatcher
    }

    pub fn with_backends(
        proxy: Arc<dyn AnalysisBackend>,
        direct: Arc<dyn AnalysisBackend>,
        store: Arc<dyn SettingsStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            proxy,
            direct,
            store,
            config,
        }
    }

    /// Picks up the mode and key from freshly loaded settings.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.config.mode = settings.api_mode;
        self.config.api_key = settings.api_key.clone();
    }

    pub fn mode(&self) -> ApiMode {
        self.config.mode
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub async fn analyze(
        &mut self,
        posts: &[Post],
        system_prompt: &str,
    ) -> Result<Analysis, AnalysisError> {
        info!(posts = posts.len(), mode = %self.config.mode, "Dispatching analysis");
        match self.config.mode {
            ApiMode::Own => self.analyze_direct(posts, system_prompt).await,
            ApiMode::Proxy => self.analyze_with_fallback(posts, system_prompt).await,
        }
    }

    async fn analyze_with_fallback(
        &mut self,
        posts: &[Post],
        system_prompt: &str,
    ) -> Result<Analysis, AnalysisError> {
        let proxy_err = match self.analyze_proxy(posts, system_prompt).await {
            Ok(analysis) => return Ok(analysis),
            Err(err @ AnalysisError::UsageLimitExceeded { .. }) => return Err(err),
            Err(err) => err,
        };

        if self.config.usable_key().is_none() {
            warn!(error = %proxy_err, "Proxy analysis failed and no API key is configured");
            return Err(AnalysisError::ProxyUnavailable(Box::new(proxy_err)));
        }

        warn!(error = %proxy_err, "Proxy analysis failed, falling back to direct API");
        let original = std::mem::replace(&mut self.config.mode, ApiMode::Own);
        let fallback = self.analyze_direct(posts, system_prompt).await;
        self.config.mode = original;

        fallback.map_err(|fallback| AnalysisError::FallbackExhausted {
            proxy: Box::new(proxy_err),
            fallback: Box::new(fallback),
        })
    }

    async fn analyze_proxy(
        &self,
        posts: &[Post],
        system_prompt: &str,
    ) -> Result<Analysis, AnalysisError> {
        self.check_quota()?;
        let user_id = self.user_id();
        let request = AnalysisRequest {
            posts,
            system_prompt,
            api_key: None,
            user_id: Some(user_id.as_str()),
        };
        let reply = self.proxy.analyze(&request).await?;
        self.record_proxy_use(reply.usage);
        Ok(Analysis {
            text: reply.text,
            backend: self.proxy.kind(),
            usage: reply.usage,
        })
    }

    async fn analyze_direct(
        &self,
        posts: &[Post],
        system_prompt: &str,
    ) -> Result<Analysis, AnalysisError> {
        let api_key = self.config.usable_key().ok_or(AnalysisError::MissingApiKey)?;
        let request = AnalysisRequest {
            posts,
            system_prompt,
            api_key: Some(api_key),
            user_id: None,
        };
        let reply = self.direct.analyze(&request).await?;
        Ok(Analysis {
            text: reply.text,
            backend: self.direct.kind(),
            usage: None,
        })
    }

    /// Fails before any network call when the free quota is known to be spent.
    fn check_quota(&self) -> Result<(), AnalysisError> {
        let limit = self.config.free_usage_limit;
        let used = self.store.get_u64(keys::USAGE_COUNT).unwrap_or(0);
        if limit > 0 && used >= limit {
            return Err(AnalysisError::UsageLimitExceeded { used, limit });
        }

        let reported = self
            .store
            .get(keys::PROXY_USAGE)
            .and_then(|value| serde_json::from_value::<Usage>(value).ok());
        if let Some(usage) = reported {
            if usage.limit > 0 && usage.remaining == 0 {
                return Err(AnalysisError::UsageLimitExceeded {
                    used: usage.current,
                    limit: usage.limit,
                });
            }
        }
        Ok(())
    }

    /// Stable id sent to the proxy; created and persisted on first use.
    fn user_id(&self) -> String {
        let existing = self
            .store
            .get_string(keys::USER_ID)
            .filter(|id| !id.is_empty() && id != "null" && id != "undefined");
        if let Some(id) = existing {
            return id;
        }

        let id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.store.set(keys::USER_ID, id.clone().into()) {
            warn!(error = %e, "Failed to persist generated user id");
        }
        info!("Generated new proxy user id");
        id
    }

    fn record_proxy_use(&self, usage: Option<Usage>) {
        let count = self.store.get_u64(keys::USAGE_COUNT).unwrap_or(0) + 1;
        if let Err(e) = self.store.set(keys::USAGE_COUNT, count.into()) {
            warn!(error = %e, "Failed to persist usage count");
        }

        let Some(usage) = usage else {
            return;
        };
        info!(
            current = usage.current,
            limit = usage.limit,
            remaining = usage.remaining,
            "Proxy usage after request"
        );
        let stored = serde_json::to_value(usage).map_err(|e| e.to_string()).and_then(|value| {
            self.store
                .set(keys::PROXY_USAGE, value)
                .and_then(|_| {
                    self.store
                        .set(keys::LAST_USAGE_UPDATE, Utc::now().timestamp_millis().into())
                })
                .map_err(|e| e.to_string())
        });
        if let Err(e) = stored {
            warn!(error = %e, "Failed to persist proxy usage");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What a fake backend saw on one call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SeenRequest {
        pub posts: usize,
        pub system_prompt: String,
        pub api_key: Option<String>,
        pub user_id: Option<String>,
    }

    /// Backend that replays queued results; the last one repeats once the queue drains.
    pub struct FakeBackend {
        kind: BackendKind,
        replies: Mutex<VecDeque<Result<BackendReply, AnalysisError>>>,
        seen: Mutex<Vec<SeenRequest>>,
    }

    impl FakeBackend {
        pub fn new(kind: BackendKind, replies: Vec<Result<BackendReply, AnalysisError>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn ok(kind: BackendKind, text: &str) -> Arc<Self> {
            Self::new(
                kind,
                vec![Ok(BackendReply {
                    text: text.to_string(),
                    usage: None,
                })],
            )
        }

        pub fn failing(kind: BackendKind, err: AnalysisError) -> Arc<Self> {
            Self::new(kind, vec![Err(err)])
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        pub fn seen(&self) -> Vec<SeenRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnalysisBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn analyze(
            &self,
            request: &AnalysisRequest<'_>,
        ) -> Result<BackendReply, AnalysisError> {
            self.seen.lock().unwrap().push(SeenRequest {
                posts: request.posts.len(),
                system_prompt: request.system_prompt.to_string(),
                api_key: request.api_key.map(str::to_string),
                user_id: request.user_id.map(str::to_string),
            });
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }
}
