use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse category of an [`AnalysisError`], stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UsageLimitExceeded,
    MissingApiKey,
    Network,
    Timeout,
    RetryableHttp,
    NonRetryableHttp,
    InvalidResponse,
    ProxyFailure,
    FallbackExhausted,
}

/// What a transport failure looks like, read from its error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCause {
    Connectivity,
    CrossOrigin,
    Dns,
    Generic,
}

impl NetworkCause {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
            NetworkCause::Dns
        } else if lower.contains("cors") || lower.contains("cross-origin") {
            NetworkCause::CrossOrigin
        } else if lower.contains("failed to fetch")
            || lower.contains("networkerror")
            || lower.contains("connect")
            || lower.contains("connection")
        {
            NetworkCause::Connectivity
        } else {
            NetworkCause::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("free usage limit reached ({used}/{limit})")]
    UsageLimitExceeded { used: u64, limit: u64 },

    #[error("no API key configured")]
    MissingApiKey,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("proxy unavailable: {0}")]
    ProxyUnavailable(Box<AnalysisError>),

    #[error("proxy failed ({proxy}) and direct fallback failed ({fallback})")]
    FallbackExhausted {
        proxy: Box<AnalysisError>,
        fallback: Box<AnalysisError>,
    },
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::UsageLimitExceeded { .. } => ErrorKind::UsageLimitExceeded,
            AnalysisError::MissingApiKey => ErrorKind::MissingApiKey,
            AnalysisError::Network(_) => ErrorKind::Network,
            AnalysisError::Timeout(_) => ErrorKind::Timeout,
            AnalysisError::Http { status, .. } if is_retryable_status(*status) => {
                ErrorKind::RetryableHttp
            }
            AnalysisError::Http { .. } => ErrorKind::NonRetryableHttp,
            AnalysisError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            AnalysisError::ProxyUnavailable(_) => ErrorKind::ProxyFailure,
            AnalysisError::FallbackExhausted { .. } => ErrorKind::FallbackExhausted,
        }
    }

    /// Network failures, 429, 529 and any 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::Network(_) => true,
            AnalysisError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AnalysisError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message with a suggested remedy.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::UsageLimitExceeded { used, limit } => format!(
                "Free usage limit reached ({used}/{limit}).\n\n\
                 Configure your own Claude API key to keep analyzing."
            ),
            AnalysisError::MissingApiKey => "No Claude API key configured.\n\n\
                 Set one with `vibereader settings set claudeApiKey <KEY>` \
                 or switch apiMode back to proxy."
                .to_string(),
            AnalysisError::Timeout(after) => format!(
                "Analysis timed out after {}s.\n\n\
                 Too many posts can make the analysis slow. Collect fewer posts, \
                 check that your connection is stable and try again later.",
                after.as_secs()
            ),
            AnalysisError::Network(message) => network_message(NetworkCause::classify(message)),
            AnalysisError::Http { status: 429, .. } => "Rate limit or quota exceeded (HTTP 429).\n\n\
                 Wait a minute and retry, or configure your own API key."
                .to_string(),
            AnalysisError::Http { status: 401, .. } | AnalysisError::Http { status: 403, .. } => {
                "The API key was rejected.\n\nCheck that claudeApiKey is valid and active."
                    .to_string()
            }
            AnalysisError::Http { status, message } if is_retryable_status(*status) => format!(
                "The analysis service is unavailable (HTTP {status}: {message}).\n\n\
                 Wait 1-2 minutes and retry."
            ),
            AnalysisError::Http { status, message } => {
                format!("The analysis request was refused (HTTP {status}: {message}).")
            }
            AnalysisError::InvalidResponse(detail) => format!(
                "The analysis service returned an unexpected response format ({detail}).\n\n\
                 Retry later."
            ),
            AnalysisError::ProxyUnavailable(cause) => format!(
                "{}\n\nQuick fix: configure your own Claude API key \
                 (`vibereader settings set claudeApiKey <KEY>`) as a fallback, \
                 or wait for the proxy service to recover.",
                proxy_message(cause)
            ),
            AnalysisError::FallbackExhausted { proxy, fallback } => format!(
                "Both analysis paths failed.\n\nProxy: {proxy}\nDirect API: {}",
                fallback.user_message()
            ),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status == 529 || status >= 500
}

fn network_message(cause: NetworkCause) -> String {
    match cause {
        NetworkCause::Connectivity => "Network connection problem.\n\n\
             The network may be unstable, a firewall may block the request or \
             the server may be down. Check your connection and retry."
            .to_string(),
        NetworkCause::CrossOrigin => "The request was blocked by a cross-origin policy.\n\n\
             Retry, or configure your own API key."
            .to_string(),
        NetworkCause::Dns => "Could not resolve the server address.\n\n\
             Check your DNS settings or try another network."
            .to_string(),
        NetworkCause::Generic => "Could not reach the analysis service.\n\n\
             Wait 1-2 minutes and retry."
            .to_string(),
    }
}

fn proxy_message(cause: &AnalysisError) -> String {
    match cause {
        AnalysisError::Http { status, .. } if *status >= 500 => {
            "The proxy server is unavailable right now.".to_string()
        }
        other => other.user_message(),
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AnalysisError::InvalidResponse(err.to_string());
        }
        AnalysisError::Network(error_chain(&err))
    }
}

/// Joins an error with all of its sources, so causes like DNS failures are visible.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
