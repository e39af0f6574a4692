use crate::dedup::DEFAULT_PREFIX_CHARS;
use crate::scroll::ScrollTiming;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timeline item selectors, most specific first.
pub const DEFAULT_ITEM_SELECTORS: &[&str] = &[
    r#"article[data-testid="tweet"]"#,
    r#"[data-testid="tweet"]"#,
    r#"div[data-testid="tweet"]"#,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub anthropic: AnthropicConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub base_url: String,
    /// Hard wall-clock limit on one proxy request.
    pub timeout_secs: u64,
    /// Successful proxy analyses allowed before failing fast; 0 means no local cap.
    pub free_usage_limit: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: 120,
            free_usage_limit: 50,
        }
    }
}

impl ProxyConfig {
    pub fn analyze_url(&self) -> String {
        format!("{}/api/analyze", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4000,
            max_retries: 2,
            retry_delay_ms: 3000,
        }
    }
}

impl AnthropicConfig {
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Timeline item selectors, tried in order until one matches.
    pub item_selectors: Vec<String>,
    pub dedup_prefix_chars: usize,
    /// Batches after which a count or time scan gives up; 0 disables the cap.
    pub max_batches: u32,
    pub auto_stop_grace_ms: u64,
    pub permalink_origin: String,
    pub timing: ScrollTiming,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            item_selectors: DEFAULT_ITEM_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dedup_prefix_chars: DEFAULT_PREFIX_CHARS,
            max_batches: 400,
            auto_stop_grace_ms: 1000,
            permalink_origin: "https://x.com".to_string(),
            timing: ScrollTiming::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vibereader").join("config.toml"))
    }

    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = Config::from_toml(
            r#"
            [proxy]
            base_url = "https://proxy.example.com/"

            [anthropic]
            max_retries = 4

            [scan]
            max_batches = 10

            [scan.timing]
            bottom_settle_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(
            config.proxy.analyze_url(),
            "https://proxy.example.com/api/analyze"
        );
        assert_eq!(config.proxy.timeout_secs, 120);
        assert_eq!(config.anthropic.max_retries, 4);
        assert_eq!(config.anthropic.retry_delay_ms, 3000);
        assert_eq!(config.scan.max_batches, 10);
        assert_eq!(config.scan.item_selectors.len(), 3);
        assert_eq!(config.scan.timing.bottom_settle_ms, 50);
        assert_eq!(config.scan.timing.step_settle_ms, 600);
    }

    #[test]
    fn test_messages_url() {
        assert_eq!(
            AnthropicConfig::default().messages_url(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\ndedup_prefix_chars = 80\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scan.dedup_prefix_chars, 80);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[proxy]\ntimeout_secs = \"soon\"").is_err());
    }
}
