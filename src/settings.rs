//! Key-value settings shared with the analysis and scan layers.
//!
//! Values are JSON so that stores written by other front ends (camelCase
//! keys, numbers sometimes saved as strings) load unchanged.

use crate::analysis::templates::{self, DEFAULT_TEMPLATE};
use crate::analysis::ApiMode;
use crate::stop::{StopCondition, VibeMode};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

pub mod keys {
    pub const API_MODE: &str = "apiMode";
    pub const CLAUDE_API_KEY: &str = "claudeApiKey";
    pub const SYSTEM_PROMPT: &str = "systemPrompt";
    pub const SELECTED_TEMPLATE: &str = "selectedTemplate";
    pub const VIBE_MODE: &str = "vibeMode";
    pub const TWEET_COUNT: &str = "tweetCount";
    pub const TIME_PERIOD: &str = "timePeriod";

    pub const PROXY_USAGE: &str = "proxyUsage";
    pub const LAST_USAGE_UPDATE: &str = "lastUsageUpdate";
    pub const USAGE_COUNT: &str = "usageCount";
    pub const USER_ID: &str = "userId";

    /// Keys a user may set by hand.
    pub const USER_KEYS: &[&str] = &[
        API_MODE,
        CLAUDE_API_KEY,
        SYSTEM_PROMPT,
        SELECTED_TEMPLATE,
        VIBE_MODE,
        TWEET_COUNT,
        TIME_PERIOD,
    ];
}

pub const DEFAULT_TWEET_COUNT: u64 = 100;
pub const MIN_TWEET_COUNT: u64 = 10;
pub const MAX_TWEET_COUNT: u64 = 1000;
pub const DEFAULT_TIME_PERIOD: u64 = 24;
pub const MIN_TIME_PERIOD: u64 = 1;
pub const MAX_TIME_PERIOD: u64 = 168;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("settings file {path} is not a JSON object: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;

    fn remove(&self, key: &str) -> Result<(), SettingsError>;

    fn entries(&self) -> BTreeMap<String, Value>;

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Reads a non-negative integer, also accepting numeric strings.
    fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn lock(values: &Mutex<BTreeMap<String, Value>>) -> MutexGuard<'_, BTreeMap<String, Value>> {
    values.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn entries(&self) -> BTreeMap<String, Value> {
        lock(&self.values).clone()
    }
}

/// JSON object on disk, rewritten after every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Opens the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => {
                let map: Map<String, Value> =
                    serde_json::from_str(&text).map_err(|source| SettingsError::Json {
                        path: path.clone(),
                        source,
                    })?;
                map.into_iter().collect()
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file yet");
                BTreeMap::new()
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vibereader").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(values).map_err(|source| SettingsError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, text).map_err(io_err)
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn entries(&self) -> BTreeMap<String, Value> {
        lock(&self.values).clone()
    }
}

/// Typed view of the user-facing settings, read at scan start and on reconfigure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_mode: ApiMode,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub selected_template: String,
    pub vibe_mode: VibeMode,
    pub tweet_count: u64,
    pub time_period_hours: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_mode: ApiMode::default(),
            api_key: None,
            system_prompt: None,
            selected_template: DEFAULT_TEMPLATE.to_string(),
            vibe_mode: VibeMode::default(),
            tweet_count: DEFAULT_TWEET_COUNT,
            time_period_hours: DEFAULT_TIME_PERIOD,
        }
    }
}

impl Settings {
    /// Reads every key with its default; malformed values fall back with a warning.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        let api_mode = parse_or(store, keys::API_MODE, defaults.api_mode);
        let vibe_mode = parse_or(store, keys::VIBE_MODE, defaults.vibe_mode);
        let non_blank = |key: &str| store.get_string(key).filter(|s| !s.trim().is_empty());

        Self {
            api_mode,
            api_key: non_blank(keys::CLAUDE_API_KEY),
            system_prompt: non_blank(keys::SYSTEM_PROMPT),
            selected_template: non_blank(keys::SELECTED_TEMPLATE)
                .unwrap_or(defaults.selected_template),
            vibe_mode,
            tweet_count: clamped_or(
                store,
                keys::TWEET_COUNT,
                defaults.tweet_count,
                MIN_TWEET_COUNT,
                MAX_TWEET_COUNT,
            ),
            time_period_hours: clamped_or(
                store,
                keys::TIME_PERIOD,
                defaults.time_period_hours,
                MIN_TIME_PERIOD,
                MAX_TIME_PERIOD,
            ),
        }
    }

    pub fn stop_condition(&self) -> StopCondition {
        match self.vibe_mode {
            VibeMode::Manual => StopCondition::manual(),
            VibeMode::Count => StopCondition::count(self.tweet_count as usize),
            VibeMode::Time => StopCondition::time(self.time_period_hours as u32),
        }
    }

    /// System prompt for the selected template.
    pub fn prompt(&self) -> String {
        templates::resolve_prompt(&self.selected_template, self.system_prompt.as_deref())
    }
}

fn parse_or<T>(store: &dyn SettingsStore, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    let Some(raw) = store.get_string(key) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unrecognized setting value");
            default
        }
    }
}

fn clamped_or(store: &dyn SettingsStore, key: &str, default: u64, min: u64, max: u64) -> u64 {
    let Some(stored) = store.get_u64(key) else {
        return default;
    };
    let value = stored.clamp(min, max);
    if value != stored {
        warn!(key, stored, used = value, "Clamping out-of-range setting");
    }
    value
}

/// Converts a command-line value into the JSON shape stored for `key`.
pub fn value_for_key(key: &str, raw: &str) -> Result<Value, String> {
    match key {
        keys::TWEET_COUNT => parse_in_range(raw, MIN_TWEET_COUNT, MAX_TWEET_COUNT),
        keys::TIME_PERIOD => parse_in_range(raw, MIN_TIME_PERIOD, MAX_TIME_PERIOD),
        keys::API_MODE => raw
            .parse::<ApiMode>()
            .map(|mode| Value::String(mode.to_string())),
        keys::VIBE_MODE => raw
            .parse::<VibeMode>()
            .map(|mode| Value::String(mode.to_string())),
        keys::SELECTED_TEMPLATE => templates::find(raw)
            .map(|t| Value::String(t.id.to_string()))
            .ok_or_else(|| format!("unknown template: {raw}")),
        keys::CLAUDE_API_KEY | keys::SYSTEM_PROMPT => Ok(Value::String(raw.to_string())),
        other => Err(format!(
            "unknown setting: {other} (expected one of {})",
            keys::USER_KEYS.join(", ")
        )),
    }
}

fn parse_in_range(raw: &str, min: u64, max: u64) -> Result<Value, String> {
    let n: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("expected a number, got {raw}"))?;
    if !(min..=max).contains(&n) {
        return Err(format!("value must be between {min} and {max}"));
    }
    Ok(Value::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_defaults_on_empty_store() {
        let store = MemoryStore::new();
        let settings = Settings::load(&store);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stop_condition(), StopCondition::count(100));
        assert_eq!(
            settings.prompt(),
            templates::find(DEFAULT_TEMPLATE).unwrap().prompt
        );
    }

    #[test]
    fn test_load_reads_and_clamps() {
        let store = MemoryStore::new();
        store.set(keys::API_MODE, json!("own")).unwrap();
        store.set(keys::CLAUDE_API_KEY, json!("sk-ant-1")).unwrap();
        store.set(keys::VIBE_MODE, json!("time")).unwrap();
        store.set(keys::TWEET_COUNT, json!(5000)).unwrap();
        store.set(keys::TIME_PERIOD, json!("0")).unwrap();

        let settings = Settings::load(&store);

        assert_eq!(settings.api_mode, ApiMode::Own);
        assert_eq!(settings.api_key.as_deref(), Some("sk-ant-1"));
        assert_eq!(settings.vibe_mode, VibeMode::Time);
        assert_eq!(settings.tweet_count, 1000);
        assert_eq!(settings.time_period_hours, 1);
        assert_eq!(settings.stop_condition(), StopCondition::time(1));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let store = MemoryStore::new();
        store.set(keys::API_MODE, json!("sideways")).unwrap();
        store.set(keys::TWEET_COUNT, json!("lots")).unwrap();
        store.set(keys::CLAUDE_API_KEY, json!("   ")).unwrap();

        let settings = Settings::load(&store);
        assert_eq!(settings.api_mode, ApiMode::Proxy);
        assert_eq!(settings.tweet_count, DEFAULT_TWEET_COUNT);
        assert_eq!(settings.api_key, None);
    }

    #[test]
    fn test_custom_prompt_resolution() {
        let store = MemoryStore::new();
        store.set(keys::SELECTED_TEMPLATE, json!("custom")).unwrap();
        store.set(keys::SYSTEM_PROMPT, json!("List only links.")).unwrap();
        assert_eq!(Settings::load(&store).prompt(), "List only links.");
    }

    #[test]
    fn test_get_u64_accepts_strings_and_floats() {
        let store = MemoryStore::new();
        store.set("a", json!("42")).unwrap();
        store.set("b", json!(7.0)).unwrap();
        store.set("c", json!(-3)).unwrap();
        assert_eq!(store.get_u64("a"), Some(42));
        assert_eq!(store.get_u64("b"), Some(7));
        assert_eq!(store.get_u64("c"), None);
        assert_eq!(store.get_u64("missing"), None);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = FileStore::open(&path).unwrap();
        assert!(store.entries().is_empty());
        store.set(keys::VIBE_MODE, json!("manual")).unwrap();
        store.set(keys::USAGE_COUNT, json!(3)).unwrap();
        store.remove(keys::USAGE_COUNT).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_string(keys::VIBE_MODE).as_deref(), Some("manual"));
        assert_eq!(reopened.get(keys::USAGE_COUNT), None);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(SettingsError::Json { .. })
        ));
    }

    #[test]
    fn test_value_for_key() {
        assert_eq!(value_for_key(keys::TWEET_COUNT, "250"), Ok(json!(250)));
        assert!(value_for_key(keys::TWEET_COUNT, "5").is_err());
        assert!(value_for_key(keys::TIME_PERIOD, "200").is_err());
        assert_eq!(value_for_key(keys::VIBE_MODE, "Time"), Ok(json!("time")));
        assert_eq!(
            value_for_key(keys::SELECTED_TEMPLATE, "tech_insights"),
            Ok(json!("tech_insights"))
        );
        assert!(value_for_key(keys::SELECTED_TEMPLATE, "nope").is_err());
        assert!(value_for_key(keys::USAGE_COUNT, "1").is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn load_with_logs(store: &MemoryStore) -> (Settings, String) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let settings = tracing::subscriber::with_default(subscriber, || Settings::load(store));
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        (settings, text)
    }

    #[test]
    fn test_out_of_range_values_warn() {
        let store = MemoryStore::new();
        store.set(keys::TWEET_COUNT, json!(5)).unwrap();
        store.set(keys::TIME_PERIOD, json!(500)).unwrap();

        let (settings, logs) = load_with_logs(&store);

        assert_eq!(settings.tweet_count, MIN_TWEET_COUNT);
        assert_eq!(settings.time_period_hours, MAX_TIME_PERIOD);
        assert!(logs.contains("Clamping out-of-range setting"));
        assert!(logs.contains("tweetCount"));
        assert!(logs.contains("timePeriod"));
    }

    #[test]
    fn test_in_range_values_load_quietly() {
        let store = MemoryStore::new();
        store.set(keys::TWEET_COUNT, json!(50)).unwrap();

        let (settings, logs) = load_with_logs(&store);

        assert_eq!(settings.tweet_count, 50);
        assert!(!logs.contains("Clamping"));
    }
}
