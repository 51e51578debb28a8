//! Configuration loading, validation, and management for carebridge.
//!
//! Loads configuration from `~/.carebridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.carebridge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name, used in logs
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// HTTP timeout for completion calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Model tiers
    #[serde(default)]
    pub models: ModelsConfig,

    /// Classifier settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Context assembly and query expansion
    #[serde(default)]
    pub context: ContextConfig,

    /// Rolling summaries
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Document analysis pipeline
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Interactive wait on document analysis
    #[serde(default)]
    pub polling: PollingConfig,

    /// Database and file locations
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("models", &self.models)
            .field("router", &self.router)
            .field("context", &self.context)
            .field("summary", &self.summary)
            .field("analysis", &self.analysis)
            .field("polling", &self.polling)
            .field("storage", &self.storage)
            .finish()
    }
}

/// Which model each component uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Primary analysis tier (text and vision)
    #[serde(default = "default_primary_model")]
    pub primary: String,

    /// Cheaper tier used after a resource-limit failure
    #[serde(default = "default_fallback_model")]
    pub fallback: String,

    #[serde(default = "default_small_model")]
    pub router: String,

    #[serde(default = "default_small_model")]
    pub summary: String,

    #[serde(default = "default_primary_model")]
    pub responder: String,

    #[serde(default = "default_embedding_model")]
    pub embedding: String,
}

fn default_primary_model() -> String {
    "gpt-4o".into()
}
fn default_fallback_model() -> String {
    "gpt-4o-mini".into()
}
fn default_small_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_model(),
            fallback: default_fallback_model(),
            router: default_small_model(),
            summary: default_small_model(),
            responder: default_primary_model(),
            embedding: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// USER/AGENT turns shown to the classifier
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(default = "default_low_temperature")]
    pub temperature: f32,

    #[serde(default = "default_router_max_tokens")]
    pub max_tokens: u32,
}

fn default_history_turns() -> usize {
    6
}
fn default_low_temperature() -> f32 {
    0.1
}
fn default_router_max_tokens() -> u32 {
    10
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            temperature: default_low_temperature(),
            max_tokens: default_router_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Messages handed to a responder
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Most recent meaningful messages that are always kept
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Messages loaded for classification
    #[serde(default = "default_classification_history")]
    pub classification_history: usize,

    #[serde(default = "default_expansion_max_chars")]
    pub expansion_max_chars: usize,

    #[serde(default = "default_expansion_recent_user_turns")]
    pub expansion_recent_user_turns: usize,

    #[serde(default = "default_expansion_cross_agent_turns")]
    pub expansion_cross_agent_turns: usize,

    #[serde(default = "default_expansion_summary_terms")]
    pub expansion_summary_terms: usize,
}

fn default_max_messages() -> usize {
    25
}
fn default_recent_window() -> usize {
    12
}
fn default_classification_history() -> usize {
    10
}
fn default_expansion_max_chars() -> usize {
    300
}
fn default_expansion_recent_user_turns() -> usize {
    3
}
fn default_expansion_cross_agent_turns() -> usize {
    2
}
fn default_expansion_summary_terms() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            recent_window: default_recent_window(),
            classification_history: default_classification_history(),
            expansion_max_chars: default_expansion_max_chars(),
            expansion_recent_user_turns: default_expansion_recent_user_turns(),
            expansion_cross_agent_turns: default_expansion_cross_agent_turns(),
            expansion_summary_terms: default_expansion_summary_terms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// New messages required before another segment is digested
    #[serde(default = "default_segment_size")]
    pub segment_size: i64,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,

    /// Hard cap on stored summary length
    #[serde(default = "default_summary_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_low_temperature")]
    pub temperature: f32,

    /// Output budget for the medical digest
    #[serde(default = "default_medical_max_tokens")]
    pub medical_max_tokens: u32,
}

fn default_segment_size() -> i64 {
    15
}
fn default_summary_max_tokens() -> u32 {
    400
}
fn default_summary_max_chars() -> usize {
    2400
}
fn default_medical_max_tokens() -> u32 {
    3000
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            max_tokens: default_summary_max_tokens(),
            max_chars: default_summary_max_chars(),
            temperature: default_low_temperature(),
            medical_max_tokens: default_medical_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Estimated prompt tokens above which text is chunked
    #[serde(default = "default_max_tokens_per_request")]
    pub max_tokens_per_request: usize,

    /// Character budget per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: u32,

    #[serde(default = "default_fallback_max_tokens")]
    pub fallback_max_tokens: u32,

    /// Text sample size sent to the fallback tier
    #[serde(default = "default_fallback_sample_chars")]
    pub fallback_sample_chars: usize,

    /// Cap on the crude byte-level PDF text
    #[serde(default = "default_crude_extract_cap")]
    pub crude_extract_cap: usize,

    #[serde(default = "default_min_extracted_chars")]
    pub min_extracted_chars: usize,

    /// Concurrent analysis workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_tokens_per_request() -> usize {
    50_000
}
fn default_chunk_size() -> usize {
    30_000
}
fn default_max_chunks() -> usize {
    3
}
fn default_chunk_delay_ms() -> u64 {
    2000
}
fn default_max_output_tokens() -> u32 {
    2000
}
fn default_chunk_max_tokens() -> u32 {
    1200
}
fn default_fallback_max_tokens() -> u32 {
    600
}
fn default_fallback_sample_chars() -> usize {
    2000
}
fn default_crude_extract_cap() -> usize {
    8000
}
fn default_min_extracted_chars() -> usize {
    100
}
fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}

impl AnalysisConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_request: default_max_tokens_per_request(),
            chunk_size: default_chunk_size(),
            max_chunks: default_max_chunks(),
            chunk_delay_ms: default_chunk_delay_ms(),
            max_output_tokens: default_max_output_tokens(),
            chunk_max_tokens: default_chunk_max_tokens(),
            fallback_max_tokens: default_fallback_max_tokens(),
            fallback_sample_chars: default_fallback_sample_chars(),
            crude_extract_cap: default_crude_extract_cap(),
            min_extracted_chars: default_min_extracted_chars(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_poll_max_attempts() -> u32 {
    90
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Root directory for uploaded files
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("carebridge.db").display()
    )
}
fn default_files_dir() -> PathBuf {
    AppConfig::config_dir().join("files")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            files_dir: default_files_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.carebridge/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CAREBRIDGE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CAREBRIDGE_API_URL`
    /// - `CAREBRIDGE_PRIMARY_MODEL`
    /// - `CAREBRIDGE_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CAREBRIDGE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            if self.api_key.is_none() || lookup("CAREBRIDGE_API_KEY").is_some() {
                self.api_key = Some(key);
            }
        }
        if let Some(url) = lookup("CAREBRIDGE_API_URL") {
            self.api_url = url;
        }
        if let Some(model) = lookup("CAREBRIDGE_PRIMARY_MODEL") {
            self.models.primary = model;
        }
        if let Some(url) = lookup("CAREBRIDGE_DATABASE_URL") {
            self.storage.database_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".carebridge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, t) in [
            ("router.temperature", self.router.temperature),
            ("summary.temperature", self.summary.temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 2.0"
                )));
            }
        }

        if self.summary.segment_size <= 0 {
            return Err(ConfigError::ValidationError(
                "summary.segment_size must be > 0".into(),
            ));
        }

        if self.analysis.chunk_size == 0 || self.analysis.max_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "analysis.chunk_size and analysis.max_chunks must be > 0".into(),
            ));
        }

        if self.analysis.workers == 0 || self.analysis.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "analysis.workers and analysis.queue_capacity must be > 0".into(),
            ));
        }

        if self.polling.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "polling.max_attempts must be > 0".into(),
            ));
        }

        if self.context.recent_window > self.context.max_messages {
            return Err(ConfigError::ValidationError(
                "context.recent_window must not exceed context.max_messages".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            models: ModelsConfig::default(),
            router: RouterConfig::default(),
            context: ContextConfig::default(),
            summary: SummaryConfig::default(),
            analysis: AnalysisConfig::default(),
            polling: PollingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
