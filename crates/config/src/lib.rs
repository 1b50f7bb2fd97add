//! Configuration loading, validation, and management for Dewey.
//!
//! Loads configuration from `~/.dewey/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use dewey_core::{ReflectionPolicy, ReplyProtocol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything in `~/.dewey/config.toml`. Every field has a default, so an
/// empty or missing file is a working local setup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fallback key for providers without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Backend the agent talks to (a key of `providers` or a well-known name)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model requested from that backend
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature, 0.0 to 2.0
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Completion length cap per model call
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP/WebSocket server
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Job store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Queue worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Per-backend overrides, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "qwen2.5:7b".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret for Debug output.
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
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("store", &self.store)
            .field("worker", &self.worker)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Settings for one LLM backend.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model calls per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Whether to ask the model to evaluate tool results
    #[serde(default)]
    pub reflection: ReflectionPolicy,

    /// How the model requests tools
    #[serde(default)]
    pub reply_protocol: ReplyProtocol,

    /// Tag wrapping the final answer, e.g. `reply` for `<reply>…</reply>`
    #[serde(default = "default_answer_tag")]
    pub answer_tag: String,

    /// Replaces the default persona
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    100
}
fn default_answer_tag() -> String {
    "reply".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            reflection: ReflectionPolicy::default(),
            reply_protocol: ReplyProtocol::default(),
            answer_tag: default_answer_tag(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Keys accepted in `X-API-Key`. Empty disables the check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,
}

fn default_port() -> u16 {
    5001
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_keys: Vec::new(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("api_keys", &format!("[{} REDACTED]", self.api_keys.len()))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite file; defaults to `~/.dewey/dewey.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("dewey.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sleep between queue polls when idle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Wall-clock limit for `python_code`
    #[serde(default = "default_code_timeout_secs")]
    pub code_timeout_secs: u64,

    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Results returned by `search_web`
    #[serde(default = "default_search_results")]
    pub search_results: usize,

    /// HTTP timeout for web tools
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_code_timeout_secs() -> u64 {
    10
}
fn default_python_bin() -> String {
    "python3".into()
}
fn default_search_results() -> usize {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            code_timeout_secs: default_code_timeout_secs(),
            python_bin: default_python_bin(),
            search_results: default_search_results(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.dewey/config.toml).
    ///
    /// Also checks environment variables:
    /// - `DEWEY_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `DEWEY_PROVIDER`
    /// - `DEWEY_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read one TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("DEWEY_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(provider) = var("DEWEY_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = var("DEWEY_MODEL") {
            self.default_model = model;
        }
    }

    /// `~/.dewey`, holding `config.toml` and the default job database.
    pub fn config_dir() -> PathBuf {
        home_dir().join(".dewey")
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (
                (0.0..=2.0).contains(&self.default_temperature),
                "default_temperature must be between 0.0 and 2.0",
            ),
            (self.agent.max_iterations >= 1, "agent.max_iterations must be at least 1"),
            (!self.agent.answer_tag.trim().is_empty(), "agent.answer_tag must not be empty"),
            (self.worker.poll_interval_ms > 0, "worker.poll_interval_ms must be > 0"),
        ];
        if let Some((_, problem)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(ConfigError::Invalid((*problem).to_string()));
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unknown store.backend '{other}' (expected sqlite or memory)"
            ))),
        }
    }

    /// The defaults rendered as TOML, written by `dewey onboard`.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            worker: WorkerConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

fn home_dir() -> PathBuf {
    ["HOME", "USERPROFILE"]
        .iter()
        .find_map(|key| std::env::var_os(key))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Malformed TOML in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
