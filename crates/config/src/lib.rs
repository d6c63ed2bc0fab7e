//! Configuration loading, validation, and management for Taskforge.
//!
//! Loads configuration from `~/.taskforge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskforge/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub shell: ShellConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("backend", &self.backend)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("confirmation", &self.confirmation)
            .field("sandbox", &self.sandbox)
            .field("shell", &self.shell)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

// ── Backend ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per backend response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ── Rate limiting and retry ──

/// Sliding-window admission: at most `capacity` calls per `window_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_capacity() -> usize {
    20
}
fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

// ── Agent loop ──

/// Which reasoning protocol the agent speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Free-text Thought / Action / Observation
    React,
    /// Structured tool calls
    #[default]
    Functions,
}

impl std::str::FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "react" | "text" => Ok(Self::React),
            "functions" | "function_calling" | "tools" => Ok(Self::Functions),
            other => Err(ConfigError::ValidationError(format!("unknown protocol '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum cumulative backend tokens per run
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,

    /// How many recent history entries each prompt carries
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// How many times a run waits out a rate limit before giving up
    #[serde(default = "default_rate_limit_waits")]
    pub rate_limit_waits: u32,

    /// Past runs to pull from memory at the start of a run
    #[serde(default = "default_memory_results")]
    pub memory_results: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_token_budget() -> u64 {
    100_000
}
fn default_history_window() -> usize {
    10
}
fn default_rate_limit_waits() -> u32 {
    3
}
fn default_memory_results() -> usize {
    3
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            history_window: default_history_window(),
            rate_limit_waits: default_rate_limit_waits(),
            memory_results: default_memory_results(),
        }
    }
}

// ── Confirmation ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Never ask
    AlwaysYes,
    /// Ask before every tool call
    AlwaysAsk,
    /// Ask only for dangerous operations
    #[default]
    Auto,
}

/// What `Auto` mode does with an operation found in neither table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOperationPolicy {
    #[default]
    Approve,
    Confirm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default)]
    pub mode: ConfirmationMode,

    #[serde(default)]
    pub unknown_operation: UnknownOperationPolicy,

    /// Extra read-only operations per tool, merged with the built-in table
    #[serde(default)]
    pub safe_operations: HashMap<String, Vec<String>>,

    /// Extra always-confirm operations per tool, merged with the built-in table
    #[serde(default)]
    pub dangerous_operations: HashMap<String, Vec<String>>,
}

// ── Sandbox and tools ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Restrict file operations to `workspace_root`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to the current directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,

    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,
}

fn default_forbidden_paths() -> Vec<String> {
    vec![
        "~/.ssh".into(),
        "~/.gnupg".into(),
        "~/.aws".into(),
        "/etc/shadow".into(),
    ]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace_root: None,
            forbidden_paths: default_forbidden_paths(),
        }
    }
}

impl SandboxConfig {
    /// The effective workspace root.
    pub fn root(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Wall-clock limit per command
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,

    /// If non-empty, only these base commands may run
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

fn default_shell_timeout() -> u64 {
    30
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout(),
            allowed_commands: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskforge/config.toml).
    ///
    /// Also checks environment variables:
    /// - `TASKFORGE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TASKFORGE_MODEL`
    /// - `TASKFORGE_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("TASKFORGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("TASKFORGE_MODEL") {
            config.backend.model = model;
        }

        if let Ok(url) = std::env::var("TASKFORGE_API_URL") {
            config.backend.api_url = url;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskforge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.backend.max_tokens == 0 {
            return Err(ConfigError::ValidationError("backend.max_tokens must be > 0".into()));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.capacity and rate_limit.window_secs must be > 0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_iterations must be > 0".into()));
        }
        if self.agent.token_budget == 0 {
            return Err(ConfigError::ValidationError("agent.token_budget must be > 0".into()));
        }
        if self.agent.history_window == 0 {
            return Err(ConfigError::ValidationError("agent.history_window must be > 0".into()));
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The effective configuration as TOML, with the API key masked.
    pub fn to_redacted_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
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
