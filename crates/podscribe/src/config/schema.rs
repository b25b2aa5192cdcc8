use serde::{Deserialize, Serialize};

/// Top-level configuration, read from `channels.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.podscribe/data/podscribe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_output_directory() -> String {
    "./output".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            output_directory: default_output_directory(),
            azure: AzureConfig::default(),
            lifecycle: LifecycleConfig::default(),
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// Subscription key, inline. Prefer `key_file` or `key_env_var`.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default = "default_key_env_var")]
    pub key_env_var: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_candidate_locales")]
    pub candidate_locales: Vec<String>,
    #[serde(default = "default_true")]
    pub delete_after_completion: bool,
}

fn default_key_env_var() -> String {
    "AZURE_SPEECH_KEY".to_string()
}

fn default_api_version() -> String {
    "v3.1".to_string()
}

fn default_candidate_locales() -> Vec<String> {
    ["en-US", "zh-CN", "ja-JP", "ko-KR", "de-DE", "fr-FR", "es-ES"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            region: None,
            key: None,
            key_file: None,
            key_env_var: default_key_env_var(),
            api_version: default_api_version(),
            candidate_locales: default_candidate_locales(),
            delete_after_completion: true,
        }
    }
}

/// Concurrency, retry and timeout tuning for batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    #[serde(default = "default_concurrency")]
    pub submit_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub poll_concurrency: usize,
    /// Cap on simultaneous remote calls for a single channel.
    #[serde(default)]
    pub per_channel_concurrency: Option<usize>,
    /// Polls a job may spend in `polling` before it is failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum jobs examined per state in one poll run.
    #[serde(default = "default_poll_batch_limit")]
    pub poll_batch_limit: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    96
}

fn default_backoff_base_secs() -> u64 {
    60
}

fn default_backoff_max_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_poll_batch_limit() -> usize {
    200
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            submit_concurrency: default_concurrency(),
            poll_concurrency: default_concurrency(),
            per_channel_concurrency: None,
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_batch_limit: default_poll_batch_limit(),
        }
    }
}

/// One podcast feed to transcribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_episodes")]
    pub max_episodes: usize,
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_max_episodes() -> usize {
    10
}

impl Config {
    /// Database location with `~` expanded, or the default location.
    pub fn resolve_database_path(&self) -> Option<std::path::PathBuf> {
        match self.database_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => {
                Some(std::path::PathBuf::from(crate::secrets::expand_home(path)))
            }
            _ => crate::db::default_database_path(),
        }
    }

    /// Output directory with `~` expanded.
    pub fn resolve_output_directory(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(crate::secrets::expand_home(&self.output_directory))
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}
