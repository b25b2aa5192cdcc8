use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SUPPORTED_VERSION: &str = "1.0";

/// Returns the default config location: `~/.podscribe/channels.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".podscribe").join("channels.yaml"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = load_config_from_str(&content)?;
    log::debug!(
        "Loaded config from {} ({} channel(s))",
        path.display(),
        config.channels.len()
    );
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.output_directory.trim().is_empty() {
        return Err(invalid("output_directory must not be empty"));
    }

    let azure = &config.azure;
    if azure.api_version.trim().is_empty() {
        return Err(invalid("azure.api_version must not be empty"));
    }
    if azure.candidate_locales.is_empty() {
        return Err(invalid("azure.candidate_locales must list at least one locale"));
    }

    let lifecycle = &config.lifecycle;
    if lifecycle.submit_concurrency == 0 || lifecycle.poll_concurrency == 0 {
        return Err(invalid("lifecycle concurrency values must be at least 1"));
    }
    if lifecycle.per_channel_concurrency == Some(0) {
        return Err(invalid("lifecycle.per_channel_concurrency must be at least 1"));
    }
    if lifecycle.max_attempts == 0 {
        return Err(invalid("lifecycle.max_attempts must be at least 1"));
    }
    if lifecycle.backoff_base_secs == 0 {
        return Err(invalid("lifecycle.backoff_base_secs must be at least 1"));
    }
    if lifecycle.backoff_base_secs > lifecycle.backoff_max_secs {
        return Err(invalid(format!(
            "lifecycle.backoff_base_secs ({}) exceeds backoff_max_secs ({})",
            lifecycle.backoff_base_secs, lifecycle.backoff_max_secs
        )));
    }
    if lifecycle.request_timeout_secs == 0 || lifecycle.connect_timeout_secs == 0 {
        return Err(invalid("lifecycle timeouts must be at least 1 second"));
    }
    if lifecycle.poll_batch_limit == 0 {
        return Err(invalid("lifecycle.poll_batch_limit must be at least 1"));
    }

    let mut names = HashSet::new();
    for channel in &config.channels {
        let name = channel.name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidChannel {
                name: channel.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        if !names.insert(name) {
            return Err(ConfigError::InvalidChannel {
                name: channel.name.clone(),
                reason: "duplicate channel name".to_string(),
            });
        }
        if !(channel.url.starts_with("http://") || channel.url.starts_with("https://")) {
            return Err(ConfigError::InvalidChannel {
                name: channel.name.clone(),
                reason: format!("feed url must be http(s), got '{}'", channel.url),
            });
        }
        if channel.max_episodes == 0 {
            return Err(ConfigError::InvalidChannel {
                name: channel.name.clone(),
                reason: "max_episodes must be at least 1".to_string(),
            });
        }
    }

    Ok(())
}
