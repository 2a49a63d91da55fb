//! TOML config file loading and creation.

use crate::schema::CollabConfig;
use collab_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load config from a specific TOML file path.
///
/// Deserializes the file using serde defaults for any missing fields.
/// Validation is left to the caller so environment overrides can be applied
/// first.
pub fn load_from_path(path: &Path) -> Result<CollabConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
    })?;

    let config: CollabConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On macOS: `~/Library/Application Support/claude-collab/config.toml`
/// On Linux: `~/.config/claude-collab/config.toml`
///
/// If the file does not exist, creates a commented default file and returns
/// defaults.
pub fn load_default() -> Result<CollabConfig, ConfigError> {
    let path = default_config_path()?;

    if !path.exists() {
        info!("no config found at {}, creating default", path.display());
        create_default_config(&path)?;
        return Ok(CollabConfig::default());
    }

    load_from_path(&path)
}

/// Get the platform-specific default config file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))?;
    Ok(config_dir.join("claude-collab").join("config.toml"))
}

/// Create a default TOML config file with documentation comments.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Generate the default TOML config content with comments.
fn default_config_toml() -> &'static str {
    r##"# claude-collab configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.
# Environment variables (PORT, HOST, DATA_DIR, CLAUDE_PATH, MAX_SESSIONS,
# SESSION_IDLE_TIMEOUT, CLAUDE_COLLAB_NO_CHAT) take precedence over this file.

[server]
# host = "0.0.0.0"
# port = 4321
# public_dir = "./public"

[sessions]
# data_dir = "./data"
# max_sessions = 10             # 1-1000
# idle_timeout_minutes = 0      # 0 = never end idle sessions
# chat_enabled = true

[agent]
# program = "claude"
# args = []
# append_system_prompt = true

[limits]
# create_per_minute = 5
# chat_per_minute = 30
# connections_per_minute = 20
# max_input_bytes = 1024

[preview]
# upstream_host = "localhost"
# request_timeout_secs = 30
"##
}
