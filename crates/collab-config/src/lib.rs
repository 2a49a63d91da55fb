//! Server configuration.
//!
//! TOML file with serde defaults for every section, overridden by the
//! deployment environment variables, then validated as a whole.

pub mod env;
pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    AgentConfig, CollabConfig, LimitsConfig, PreviewConfig, ServerConfig, SessionsConfig,
    CONFIG_SCHEMA_VERSION,
};

use collab_common::ConfigError;
use std::path::Path;

/// Load config from `path` (or the platform default when `None`), apply
/// environment overrides, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<CollabConfig, ConfigError> {
    let mut config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };
    env::apply_env_overrides(&mut config)?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &CollabConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
