//! Environment variable overrides.
//!
//! Deployments configure the server mostly through the environment, so these
//! win over anything in the TOML file. Values that are present but do not
//! parse are reported instead of silently ignored.

use crate::schema::CollabConfig;
use collab_common::ConfigError;

pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_AGENT_PATH: &str = "CLAUDE_PATH";
pub const ENV_MAX_SESSIONS: &str = "MAX_SESSIONS";
pub const ENV_IDLE_TIMEOUT: &str = "SESSION_IDLE_TIMEOUT";
pub const ENV_NO_CHAT: &str = "CLAUDE_COLLAB_NO_CHAT";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut CollabConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides_from(
    config: &mut CollabConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(raw) = get(ENV_PORT) {
        config.server.port = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("Invalid {ENV_PORT}: {raw}")))?;
    }
    if let Some(host) = get(ENV_HOST) {
        config.server.host = host;
    }
    if let Some(dir) = get(ENV_DATA_DIR) {
        config.sessions.data_dir = dir;
    }
    if let Some(program) = get(ENV_AGENT_PATH) {
        config.agent.program = program;
    }
    if let Some(raw) = get(ENV_MAX_SESSIONS) {
        let max: usize = raw.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("Invalid {ENV_MAX_SESSIONS}: {raw}"))
        })?;
        if max < 1 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid {ENV_MAX_SESSIONS}: {raw}"
            )));
        }
        config.sessions.max_sessions = max;
    }
    if let Some(raw) = get(ENV_IDLE_TIMEOUT) {
        config.sessions.idle_timeout_minutes = raw.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("Invalid {ENV_IDLE_TIMEOUT}: {raw}"))
        })?;
    }
    if lookup(ENV_NO_CHAT).as_deref() == Some("1") {
        config.sessions.chat_enabled = false;
    }

    Ok(())
}
