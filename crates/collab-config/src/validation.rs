//! Full configuration validation.
//!
//! Collects every violation so a broken config reports all of its problems
//! at once.

use crate::schema::CollabConfig;
use collab_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &CollabConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_non_empty(&mut errors, "server.host", &config.server.host);
    validate_non_empty(&mut errors, "sessions.data_dir", &config.sessions.data_dir);
    validate_non_empty(&mut errors, "agent.program", &config.agent.program);
    validate_non_empty(&mut errors, "preview.upstream_host", &config.preview.upstream_host);

    validate_range(
        &mut errors,
        "sessions.max_sessions",
        config.sessions.max_sessions as u64,
        1,
        1000,
    );
    validate_range(
        &mut errors,
        "sessions.idle_timeout_minutes",
        config.sessions.idle_timeout_minutes,
        0,
        7 * 24 * 60,
    );

    validate_range(
        &mut errors,
        "limits.create_per_minute",
        config.limits.create_per_minute as u64,
        1,
        10_000,
    );
    validate_range(
        &mut errors,
        "limits.chat_per_minute",
        config.limits.chat_per_minute as u64,
        1,
        10_000,
    );
    validate_range(
        &mut errors,
        "limits.connections_per_minute",
        config.limits.connections_per_minute as u64,
        1,
        10_000,
    );
    validate_range(
        &mut errors,
        "limits.max_input_bytes",
        config.limits.max_input_bytes as u64,
        1,
        1_048_576,
    );

    validate_range(
        &mut errors,
        "preview.request_timeout_secs",
        config.preview.request_timeout_secs,
        1,
        3600,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_range(errors: &mut Vec<String>, name: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

fn validate_non_empty(errors: &mut Vec<String>, name: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{name} must not be empty"));
    }
}
