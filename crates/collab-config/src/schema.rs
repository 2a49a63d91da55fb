//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

// =============================================================================
// Root
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub agent: AgentConfig,
    pub limits: LimitsConfig,
    pub preview: PreviewConfig,
}

// =============================================================================
// Server
// =============================================================================

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Directory holding the dashboard and session page. `None` disables
    /// static serving.
    pub public_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4321,
            public_dir: None,
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Root for cloned repositories and per-session chat logs.
    pub data_dir: String,
    pub max_sessions: usize,
    /// Minutes to keep a session alive after its last viewer leaves. `0`
    /// disables automatic ending.
    pub idle_timeout_minutes: u64,
    pub chat_enabled: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            max_sessions: 10,
            idle_timeout_minutes: 0,
            chat_enabled: true,
        }
    }
}

impl SessionsConfig {
    /// `data_dir` resolved against the current directory.
    pub fn data_dir_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.data_dir);
        if path.is_absolute() {
            return path;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

// =============================================================================
// Agent
// =============================================================================

/// The CLI agent launched inside every session's terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program name or absolute path. Bare names are resolved via the shell.
    pub program: String,
    /// Extra arguments appended after the collaboration system prompt.
    pub args: Vec<String>,
    /// Pass `--append-system-prompt` describing the shared-session setup.
    pub append_system_prompt: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".into(),
            args: Vec::new(),
            append_system_prompt: true,
        }
    }
}

// =============================================================================
// Limits
// =============================================================================

/// Admission control. All counters use a 60 second rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Session creations per window, server-wide.
    pub create_per_minute: usize,
    /// Chat messages per window, per connection.
    pub chat_per_minute: usize,
    /// WebSocket connection attempts per window, per source address.
    pub connections_per_minute: usize,
    /// Largest `terminal-input` payload accepted, in bytes.
    pub max_input_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            create_per_minute: 5,
            chat_per_minute: 30,
            connections_per_minute: 20,
            max_input_bytes: 1024,
        }
    }
}

// =============================================================================
// Preview
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Host the preview proxy connects to.
    pub upstream_host: String,
    pub request_timeout_secs: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            upstream_host: "localhost".into(),
            request_timeout_secs: 30,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
