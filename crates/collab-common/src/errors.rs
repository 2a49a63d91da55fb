use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures of the pseudo-terminal layer.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by session lifecycle operations.
///
/// Only creation can fail in a way the caller sees; everything that happens
/// inside a running session is contained there.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid repo URL: {0}")]
    InvalidRepo(String),

    #[error("maximum sessions ({max}) reached")]
    Capacity { max: usize },

    #[error("repository acquisition failed: {0}")]
    Acquisition(String),

    #[error(transparent)]
    Spawn(#[from] TerminalError),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} has ended")]
    Ended(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}
