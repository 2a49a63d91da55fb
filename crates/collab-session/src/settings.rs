//! Runtime settings shared by the registry and every session actor, plus the
//! process-spawning seam.

use std::path::{Path, PathBuf};
use std::time::Duration;

use collab_common::TerminalError;
use collab_config::CollabConfig;
use collab_terminal::{AgentCommand, ProcessEvent, ProcessWrapper, TerminalProcess};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub data_dir: PathBuf,
    pub max_sessions: usize,
    /// `None` keeps idle sessions alive forever.
    pub idle_timeout: Option<Duration>,
    pub chat_enabled: bool,
    pub chat_per_minute: usize,
    pub max_input_bytes: usize,
    /// The port this server listens on; never adopted as a preview port.
    pub server_port: u16,
}

impl SessionSettings {
    pub fn from_config(config: &CollabConfig, server_port: u16) -> Self {
        let minutes = config.sessions.idle_timeout_minutes;
        Self {
            data_dir: config.sessions.data_dir_path(),
            max_sessions: config.sessions.max_sessions,
            idle_timeout: (minutes > 0).then(|| Duration::from_secs(minutes * 60)),
            chat_enabled: config.sessions.chat_enabled,
            chat_per_minute: config.limits.chat_per_minute,
            max_input_bytes: config.limits.max_input_bytes,
            server_port,
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }
}

/// Starts the terminal process for a session. Called on the blocking pool.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(
        &self,
        cwd: &Path,
        events: UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TerminalProcess>, TerminalError>;
}

/// Launches the configured agent in a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct AgentSpawner {
    program: String,
    args: Vec<String>,
    append_system_prompt: bool,
}

impl AgentSpawner {
    /// Resolves the agent program once, up front.
    pub fn from_config(config: &CollabConfig) -> Self {
        Self {
            program: collab_terminal::pty::resolve_program(&config.agent.program),
            args: config.agent.args.clone(),
            append_system_prompt: config.agent.append_system_prompt,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ProcessSpawner for AgentSpawner {
    fn spawn(
        &self,
        cwd: &Path,
        events: UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TerminalProcess>, TerminalError> {
        let command = AgentCommand::new(&self.program, &self.args, self.append_system_prompt, cwd);
        Ok(Box::new(ProcessWrapper::spawn(command, events)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_defaults() {
        let settings = SessionSettings::from_config(&CollabConfig::default(), 4321);
        assert_eq!(settings.max_sessions, 10);
        assert!(settings.idle_timeout.is_none());
        assert!(settings.chat_enabled);
        assert_eq!(settings.server_port, 4321);
        assert!(settings.sessions_dir().ends_with("data/sessions"));
        assert!(settings.repos_dir().ends_with("data/repos"));
    }

    #[test]
    fn idle_timeout_in_minutes() {
        let mut config = CollabConfig::default();
        config.sessions.idle_timeout_minutes = 15;
        let settings = SessionSettings::from_config(&config, 0);
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(900)));
    }

    #[test]
    fn agent_spawner_keeps_absolute_program() {
        let mut config = CollabConfig::default();
        config.agent.program = "/usr/local/bin/claude".into();
        assert_eq!(AgentSpawner::from_config(&config).program(), "/usr/local/bin/claude");
    }
}
