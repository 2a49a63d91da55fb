//! Pseudo-terminal process wrapper for the session agent.
//!
//! Each session owns one [`ProcessWrapper`]. Output is read on a background
//! thread, appended to the bounded scrollback and forwarded as
//! [`ProcessEvent::Output`] over a tokio channel; a second thread waits on
//! the child and reports [`ProcessEvent::Exit`]. Both threads are tagged with
//! the spawn generation, so a restarted process never sees output or exit
//! events from its predecessor.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use collab_common::TerminalError;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::UnboundedSender;

use crate::scrollback::Scrollback;
use crate::utf8::Utf8Decoder;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 40;

const PTY_READ_CHUNK: usize = 4096;

/// Appended to the agent's system prompt in every session.
pub const COLLAB_SYSTEM_PROMPT: &str = "This is a collaborative terminal session shared with \
other users via claude-collab. When serving web content (HTML, static sites, frontend apps), \
ALWAYS use an HTTP server (e.g. npx serve, python3 -m http.server, npx http-server) instead of \
opening files with file:// URLs. The session has a live preview feature that proxies localhost \
ports to all connected users; file:// URLs only work on the local machine and cannot be \
previewed.";

/// Environment passed through to the agent. Everything else is dropped.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TMPDIR",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
    "ANTHROPIC_API_KEY",
];

/// Events delivered from the process threads to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output(String),
    Exit { code: u32, signal: Option<String> },
}

/// The operations a session performs on its terminal process.
pub trait TerminalProcess: Send {
    /// Forward raw input. Ignored once the process is gone.
    fn write(&mut self, data: &str);
    /// Failures (e.g. the process already exited) are swallowed.
    fn resize(&mut self, cols: u16, rows: u16);
    fn scrollback(&self) -> String;
    /// Kill the current process, clear scrollback and spawn a fresh one.
    fn restart(&mut self) -> Result<(), TerminalError>;
    fn destroy(&mut self);
}

// =============================================================================
// COMMAND
// =============================================================================

/// How to launch the agent.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl AgentCommand {
    /// Build the agent invocation for a working directory.
    ///
    /// Bare program names are resolved once through the login shell so shell
    /// functions and PATH entries behave as they would interactively.
    pub fn new(
        program: &str,
        extra_args: &[String],
        append_system_prompt: bool,
        cwd: &Path,
    ) -> Self {
        let mut args = Vec::new();
        if append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(COLLAB_SYSTEM_PROMPT.to_string());
        }
        args.extend(extra_args.iter().cloned());
        Self {
            program: resolve_program(program),
            args,
            cwd: cwd.to_path_buf(),
        }
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.cwd(&self.cwd);

        cmd.env_clear();
        for key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env("TERM", "xterm-256color");
        cmd
    }
}

/// Resolve a bare program name to an absolute path via `command -v`,
/// falling back to the name itself.
pub fn resolve_program(program: &str) -> String {
    if Path::new(program).is_absolute() {
        return program.to_string();
    }
    let output = std::process::Command::new("bash")
        .args(["-c", "command -v \"$1\"", "_", program])
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let resolved = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if resolved.starts_with('/') {
                resolved
            } else {
                program.to_string()
            }
        }
        _ => program.to_string(),
    }
}

// =============================================================================
// WRAPPER
// =============================================================================

#[derive(Default)]
struct Shared {
    generation: u64,
    scrollback: Scrollback,
}

struct Live {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

/// A running agent attached to a pseudo-terminal.
pub struct ProcessWrapper {
    command: AgentCommand,
    events: UnboundedSender<ProcessEvent>,
    shared: Arc<Mutex<Shared>>,
    live: Option<Live>,
}

impl ProcessWrapper {
    /// Spawn the agent at the default 120x40 size.
    pub fn spawn(
        command: AgentCommand,
        events: UnboundedSender<ProcessEvent>,
    ) -> Result<Self, TerminalError> {
        let mut wrapper = Self {
            command,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            live: None,
        };
        wrapper.start()?;
        Ok(wrapper)
    }

    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(&mut self) -> Result<(), TerminalError> {
        let size = PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| TerminalError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair.slave.spawn_command(self.command.to_builder()).map_err(|e| {
            TerminalError::SpawnFailed(format!("failed to spawn '{}': {e}", self.command.program))
        })?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::SpawnFailed(format!("failed to take PTY writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::SpawnFailed(format!("failed to clone PTY reader: {e}")))?;
        let killer = child.clone_killer();

        let generation = self.lock().generation;
        spawn_reader(reader, generation, Arc::clone(&self.shared), self.events.clone())?;
        spawn_waiter(child, generation, Arc::clone(&self.shared), self.events.clone())?;

        tracing::info!(
            program = %self.command.program,
            cwd = %self.command.cwd.display(),
            "agent process started"
        );

        self.live = Some(Live {
            master: pair.master,
            writer,
            killer,
        });
        Ok(())
    }

    fn kill(&mut self) {
        // Bump first so the dying process's threads stop delivering.
        self.lock().generation += 1;
        if let Some(mut live) = self.live.take() {
            if let Err(e) = live.killer.kill() {
                tracing::debug!("agent kill failed (already exited?): {e}");
            }
        }
    }
}

impl TerminalProcess for ProcessWrapper {
    fn write(&mut self, data: &str) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let result = live
            .writer
            .write_all(data.as_bytes())
            .and_then(|_| live.writer.flush());
        if let Err(e) = result {
            tracing::debug!("PTY write failed: {e}");
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let Some(live) = self.live.as_ref() else {
            return;
        };
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        if let Err(e) = live.master.resize(size) {
            tracing::debug!("PTY resize failed: {e}");
        }
    }

    fn scrollback(&self) -> String {
        self.lock().scrollback.as_str().to_string()
    }

    fn restart(&mut self) -> Result<(), TerminalError> {
        self.kill();
        self.lock().scrollback.clear();
        self.start()
    }

    fn destroy(&mut self) {
        self.kill();
    }
}

impl Drop for ProcessWrapper {
    fn drop(&mut self) {
        self.kill();
    }
}

// =============================================================================
// BACKGROUND THREADS
// =============================================================================

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    generation: u64,
    shared: Arc<Mutex<Shared>>,
    events: UnboundedSender<ProcessEvent>,
) -> Result<(), TerminalError> {
    thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || pump_output(&mut reader, generation, &shared, &events))?;
    Ok(())
}

/// Read until EOF, feeding scrollback and the event channel. Stops early
/// once the process has been replaced or nobody is listening.
fn pump_output(
    reader: &mut dyn Read,
    generation: u64,
    shared: &Mutex<Shared>,
    events: &UnboundedSender<ProcessEvent>,
) {
    let mut buf = [0u8; PTY_READ_CHUNK];
    let mut decoder = Utf8Decoder::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && !publish(text, generation, shared, events) {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!("PTY reader error: {e}");
                break;
            }
        }
    }
    // A sequence cut off by EOF still reaches the clients as U+FFFD.
    if decoder.has_pending() {
        publish(decoder.finish(), generation, shared, events);
    }
}

fn publish(
    text: String,
    generation: u64,
    shared: &Mutex<Shared>,
    events: &UnboundedSender<ProcessEvent>,
) -> bool {
    let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
    if guard.generation != generation {
        return false;
    }
    guard.scrollback.push(&text);
    // Sent under the lock so scrollback and event order agree.
    events.send(ProcessEvent::Output(text)).is_ok()
}

fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    generation: u64,
    shared: Arc<Mutex<Shared>>,
    events: UnboundedSender<ProcessEvent>,
) -> Result<(), TerminalError> {
    thread::Builder::new()
        .name("pty-waiter".to_string())
        .spawn(move || {
            let (code, signal) = match child.wait() {
                Ok(status) => (status.exit_code(), status.signal().map(str::to_string)),
                Err(e) => {
                    tracing::debug!("agent wait failed: {e}");
                    (1, None)
                }
            };
            let guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            if guard.generation == generation {
                tracing::info!(code, signal = ?signal, "agent process exited");
                let _ = events.send(ProcessEvent::Exit { code, signal });
            }
        })?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
