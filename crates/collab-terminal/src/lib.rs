//! Terminal-side building blocks for a shared agent session: the PTY-backed
//! process wrapper, its bounded scrollback, and the scanners that read the
//! agent's output stream (prompt detection, preview links).

pub mod ansi;
pub mod links;
pub mod prompt;
pub mod pty;
pub mod scrollback;
pub mod utf8;

pub use ansi::{strip_ansi, strip_control};
pub use links::{detect_port, mentions_file_url};
pub use prompt::{PromptDetector, PromptKind, PromptOption, PromptState};
pub use pty::{
    AgentCommand, ProcessEvent, ProcessWrapper, TerminalProcess, DEFAULT_COLS, DEFAULT_ROWS,
};
pub use scrollback::{Scrollback, MAX_SCROLLBACK_BYTES};
pub use utf8::Utf8Decoder;
