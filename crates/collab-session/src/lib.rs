//! Shared agent sessions.
//!
//! A [`SessionRegistry`] creates sessions from repository references. Each
//! session runs one agent in a pseudo-terminal and an actor task that fans
//! its output out to every connected participant, tracks pending prompts,
//! negotiates the shared viewport and keeps the chat log.

pub mod actor;
pub mod chat;
pub mod protocol;
pub mod registry;
pub mod repo;
pub mod settings;
pub mod users;
pub mod viewport;

pub use actor::{preview_port_from, SessionMeta, SessionStatus, CLOSE_NORMAL};
pub use chat::{ChatLog, ChatMessage, MAX_CHAT_CHARS, MAX_CHAT_HISTORY};
pub use protocol::{ClientHandle, ClientMessage, Outbound, ServerMessage, OUTBOUND_CAPACITY};
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};
pub use repo::{GitAcquirer, RepoAcquirer, RepoRef};
pub use settings::{AgentSpawner, ProcessSpawner, SessionSettings};
pub use users::{sanitize_name, UserTable};
pub use viewport::{effective_size, ViewportSize};
