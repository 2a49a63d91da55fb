//! Session chat history, persisted as `chat.json` next to the session.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use collab_common::now_millis;
use serde::{Deserialize, Serialize};

/// Messages retained per session; the oldest are evicted first.
pub const MAX_CHAT_HISTORY: usize = 1000;
/// Longest chat message accepted, in characters.
pub const MAX_CHAT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub text: String,
    pub ts: i64,
}

#[derive(Debug)]
pub struct ChatLog {
    path: PathBuf,
    messages: VecDeque<ChatMessage>,
}

impl ChatLog {
    /// Open the log at `path`, loading any saved history.
    ///
    /// A missing or unreadable file starts an empty log.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut messages: VecDeque<ChatMessage> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<ChatMessage>>(&raw).ok())
            .map(VecDeque::from)
            .unwrap_or_default();
        while messages.len() > MAX_CHAT_HISTORY {
            messages.pop_front();
        }
        Self { path, messages }
    }

    /// Append a message stamped with the current time and persist the log.
    pub fn append(&mut self, name: &str, text: &str) -> ChatMessage {
        let msg = ChatMessage {
            name: name.to_string(),
            text: text.to_string(),
            ts: now_millis(),
        };
        self.messages.push_back(msg.clone());
        if self.messages.len() > MAX_CHAT_HISTORY {
            self.messages.pop_front();
        }
        self.save();
        msg
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the log to disk. Failures are logged and otherwise ignored.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            tracing::warn!(path = %self.path.display(), "failed to save chat history: {e}");
        }
    }

    fn try_save(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.messages)?;
        std::fs::write(&self.path, json)
    }
}

/// Validate a chat message body: non-blank and at most [`MAX_CHAT_CHARS`].
pub fn is_valid_chat_text(text: &str) -> bool {
    !text.trim().is_empty() && text.chars().count() <= MAX_CHAT_CHARS
}
