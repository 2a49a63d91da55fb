//! WebSocket wire protocol between participants and a session.
//!
//! Every frame is a JSON object tagged by `type`. Inbound frames that fail to
//! parse are dropped without a reply.

use std::sync::Arc;

use collab_common::ClientId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use crate::chat::ChatMessage;

/// Messages sent from a participant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    TerminalInput {
        data: String,
    },
    Resize {
        cols: u32,
        rows: u32,
    },
    ChatMessage {
        text: String,
    },
    SetName {
        name: String,
    },
    /// `null` clears the preview.
    SetPreviewPort {
        #[serde(default)]
        port: Option<f64>,
    },
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Messages sent to participants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    SessionInfo {
        repo: String,
    },
    TerminalOutput {
        data: String,
    },
    ChatHistory {
        messages: Vec<ChatMessage>,
    },
    ChatMessage(ChatMessage),
    UsersUpdate {
        users: Vec<String>,
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    TerminalSubmission {
        name: String,
        text: String,
        ts: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_question: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected_option: Option<String>,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    PreviewPortUpdate {
        port: Option<u16>,
    },
    PreviewHint {
        message: String,
    },
    SessionEnded,
}

impl ServerMessage {
    /// Serialize once for fan-out to every connection.
    pub fn to_frame(&self) -> Arc<str> {
        match serde_json::to_string(self) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!("failed to serialize server message: {e}");
                Arc::from("{}")
            }
        }
    }
}

/// What a connection task is asked to do with its socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Arc<str>),
    Close { code: u16, reason: String },
}

/// Frames a connection may have queued before it counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 256;

/// The session's end of one participant connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub tx: Sender<Outbound>,
}

impl ClientHandle {
    /// A handle plus the receiver its connection task drains.
    pub fn channel(id: ClientId) -> (Self, Receiver<Outbound>) {
        Self::with_capacity(id, OUTBOUND_CAPACITY)
    }

    pub fn with_capacity(id: ClientId, capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id, tx }, rx)
    }

    /// Queue a frame. False when the connection is gone or has stopped
    /// draining its queue.
    pub fn send(&self, frame: Arc<str>) -> bool {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the connection to close. A full queue is left to drain; dropping
    /// the handle ends the connection once it does.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}
