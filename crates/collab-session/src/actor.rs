//! Per-session actor: the single owner of a session's mutable state.
//!
//! All connection traffic, process output, idle timers and registry commands
//! arrive on one queue and are handled in order, so fan-out, viewport
//! negotiation and prompt tracking never race. Metadata other tasks need is
//! published through a `watch` channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use collab_common::{now_millis, ClientId, RateWindow, SessionError, SessionId};
use collab_terminal::{
    detect_port, mentions_file_url, strip_ansi, strip_control, ProcessEvent, PromptDetector,
    PromptState, TerminalProcess,
};
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::chat::{is_valid_chat_text, ChatLog};
use crate::protocol::{ClientHandle, ClientMessage, ServerMessage};
use crate::settings::SessionSettings;
use crate::users::UserTable;
use crate::viewport::{effective_size, ViewportSize};

/// WebSocket close code sent when a session ends.
pub const CLOSE_NORMAL: u16 = 1000;

const PREVIEW_HINT: &str = "The agent opened a file:// URL, which only works on the host \
machine. Ask it to serve the page with an HTTP server (e.g. npx serve) and the preview will \
pick it up for everyone.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// Session state visible outside the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub status: SessionStatus,
    pub ended_at: Option<i64>,
    pub client_count: usize,
    pub preview_port: Option<u16>,
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            status: SessionStatus::Active,
            ended_at: None,
            client_count: 0,
            preview_port: None,
        }
    }
}

/// Everything a session actor reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Connect(ClientHandle),
    Disconnect(ClientId),
    Client { id: ClientId, msg: ClientMessage },
    IdleTimeout { generation: u64 },
    SetPreviewPort { port: Option<u16>, reply: oneshot::Sender<bool> },
    Restart { reply: oneshot::Sender<Result<(), SessionError>> },
    End { reply: Option<oneshot::Sender<()>> },
}

/// Accept a preview port only when it is a whole number in 1024..=65535.
pub fn preview_port_from(raw: f64) -> Option<u16> {
    if !raw.is_finite() || raw.fract() != 0.0 || !(1024.0..=65535.0).contains(&raw) {
        return None;
    }
    Some(raw as u16)
}

struct ClientRecord {
    handle: ClientHandle,
    input: String,
    size: Option<ViewportSize>,
    chat_window: RateWindow,
}

#[derive(Default)]
struct IdleTimer {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

pub(crate) struct SessionActor {
    id: SessionId,
    repo: String,
    settings: Arc<SessionSettings>,
    process: Box<dyn TerminalProcess>,
    chat: ChatLog,
    users: UserTable,
    clients: BTreeMap<ClientId, ClientRecord>,
    prompt: PromptDetector,
    file_url_warned: bool,
    idle: IdleTimer,
    meta: watch::Sender<SessionMeta>,
    self_tx: WeakUnboundedSender<SessionEvent>,
}

impl SessionActor {
    pub(crate) fn new(
        id: SessionId,
        repo: String,
        settings: Arc<SessionSettings>,
        process: Box<dyn TerminalProcess>,
        chat: ChatLog,
        meta: watch::Sender<SessionMeta>,
        self_tx: WeakUnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            repo,
            settings,
            process,
            chat,
            users: UserTable::new(),
            clients: BTreeMap::new(),
            prompt: PromptDetector::new(),
            file_url_warned: false,
            idle: IdleTimer::default(),
            meta,
            self_tx,
        }
    }

    /// Run until the session ends.
    pub(crate) async fn run(
        mut self,
        mut events: UnboundedReceiver<SessionEvent>,
        mut process_events: UnboundedReceiver<ProcessEvent>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Some(event) = process_events.recv() => self.handle_process_event(event),
                else => break,
            }
        }
        tracing::debug!(session = %self.id.short(), "session actor stopped");
    }

    fn is_active(&self) -> bool {
        self.meta.borrow().status == SessionStatus::Active
    }

    /// Returns true once the session has ended.
    fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Connect(handle) => self.on_connect(handle),
            SessionEvent::Disconnect(id) => self.on_disconnect(id),
            SessionEvent::Client { id, msg } => self.on_client_message(id, msg),
            SessionEvent::IdleTimeout { generation } => {
                if generation == self.idle.generation && self.clients.is_empty() {
                    if let Some(timeout) = self.settings.idle_timeout {
                        tracing::info!(
                            session = %self.id.short(),
                            "session idle for {}min, ending",
                            timeout.as_secs() / 60
                        );
                    }
                    self.end();
                }
            }
            SessionEvent::SetPreviewPort { port, reply } => {
                let _ = reply.send(self.set_preview_port(port));
            }
            SessionEvent::Restart { reply } => {
                let _ = reply.send(self.restart());
            }
            SessionEvent::End { reply } => {
                self.end();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
        }
        !self.is_active()
    }

    // =========================================================================
    // PROCESS OUTPUT
    // =========================================================================

    fn handle_process_event(&mut self, event: ProcessEvent) {
        if !self.is_active() {
            return;
        }
        match event {
            ProcessEvent::Output(data) => self.on_output(data),
            ProcessEvent::Exit { code, signal } => {
                let reason = match signal {
                    Some(signal) => format!("signal {signal}"),
                    None => format!("exit code {code}"),
                };
                tracing::info!(session = %self.id.short(), "agent process exited ({reason})");
                self.broadcast(&ServerMessage::TerminalOutput {
                    data: format!(
                        "\r\n\r\n[Claude process exited ({reason}). End this session and start a new one.]\r\n"
                    ),
                });
            }
        }
    }

    fn on_output(&mut self, data: String) {
        self.prompt.feed(&data);

        if self.meta.borrow().preview_port.is_none() {
            if let Some(port) = detect_port(&data, self.settings.server_port) {
                tracing::info!(
                    session = %self.id.short(),
                    port,
                    "detected local server, enabling preview"
                );
                self.set_preview_port(Some(port));
            }
        }

        let warn_file_url = !self.file_url_warned && mentions_file_url(&data);

        self.broadcast(&ServerMessage::TerminalOutput { data });

        if warn_file_url {
            self.file_url_warned = true;
            self.broadcast(&ServerMessage::PreviewHint {
                message: PREVIEW_HINT.to_string(),
            });
        }
    }

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    fn on_connect(&mut self, handle: ClientHandle) {
        if !self.is_active() {
            handle.close(CLOSE_NORMAL, "Session ended");
            return;
        }
        self.cancel_idle_timer();

        let id = handle.id;
        let name = self.users.add(id).name.clone();
        tracing::info!(session = %self.id.short(), client = %id, %name, "client connected");

        // Catch-up, identical on every (re)connection.
        handle.send(
            ServerMessage::SessionInfo {
                repo: self.repo.clone(),
            }
            .to_frame(),
        );
        let scrollback = self.process.scrollback();
        if !scrollback.is_empty() {
            handle.send(ServerMessage::TerminalOutput { data: scrollback }.to_frame());
        }
        handle.send(
            ServerMessage::ChatHistory {
                messages: self.chat.messages(),
            }
            .to_frame(),
        );
        let preview_port = self.meta.borrow().preview_port;
        if let Some(port) = preview_port {
            handle.send(ServerMessage::PreviewPortUpdate { port: Some(port) }.to_frame());
        }

        self.clients.insert(
            id,
            ClientRecord {
                handle,
                input: String::new(),
                size: None,
                chat_window: RateWindow::per_minute(self.settings.chat_per_minute),
            },
        );
        self.publish_client_count();
        self.broadcast_users();
    }

    fn on_disconnect(&mut self, id: ClientId) {
        if self.clients.remove(&id).is_none() {
            return;
        }
        self.users.remove(id);
        self.publish_client_count();
        tracing::info!(session = %self.id.short(), client = %id, "client disconnected");

        if !self.is_active() {
            return;
        }
        self.broadcast_users();

        if self.clients.values().any(|c| c.size.is_some()) {
            self.apply_viewport();
        }

        if self.clients.is_empty() {
            if let Some(timeout) = self.settings.idle_timeout {
                self.schedule_idle_timer(timeout);
            }
        }
    }

    // =========================================================================
    // CLIENT MESSAGES
    // =========================================================================

    fn on_client_message(&mut self, id: ClientId, msg: ClientMessage) {
        if !self.is_active() || !self.clients.contains_key(&id) {
            return;
        }
        match msg {
            ClientMessage::TerminalInput { data } => self.on_terminal_input(id, &data),
            ClientMessage::Resize { cols, rows } => {
                let Some(size) = ViewportSize::from_report(cols, rows) else {
                    return;
                };
                if let Some(record) = self.clients.get_mut(&id) {
                    record.size = Some(size);
                }
                self.apply_viewport();
            }
            ClientMessage::ChatMessage { text } => self.on_chat(id, text),
            ClientMessage::SetName { name } => {
                if self.users.set_name(id, &name) {
                    self.broadcast_users();
                }
            }
            ClientMessage::SetPreviewPort { port } => {
                let port = match port {
                    None => None,
                    Some(raw) => match preview_port_from(raw) {
                        Some(port) => Some(port),
                        None => return,
                    },
                };
                self.set_preview_port(port);
            }
        }
    }

    fn on_terminal_input(&mut self, id: ClientId, data: &str) {
        if data.len() > self.settings.max_input_bytes {
            return;
        }
        self.process.write(data);

        for ch in data.chars() {
            match ch {
                '\r' | '\n' => self.flush_input(id, None),
                '\x7f' | '\x08' => {
                    if let Some(record) = self.clients.get_mut(&id) {
                        record.input.pop();
                    }
                }
                _ => {
                    let Some(record) = self.clients.get_mut(&id) else {
                        return;
                    };
                    record.input.push(ch);
                    if record.input.chars().nth(1).is_some() {
                        continue;
                    }
                    let answer = self
                        .prompt
                        .active()
                        .filter(|prompt| prompt.is_single_key_answer(ch))
                        .cloned();
                    if let Some(prompt) = answer {
                        self.flush_input(id, Some(prompt));
                    }
                }
            }
        }
    }

    /// Turn a connection's buffered keystrokes into a submission.
    fn flush_input(&mut self, id: ClientId, prompt: Option<PromptState>) {
        let Some(record) = self.clients.get_mut(&id) else {
            return;
        };
        let raw = std::mem::take(&mut record.input);
        let text = strip_control(&strip_ansi(&raw)).trim().to_string();
        if text.is_empty() {
            return;
        }

        let prompt = prompt.or_else(|| self.prompt.active().cloned());
        let (prompt_question, selected_option) = match &prompt {
            Some(prompt) => (Some(prompt.question.clone()), prompt.selected_label(&text)),
            None => (None, None),
        };
        if prompt.is_some() {
            self.prompt.clear();
        }

        let name = self.users.name(id).unwrap_or("Unknown").to_string();
        self.broadcast(&ServerMessage::TerminalSubmission {
            name,
            text,
            ts: now_millis(),
            prompt_question,
            selected_option,
        });
    }

    fn on_chat(&mut self, id: ClientId, text: String) {
        if !self.settings.chat_enabled || !is_valid_chat_text(&text) {
            return;
        }
        let Some(record) = self.clients.get_mut(&id) else {
            return;
        };
        if !record.chat_window.try_acquire() {
            tracing::debug!(session = %self.id.short(), client = %id, "chat rate limited");
            return;
        }
        let name = self.users.name(id).unwrap_or("Unknown").to_string();
        let msg = self.chat.append(&name, &text);
        self.broadcast(&ServerMessage::ChatMessage(msg));
    }

    // =========================================================================
    // SHARED STATE
    // =========================================================================

    fn apply_viewport(&mut self) {
        let size = effective_size(self.clients.values().filter_map(|c| c.size));
        self.process.resize(size.cols, size.rows);
        self.broadcast(&ServerMessage::Resize {
            cols: size.cols,
            rows: size.rows,
        });
    }

    fn set_preview_port(&mut self, port: Option<u16>) -> bool {
        if !self.is_active() {
            return false;
        }
        if let Some(port) = port {
            if port < 1024 || port == self.settings.server_port {
                return false;
            }
        }
        self.meta.send_modify(|meta| meta.preview_port = port);
        self.broadcast(&ServerMessage::PreviewPortUpdate { port });
        true
    }

    fn restart(&mut self) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::Ended(self.id.to_string()));
        }
        tracing::info!(session = %self.id.short(), "restarting agent process");
        self.prompt.reset();
        self.process.restart()?;
        for record in self.clients.values_mut() {
            record.input.clear();
        }
        let size = effective_size(self.clients.values().filter_map(|c| c.size));
        self.process.resize(size.cols, size.rows);
        self.broadcast(&ServerMessage::TerminalOutput {
            data: "\r\n\r\n[Claude process restarted.]\r\n".to_string(),
        });
        Ok(())
    }

    /// End the session. Idempotent.
    fn end(&mut self) {
        if !self.is_active() {
            return;
        }
        self.meta.send_modify(|meta| {
            meta.status = SessionStatus::Ended;
            meta.ended_at = Some(now_millis());
        });
        tracing::info!(session = %self.id.short(), "session ended");

        // Participants hear about it before anything is torn down.
        self.broadcast(&ServerMessage::SessionEnded);
        self.process.destroy();
        self.chat.save();
        self.cancel_idle_timer();
        for record in self.clients.values() {
            record.handle.close(CLOSE_NORMAL, "Session ended");
        }
        self.clients.clear();
        self.users.clear();
        self.publish_client_count();
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Queue `msg` for every connection. A connection whose queue is full has
    /// stopped reading and is dropped.
    fn broadcast(&mut self, msg: &ServerMessage) {
        if self.clients.is_empty() {
            return;
        }
        let frame = msg.to_frame();
        let stalled: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, record)| !record.handle.send(Arc::clone(&frame)))
            .map(|(id, _)| *id)
            .collect();
        for id in stalled {
            tracing::warn!(session = %self.id.short(), client = %id, "dropping stalled connection");
            self.on_disconnect(id);
        }
    }

    fn broadcast_users(&mut self) {
        let users = self.users.unique_names();
        let count = users.len();
        self.broadcast(&ServerMessage::UsersUpdate { users, count });
    }

    fn publish_client_count(&self) {
        let count = self.clients.len();
        self.meta.send_if_modified(|meta| {
            let changed = meta.client_count != count;
            meta.client_count = count;
            changed
        });
    }

    fn schedule_idle_timer(&mut self, timeout: Duration) {
        self.cancel_idle_timer();
        let generation = self.idle.generation;
        let tx = self.self_tx.clone();
        self.idle.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SessionEvent::IdleTimeout { generation });
            }
        }));
    }

    fn cancel_idle_timer(&mut self) {
        self.idle.generation += 1;
        if let Some(task) = self.idle.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionActor {
    fn drop(&mut self) {
        if let Some(task) = self.idle.task.take() {
            task.abort();
        }
    }
}
