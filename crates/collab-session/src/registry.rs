//! Session registry: creation, lookup, ending and capacity.
//!
//! The registry owns a handle per session; the session's state lives in its
//! actor task. Handles are cheap to clone and stay in the table after a
//! session ends so its projection can still be listed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use collab_common::{now_millis, ClientId, SessionError, SessionId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

use crate::actor::{SessionActor, SessionEvent, SessionMeta, SessionStatus};
use crate::chat::ChatLog;
use crate::protocol::{ClientHandle, ClientMessage};
use crate::repo::{RepoAcquirer, RepoRef};
use crate::settings::{ProcessSpawner, SessionSettings};

/// Public view of a session. Never exposes the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub repo: String,
    pub status: SessionStatus,
    pub client_count: usize,
    pub created_at: i64,
    pub ended_at: Option<i64>,
    pub url: String,
}

/// Internal handle to a live or ended session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    repo: String,
    created_at: i64,
    working_dir: PathBuf,
    events: mpsc::UnboundedSender<SessionEvent>,
    meta: watch::Receiver<SessionMeta>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn meta(&self) -> SessionMeta {
        self.meta.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.meta.borrow().status == SessionStatus::Active
    }

    pub fn preview_port(&self) -> Option<u16> {
        self.meta.borrow().preview_port
    }

    pub fn info(&self) -> SessionInfo {
        let meta = self.meta();
        SessionInfo {
            id: self.id.to_string(),
            repo: self.repo.clone(),
            status: meta.status,
            client_count: meta.client_count,
            created_at: self.created_at,
            ended_at: meta.ended_at,
            url: format!("/s/{}", self.id),
        }
    }

    /// Attach a connection. Returns false when the session is gone.
    pub fn connect(&self, client: ClientHandle) -> bool {
        self.events.send(SessionEvent::Connect(client)).is_ok()
    }

    pub fn disconnect(&self, id: ClientId) {
        let _ = self.events.send(SessionEvent::Disconnect(id));
    }

    /// Hand a parsed message from a connection to the session.
    pub fn deliver(&self, id: ClientId, msg: ClientMessage) {
        let _ = self.events.send(SessionEvent::Client { id, msg });
    }
}

struct Inner {
    settings: Arc<SessionSettings>,
    acquirer: Arc<dyn RepoAcquirer>,
    spawner: Arc<dyn ProcessSpawner>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Creations that passed the capacity check but are not registered yet.
    pending: AtomicUsize,
    next_client_id: AtomicU64,
}

/// Shared registry of all sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

/// A capacity slot held for an in-flight creation.
struct Reservation {
    inner: Arc<Inner>,
    armed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl SessionRegistry {
    pub fn new(
        settings: SessionSettings,
        acquirer: Arc<dyn RepoAcquirer>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Arc::new(settings),
                acquirer,
                spawner,
                sessions: RwLock::new(HashMap::new()),
                pending: AtomicUsize::new(0),
                next_client_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Allocate an id for a new connection.
    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.inner.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a session for `repo_url` and start its agent.
    pub async fn create(&self, repo_url: &str) -> Result<SessionInfo, SessionError> {
        let repo = RepoRef::parse(repo_url)?;
        let mut reservation = self.reserve().await?;
        let settings = Arc::clone(&self.inner.settings);

        let id = SessionId::new();

        let acquirer = Arc::clone(&self.inner.acquirer);
        let repos_dir = settings.repos_dir();
        let target = repo.clone();
        let working_dir = tokio::task::spawn_blocking(move || acquirer.acquire(&target, &repos_dir))
            .await
            .map_err(|e| SessionError::Acquisition(format!("acquisition task failed: {e}")))??;

        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let spawner = Arc::clone(&self.inner.spawner);
        let cwd = working_dir.clone();
        let process = tokio::task::spawn_blocking(move || spawner.spawn(&cwd, process_tx))
            .await
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))??;

        // Only a session that actually started gets a directory.
        let session_dir = settings.sessions_dir().join(id.as_str());
        tokio::fs::create_dir_all(&session_dir).await?;
        let chat = ChatLog::load(session_dir.join("chat.json"));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (meta_tx, meta_rx) = watch::channel(SessionMeta::default());
        let label = repo.label();
        let actor = SessionActor::new(
            id.clone(),
            label.clone(),
            Arc::clone(&settings),
            process,
            chat,
            meta_tx,
            events_tx.downgrade(),
        );
        tokio::spawn(actor.run(events_rx, process_rx));

        let handle = SessionHandle {
            id: id.clone(),
            repo: label,
            created_at: now_millis(),
            working_dir,
            events: events_tx,
            meta: meta_rx,
        };
        let info = handle.info();

        {
            let mut sessions = self.inner.sessions.write().await;
            sessions.insert(id.to_string(), handle);
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            reservation.armed = false;
        }

        tracing::info!(session = %id.short(), repo = %info.repo, "session created");
        Ok(info)
    }

    async fn reserve(&self) -> Result<Reservation, SessionError> {
        let sessions = self.inner.sessions.write().await;
        let max = self.inner.settings.max_sessions;
        let active = sessions.values().filter(|h| h.is_active()).count();
        if active + self.inner.pending.load(Ordering::SeqCst) >= max {
            return Err(SessionError::Capacity { max });
        }
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation {
            inner: Arc::clone(&self.inner),
            armed: true,
        })
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.inner.sessions.read().await.get(id).map(SessionHandle::info)
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(SessionHandle::info)
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub async fn get_internal(&self, id: &str) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .filter(|h| h.is_active())
            .count()
    }

    /// End a session. Returns false when the id is unknown; ending an ended
    /// session is a no-op.
    pub async fn end(&self, id: &str) -> bool {
        let Some(handle) = self.get_internal(id).await else {
            return false;
        };
        let (reply, done) = oneshot::channel();
        if handle
            .events
            .send(SessionEvent::End { reply: Some(reply) })
            .is_ok()
        {
            let _ = done.await;
        }
        true
    }

    /// Attach a connection to an active session.
    pub async fn add_client(&self, id: &str, client: ClientHandle) -> bool {
        match self.get_internal(id).await {
            Some(handle) if handle.is_active() => handle.connect(client),
            _ => false,
        }
    }

    pub async fn remove_client(&self, id: &str, client: ClientId) {
        if let Some(handle) = self.get_internal(id).await {
            handle.disconnect(client);
        }
    }

    /// Set or clear the preview port. False for unknown or ended sessions and
    /// for ports outside 1024..=65535 or equal to the server's own port.
    pub async fn set_preview_port(&self, id: &str, port: Option<u16>) -> bool {
        let Some(handle) = self.get_internal(id).await else {
            return false;
        };
        let (reply, result) = oneshot::channel();
        if handle
            .events
            .send(SessionEvent::SetPreviewPort { port, reply })
            .is_err()
        {
            return false;
        }
        result.await.unwrap_or(false)
    }

    /// Restart the agent process of an active session.
    pub async fn restart(&self, id: &str) -> Result<(), SessionError> {
        let handle = self
            .get_internal(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let (reply, result) = oneshot::channel();
        handle
            .events
            .send(SessionEvent::Restart { reply })
            .map_err(|_| SessionError::Ended(id.to_string()))?;
        result
            .await
            .map_err(|_| SessionError::Ended(id.to_string()))?
    }

    /// End every active session.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .filter(|h| h.is_active())
            .cloned()
            .collect();
        for handle in handles {
            self.end(handle.id.as_str()).await;
        }
    }
}
