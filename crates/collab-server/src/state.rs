//! Application state shared by every handler.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use collab_common::{CollabError, KeyedRateWindows, RateWindow};
use collab_config::{CollabConfig, LimitsConfig};
use collab_session::SessionRegistry;

/// Server-wide admission counters behind one coarse lock.
pub struct Admission {
    inner: Mutex<Counters>,
    create_limit: usize,
}

struct Counters {
    create: RateWindow,
    connections: KeyedRateWindows<IpAddr>,
}

impl Admission {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            inner: Mutex::new(Counters {
                create: RateWindow::per_minute(limits.create_per_minute),
                connections: KeyedRateWindows::per_minute(limits.connections_per_minute),
            }),
            create_limit: limits.create_per_minute,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn allow_create(&self) -> bool {
        self.lock().create.try_acquire()
    }

    pub fn allow_connection(&self, peer: IpAddr) -> bool {
        self.lock().connections.try_acquire(&peer)
    }

    pub fn create_limit(&self) -> usize {
        self.create_limit
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub admission: Arc<Admission>,
    /// Client for preview upstreams; never follows redirects.
    pub http: reqwest::Client,
    pub upstream_host: Arc<str>,
    pub public_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(config: &CollabConfig, registry: SessionRegistry) -> Result<Self, CollabError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.preview.request_timeout_secs))
            .build()
            .map_err(|e| CollabError::Network(e.to_string()))?;
        Ok(Self {
            registry,
            admission: Arc::new(Admission::new(&config.limits)),
            http,
            upstream_host: Arc::from(config.preview.upstream_host.as_str()),
            public_dir: config.server.public_dir.as_ref().map(PathBuf::from),
        })
    }
}
