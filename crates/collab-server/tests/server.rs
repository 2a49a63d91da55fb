use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use claude_collab::{build_router, AppState};
use collab_common::{SessionError, TerminalError};
use collab_config::CollabConfig;
use collab_session::{ProcessSpawner, RepoAcquirer, RepoRef, SessionRegistry, SessionSettings};
use collab_terminal::{ProcessEvent, TerminalProcess};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

const REPO: &str = "https://github.com/test/collab";

// =============================================================================
// FAKES
// =============================================================================

#[derive(Clone)]
struct Probe {
    events: UnboundedSender<ProcessEvent>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    fn emit(&self, data: &str) {
        self.events
            .send(ProcessEvent::Output(data.to_string()))
            .unwrap();
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

struct FakeProcess {
    writes: Arc<Mutex<Vec<String>>>,
}

impl TerminalProcess for FakeProcess {
    fn write(&mut self, data: &str) {
        self.writes.lock().unwrap().push(data.to_string());
    }

    fn resize(&mut self, _cols: u16, _rows: u16) {}

    fn scrollback(&self) -> String {
        String::new()
    }

    fn restart(&mut self) -> Result<(), TerminalError> {
        Ok(())
    }

    fn destroy(&mut self) {}
}

#[derive(Default)]
struct FakeSpawner {
    probes: Mutex<Vec<Probe>>,
}

impl FakeSpawner {
    fn last(&self) -> Probe {
        self.probes.lock().unwrap().last().cloned().unwrap()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(
        &self,
        _cwd: &Path,
        events: UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TerminalProcess>, TerminalError> {
        let probe = Probe {
            events,
            writes: Arc::default(),
        };
        let process = FakeProcess {
            writes: Arc::clone(&probe.writes),
        };
        self.probes.lock().unwrap().push(probe);
        Ok(Box::new(process))
    }
}

struct FakeAcquirer;

impl RepoAcquirer for FakeAcquirer {
    fn acquire(&self, repo: &RepoRef, repos_dir: &Path) -> Result<PathBuf, SessionError> {
        let dir = repo.checkout_dir(repos_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

// =============================================================================
// HARNESS
// =============================================================================

struct Harness {
    _dir: TempDir,
    registry: SessionRegistry,
    spawner: Arc<FakeSpawner>,
    app: Router,
}

fn harness_with(configure: impl FnOnce(&mut CollabConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = CollabConfig::default();
    config.sessions.data_dir = dir.path().display().to_string();
    config.preview.upstream_host = "127.0.0.1".into();
    configure(&mut config);

    let settings = SessionSettings::from_config(&config, 4321);
    let spawner = Arc::new(FakeSpawner::default());
    let registry = SessionRegistry::new(settings, Arc::new(FakeAcquirer), spawner.clone());
    let state = AppState::new(&config, registry.clone()).unwrap();
    Harness {
        _dir: dir,
        registry,
        spawner,
        app: build_router(state),
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::delete(uri).body(Body::empty()).unwrap()).await
}

async fn create(app: &Router) -> String {
    let (status, body) = post_json(app, "/api/sessions", json!({ "repo": REPO })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["id"].as_str().unwrap().to_string()
}

/// Serve `app` on an ephemeral port with peer addresses attached.
async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// SESSION API
// =============================================================================

#[tokio::test]
async fn create_returns_projection() {
    let h = harness();
    let (status, body) = post_json(&h.app, "/api/sessions", json!({ "repo": REPO })).await;

    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap();
    assert_eq!(id.len(), 32);
    assert_eq!(body["repo"], "test/collab");
    assert_eq!(body["status"], "active");
    assert_eq!(body["clientCount"], 0);
    assert_eq!(body["url"], format!("/s/{id}"));
    assert!(body["endedAt"].is_null());
    assert!(body.get("workingDir").is_none());
}

#[tokio::test]
async fn create_requires_repo() {
    let h = harness();
    let (status, body) = post_json(&h.app, "/api/sessions", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "repo URL is required");

    let req = Request::post("/api/sessions")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "repo URL is required");
}

#[tokio::test]
async fn create_rejects_bad_repo() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/api/sessions",
        json!({ "repo": "https://gitlab.com/a/b" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Failed to create session. Check the repo URL and try again."
    );
    assert!(h.registry.list().await.is_empty());
}

#[tokio::test]
async fn sixth_creation_in_a_minute_is_rate_limited() {
    let h = harness();
    for _ in 0..5 {
        create(&h.app).await;
    }
    let (status, body) = post_json(&h.app, "/api/sessions", json!({ "repo": REPO })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Rate limited. Max 5 sessions per minute.");
    assert_eq!(h.registry.list().await.len(), 5);
}

#[tokio::test]
async fn capacity_is_reported_as_429() {
    let h = harness_with(|c| c.sessions.max_sessions = 1);
    create(&h.app).await;
    let (status, body) = post_json(&h.app, "/api/sessions", json!({ "repo": REPO })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "maximum sessions (1) reached");
}

#[tokio::test]
async fn list_get_and_unknown() {
    let h = harness();
    let first = create(&h.app).await;
    let second = create(&h.app).await;

    let (status, body) = get_json(&h.app, "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));

    let (status, body) = get_json(&h.app, &format!("/api/sessions/{first}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], first);

    let (status, body) = get_json(&h.app, "/api/sessions/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Session not found");
}

#[tokio::test]
async fn delete_ends_session_and_is_idempotent() {
    let h = harness();
    let id = create(&h.app).await;
    let uri = format!("/api/sessions/{id}");

    let (status, body) = delete(&h.app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let (_, body) = get_json(&h.app, &uri).await;
    assert_eq!(body["status"], "ended");
    assert!(body["endedAt"].is_i64());

    let (status, _) = delete(&h.app, &uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = delete(&h.app, "/api/sessions/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn restart_statuses() {
    let h = harness();
    let id = create(&h.app).await;
    let uri = format!("/api/sessions/{id}/restart");

    let (status, body) = post_json(&h.app, &uri, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    delete(&h.app, &format!("/api/sessions/{id}")).await;
    let (status, _) = post_json(&h.app, &uri, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_json(&h.app, "/api/sessions/unknown/restart", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// STATIC PAGES
// =============================================================================

#[tokio::test]
async fn session_page_served_from_public_dir() {
    let public = TempDir::new().unwrap();
    std::fs::write(public.path().join("session.html"), "<h1>session</h1>").unwrap();
    std::fs::write(public.path().join("index.html"), "<h1>dashboard</h1>").unwrap();
    let dir = public.path().display().to_string();
    let h = harness_with(move |c| c.server.public_dir = Some(dir));

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/s/abc").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"<h1>session</h1>");

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// PREVIEW PROXY
// =============================================================================

async fn upstream() -> u16 {
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                (
                    [
                        ("x-frame-options", "DENY"),
                        ("content-security-policy", "frame-ancestors 'none'"),
                        ("set-cookie", "sid=1"),
                        ("x-upstream", "yes"),
                    ],
                    "hello from preview",
                )
                    .into_response()
            }),
        )
        .route(
            "/echo/*rest",
            axum::routing::any(|req: axum::extract::Request| async move {
                let method = req.method().to_string();
                let uri = req.uri().to_string();
                let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                    .await
                    .unwrap();
                format!("{method} {uri} {}", String::from_utf8_lossy(&body))
            }),
        )
        .route(
            "/moved",
            get(|| async { axum::response::Redirect::temporary("/elsewhere") }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    port
}

async fn raw(app: &Router, req: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(req).await.unwrap()
}

#[tokio::test]
async fn preview_strips_embedding_headers() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    assert!(h.registry.set_preview_port(&id, Some(port)).await);

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers.get("x-frame-options").is_none());
    assert!(headers.get("content-security-policy").is_none());
    assert!(headers.get("set-cookie").is_none());
    assert_eq!(headers["x-upstream"], "yes");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello from preview");
}

#[tokio::test]
async fn preview_forwards_method_path_query_and_body() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    h.registry.set_preview_port(&id, Some(port)).await;

    let response = raw(
        &h.app,
        Request::post(format!("/preview/{id}/echo/a/b?x=1"))
            .body(Body::from("payload"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"POST /echo/a/b?x=1 payload");
}

#[tokio::test]
async fn preview_keeps_encoded_path_segments() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    h.registry.set_preview_port(&id, Some(port)).await;

    let response = raw(
        &h.app,
        Request::post(format!("/preview/{id}/echo/a%3Fb%23c%2Fd?x=1"))
            .body(Body::from("p"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"POST /echo/a%3Fb%23c%2Fd?x=1 p");
}

#[tokio::test]
async fn preview_forwards_get_body() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    h.registry.set_preview_port(&id, Some(port)).await;

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/echo/search"))
            .header("content-length", "5")
            .body(Body::from("query"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"GET /echo/search query");
}

#[tokio::test]
async fn preview_relays_redirects() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    h.registry.set_preview_port(&id, Some(port)).await;

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/moved"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()["location"], "/elsewhere");
}

#[tokio::test]
async fn preview_without_port_or_session_is_404() {
    let h = harness();
    let id = create(&h.app).await;

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = raw(
        &h.app,
        Request::get("/preview/unknown/").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preview_of_ended_session_is_404() {
    let h = harness();
    let id = create(&h.app).await;
    let port = upstream().await;
    h.registry.set_preview_port(&id, Some(port)).await;
    h.registry.end(&id).await;

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preview_upstream_down_is_502() {
    let h = harness();
    let id = create(&h.app).await;
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    h.registry.set_preview_port(&id, Some(port)).await;

    let response = raw(
        &h.app,
        Request::get(format!("/preview/{id}/")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn preview_without_trailing_slash_redirects() {
    let h = harness();
    let response = raw(
        &h.app,
        Request::get("/preview/abc").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()["location"], "/preview/abc/");
}

// =============================================================================
// WEBSOCKET
// =============================================================================

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn next_of(ws: &mut Ws, kind: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended while waiting for {kind}: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

async fn send_msg(ws: &mut Ws, msg: Value) {
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn websocket_round_trip() {
    let h = harness();
    let id = create(&h.app).await;
    let addr = serve(h.app.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{id}"))
        .await
        .unwrap();

    let info = next_of(&mut ws, "session-info").await;
    assert_eq!(info["repo"], "test/collab");
    let users = next_of(&mut ws, "users-update").await;
    assert_eq!(users["count"], 1);

    send_msg(&mut ws, json!({ "type": "terminal-input", "data": "ls\r" })).await;
    let probe = h.spawner.last();
    eventually(|| probe.writes().concat() == "ls\r").await;

    let submission = next_of(&mut ws, "terminal-submission").await;
    assert_eq!(submission["text"], "ls");
    assert_eq!(submission["name"], "User 1");

    probe.emit("total 0\r\n");
    let output = next_of(&mut ws, "terminal-output").await;
    assert_eq!(output["data"], "total 0\r\n");
}

#[tokio::test]
async fn websocket_ignores_malformed_messages() {
    let h = harness();
    let id = create(&h.app).await;
    let addr = serve(h.app.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{id}"))
        .await
        .unwrap();
    next_of(&mut ws, "users-update").await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    send_msg(&mut ws, json!({ "type": "unknown-thing" })).await;
    send_msg(&mut ws, json!({ "type": "chat-message", "text": "still here" })).await;

    let chat = next_of(&mut ws, "chat-message").await;
    assert_eq!(chat["text"], "still here");
}

#[tokio::test]
async fn websocket_closed_when_session_ends() {
    let h = harness();
    let id = create(&h.app).await;
    let addr = serve(h.app.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{id}"))
        .await
        .unwrap();
    next_of(&mut ws, "users-update").await;

    let registry = h.registry.clone();
    let end_id = id.clone();
    tokio::spawn(async move { registry.end(&end_id).await });

    next_of(&mut ws, "session-ended").await;
    let close = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(u16::from(close.unwrap().code), 1000);
}

#[tokio::test]
async fn websocket_rejects_unknown_and_malformed_ids() {
    let h = harness();
    let addr = serve(h.app.clone()).await;

    let unknown = "0".repeat(32);
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{unknown}"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404)
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/NOT-HEX"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400)
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn websocket_connections_rate_limited_per_address() {
    let h = harness_with(|c| c.limits.connections_per_minute = 2);
    let id = create(&h.app).await;
    let addr = serve(h.app.clone()).await;
    let url = format!("ws://{addr}/ws/{id}");

    let (_a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (_b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let err = tokio_tungstenite::connect_async(url.as_str())
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 429)
        }
        other => panic!("unexpected error {other:?}"),
    }
}
