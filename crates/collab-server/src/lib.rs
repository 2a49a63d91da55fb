//! claude-collab HTTP surface: session API, WebSocket attach, preview proxy
//! and static pages.

pub mod api;
pub mod connection;
pub mod error;
pub mod proxy;
pub mod state;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub use state::{Admission, AppState};

/// Build the full router. The caller serves it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so WebSocket
/// admission can see the peer address.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(
            "/api/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(api::get_session).delete(api::end_session),
        )
        .route("/api/sessions/:id/restart", post(api::restart_session))
        .route("/ws/:id", get(connection::ws_handler))
        .route("/preview/:id", any(proxy::preview_redirect))
        .route("/preview/:id/", any(proxy::preview_root))
        .route("/preview/:id/*rest", any(proxy::preview_path));

    if let Some(dir) = &state.public_dir {
        router = router
            .route_service("/s/:id", ServeFile::new(dir.join("session.html")))
            .fallback_service(ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
