//! Reverse proxy from `/preview/:id/*path` to the session's preview port.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{self, HeaderMap};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use crate::state::AppState;

/// Response headers that stop the preview from rendering inside the
/// dashboard's frame.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "x-frame-options",
    "content-security-policy",
    "set-cookie",
];

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// `/preview/:id` has no trailing slash, so relative asset paths would
/// resolve one level too high.
pub async fn preview_redirect(Path(id): Path<String>) -> Redirect {
    Redirect::permanent(&format!("/preview/{id}/"))
}

pub async fn preview_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Response {
    forward(state, &id, req).await
}

pub async fn preview_path(
    State(state): State<AppState>,
    Path((id, _rest)): Path<(String, String)>,
    req: Request,
) -> Response {
    forward(state, &id, req).await
}

async fn forward(state: AppState, id: &str, req: Request) -> Response {
    let port = match state.registry.get_internal(id).await {
        Some(handle) if handle.is_active() => handle.preview_port(),
        _ => return (StatusCode::NOT_FOUND, "Session not found").into_response(),
    };
    let Some(port) = port else {
        return (StatusCode::NOT_FOUND, "No preview port set").into_response();
    };

    let rest = raw_subpath(req.uri().path());
    let url = upstream_url(&state.upstream_host, port, rest, req.uri().query());
    let (parts, body) = req.into_parts();
    let forward_body = carries_body(&parts.method, &parts.headers);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let mut upstream = state.http.request(parts.method.clone(), &url).headers(headers);
    if forward_body {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "preview upstream failed");
            return (
                StatusCode::BAD_GATEWAY,
                format!("Preview server not reachable on port {port}"),
            )
                .into_response();
        }
    };

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_response_headers(&mut headers);

    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// The request path below `/preview/<id>/`, still percent-encoded.
fn raw_subpath(path: &str) -> &str {
    path.strip_prefix("/preview/")
        .and_then(|rest| rest.split_once('/'))
        .map_or("", |(_, sub)| sub)
}

/// GET and HEAD only stream a body when the client framed one.
fn carries_body(method: &Method, headers: &HeaderMap) -> bool {
    if *method != Method::GET && *method != Method::HEAD {
        return true;
    }
    headers.contains_key(header::TRANSFER_ENCODING)
        || headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .is_some_and(|len| len > 0)
}

fn upstream_url(host: &str, port: u16, rest: &str, query: Option<&str>) -> String {
    let path = rest.trim_start_matches('/');
    match query {
        Some(q) => format!("http://{host}:{port}/{path}?{q}"),
        None => format!("http://{host}:{port}/{path}"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn strip_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(*name);
    }
}
