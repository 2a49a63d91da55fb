//! Per-connection WebSocket handler: admit, attach to the session, then pump
//! frames both ways until either side goes away.

use std::net::SocketAddr;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use collab_common::SessionId;
use collab_session::{ClientHandle, ClientMessage, Outbound, SessionHandle, CLOSE_NORMAL};
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

/// `GET /ws/:id`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.admission.allow_connection(addr.ip()) {
        tracing::warn!(peer = %addr, "connection rate limited");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections").into_response();
    }
    if SessionId::parse(&id).is_none() {
        return (StatusCode::BAD_REQUEST, "Invalid session id").into_response();
    }
    let handle = match state.registry.get_internal(&id).await {
        Some(handle) if handle.is_active() => handle,
        _ => return (StatusCode::NOT_FOUND, "Session not found").into_response(),
    };

    let client_id = state.registry.next_client_id();
    ws.on_upgrade(move |socket| handle_socket(socket, addr, handle, client_id))
}

async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    handle: SessionHandle,
    client_id: collab_common::ClientId,
) {
    let (mut sink, mut stream) = socket.split();
    let (client, mut rx) = ClientHandle::channel(client_id);

    if !handle.connect(client) {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_NORMAL,
                reason: "Session ended".into(),
            })))
            .await;
        return;
    }

    let session = handle.id().short().to_string();
    tracing::info!(peer = %addr, session = %session, client = %client_id, "client connected");

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                    break;
                }
                None => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                    Some(msg) => handle.deliver(client_id, msg),
                    None => tracing::debug!(peer = %addr, "ignoring malformed message"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(peer = %addr, error = %e, "WS error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    handle.disconnect(client_id);
    tracing::info!(peer = %addr, session = %session, client = %client_id, "client disconnected");
}
