// =============================================================================
// WebSocket Handler — per-user trigger/hotlist feed
// =============================================================================
//
// Clients connect to `/scanner/ws?token=<token>` and are subscribed to their
// personal `user_{id}` broadcast group (src/ws_groups.rs). On connect they
// receive a `{"type":"hello","user_id":...}` envelope; afterwards every
// `ScannerWsMessage` published to their group (trigger events, HOT-5
// snapshots) is forwarded as a JSON text frame. Unlike the teacher's
// push-on-interval dashboard feed, delivery here is purely event-driven —
// there is no periodic re-send of state the client already has.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::resolve_ws_token;
use crate::app_state::AppState;
use crate::types::ScannerWsMessage;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    let identity = match resolve_ws_token(&state, &token).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket connection rejected: invalid token");
            return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
        }
    };

    info!(user_id = identity.user_id, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, identity.user_id))
        .into_response()
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, user_id: i64) {
    let mut rx = state.ws_groups.subscribe(user_id);
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = send_json(&mut sender, &ScannerWsMessage::Hello { user_id }).await {
        debug!(error = %e, "failed to send hello frame — disconnecting");
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(payload) => {
                        if let Err(e) = send_json(&mut sender, &payload).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(user_id, skipped, "WebSocket receiver lagged — some messages dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(user_id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text/Binary/Pong from the client carry no meaning for this feed.
                    }
                    Some(Err(e)) => {
                        warn!(user_id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(user_id, "WebSocket connection closed");
}

async fn send_json<S>(sender: &mut S, msg: &ScannerWsMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize websocket message");
            Ok(())
        }
    }
}
