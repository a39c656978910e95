use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use shared_proto::signaling::{
    is_supported_protocol_version, SignalingMessage, PROTOCOL_VERSION,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let ConnectParams { user_id, room_id } = params;
    let conn_id = Uuid::new_v4();

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.register(&user_id, tx);

    tracing::info!(
        component = "relay.ws",
        user_id = %user_id,
        conn_id = %conn_id,
        room_id = room_id.as_deref().unwrap_or(""),
        "peer connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    // A roomId in the connection URL doubles as an immediate join.
    if let Some(room_id) = room_id.as_deref() {
        announce_join(&state, &user_id, room_id);
    }

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_frame(&state, &user_id, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    let left = state.unregister(&user_id);
    tracing::info!(
        component = "relay.ws",
        user_id = %user_id,
        conn_id = %conn_id,
        rooms_left = left.len(),
        "peer disconnected"
    );
    writer.abort();
}

fn announce_join(state: &AppState, user_id: &str, room_id: &str) {
    let others = state.join_room(room_id, user_id);
    let frame = SignalingMessage::UserJoined {
        version: PROTOCOL_VERSION,
        trace_id: None,
        from: user_id.to_string(),
        room_id: room_id.to_string(),
    };
    match serde_json::to_string(&frame) {
        Ok(text) => {
            for member in others {
                state.send_to(&member, &text);
            }
        }
        Err(e) => {
            tracing::warn!(component = "relay.ws", error = %e, "failed to serialize join frame");
        }
    }
}

/// Route one inbound frame. The relay never interprets call state; it
/// forwards by `to` and fans out presence, dropping anything malformed.
fn handle_frame(state: &AppState, user_id: &str, text: &str) {
    let msg = match serde_json::from_str::<SignalingMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(
                component = "relay.ws",
                user_id = %user_id,
                error = %e,
                "dropping malformed frame"
            );
            return;
        }
    };

    if !is_supported_protocol_version(msg.version()) {
        tracing::warn!(
            component = "relay.ws",
            user_id = %user_id,
            version = msg.version(),
            "dropping frame with unsupported protocol version"
        );
        return;
    }

    match &msg {
        SignalingMessage::UserJoined { from, room_id, .. } => {
            if from != user_id {
                tracing::warn!(
                    component = "relay.ws",
                    user_id = %user_id,
                    from = %from,
                    "join announcement for another user, dropping"
                );
                return;
            }
            let others = state.join_room(room_id, user_id);
            for member in others {
                state.send_to(&member, text);
            }
        }
        _ => match msg.recipient() {
            Some(to) => {
                if !state.send_to(to, text) {
                    tracing::warn!(
                        component = "relay.ws",
                        from = %user_id,
                        to = %to,
                        kind = msg.kind(),
                        "recipient not connected, dropping frame"
                    );
                }
            }
            None => {
                tracing::warn!(
                    component = "relay.ws",
                    from = %user_id,
                    kind = msg.kind(),
                    "frame without a recipient, dropping"
                );
            }
        },
    }
}
