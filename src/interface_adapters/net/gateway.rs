// WebSocket gateway: one connection task per client, shuttling between the
// socket and the broker's command inbox.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, warn};

use crate::interface_adapters::protocol::{ClientMessage, ServerMessage};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::identity::next_client_id;
use crate::use_cases::types::{BrokerCommand, ClientId, LobbyHandle, LobbySnapshot};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    lobby: Option<u64>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Some(lobby_id) = query.lobby else {
        return (axum::http::StatusCode::BAD_REQUEST, "missing ?lobby=<id>").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, lobby_id, state))
}

async fn handle_socket(socket: WebSocket, lobby_id: u64, state: Arc<AppState>) {
    let identity: ClientId = next_client_id();

    let (reply_tx, reply_rx) = oneshot::channel();
    let joined = state
        .broker_tx
        .send(BrokerCommand::Join {
            identity,
            lobby_id,
            reply: reply_tx,
        })
        .await;
    if joined.is_err() {
        debug!(identity, "broker unavailable at connect time");
        return;
    }

    let handle = match reply_rx.await {
        Ok(Ok(handle)) => handle,
        _ => {
            debug!(identity, lobby_id, "join rejected, closing socket");
            return;
        }
    };

    run_client_loop(socket, identity, state, handle).await;

    let _ = state.broker_tx.send(BrokerCommand::Leave { identity }).await;
}

async fn run_client_loop(
    socket: WebSocket,
    identity: ClientId,
    state: Arc<AppState>,
    handle: LobbyHandle,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut state_rx = handle.state_tx.subscribe();
    let mut state_bytes_rx = handle.state_bytes_tx.subscribe();
    let mut state_latest_rx = handle.state_latest_tx.subscribe();
    let _ = state_latest_rx.borrow_and_update();

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_incoming_text(&text, identity, &state, &mut ws_tx).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(identity, error = %err, "websocket read error");
                        break;
                    }
                }
            }
            snapshot = state_bytes_rx.recv() => {
                match snapshot {
                    Ok(bytes) => {
                        if forward_bytes(&mut ws_tx, bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Fell behind; recover via the latest-snapshot watch channel.
                        let latest = state_latest_rx.borrow_and_update().clone();
                        if !latest.is_empty() && forward_bytes(&mut ws_tx, latest).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // state_rx is kept subscribed for the lifetime of the loop so the
    // broadcast channel never reports zero receivers while we're connected.
    drop(state_rx);
}

async fn handle_incoming_text(
    text: &Utf8Bytes,
    identity: ClientId,
    state: &AppState,
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let Ok(msg) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
        warn!(identity, "dropping unparseable client message");
        return Ok(());
    };

    match msg {
        ClientMessage::Ping {} => {
            let pong = serde_json::to_string(&ServerMessage::Pong {}).unwrap_or_default();
            send_message(ws_tx, pong).await
        }
        ClientMessage::CreateLobby {} => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let _ = state
                .broker_tx
                .send(BrokerCommand::CreateLobby { reply: reply_tx })
                .await;
            match reply_rx.await {
                Ok(Ok(created)) => {
                    let msg = ServerMessage::CreatedLobby {
                        lobby_id: created.lobby_id,
                        password: created.password,
                    };
                    let text = serde_json::to_string(&msg).unwrap_or_default();
                    send_message(ws_tx, text).await
                }
                _ => {
                    let text = serde_json::to_string(&ServerMessage::Error {}).unwrap_or_default();
                    send_message(ws_tx, text).await
                }
            }
        }
        ClientMessage::StartRound {
            lobby_id,
            password,
            level_id,
            mode,
        } => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let _ = state
                .broker_tx
                .send(BrokerCommand::StartRound {
                    lobby_id,
                    password,
                    level_id,
                    mode: mode.into(),
                    reply: reply_tx,
                })
                .await;
            if let Ok(Err(err)) = reply_rx.await {
                debug!(identity, ?err, "start_round rejected");
            }
            Ok(())
        }
        ClientMessage::Join { lobby_id } => {
            // A connection joins exactly once at connect time; a second
            // join for the same identity is a protocol violation, logged
            // and dropped without a reply.
            warn!(identity, lobby_id, "duplicate join ignored");
            Ok(())
        }
        ClientMessage::Leave {} => {
            let _ = state.broker_tx.send(BrokerCommand::Leave { identity }).await;
            Ok(())
        }
        ClientMessage::Login { user_id } => {
            let _ = state
                .broker_tx
                .send(BrokerCommand::Login { identity, user_id })
                .await;
            Ok(())
        }
        ClientMessage::Logout {} => {
            let _ = state.broker_tx.send(BrokerCommand::Logout { identity }).await;
            Ok(())
        }
    }
}

async fn send_message(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    text: String,
) -> Result<(), ()> {
    ws_tx
        .send(Message::Text(Utf8Bytes::from(text)))
        .await
        .map_err(|_| ())
}

async fn forward_bytes(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    bytes: Utf8Bytes,
) -> Result<(), ()> {
    ws_tx.send(Message::Text(bytes)).await.map_err(|_| ())
}

/// Spawned once per lobby: re-serializes every `LobbySnapshot` broadcast
/// into wire JSON, through a two-stage fan-out (broadcast -> text
/// broadcast -> latest-value watch) so a lagging client can resync from
/// the watch channel instead of disconnecting.
pub fn spawn_state_serializer(
    mut state_rx: broadcast::Receiver<Arc<LobbySnapshot>>,
    state_bytes_tx: broadcast::Sender<Utf8Bytes>,
    state_latest_tx: watch::Sender<Utf8Bytes>,
) {
    tokio::spawn(async move {
        loop {
            match state_rx.recv().await {
                Ok(snapshot) => {
                    let message = ServerMessage::from(snapshot);
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    let bytes = Utf8Bytes::from(text);
                    let _ = state_bytes_tx.send(bytes.clone());
                    let _ = state_latest_tx.send(bytes);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
