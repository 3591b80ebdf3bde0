// Admin HTTP surface: a thin translator over the broker's command inbox.
// Durations, thresholds, and everything else timing-related stay owned by
// the lobby engine's own configuration; these handlers only forward the
// fields the wire protocol already defines for `start_round`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::protocol::ModeDto;
use crate::interface_adapters::state::AppState;
use crate::use_cases::types::{BrokerCommand, LobbyId};

pub async fn create_lobby_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state
        .broker_tx
        .send(BrokerCommand::CreateLobby { reply: reply_tx })
        .await
        .is_err()
    {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "broker unavailable");
    }

    match reply_rx.await {
        Ok(Ok(created)) => Redirect::to(&format!(
            "/lobby/{}?admin={}",
            created.lobby_id, created.password
        ))
        .into_response(),
        Ok(Err(err)) => {
            debug!(?err, "create_lobby rejected");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "at capacity")
        }
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "broker unavailable"),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRoundRequest {
    lobby_id: LobbyId,
    password: String,
    level_id: u32,
    mode: ModeDto,
}

pub async fn start_round_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRoundRequest>,
) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state
        .broker_tx
        .send(BrokerCommand::StartRound {
            lobby_id: request.lobby_id,
            password: request.password,
            level_id: request.level_id,
            mode: request.mode.into(),
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "broker unavailable");
    }

    match reply_rx.await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(err)) => {
            debug!(?err, "start_round rejected");
            error_response(StatusCode::BAD_REQUEST, "start_round rejected")
        }
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, "broker unavailable"),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}
