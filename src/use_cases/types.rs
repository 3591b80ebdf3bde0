// Shared types for the broker/lobby message-passing boundary.

use crate::domain::{Level, User};
use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub type ClientId = u64;
pub type LobbyId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    Any,
    Ss,
}

impl ScoringMode {
    pub fn accepts(self, score: crate::domain::Score) -> bool {
        match self {
            ScoringMode::Any => true,
            ScoringMode::Ss => score.is_ss(),
        }
    }
}

#[derive(Debug)]
pub enum CreateLobbyError {
    AtCapacity,
}

#[derive(Debug)]
pub enum JoinError {
    LobbyNotFound,
}

#[derive(Debug)]
pub enum StartRoundError {
    LobbyNotFound,
    WrongPassword,
    LevelNotFound,
    RoundInProgress,
}

#[derive(Debug, Clone)]
pub struct CreatedLobby {
    pub lobby_id: LobbyId,
    pub password: String,
}

/// Channels a connection needs to subscribe to a lobby's state broadcast.
/// Cloneable; every client attached to the same lobby shares one of these.
#[derive(Clone)]
pub struct LobbyHandle {
    pub lobby_id: LobbyId,
    pub cmd_tx: mpsc::Sender<LobbyCommand>,
    pub state_tx: broadcast::Sender<Arc<LobbySnapshot>>,
    pub state_bytes_tx: broadcast::Sender<Utf8Bytes>,
    pub state_latest_tx: watch::Sender<Utf8Bytes>,
}

/// Messages a WebSocket gateway connection or the admin HTTP surface sends
/// into the broker's single command inbox.
#[derive(Debug)]
pub enum BrokerCommand {
    CreateLobby {
        reply: oneshot::Sender<Result<CreatedLobby, CreateLobbyError>>,
    },
    StartRound {
        lobby_id: LobbyId,
        password: String,
        level_id: u32,
        mode: ScoringMode,
        reply: oneshot::Sender<Result<(), StartRoundError>>,
    },
    Join {
        identity: ClientId,
        lobby_id: LobbyId,
        reply: oneshot::Sender<Result<LobbyHandle, JoinError>>,
    },
    Leave {
        identity: ClientId,
    },
    Login {
        identity: ClientId,
        user_id: u32,
    },
    Logout {
        identity: ClientId,
    },
}

/// Messages the broker forwards into a single lobby's own task.
#[derive(Debug)]
pub enum LobbyCommand {
    Join { identity: ClientId },
    Leave { identity: ClientId },
    Login { identity: ClientId, user: User },
    Logout { identity: ClientId },
    StartRound {
        password: String,
        level_id: u32,
        mode: ScoringMode,
        reply: oneshot::Sender<Result<(), StartRoundError>>,
    },
    Event { bytes: Bytes },
}

/// A point-in-time view of one lobby, broadcast after every state-changing
/// transition. Cheap to clone via `Arc` since every attached client shares it.
#[derive(Debug, Clone)]
pub struct LobbySnapshot {
    pub lobby_id: LobbyId,
    pub level: Option<Level>,
    pub warmup_timer: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub break_timer: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub round_timer: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub users: Vec<(u32, String)>,
    pub scores: Vec<ScoreRow>,
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub user_id: u32,
    pub user_name: String,
    pub completion: u8,
    pub finesse: u8,
    pub time_ms: i64,
    pub timestamp: i64,
}
