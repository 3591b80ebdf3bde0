// Wire protocol DTOs and conversions for the client <-> broker message set.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Level;
use crate::use_cases::types::{LobbyId, LobbySnapshot, ScoringMode};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateLobby {},
    StartRound {
        lobby_id: LobbyId,
        password: String,
        level_id: u32,
        mode: ModeDto,
    },
    Join {
        lobby_id: LobbyId,
    },
    Leave {},
    Login {
        user_id: u32,
    },
    Logout {},
    Ping {},
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeDto {
    Any,
    Ss,
}

impl From<ModeDto> for ScoringMode {
    fn from(mode: ModeDto) -> Self {
        match mode {
            ModeDto::Any => ScoringMode::Any,
            ModeDto::Ss => ScoringMode::Ss,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CreatedLobby { lobby_id: LobbyId, password: String },
    Error {},
    Pong {},
    State(StateDto),
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerDto {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelDto {
    pub name: String,
    pub play: String,
    pub image: String,
    pub atlas: Option<String>,
    pub dustkid: String,
}

impl From<&Level> for LevelDto {
    fn from(level: &Level) -> Self {
        Self {
            name: level.display_name.clone(),
            play: level.install_play_url(),
            image: level.image_url(),
            atlas: level.atlas_url(),
            dustkid: level.dustkid_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreDto {
    pub user_id: u32,
    pub user_name: String,
    pub completion: u8,
    pub finesse: u8,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateDto {
    pub lobby_id: LobbyId,
    pub level: Option<LevelDto>,
    pub warmup_timer: Option<TimerDto>,
    pub break_timer: Option<TimerDto>,
    pub round_timer: Option<TimerDto>,
    pub users: BTreeMap<u32, String>,
    pub scores: Vec<ScoreDto>,
}

impl From<&LobbySnapshot> for StateDto {
    fn from(snapshot: &LobbySnapshot) -> Self {
        Self {
            lobby_id: snapshot.lobby_id,
            level: snapshot.level.as_ref().map(LevelDto::from),
            warmup_timer: snapshot
                .warmup_timer
                .map(|(start, end)| TimerDto { start, end }),
            break_timer: snapshot
                .break_timer
                .map(|(start, end)| TimerDto { start, end }),
            round_timer: snapshot
                .round_timer
                .map(|(start, end)| TimerDto { start, end }),
            users: snapshot.users.iter().cloned().collect(),
            scores: snapshot
                .scores
                .iter()
                .map(|row| ScoreDto {
                    user_id: row.user_id,
                    user_name: row.user_name.clone(),
                    completion: row.completion,
                    finesse: row.finesse,
                    time: row.time_ms,
                })
                .collect(),
        }
    }
}

impl From<Arc<LobbySnapshot>> for ServerMessage {
    fn from(snapshot: Arc<LobbySnapshot>) -> Self {
        ServerMessage::State(StateDto::from(snapshot.as_ref()))
    }
}
