// The lobby engine: one task per lobby, driving idle/warmup/break/round/
// game-over phases and scoring a single round's worth of events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Level, Score, User};
use crate::interface_adapters::clients::atlas::AtlasClient;
use crate::interface_adapters::clients::dustkid::DustkidClient;
use crate::use_cases::types::{
    ClientId, LobbyCommand, LobbyId, LobbySnapshot, ScoreRow, ScoringMode, StartRoundError,
};

/// Tunable phase durations, shared by every lobby of a kind.
#[derive(Debug, Clone, Copy)]
pub struct LobbyTimings {
    pub warmup: StdDuration,
    pub round: StdDuration,
    pub round_padding: StdDuration,
    pub break_time: StdDuration,
    pub game_over_hold: StdDuration,
    pub empty_timeout: StdDuration,
}

/// Thresholds a `LobbyKind::Rotating` lobby applies when drawing its next
/// level via `DustkidClient::random_level`.
#[derive(Debug, Clone, Copy)]
pub struct RotatingThresholds {
    pub min_ss_count: u32,
    pub max_fastest_ss: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyKind {
    /// A losing player is eliminated at the end of every round; the last
    /// player standing wins the lobby.
    Elimination,
    /// Every round picks a fresh random level; nobody is ever eliminated.
    Rotating,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Warmup {
        end: DateTime<Utc>,
    },
    Break {
        break_end: DateTime<Utc>,
        round_end: DateTime<Utc>,
    },
    Round {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    GameOver {
        until: DateTime<Utc>,
        winner: Option<u32>,
    },
}

struct ScoreEntry {
    score: Score,
    seq: u64,
}

/// Owns one lobby's authoritative state and drives its phase clock.
pub struct Lobby {
    pub id: LobbyId,
    kind: LobbyKind,
    timings: LobbyTimings,
    password: String,

    cmd_rx: mpsc::Receiver<LobbyCommand>,
    closed_tx: mpsc::Sender<LobbyId>,
    state_tx: broadcast::Sender<Arc<LobbySnapshot>>,

    atlas: Arc<AtlasClient>,
    dustkid: Arc<DustkidClient>,
    max_level_id: Arc<AtomicU32>,
    rotating: Option<RotatingThresholds>,

    phase: Phase,
    deadline: Option<Instant>,
    level: Option<Level>,
    mode: ScoringMode,
    allow_joining: bool,

    clients: HashSet<ClientId>,
    identity_users: HashMap<ClientId, u32>,
    users: HashMap<u32, User>,
    scores: HashMap<u32, ScoreEntry>,
    eliminated: HashSet<u32>,
    score_seq: u64,

    empty_since: Option<Instant>,
}

/// Handed back to the broker at spawn time; everything it needs to route
/// commands and subscribe callers to this lobby's snapshots.
pub struct SpawnedLobby {
    pub cmd_tx: mpsc::Sender<LobbyCommand>,
    pub state_tx: broadcast::Sender<Arc<LobbySnapshot>>,
    pub state_bytes_tx: broadcast::Sender<Utf8Bytes>,
    pub state_latest_tx: watch::Sender<Utf8Bytes>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_lobby(
    id: LobbyId,
    kind: LobbyKind,
    timings: LobbyTimings,
    password: String,
    atlas: Arc<AtlasClient>,
    dustkid: Arc<DustkidClient>,
    max_level_id: Arc<AtomicU32>,
    rotating: Option<RotatingThresholds>,
    closed_tx: mpsc::Sender<LobbyId>,
    cmd_capacity: usize,
    state_capacity: usize,
) -> SpawnedLobby {
    let (cmd_tx, cmd_rx) = mpsc::channel(cmd_capacity);
    let (state_tx, _) = broadcast::channel(state_capacity);
    let (state_bytes_tx, _) = broadcast::channel(state_capacity);
    let (state_latest_tx, _) = watch::channel(Utf8Bytes::from(""));

    let lobby = Lobby {
        id,
        kind,
        timings,
        password,
        cmd_rx,
        closed_tx,
        state_tx: state_tx.clone(),
        atlas,
        dustkid,
        max_level_id,
        rotating,
        phase: Phase::Idle,
        deadline: None,
        level: None,
        mode: ScoringMode::Any,
        allow_joining: true,
        clients: HashSet::new(),
        identity_users: HashMap::new(),
        users: HashMap::new(),
        scores: HashMap::new(),
        eliminated: HashSet::new(),
        score_seq: 0,
        // Per §4.4.6, a lobby with no clients starts its empty-lobby timer
        // immediately rather than waiting for its first join/leave edge.
        empty_since: Some(Instant::now()),
    };

    tokio::spawn(lobby.run());

    SpawnedLobby {
        cmd_tx,
        state_tx,
        state_bytes_tx,
        state_latest_tx,
    }
}

impl Lobby {
    async fn run(mut self) {
        info!(lobby_id = self.id, kind = ?self.kind, "lobby started");

        // Rotating lobbies self-schedule their first round; nobody ever
        // calls start_round on them.
        if self.kind == LobbyKind::Rotating {
            self.rotate_round_end().await;
        }

        loop {
            let phase_deadline = self.deadline_or_pending();
            let empty_deadline = self.empty_deadline_or_pending();

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.dispatch(cmd).await,
                        None => {
                            debug!(lobby_id = self.id, "command channel closed");
                            return;
                        }
                    }
                }
                _ = phase_deadline => {
                    self.on_deadline().await;
                }
                _ = empty_deadline => {
                    info!(lobby_id = self.id, "closing empty lobby");
                    let _ = self.closed_tx.send(self.id).await;
                    return;
                }
            }
        }
    }

    async fn deadline_or_pending(&self) {
        match self.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    async fn empty_deadline_or_pending(&self) {
        match self.empty_since {
            Some(since) => tokio::time::sleep_until(since + self.timings.empty_timeout).await,
            None => std::future::pending().await,
        }
    }

    async fn dispatch(&mut self, cmd: LobbyCommand) {
        match cmd {
            LobbyCommand::Join { identity } => {
                self.clients.insert(identity);
                self.empty_since = None;
                self.publish();
            }
            LobbyCommand::Leave { identity } => {
                self.clients.remove(&identity);
                if let Some(user_id) = self.identity_users.remove(&identity) {
                    self.remove_user(user_id);
                }
                if self.clients.is_empty() {
                    self.empty_since = Some(Instant::now());
                }
                self.publish();
            }
            LobbyCommand::Login { identity, user } => {
                if !self.allow_joining {
                    // A game is in progress; the source silently drops late
                    // logins rather than admitting a player mid-game.
                    warn!(lobby_id = self.id, user_id = user.id, "login dropped, game in progress");
                    return;
                }
                self.identity_users.insert(identity, user.id);
                self.users.insert(user.id, user);
                self.publish();
            }
            LobbyCommand::Logout { identity } => {
                if let Some(user_id) = self.identity_users.remove(&identity) {
                    self.remove_user(user_id);
                }
                self.publish();
            }
            LobbyCommand::StartRound {
                password,
                level_id,
                mode,
                reply,
            } => {
                let result = self.try_start_round(password, level_id, mode).await;
                let _ = reply.send(result);
            }
            LobbyCommand::Event { bytes } => {
                self.on_event_bytes(&bytes);
            }
        }
    }

    fn remove_user(&mut self, user_id: u32) {
        self.users.remove(&user_id);
        self.scores.remove(&user_id);
        self.eliminated.remove(&user_id);
    }

    fn remaining(&self) -> HashSet<u32> {
        self.users
            .keys()
            .copied()
            .filter(|id| !self.eliminated.contains(id))
            .collect()
    }

    async fn try_start_round(
        &mut self,
        password: String,
        level_id: u32,
        mode: ScoringMode,
    ) -> Result<(), StartRoundError> {
        if self.kind == LobbyKind::Rotating {
            // Rotating lobbies draw their own level on a fixed cycle; they
            // never accept an externally chosen one.
            return Err(StartRoundError::RoundInProgress);
        }

        if password != self.password {
            return Err(StartRoundError::WrongPassword);
        }

        let level = match &self.level {
            Some(level) if level.id == Some(level_id) => level.clone(),
            _ => match self.atlas.resolve_level(level_id).await {
                Ok(Some(level)) => level,
                Ok(None) => return Err(StartRoundError::LevelNotFound),
                Err(err) => {
                    warn!(lobby_id = self.id, error = %err, "level resolution failed");
                    return Err(StartRoundError::LevelNotFound);
                }
            },
        };

        if !matches!(self.phase, Phase::Idle) {
            return Err(StartRoundError::RoundInProgress);
        }

        self.level = Some(level);
        self.mode = mode;
        self.scores.clear();
        self.enter_warmup();
        Ok(())
    }

    fn enter_warmup(&mut self) {
        self.allow_joining = false;
        let end = Utc::now() + self.timings.warmup;
        self.phase = Phase::Warmup { end };
        self.deadline = Some(Instant::now() + self.timings.warmup);
        self.publish();
    }

    async fn on_deadline(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Warmup { .. } => self.enter_round(),
            Phase::Break { round_end, .. } => self.enter_round_from_break(round_end),
            Phase::Round { .. } => match self.kind {
                LobbyKind::Elimination => self.evaluate_elimination_round_end(),
                LobbyKind::Rotating => self.rotate_round_end().await,
            },
            Phase::GameOver { .. } => self.enter_idle(),
            // A rotating lobby parks in `Idle` only while retrying a failed
            // level draw; an elimination lobby's `Idle` has no deadline and
            // never reaches here.
            Phase::Idle if self.kind == LobbyKind::Rotating => self.rotate_round_end().await,
            Phase::Idle => {}
        }
        self.publish();
    }

    fn enter_round(&mut self) {
        let start = Utc::now();
        let end = start + self.timings.round;
        self.phase = Phase::Round { start, end };
        self.deadline = Some(Instant::now() + self.timings.round + self.timings.round_padding);
    }

    fn enter_round_from_break(&mut self, round_end: DateTime<Utc>) {
        let start = Utc::now();
        self.phase = Phase::Round { start, end: round_end };
        self.deadline = Some(Instant::now() + self.timings.round + self.timings.round_padding);
    }

    fn enter_break(&mut self) {
        let break_end = Utc::now() + self.timings.break_time;
        let round_end = break_end + self.timings.round;
        self.phase = Phase::Break { break_end, round_end };
        self.deadline = Some(Instant::now() + self.timings.break_time);
    }

    fn enter_game_over(&mut self, winner: Option<u32>) {
        let until = Utc::now() + self.timings.game_over_hold;
        self.phase = Phase::GameOver { until, winner };
        self.deadline = Some(Instant::now() + self.timings.game_over_hold);
        info!(lobby_id = self.id, ?winner, "game over");
    }

    fn enter_idle(&mut self) {
        self.eliminated.clear();
        self.allow_joining = true;
        self.phase = Phase::Idle;
        self.deadline = None;
    }

    /// Implements the elimination rule of §4.4.3: drop everyone who posted
    /// no qualifying score this round; if everyone scored, drop only the
    /// most recent scorer; never eliminate the entire remaining field in
    /// one round.
    fn evaluate_elimination_round_end(&mut self) {
        let remaining = self.remaining();
        let scored: HashSet<u32> = remaining
            .iter()
            .copied()
            .filter(|id| self.scores.contains_key(id))
            .collect();
        let mut out: HashSet<u32> = remaining.difference(&scored).copied().collect();

        if out.is_empty() {
            if let Some(last_scorer) = scored.iter().copied().max_by_key(|id| {
                let entry = &self.scores[id];
                (entry.score.timestamp, entry.seq)
            }) {
                out.insert(last_scorer);
            }
        }

        if out == remaining {
            out.clear();
        }

        let rerun = out.is_empty();
        for user_id in &out {
            info!(lobby_id = self.id, eliminated = user_id, "player eliminated");
        }
        self.eliminated.extend(out);
        self.scores.clear();
        self.score_seq = 0;

        if rerun {
            info!(lobby_id = self.id, "round tied with no eliminations; rerunning");
            self.enter_round();
            return;
        }

        let remaining_after = self.remaining();
        if remaining_after.len() <= 1 {
            self.enter_game_over(remaining_after.into_iter().next());
        } else {
            self.enter_break();
        }
    }

    async fn rotate_round_end(&mut self) {
        self.scores.clear();
        self.score_seq = 0;
        let max_id = self.max_level_id.load(Ordering::Relaxed);
        let thresholds = self.rotating.unwrap_or(RotatingThresholds {
            min_ss_count: 0,
            max_fastest_ss: u32::MAX,
        });
        let level = self
            .dustkid
            .random_level(
                &self.atlas,
                max_id,
                thresholds.min_ss_count,
                thresholds.max_fastest_ss,
            )
            .await;
        match level {
            Ok(Some(level)) => {
                self.level = Some(level);
                self.enter_warmup();
            }
            _ => {
                // No qualifying level found this draw; try again shortly.
                self.phase = Phase::Idle;
                self.deadline = Some(Instant::now() + StdDuration::from_secs(5));
            }
        }
    }

    fn on_event_bytes(&mut self, bytes: &bytes::Bytes) {
        let Ok(event) = serde_json::from_slice::<crate::domain::Event>(bytes) else {
            return;
        };

        // Every rotating lobby observes the stream to learn the catalog's
        // current upper bound, even outside its own active round.
        if self.kind == LobbyKind::Rotating {
            if let Ok(level_id) = event.level.rsplit('-').next().unwrap_or("").parse::<u32>() {
                self.max_level_id.fetch_max(level_id, Ordering::Relaxed);
            }
        }

        self.on_event(event);
    }

    fn on_event(&mut self, event: crate::domain::Event) {
        let Phase::Round { end, .. } = &self.phase else {
            return;
        };
        let Some(level) = &self.level else { return };
        if event.level != level.filename {
            return;
        }
        if !self.mode.accepts(event.score()) {
            return;
        }
        // Gate on known-user only (not `remaining`/`eliminated`), so that
        // `scores.keys ⊆ users.keys` holds without dropping events from
        // users §4.4.4 never asked us to exclude.
        if !self.users.contains_key(&event.user) {
            return;
        }

        let window_start = end.timestamp() - self.timings.round.as_secs() as i64;
        if event.timestamp < window_start || event.timestamp > end.timestamp() {
            return;
        }

        let new_score = event.score();
        let better = match self.scores.get(&event.user) {
            Some(existing) => new_score > existing.score,
            None => true,
        };
        if !better {
            return;
        }

        self.score_seq += 1;
        self.scores.insert(
            event.user,
            ScoreEntry {
                score: new_score,
                seq: self.score_seq,
            },
        );
        self.publish();
    }

    fn snapshot(&self) -> LobbySnapshot {
        let (warmup_timer, break_timer, round_timer) = match &self.phase {
            Phase::Warmup { end } => (Some((Utc::now(), *end)), None, None),
            Phase::Break {
                break_end,
                round_end,
            } => (None, Some((Utc::now(), *break_end)), Some((*break_end, *round_end))),
            Phase::Round { start, end } => (None, None, Some((*start, *end))),
            Phase::Idle | Phase::GameOver { .. } => (None, None, None),
        };

        // Scored members of `remaining` first (earliest scorer first), then
        // unscored members of `remaining` with zeroed fields, per §6.2.
        let remaining = self.remaining();
        let mut scored: Vec<ScoreRow> = remaining
            .iter()
            .filter_map(|user_id| {
                let entry = self.scores.get(user_id)?;
                let user = self.users.get(user_id)?;
                Some(ScoreRow {
                    user_id: *user_id,
                    user_name: user.name.clone(),
                    completion: entry.score.completion,
                    finesse: entry.score.finesse,
                    time_ms: entry.score.time_ms,
                    timestamp: entry.score.timestamp,
                })
            })
            .collect();
        scored.sort_by_key(|row| row.timestamp);

        let mut unscored: Vec<ScoreRow> = remaining
            .iter()
            .filter(|user_id| !self.scores.contains_key(user_id))
            .filter_map(|user_id| {
                let user = self.users.get(user_id)?;
                Some(ScoreRow {
                    user_id: *user_id,
                    user_name: user.name.clone(),
                    completion: 0,
                    finesse: 0,
                    time_ms: 0,
                    timestamp: 0,
                })
            })
            .collect();

        let mut scores = Vec::with_capacity(scored.len() + unscored.len());
        scores.append(&mut scored);
        scores.append(&mut unscored);

        let mut users: Vec<(u32, String)> = self
            .users
            .iter()
            .map(|(id, user)| (*id, user.name.clone()))
            .collect();
        users.sort_by_key(|(id, _)| *id);

        LobbySnapshot {
            lobby_id: self.id,
            level: self.level.clone(),
            warmup_timer,
            break_timer,
            round_timer,
            users,
            scores,
        }
    }

    fn publish(&self) {
        // No subscribers between rounds is normal; ignore send errors.
        let _ = self.state_tx.send(Arc::new(self.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> LobbyTimings {
        LobbyTimings {
            warmup: StdDuration::from_secs(1),
            round: StdDuration::from_secs(1),
            round_padding: StdDuration::from_millis(100),
            break_time: StdDuration::from_millis(100),
            game_over_hold: StdDuration::from_millis(100),
            empty_timeout: StdDuration::from_secs(300),
        }
    }

    fn lone_lobby() -> Lobby {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, _) = broadcast::channel(8);
        let (closed_tx, _closed_rx) = mpsc::channel(1);
        drop(cmd_tx);
        Lobby {
            id: 1,
            kind: LobbyKind::Elimination,
            timings: timings(),
            password: "secret".into(),
            cmd_rx,
            closed_tx,
            state_tx,
            atlas: Arc::new(AtlasClient::new_unconfigured()),
            dustkid: Arc::new(DustkidClient::new_unconfigured()),
            max_level_id: Arc::new(AtomicU32::new(0)),
            rotating: None,
            phase: Phase::Idle,
            deadline: None,
            level: Some(Level::from_filename("icecave-104")),
            mode: ScoringMode::Any,
            allow_joining: true,
            clients: HashSet::new(),
            identity_users: HashMap::new(),
            users: HashMap::new(),
            scores: HashMap::new(),
            eliminated: HashSet::new(),
            score_seq: 0,
            empty_since: None,
        }
    }

    fn user(id: u32) -> User {
        User {
            id,
            name: format!("player{id}"),
        }
    }

    fn score_entry(timestamp: i64) -> ScoreEntry {
        ScoreEntry {
            score: Score {
                completion: 5,
                finesse: 5,
                time_ms: 10_000,
                timestamp,
            },
            seq: 0,
        }
    }

    #[test]
    fn eliminates_only_unscored_players() {
        let mut lobby = lone_lobby();
        lobby.users.insert(1, user(1));
        lobby.users.insert(2, user(2));
        lobby.users.insert(3, user(3));
        lobby.scores.insert(1, score_entry(100));
        lobby.phase = Phase::Round {
            start: Utc::now(),
            end: Utc::now(),
        };

        lobby.evaluate_elimination_round_end();

        assert!(lobby.eliminated.contains(&2));
        assert!(lobby.eliminated.contains(&3));
        assert!(!lobby.eliminated.contains(&1));
        assert!(matches!(lobby.phase, Phase::GameOver { winner: Some(1), .. }));
    }

    #[test]
    fn reruns_round_when_nobody_scores() {
        let mut lobby = lone_lobby();
        lobby.users.insert(1, user(1));
        lobby.users.insert(2, user(2));
        lobby.phase = Phase::Round {
            start: Utc::now(),
            end: Utc::now(),
        };

        lobby.evaluate_elimination_round_end();

        assert!(lobby.eliminated.is_empty());
        assert!(matches!(lobby.phase, Phase::Round { .. }));
    }

    #[test]
    fn eliminates_only_most_recent_scorer_when_everyone_scores() {
        let mut lobby = lone_lobby();
        lobby.users.insert(1, user(1));
        lobby.users.insert(2, user(2));
        lobby.scores.insert(1, ScoreEntry { score: score_entry(100).score, seq: 1 });
        lobby.scores.insert(2, ScoreEntry { score: score_entry(200).score, seq: 2 });
        lobby.phase = Phase::Round {
            start: Utc::now(),
            end: Utc::now(),
        };

        lobby.evaluate_elimination_round_end();

        assert!(lobby.eliminated.contains(&2));
        assert!(!lobby.eliminated.contains(&1));
    }
}
