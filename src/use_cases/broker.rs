// The broker: single task owning the client table, the lobby table, and the
// ingester subscription. Everything here runs on one task, so none of it
// needs locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::interface_adapters::clients::atlas::AtlasClient;
use crate::interface_adapters::clients::dustkid::DustkidClient;
use crate::interface_adapters::clients::userdb::UserDbClient;
use crate::interface_adapters::utils::identity::generate_lobby_password;
use crate::use_cases::lobby::{spawn_lobby, LobbyKind, LobbyTimings, RotatingThresholds, SpawnedLobby};
use crate::use_cases::types::{
    BrokerCommand, ClientId, CreateLobbyError, CreatedLobby, JoinError, LobbyCommand, LobbyHandle,
    LobbyId,
};

#[derive(Clone)]
pub struct BrokerConfig {
    pub max_lobby_count: usize,
    pub elimination_timings: LobbyTimings,
    pub rotating_timings: LobbyTimings,
    pub rotating_thresholds: RotatingThresholds,
    pub lobby_cmd_capacity: usize,
    pub lobby_state_capacity: usize,
    pub bootstrap_rotating_lobby: bool,
}

struct LobbyEntry {
    handle: LobbyHandle,
}

/// Called whenever the broker spawns a new lobby, so the interface layer can
/// attach its own serializer task without the broker depending on it.
pub type OnLobbyCreated = Arc<dyn Fn(LobbyId, &LobbyHandle) + Send + Sync>;

pub struct Broker {
    config: BrokerConfig,
    atlas: Arc<AtlasClient>,
    dustkid: Arc<DustkidClient>,
    userdb: Arc<UserDbClient>,
    on_lobby_created: OnLobbyCreated,

    cmd_rx: mpsc::Receiver<BrokerCommand>,
    bus_rx: broadcast::Receiver<Bytes>,

    lobbies: HashMap<LobbyId, LobbyEntry>,
    closed_rx: mpsc::Receiver<LobbyId>,
    closed_tx: mpsc::Sender<LobbyId>,
    clients: HashMap<ClientId, LobbyId>,
    next_lobby_id: LobbyId,
    max_level_id: Arc<AtomicU32>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_broker(
    config: BrokerConfig,
    atlas: Arc<AtlasClient>,
    dustkid: Arc<DustkidClient>,
    userdb: Arc<UserDbClient>,
    bus_rx: broadcast::Receiver<Bytes>,
    on_lobby_created: OnLobbyCreated,
) -> mpsc::Sender<BrokerCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(1024);
    let (closed_tx, closed_rx) = mpsc::channel(64);

    let bootstrap_rotating = config.bootstrap_rotating_lobby;

    let mut broker = Broker {
        config,
        atlas,
        dustkid,
        userdb,
        on_lobby_created,
        cmd_rx,
        bus_rx,
        lobbies: HashMap::new(),
        closed_rx,
        closed_tx,
        clients: HashMap::new(),
        next_lobby_id: 1,
        max_level_id: Arc::new(AtomicU32::new(0)),
    };

    if bootstrap_rotating {
        broker.spawn_lobby_of_kind(LobbyKind::Rotating);
    }

    tokio::spawn(broker.run());
    cmd_tx
}

impl Broker {
    async fn run(mut self) {
        info!("broker started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("broker command channel closed, shutting down");
                            return;
                        }
                    }
                }
                event = self.bus_rx.recv() => {
                    match event {
                        Ok(bytes) => self.handle_event(bytes),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "ingester bus lagged, dropping skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("ingester bus closed");
                        }
                    }
                }
                closed = self.closed_rx.recv() => {
                    if let Some(lobby_id) = closed {
                        self.lobbies.remove(&lobby_id);
                        info!(lobby_id, "lobby removed");
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::CreateLobby { reply } => {
                let result = self.create_lobby();
                let _ = reply.send(result);
            }
            BrokerCommand::StartRound {
                lobby_id,
                password,
                level_id,
                mode,
                reply,
            } => {
                let Some(entry) = self.lobbies.get(&lobby_id) else {
                    let _ = reply.send(Err(crate::use_cases::types::StartRoundError::LevelNotFound));
                    return;
                };
                let cmd_tx = entry.handle.cmd_tx.clone();
                let (inner_reply_tx, inner_reply_rx) = tokio::sync::oneshot::channel();
                let send = cmd_tx
                    .send(LobbyCommand::StartRound {
                        password,
                        level_id,
                        mode,
                        reply: inner_reply_tx,
                    })
                    .await;
                if send.is_err() {
                    let _ = reply.send(Err(crate::use_cases::types::StartRoundError::LevelNotFound));
                    return;
                }
                let result = inner_reply_rx
                    .await
                    .unwrap_or(Err(crate::use_cases::types::StartRoundError::LevelNotFound));
                let _ = reply.send(result);
            }
            BrokerCommand::Join {
                identity,
                lobby_id,
                reply,
            } => {
                let Some(entry) = self.lobbies.get(&lobby_id) else {
                    let _ = reply.send(Err(JoinError::LobbyNotFound));
                    return;
                };
                self.clients.insert(identity, lobby_id);
                let _ = entry.handle.cmd_tx.try_send(LobbyCommand::Join { identity });
                let _ = reply.send(Ok(entry.handle.clone()));
            }
            BrokerCommand::Leave { identity } => {
                if let Some(lobby_id) = self.clients.remove(&identity) {
                    if let Some(entry) = self.lobbies.get(&lobby_id) {
                        let _ = entry.handle.cmd_tx.try_send(LobbyCommand::Leave { identity });
                    }
                }
            }
            BrokerCommand::Login { identity, user_id } => {
                let Some(lobby_id) = self.clients.get(&identity).copied() else {
                    warn!(identity, "login from unknown client");
                    return;
                };
                let Some(entry) = self.lobbies.get(&lobby_id) else {
                    return;
                };
                let userdb = self.userdb.clone();
                let cmd_tx = entry.handle.cmd_tx.clone();
                tokio::spawn(async move {
                    match userdb.fetch_user_name(user_id).await {
                        Ok(Some(user)) => {
                            let _ = cmd_tx.send(LobbyCommand::Login { identity, user }).await;
                        }
                        Ok(None) => {
                            warn!(user_id, "unknown user id on login");
                        }
                        Err(err) => {
                            warn!(user_id, error = %err, "user name lookup failed");
                        }
                    }
                });
            }
            BrokerCommand::Logout { identity } => {
                if let Some(lobby_id) = self.clients.get(&identity).copied() {
                    if let Some(entry) = self.lobbies.get(&lobby_id) {
                        let _ = entry.handle.cmd_tx.try_send(LobbyCommand::Logout { identity });
                    }
                }
            }
        }
    }

    fn create_lobby(&mut self) -> Result<CreatedLobby, CreateLobbyError> {
        if self.lobbies.len() >= self.config.max_lobby_count {
            return Err(CreateLobbyError::AtCapacity);
        }
        let (lobby_id, password) = self.spawn_lobby_of_kind(LobbyKind::Elimination);
        Ok(CreatedLobby { lobby_id, password })
    }

    fn spawn_lobby_of_kind(&mut self, kind: LobbyKind) -> (LobbyId, String) {
        let lobby_id = self.next_lobby_id;
        self.next_lobby_id += 1;
        let password = generate_lobby_password();

        let (timings, rotating) = match kind {
            LobbyKind::Elimination => (self.config.elimination_timings, None),
            LobbyKind::Rotating => (
                self.config.rotating_timings,
                Some(self.config.rotating_thresholds),
            ),
        };

        let SpawnedLobby {
            cmd_tx,
            state_tx,
            state_bytes_tx,
            state_latest_tx,
        } = spawn_lobby(
            lobby_id,
            kind,
            timings,
            password.clone(),
            self.atlas.clone(),
            self.dustkid.clone(),
            self.max_level_id.clone(),
            rotating,
            self.closed_tx.clone(),
            self.config.lobby_cmd_capacity,
            self.config.lobby_state_capacity,
        );

        let handle = LobbyHandle {
            lobby_id,
            cmd_tx,
            state_tx,
            state_bytes_tx,
            state_latest_tx,
        };

        (self.on_lobby_created)(lobby_id, &handle);
        self.lobbies.insert(lobby_id, LobbyEntry { handle });
        info!(lobby_id, kind = ?kind, "lobby created");

        (lobby_id, password)
    }

    fn handle_event(&mut self, bytes: Bytes) {
        if let Ok(event) = serde_json::from_slice::<crate::domain::Event>(&bytes) {
            if let Ok(level_id) = event.level.rsplit('-').next().unwrap_or("").parse::<u32>() {
                self.max_level_id.fetch_max(level_id, Ordering::Relaxed);
            }
        }

        for entry in self.lobbies.values() {
            // A saturated lobby inbox must never block delivery to others.
            if entry
                .handle
                .cmd_tx
                .try_send(LobbyCommand::Event {
                    bytes: bytes.clone(),
                })
                .is_err()
            {
                warn!(lobby_id = entry.handle.lobby_id, "lobby inbox saturated, dropping event");
            }
        }
    }
}
