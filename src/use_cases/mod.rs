// Use cases layer: application workflows for the lobby engine.

pub mod broker;
pub mod ingester;
pub mod lobby;
pub mod types;

pub use broker::{spawn_broker, BrokerConfig, OnLobbyCreated};
pub use ingester::run_ingester;
pub use lobby::{LobbyKind, LobbyTimings, RotatingThresholds};
pub use types::{BrokerCommand, ClientId, LobbyHandle, LobbyId, LobbySnapshot, ScoringMode};
