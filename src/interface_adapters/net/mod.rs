// Network adapter modules split by external client sockets vs internal HTTP routes.

pub mod admin;
pub mod gateway;

pub use admin::{create_lobby_handler, start_round_handler};
pub use gateway::{spawn_state_serializer, ws_handler};
