// Domain layer: pure types for the speedrun lobby engine.

pub mod event;
pub mod level;
pub mod score;
pub mod user;

pub use event::Event;
pub use level::{Level, LevelStats};
pub use score::Score;
pub use user::User;
