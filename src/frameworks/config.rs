use std::{env, time::Duration};

// Runtime/server constants (not gameplay tuning, which lives in
// `LobbyTimings`/`RotatingThresholds` below).

pub fn http_port() -> u16 {
    env::var("GAME_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3001)
}

pub fn dustkid_events_url() -> String {
    env::var("DUSTKID_EVENTS_URL")
        .unwrap_or_else(|_| "https://dustkid.com/backend6/live.php".to_string())
}

pub fn atlas_base_url() -> String {
    env::var("ATLAS_BASE_URL").unwrap_or_else(|_| "https://atlas.dustforce.com".to_string())
}

pub fn dustkid_base_url() -> String {
    env::var("DUSTKID_BASE_URL").unwrap_or_else(|_| "https://dustkid.com".to_string())
}

pub fn userdb_base_url() -> String {
    env::var("USERDB_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3002".to_string())
}

fn timeout_ms(var: &str, default_ms: u64) -> Duration {
    let millis = env::var(var)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(millis)
}

pub fn atlas_timeout() -> Duration {
    timeout_ms("ATLAS_TIMEOUT_MS", 5_000)
}

pub fn dustkid_timeout() -> Duration {
    timeout_ms("DUSTKID_TIMEOUT_MS", 5_000)
}

pub fn userdb_timeout() -> Duration {
    timeout_ms("USERDB_TIMEOUT_MS", 1_500)
}

pub fn max_lobby_count() -> usize {
    env::var("MAX_LOBBY_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
}

pub const INGESTER_BUS_CAPACITY: usize = 256;
pub const LOBBY_CMD_CAPACITY: usize = 256;
pub const LOBBY_STATE_CAPACITY: usize = 32;

// Elimination-lobby phase durations, per the idle/warmup/break/round/
// game-over state diagram.
pub const WARMUP_DURATION: Duration = Duration::from_secs(4 * 60);
pub const BREAK_DURATION: Duration = Duration::from_secs(15);
pub const ROUND_DURATION: Duration = Duration::from_secs(60);
pub const ROUND_PADDING: Duration = Duration::from_secs(2);
pub const GAME_OVER_HOLD: Duration = Duration::from_secs(10);
pub const EMPTY_LOBBY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// A rotating lobby never holds an elimination-style game over, so it reuses
// the same warmup/break/round/padding rhythm without a game-over hold.
pub const ROTATING_GAME_OVER_HOLD: Duration = Duration::from_secs(0);

pub fn rotating_min_ss_count() -> u32 {
    env::var("ROTATING_MIN_SS_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5)
}

pub fn rotating_max_fastest_ss() -> u32 {
    env::var("ROTATING_MAX_FASTEST_SS_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(45_000)
}
