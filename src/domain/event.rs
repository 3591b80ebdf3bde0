// A completed-run record as published on the upstream event feed.

use super::Score;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub user: u32,
    pub level: String,
    pub time: i64,
    pub score_completion: u8,
    pub score_finesse: u8,
    pub timestamp: i64,
}

impl Event {
    pub fn score(&self) -> Score {
        Score {
            completion: self.score_completion,
            finesse: self.score_finesse,
            time_ms: self.time,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_fields_and_ignores_unknown_ones() {
        let raw = r#"{"rid":"abc","user":7,"level":"icecave-104","time":12345,
            "score_completion":5,"score_finesse":5,"timestamp":1700000000,
            "character":"dustman","apples":3}"#;
        let event: Event = serde_json::from_str(raw).expect("should parse");
        assert_eq!(event.user, 7);
        assert_eq!(event.level, "icecave-104");
        assert!(event.score().is_ss());
    }
}
