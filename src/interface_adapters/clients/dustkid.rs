// Reads leaderboard stats from Dustkid, and (for rotating lobbies) draws a
// random catalog level that meets a minimum skill bar.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::domain::{Level, LevelStats};
use crate::interface_adapters::clients::atlas::AtlasClient;

const RANDOM_LEVEL_MIN_ID: u32 = 100;
const MAX_DRAW_ATTEMPTS: u32 = 50;

#[derive(Debug)]
pub enum DustkidError {
    Request(reqwest::Error),
    Parse,
}

impl std::fmt::Display for DustkidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DustkidError::Request(err) => write!(f, "request failed: {err}"),
            DustkidError::Parse => write!(f, "malformed leaderboard payload"),
        }
    }
}

impl std::error::Error for DustkidError {}

impl From<reqwest::Error> for DustkidError {
    fn from(err: reqwest::Error) -> Self {
        DustkidError::Request(err)
    }
}

#[derive(Debug, Deserialize)]
struct LevelStatsResponse {
    #[serde(default)]
    ss_count: u32,
    #[serde(default)]
    fastest_ss: Option<u32>,
}

pub struct DustkidClient {
    http: reqwest::Client,
    base_url: String,
}

impl DustkidClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Used only by tests that need a `DustkidClient` to populate a `Lobby`
    /// but never actually drive network calls.
    #[cfg(test)]
    pub fn new_unconfigured() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "http://127.0.0.1:0".to_string(),
        }
    }

    pub async fn fetch_level_stats(&self, filename: &str) -> Result<LevelStats, DustkidError> {
        let url = format!("{}/v2/level_leaderboard", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("level", filename)])
            .send()
            .await?
            .error_for_status()?;

        let parsed: LevelStatsResponse = response.json().await.map_err(|_| DustkidError::Parse)?;
        Ok(LevelStats {
            ss_count: parsed.ss_count,
            fastest_ss: parsed.fastest_ss,
        })
    }

    /// Repeatedly draws a level id in `[100, max_level_id]`, resolving and
    /// checking its stats, until one clears the skill bar or attempts are
    /// exhausted. Supplemental capability used only by `LobbyKind::Rotating`.
    pub async fn random_level(
        &self,
        atlas: &AtlasClient,
        max_level_id: u32,
        min_ss_count: u32,
        max_fastest_ss: u32,
    ) -> Result<Option<Level>, DustkidError> {
        if max_level_id < RANDOM_LEVEL_MIN_ID {
            return Ok(None);
        }

        for _ in 0..MAX_DRAW_ATTEMPTS {
            let candidate_id = {
                let mut rng = rand::thread_rng();
                rng.gen_range(RANDOM_LEVEL_MIN_ID..=max_level_id)
            };

            let Ok(Some(level)) = atlas.resolve_level(candidate_id).await else {
                continue;
            };
            let Ok(stats) = self.fetch_level_stats(&level.filename).await else {
                continue;
            };

            let qualifies = stats.ss_count >= min_ss_count
                && stats.fastest_ss.is_some_and(|ms| ms <= max_fastest_ss);
            if qualifies {
                return Ok(Some(level));
            }
        }

        Ok(None)
    }
}
