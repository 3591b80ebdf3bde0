// Resolves Dustforce catalog level ids against the Atlas downloader.
//
// The downloader answers a HEAD request with a Content-Disposition header
// carrying the canonical filename; there is no JSON lookup endpoint for this.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::domain::Level;

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid regex")
    })
}

#[derive(Debug)]
pub enum AtlasError {
    Request(reqwest::Error),
}

impl std::fmt::Display for AtlasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtlasError::Request(err) => write!(f, "request failed: {err}"),
        }
    }
}

impl std::error::Error for AtlasError {}

impl From<reqwest::Error> for AtlasError {
    fn from(err: reqwest::Error) -> Self {
        AtlasError::Request(err)
    }
}

pub struct AtlasClient {
    http: reqwest::Client,
    base_url: String,
}

impl AtlasClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Used only by tests that need an `AtlasClient` to populate a `Lobby`
    /// but never actually drive network calls.
    #[cfg(test)]
    pub fn new_unconfigured() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "http://127.0.0.1:0".to_string(),
        }
    }

    /// HEAD `{base_url}/downloadmap/{id}` and parses the filename out of
    /// `Content-Disposition`. Returns `Ok(None)` for an unknown id or an
    /// absent/unparseable header, per §4.1.
    pub async fn resolve_level(&self, id: u32) -> Result<Option<Level>, AtlasError> {
        let url = format!("{}/downloadmap/{id}", self.base_url);
        let response = self.http.head(&url).send().await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let Some(header) = response.headers().get(reqwest::header::CONTENT_DISPOSITION) else {
            return Ok(None);
        };
        let Ok(header) = header.to_str() else {
            return Ok(None);
        };
        let Some(captures) = filename_pattern().captures(header) else {
            return Ok(None);
        };

        let filename = captures[1].trim_end_matches(".sfl").to_string();
        let mut level = Level::from_filename(filename);
        if level.id.is_none() {
            level.id = Some(id);
        }
        Ok(Some(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_ascii_filename() {
        let header = r#"attachment; filename="icecave-104.sfl""#;
        let captures = filename_pattern().captures(header).expect("should match");
        assert_eq!(&captures[1], "icecave-104.sfl");
    }

    #[test]
    fn parses_rfc5987_encoded_filename() {
        let header = "attachment; filename*=UTF-8''icecave-104.sfl";
        let captures = filename_pattern().captures(header).expect("should match");
        assert_eq!(&captures[1], "icecave-104.sfl");
    }
}
