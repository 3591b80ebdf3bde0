// Resolves a numeric user id to a display name against the user database
// service, for the `login` client message.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::User;

#[derive(Debug)]
pub enum UserDbError {
    Request(reqwest::Error),
}

impl std::fmt::Display for UserDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserDbError::Request(err) => write!(f, "request failed: {err}"),
        }
    }
}

impl std::error::Error for UserDbError {}

impl From<reqwest::Error> for UserDbError {
    fn from(err: reqwest::Error) -> Self {
        UserDbError::Request(err)
    }
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    name: String,
}

pub struct UserDbClient {
    http: reqwest::Client,
    base_url: String,
}

impl UserDbClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Returns `Ok(None)` if `id` is out of `[1, 1_000_000]`, the response
    /// is not exactly one record, or the record lacks a name — per §4.1,
    /// none of these are treated as hard errors.
    pub async fn fetch_user_name(&self, id: u32) -> Result<Option<User>, UserDbError> {
        if !User::is_valid_id(id) {
            return Ok(None);
        }

        let url = format!("{}/v1/users/{id}", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(_) => return Ok(None),
            Err(err) => return Err(UserDbError::Request(err)),
        };

        let records: Vec<UserRecord> = match response.json().await {
            Ok(records) => records,
            Err(_) => return Ok(None),
        };

        match records.as_slice() {
            [record] if !record.name.is_empty() => Ok(Some(User {
                id,
                name: record.name.clone(),
            })),
            _ => Ok(None),
        }
    }
}
