use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::model::{RecentTracks, RecentTracksResponse};

const API_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";
const USER_AGENT: &str = "lastfm-archive/0.1.0";

/// Page size the upstream API allows at most.
pub const TRACKS_PER_PAGE: u32 = 200;

pub struct ApiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    user: String,
}

impl ApiClient {
    pub fn new(user: &str, api_key: &str) -> Result<Self> {
        if !is_valid_api_key(api_key) {
            bail!("API key must be 32 alphanumeric characters");
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            user: user.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Fetches one page of the listening history, newest first. Any failure
    /// here is transient by contract (occasional API hiccup): transport
    /// errors, error bodies, and undecodable responses all come back as
    /// `None` and the caller re-requests the identical page after a pause.
    pub fn recent_tracks(&self, page: u64) -> Option<RecentTracks> {
        let page_param = page.to_string();
        let limit = TRACKS_PER_PAGE.to_string();
        let body = self.get_json(&[
            ("method", "user.getrecenttracks"),
            ("format", "json"),
            ("api_key", &self.api_key),
            ("user", &self.user),
            ("limit", &limit),
            ("page", &page_param),
        ])?;

        if body.get("error").is_some() {
            tracing::debug!(page, "error body from user.getrecenttracks");
            return None;
        }

        match serde_json::from_value::<RecentTracksResponse>(body) {
            Ok(response) => Some(response.recenttracks),
            Err(err) => {
                tracing::debug!(page, %err, "unexpected user.getrecenttracks shape");
                None
            }
        }
    }

    /// Checks that the target profile exists before any archiving starts.
    /// An explicit error body is fatal; transport failures are fatal too
    /// since nothing has been written yet.
    pub fn verify_user(&self) -> Result<()> {
        let body = self
            .get_json(&[
                ("method", "user.getinfo"),
                ("format", "json"),
                ("api_key", &self.api_key),
                ("user", &self.user),
            ])
            .context("user.getinfo request failed")?;

        if let Some(code) = body.get("error").and_then(Value::as_i64) {
            bail!(
                "Last.fm rejected user '{}': {}",
                self.user,
                describe_api_error(code)
            );
        }

        Ok(())
    }

    fn get_json(&self, query: &[(&str, &str)]) -> Option<Value> {
        let response = match self.client.get(API_BASE_URL).query(query).send() {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%err, "request failed");
                return None;
            }
        };

        match response.json() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(%err, "response body was not JSON");
                None
            }
        }
    }
}

fn is_valid_api_key(api_key: &str) -> bool {
    api_key.len() == 32 && api_key.chars().all(|c| c.is_ascii_alphanumeric())
}

fn describe_api_error(code: i64) -> &'static str {
    match code {
        6 => "user not found",
        8 => "backend failure, try again later",
        10 => "invalid API key",
        11 => "service offline",
        16 => "service temporarily unavailable",
        26 => "API key suspended",
        29 => "rate limit exceeded",
        _ => "unknown API error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_32_alphanumeric_key() {
        assert!(is_valid_api_key("0123456789abcdef0123456789abcdef"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_api_key("abc"));
        assert!(!is_valid_api_key(&"a".repeat(33)));
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(!is_valid_api_key("0123456789abcdef0123456789abcde!"));
    }

    #[test]
    fn client_rejects_bad_key() {
        assert!(ApiClient::new("someone", "not-a-key").is_err());
    }

    #[test]
    fn client_accepts_valid_key() {
        let client = ApiClient::new("someone", "0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(client.user(), "someone");
    }
}
