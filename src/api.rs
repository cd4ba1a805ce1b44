//! REST backend client
//!
//! The backend owns players, queues, playlists and guild settings. Every
//! request carries the shared secret plus the identity of the user it is made
//! on behalf of.

use crate::models::User;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

/// Backend endpoint paths.
pub mod endpoints {
    pub fn guild(guild: u64) -> String {
        format!("/guilds/{}", guild)
    }

    pub fn guild_settings(guild: u64) -> String {
        format!("/guilds/{}/settings", guild)
    }

    pub fn guild_player(guild: u64) -> String {
        format!("/guilds/{}/player", guild)
    }

    pub fn guild_queue(guild: u64) -> String {
        format!("/guilds/{}/queue", guild)
    }

    pub fn guild_queue_shuffle(guild: u64) -> String {
        format!("/guilds/{}/queue/shuffle", guild)
    }

    pub fn guild_queue_item(guild: u64, item: i64) -> String {
        format!("/guilds/{}/queue/{}", guild, item)
    }

    pub fn guild_queue_item_position(guild: u64, item: i64) -> String {
        format!("/guilds/{}/queue/{}/position", guild, item)
    }

    pub fn guild_playlists(guild: u64) -> String {
        format!("/guilds/{}/playlists", guild)
    }

    pub fn guild_playlist(guild: u64, playlist: i64) -> String {
        format!("/guilds/{}/playlists/{}", guild, playlist)
    }

    pub fn guild_playlist_load(guild: u64, playlist: i64) -> String {
        format!("/guilds/{}/playlists/{}/load", guild, playlist)
    }

    pub fn track_query(query: &str) -> String {
        let encoded: String = url_encode(query);
        format!("/tracks?query={}", encoded)
    }

    pub fn track_lyrics(track: &str) -> String {
        format!("/tracks/lyrics?id={}", url_encode(track))
    }

    pub fn player_stats() -> String {
        "/stats/player".to_string()
    }

    pub fn admin_blacklist_item(user: u64) -> String {
        format!("/admin/blacklist/{}", user)
    }

    pub fn admin_guilds_by_name(name: &str) -> String {
        format!("/admin/guilds?name={}", url_encode(name))
    }

    pub fn admin_guilds_by_owner(owner: u64) -> String {
        format!("/admin/guilds?owner={}", owner)
    }

    pub fn admin_top_guilds(amount: i64) -> String {
        format!("/admin/top_guilds?amount={}", amount)
    }

    pub fn url_encode(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for byte in input.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                _ => out.push_str(&format!("%{:02X}", byte)),
            }
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response. `message` is what users see.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend returned an unexpected body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for an error embed, when the backend produced one.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            ApiError::Status { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub secret: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a request and decode the JSON body. Empty bodies decode as `null`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        user: &User,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        debug!(%method, path, user = user.id, "Backend request");

        let mut req = self
            .client
            .request(method, self.url(path))
            .header("Authorization", &self.config.secret)
            .header("User-Id", user.id.to_string())
            .header("User-Username", &user.username)
            .header("User-Discriminator", &user.discriminator)
            .header("User-Avatar", user.avatar.as_deref().unwrap_or_default());
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                error!("Backend rejected the API secret");
            }
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP error: {}", status.as_u16()));
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(bytes).map_err(ApiError::Decode)
    }

    pub async fn get(&self, user: &User, path: &str) -> Result<Value, ApiError> {
        self.request(user, Method::GET, path, None).await
    }

    pub async fn get_array(&self, user: &User, path: &str) -> Result<Vec<Value>, ApiError> {
        let value: Value = self.get(user, path).await?;
        match value {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError::Decode(serde::de::Error::custom(format!(
                "expected an array, got {}",
                other
            )))),
        }
    }

    pub async fn post(&self, user: &User, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.request(user, Method::POST, path, body.as_ref()).await
    }

    pub async fn put(&self, user: &User, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(user, Method::PUT, path, Some(&body)).await
    }

    pub async fn patch(&self, user: &User, path: &str, body: Value) -> Result<Value, ApiError> {
        self.request(user, Method::PATCH, path, Some(&body)).await
    }

    pub async fn delete(&self, user: &User, path: &str) -> Result<Value, ApiError> {
        self.request(user, Method::DELETE, path, None).await
    }
}

/// Integer field from a backend object; numbers may arrive as strings.
pub fn int_field(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

pub fn float_field(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0.0,
    }
}

pub fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoints() {
        assert_eq!(endpoints::guild_queue_item_position(1, 3), "/guilds/1/queue/3/position");
        assert_eq!(endpoints::track_query("never gonna/give"), "/tracks?query=never+gonna%2Fgive");
        assert_eq!(endpoints::admin_blacklist_item(9), "/admin/blacklist/9");
        assert_eq!(endpoints::track_lyrics("QAA+b/c"), "/tracks/lyrics?id=QAA%2Bb%2Fc");
        assert_eq!(endpoints::admin_guilds_by_name("my server"), "/admin/guilds?name=my+server");
        assert_eq!(endpoints::admin_guilds_by_owner(42), "/admin/guilds?owner=42");
        assert_eq!(endpoints::admin_top_guilds(5), "/admin/top_guilds?amount=5");
    }

    #[test]
    fn test_status_error_displays_backend_message() {
        let err = ApiError::Status {
            status: 400,
            message: "There is no player.".into(),
        };
        assert_eq!(err.to_string(), "There is no player.");
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.user_message(), Some("There is no player."));
    }

    #[test]
    fn test_field_helpers() {
        let v = json!({"playing": 2, "author": "123", "title": "Song"});
        assert_eq!(int_field(&v, "playing"), 2);
        assert_eq!(int_field(&v, "author"), 123);
        assert_eq!(int_field(&v, "missing"), 0);
        assert_eq!(str_field(&v, "title"), "Song");
    }

    #[test]
    fn test_url_join() {
        let client = ApiClient::new(ApiConfig {
            base_url: "http://backend:8000/api/".into(),
            secret: "s".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(client.url("/guilds/1"), "http://backend:8000/api/guilds/1");
    }
}
