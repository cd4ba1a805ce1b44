//! Chat REST client
//!
//! Sends replies and fetches profiles that the roster does not hold.
//!
//! # Configuration
//!
//! - `BOT_TOKEN`: bot token used in the `Authorization: Bot <token>` header

use crate::models::{Embed, Member, User};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord message length limit.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Discord error {status}: {body}")]
    Status { status: u16, body: String },
}

/// What the coordinator needs from the chat platform's REST API.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send an embed, returning the new message id.
    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> Result<u64, DiscordError>;

    async fn send_text(&self, channel_id: u64, content: &str) -> Result<u64, DiscordError>;

    async fn edit_embed(&self, channel_id: u64, message_id: u64, embed: &Embed) -> Result<(), DiscordError>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), DiscordError>;

    /// `Ok(None)` when the user does not exist.
    async fn fetch_user(&self, user_id: u64) -> Result<Option<User>, DiscordError>;

    /// `Ok(None)` when the user is not in the guild.
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<Member>, DiscordError>;

    async fn current_user(&self) -> Result<User, DiscordError>;
}

#[derive(Deserialize)]
struct CreatedMessage {
    #[serde(with = "crate::models::snowflake")]
    id: u64,
}

#[derive(Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: f64,
}

/// reqwest-backed client.
#[derive(Clone)]
pub struct DiscordRest {
    client: reqwest::Client,
    token: String,
}

impl DiscordRest {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, DiscordError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>, DiscordError> {
        let url = format!("{}{}", API_BASE, path);
        debug!(%method, path, "Discord request");

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }
            return Ok(Some(response.json().await?));
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry = serde_json::from_str::<RateLimitBody>(&body)
                .map(|b| b.retry_after.ceil() as u64)
                .unwrap_or(5);
            warn!(path, retry, "Rate limited by Discord");
            return Err(DiscordError::RateLimited(retry));
        }

        Err(DiscordError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn post_message(&self, channel_id: u64, payload: Value) -> Result<u64, DiscordError> {
        let created: Option<CreatedMessage> = self
            .call(
                reqwest::Method::POST,
                &format!("/channels/{}/messages", channel_id),
                Some(payload),
            )
            .await?;
        Ok(created.map(|m| m.id).unwrap_or_default())
    }
}

#[async_trait]
impl Messenger for DiscordRest {
    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> Result<u64, DiscordError> {
        self.post_message(channel_id, json!({ "embeds": [embed] })).await
    }

    async fn send_text(&self, channel_id: u64, content: &str) -> Result<u64, DiscordError> {
        let mut last = 0;
        for chunk in split_message(content, MAX_MESSAGE_LENGTH) {
            last = self.post_message(channel_id, json!({ "content": chunk })).await?;
        }
        Ok(last)
    }

    async fn edit_embed(&self, channel_id: u64, message_id: u64, embed: &Embed) -> Result<(), DiscordError> {
        self.call::<Value>(
            reqwest::Method::PATCH,
            &format!("/channels/{}/messages/{}", channel_id, message_id),
            Some(json!({ "embeds": [embed] })),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), DiscordError> {
        self.call::<Value>(
            reqwest::Method::DELETE,
            &format!("/channels/{}/messages/{}", channel_id, message_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn fetch_user(&self, user_id: u64) -> Result<Option<User>, DiscordError> {
        self.call(reqwest::Method::GET, &format!("/users/{}", user_id), None)
            .await
    }

    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<Member>, DiscordError> {
        self.call(
            reqwest::Method::GET,
            &format!("/guilds/{}/members/{}", guild_id, user_id),
            None,
        )
        .await
    }

    async fn current_user(&self) -> Result<User, DiscordError> {
        self.call(reqwest::Method::GET, "/users/@me", None)
            .await?
            .ok_or(DiscordError::Status {
                status: 404,
                body: "current user not found".into(),
            })
    }
}

/// Split long text on line boundaries, keeping code fences balanced.
pub fn split_message(content: &str, max_len: usize) -> Vec<String> {
    if content.len() <= max_len {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > max_len {
            let open = current.matches("```").count() % 2 == 1;
            if open {
                current.push_str("\n```");
            }
            chunks.push(std::mem::take(&mut current));
            if open {
                current.push_str("```\n");
            }
            current.push_str(line);
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
