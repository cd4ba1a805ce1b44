//! Coordinator
//!
//! Shared state every handler, command and bus responder works against:
//! - Roster of cached guilds
//! - Clients for the backend, the chat REST API, the relay and the bus
//! - Frozen command registry
//! - Short-lived guild prefix cache in front of the key-value store

use crate::api::{endpoints, str_field, ApiClient};
use crate::bus::RpcBus;
use crate::command::Router;
use crate::config::Config;
use crate::discord::{DiscordError, Messenger};
use crate::guard::HandlerError;
use crate::kv::{guild_prefix_key, strip_quotes, KeyValue};
use crate::models::{Embed, Member, User};
use crate::relay::RelayClient;
use crate::roster::Roster;
use crate::stats::Stats;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts and spacing of the bot voice-state poll.
pub const VOICE_POLL_ATTEMPTS: usize = 5;
pub const VOICE_POLL_INTERVAL: Duration = Duration::from_millis(100);

const PREFIX_CACHE_TTL: Duration = Duration::from_secs(30);

/// Everything needed to build a [`Coordinator`].
pub struct CoordinatorParts {
    pub config: Config,
    pub roster: Roster,
    pub kv: Arc<dyn KeyValue>,
    pub api: ApiClient,
    pub discord: Arc<dyn Messenger>,
    pub relay: RelayClient,
    pub bus: RpcBus,
    pub commands: Router,
    pub bot_user: User,
}

pub struct Coordinator {
    pub config: Config,
    pub roster: Roster,
    pub kv: Arc<dyn KeyValue>,
    pub api: ApiClient,
    pub discord: Arc<dyn Messenger>,
    pub relay: RelayClient,
    pub bus: RpcBus,
    pub commands: Router,
    pub bot_user: User,
    pub stats: Stats,
    prefixes: Cache<u64, String>,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            config: parts.config,
            roster: parts.roster,
            kv: parts.kv,
            api: parts.api,
            discord: parts.discord,
            relay: parts.relay,
            bus: parts.bus,
            commands: parts.commands,
            bot_user: parts.bot_user,
            stats: Stats::new(),
            prefixes: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(PREFIX_CACHE_TTL)
                .build(),
        }
    }

    /// Prefix configured for a guild: local cache, then the key-value store,
    /// then the backend. Falls back to the default prefix if the backend is
    /// unreachable.
    pub async fn guild_prefix(&self, guild_id: u64, user: &User) -> Result<String, HandlerError> {
        if let Some(prefix) = self.prefixes.get(&guild_id).await {
            return Ok(prefix);
        }

        let prefix = match self.kv.get(&guild_prefix_key(guild_id)).await? {
            Some(raw) => strip_quotes(&raw).to_string(),
            None => match self.api.get(user, &endpoints::guild_settings(guild_id)).await {
                Ok(settings) => str_field(&settings, "prefix").to_string(),
                Err(e) => {
                    warn!(guild = guild_id, error = %e, "Could not load guild settings");
                    return Ok(self.config.default_prefix.clone());
                }
            },
        };

        let prefix = if prefix.is_empty() {
            self.config.default_prefix.clone()
        } else {
            prefix
        };

        self.prefixes.insert(guild_id, prefix.clone()).await;
        Ok(prefix)
    }

    pub async fn invalidate_prefix(&self, guild_id: u64) {
        self.prefixes.invalidate(&guild_id).await;
    }

    /// Embed colour for a guild: the bot's top coloured role, or the default.
    pub fn embed_color(&self, guild_id: Option<u64>) -> u32 {
        guild_id
            .and_then(|g| {
                self.roster
                    .with_guild(g, |state| state.member_color(self.bot_user.id))
                    .flatten()
            })
            .unwrap_or(Embed::DEFAULT_COLOR)
    }

    pub fn embed(&self, guild_id: Option<u64>, title: impl Into<String>, description: impl Into<String>) -> Embed {
        Embed::new(title, description).color(self.embed_color(guild_id))
    }

    /// Profile of a user: roster first, then the chat REST API.
    pub async fn resolve_user(&self, user_id: u64) -> Result<Option<User>, DiscordError> {
        if let Some(user) = self.roster.user(user_id) {
            return Ok(Some(user));
        }
        debug!(user = user_id, "User not cached, fetching");
        self.discord.fetch_user(user_id).await
    }

    /// Member of a cached guild: roster first, then REST. Fetched members are
    /// cached. Uncached guilds yield `None`.
    pub async fn resolve_member(&self, guild_id: u64, user_id: u64) -> Result<Option<Member>, DiscordError> {
        if !self.roster.contains(guild_id) {
            return Ok(None);
        }
        if let Some(member) = self.roster.member(guild_id, user_id) {
            return Ok(Some(member));
        }

        debug!(guild = guild_id, user = user_id, "Member not cached, fetching");
        let fetched = self.discord.fetch_member(guild_id, user_id).await?;
        if let Some(member) = &fetched {
            self.roster.cache_member(guild_id, member.clone());
        }
        Ok(fetched)
    }

    /// Voice channel the bot is in, polling briefly while the gateway catches up.
    pub async fn wait_for_voice(&self, guild_id: u64) -> Option<u64> {
        for attempt in 0..VOICE_POLL_ATTEMPTS {
            if let Some(channel) = self.roster.voice_channel_of(guild_id, self.bot_user.id) {
                return Some(channel);
            }
            if attempt + 1 < VOICE_POLL_ATTEMPTS {
                tokio::time::sleep(VOICE_POLL_INTERVAL).await;
            }
        }
        None
    }

    /// Absolute link into the website, `path` starting with `/`.
    pub fn site_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_uri.trim_end_matches('/'), path)
    }

    pub fn dashboard_url(&self, guild_id: u64, page: &str) -> String {
        self.site_url(&format!("/dashboard/{}/{}", guild_id, page))
    }
}
