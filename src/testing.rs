//! In-process doubles for unit and integration tests
//!
//! A [`Harness`] wires a [`Coordinator`] to in-memory transports and a
//! [`RecordingMessenger`], so handlers and commands run without Redis or the
//! chat platform. Backend calls go to an unroutable address and fail fast.

use crate::api::{ApiClient, ApiConfig, ApiError};
use crate::bus::{LocalBus, RpcBus};
use crate::command::Router;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorParts};
use crate::discord::{DiscordError, Messenger};
use crate::kv::MemoryKv;
use crate::models::{Embed, Member, User};
use crate::relay::{MemoryQueue, RelayClient};
use crate::roster::Roster;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BOT_ID: u64 = 99;

/// Something the coordinator sent to the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Embed { channel: u64, embed: Embed },
    Text { channel: u64, content: String },
    Edit { channel: u64, message: u64, embed: Embed },
    Delete { channel: u64, message: u64 },
}

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicU64,
    users: Mutex<HashMap<u64, User>>,
    members: Mutex<HashMap<(u64, u64), Member>>,
    refused: Mutex<HashSet<u64>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    pub fn add_user(&self, user: User) {
        self.users.lock().insert(user.id, user);
    }

    pub fn add_member(&self, guild_id: u64, member: Member) {
        self.members.lock().insert((guild_id, member.user.id), member);
    }

    /// Sends to this channel fail with 403.
    pub fn refuse(&self, channel: u64) {
        self.refused.lock().insert(channel);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn embeds(&self, channel: u64) -> Vec<Embed> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Embed { channel: c, embed } if *c == channel => Some(embed.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self, channel: u64) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { channel: c, content } if *c == channel => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    fn check(&self, channel: u64) -> Result<u64, DiscordError> {
        if self.refused.lock().contains(&channel) {
            return Err(DiscordError::Status {
                status: 403,
                body: "Missing Access".into(),
            });
        }
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> Result<u64, DiscordError> {
        let id = self.check(channel_id)?;
        self.sent.lock().push(Sent::Embed {
            channel: channel_id,
            embed: embed.clone(),
        });
        Ok(id)
    }

    async fn send_text(&self, channel_id: u64, content: &str) -> Result<u64, DiscordError> {
        let id = self.check(channel_id)?;
        self.sent.lock().push(Sent::Text {
            channel: channel_id,
            content: content.to_string(),
        });
        Ok(id)
    }

    async fn edit_embed(&self, channel_id: u64, message_id: u64, embed: &Embed) -> Result<(), DiscordError> {
        self.sent.lock().push(Sent::Edit {
            channel: channel_id,
            message: message_id,
            embed: embed.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), DiscordError> {
        self.sent.lock().push(Sent::Delete {
            channel: channel_id,
            message: message_id,
        });
        Ok(())
    }

    async fn fetch_user(&self, user_id: u64) -> Result<Option<User>, DiscordError> {
        Ok(self.users.lock().get(&user_id).cloned())
    }

    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Option<Member>, DiscordError> {
        Ok(self.members.lock().get(&(guild_id, user_id)).cloned())
    }

    async fn current_user(&self) -> Result<User, DiscordError> {
        Ok(bot_user())
    }
}

pub fn bot_user() -> User {
    User {
        id: BOT_ID,
        username: "Chorus".into(),
        discriminator: "0001".into(),
        bot: true,
        ..Default::default()
    }
}

/// Coordinator plus handles on every double behind it.
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub kv: Arc<MemoryKv>,
    pub messenger: Arc<RecordingMessenger>,
    pub queue: Arc<MemoryQueue>,
    pub bus: LocalBus,
}

pub fn test_config() -> Config {
    Config {
        api_url: "http://127.0.0.1:9".into(),
        api_timeout: Duration::from_millis(200),
        voice_idle_timeout: Duration::from_millis(50),
        guilds_channel: Some(1),
        base_uri: "https://chorus.test".into(),
        ..Config::default()
    }
}

pub fn harness(commands: Router) -> Result<Harness, ApiError> {
    harness_with(test_config(), commands, 1)
}

pub fn harness_with(config: Config, commands: Router, shard_count: u64) -> Result<Harness, ApiError> {
    let kv = Arc::new(MemoryKv::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let queue = Arc::new(MemoryQueue::new());
    let bus = LocalBus::default();

    let api = ApiClient::new(ApiConfig {
        base_url: config.api_url.clone(),
        secret: config.api_secret.clone(),
        timeout: config.api_timeout,
    })?;

    let relay = RelayClient::new(queue.clone(), config.relay_send_queue.clone(), shard_count);

    let coordinator = Coordinator::new(CoordinatorParts {
        config,
        roster: Roster::new(),
        kv: kv.clone(),
        api,
        discord: messenger.clone(),
        relay,
        bus: RpcBus::new(Arc::new(bus.clone())),
        commands,
        bot_user: bot_user(),
    });

    Ok(Harness {
        coordinator: Arc::new(coordinator),
        kv,
        messenger,
        queue,
        bus,
    })
}
