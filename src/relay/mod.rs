//! Relay queue to the gateway connector
//!
//! Two durable lanes: the connector pushes raw dispatch frames onto the
//! receive lane, and this process pushes shard-addressed commands onto the
//! send lane. Every outbound command names its shard explicitly.
//!
//! Outbound wire format:
//!
//! ```text
//! {"op": "send", "shard": 3, "data": {"op": 4, "d": {...}}}
//! {"op": "reconnect", "shard": 3}
//! ```

mod queue;

pub use queue::{MemoryQueue, QueueTransport, RedisQueue};

use crate::events::Pipeline;
use crate::gateway::decode_frame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Gateway opcodes the coordinator sends.
pub const OP_PRESENCE_UPDATE: u8 = 3;
pub const OP_VOICE_STATE_UPDATE: u8 = 4;
pub const OP_REQUEST_GUILD_MEMBERS: u8 = 8;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Shard {shard} does not exist ({count} shards)")]
    UnknownShard { shard: u64, count: u64 },

    #[error("Shard count is not known yet")]
    NoShards,
}

/// Shard owning a guild: `(guild_id >> 22) mod shard_count`.
pub fn shard_for_guild(guild_id: u64, shard_count: u64) -> u64 {
    (guild_id >> 22) % shard_count.max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOp {
    Send,
    Reconnect,
}

/// Gateway command carried inside a `send` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCommand {
    pub op: u8,
    #[serde(rename = "d")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub op: QueueOp,
    pub shard: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<GatewayCommand>,
}

/// Activity shown in the bot's presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    /// 0 playing, 2 listening, 3 watching.
    pub kind: u8,
}

/// Outbound operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    ForwardRaw { shard: u64, op: u8, payload: Value },
    Reconnect { shard: u64 },
    UpdateVoice { guild_id: u64, channel_id: Option<u64> },
    UpdatePresence { shard: u64, activity: Activity },
    RequestMembers { guild_id: u64 },
}

impl RelayMessage {
    pub fn into_envelope(self, shard_count: u64) -> RelayEnvelope {
        let send = |shard: u64, op: u8, payload: Value| RelayEnvelope {
            op: QueueOp::Send,
            shard,
            data: Some(GatewayCommand { op, payload }),
        };

        match self {
            RelayMessage::ForwardRaw { shard, op, payload } => send(shard, op, payload),
            RelayMessage::Reconnect { shard } => RelayEnvelope {
                op: QueueOp::Reconnect,
                shard,
                data: None,
            },
            RelayMessage::UpdateVoice { guild_id, channel_id } => send(
                shard_for_guild(guild_id, shard_count),
                OP_VOICE_STATE_UPDATE,
                json!({
                    "guild_id": guild_id.to_string(),
                    "channel_id": channel_id.map(|c| c.to_string()),
                    "self_mute": false,
                    "self_deaf": false,
                }),
            ),
            RelayMessage::UpdatePresence { shard, activity } => send(
                shard,
                OP_PRESENCE_UPDATE,
                json!({
                    "since": null,
                    "activities": [{ "name": activity.name, "type": activity.kind }],
                    "status": "online",
                    "afk": false,
                }),
            ),
            RelayMessage::RequestMembers { guild_id } => send(
                shard_for_guild(guild_id, shard_count),
                OP_REQUEST_GUILD_MEMBERS,
                json!({
                    "guild_id": guild_id.to_string(),
                    "query": "",
                    "limit": 0,
                }),
            ),
        }
    }
}

/// Producer side of the send lane.
#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<dyn QueueTransport>,
    queue: String,
    shard_count: u64,
}

impl RelayClient {
    pub fn new(transport: Arc<dyn QueueTransport>, queue: impl Into<String>, shard_count: u64) -> Self {
        Self {
            transport,
            queue: queue.into(),
            shard_count,
        }
    }

    pub fn shard_count(&self) -> u64 {
        self.shard_count
    }

    pub fn shard_for_guild(&self, guild_id: u64) -> u64 {
        shard_for_guild(guild_id, self.shard_count)
    }

    pub async fn send(&self, message: RelayMessage) -> Result<(), RelayError> {
        if self.shard_count == 0 {
            return Err(RelayError::NoShards);
        }
        let envelope = message.into_envelope(self.shard_count);
        debug!(shard = envelope.shard, op = ?envelope.op, "Relay publish");
        let payload = serde_json::to_vec(&envelope)?;
        self.transport.push(&self.queue, payload).await
    }

    fn check_shard(&self, shard: u64) -> Result<(), RelayError> {
        if shard >= self.shard_count {
            return Err(RelayError::UnknownShard {
                shard,
                count: self.shard_count,
            });
        }
        Ok(())
    }

    pub async fn forward_raw(&self, shard: u64, op: u8, payload: Value) -> Result<(), RelayError> {
        self.check_shard(shard)?;
        self.send(RelayMessage::ForwardRaw { shard, op, payload }).await
    }

    pub async fn reconnect(&self, shard: u64) -> Result<(), RelayError> {
        self.check_shard(shard)?;
        self.send(RelayMessage::Reconnect { shard }).await
    }

    pub async fn request_members(&self, guild_id: u64) -> Result<(), RelayError> {
        self.send(RelayMessage::RequestMembers { guild_id }).await
    }

    /// Join (`Some`) or leave (`None`) a voice channel.
    pub async fn update_voice(&self, guild_id: u64, channel_id: Option<u64>) -> Result<(), RelayError> {
        self.send(RelayMessage::UpdateVoice { guild_id, channel_id }).await
    }

    /// Presence applies per shard, so it fans out to every shard.
    pub async fn update_presence(&self, activity: Activity) -> Result<(), RelayError> {
        for shard in 0..self.shard_count {
            self.send(RelayMessage::UpdatePresence {
                shard,
                activity: activity.clone(),
            })
            .await?;
        }
        Ok(())
    }
}

/// Consumer side of the receive lane.
pub struct InboundConsumer {
    transport: Arc<dyn QueueTransport>,
    queue: String,
    wait: Duration,
}

impl InboundConsumer {
    pub fn new(transport: Arc<dyn QueueTransport>, queue: impl Into<String>) -> Self {
        Self {
            transport,
            queue: queue.into(),
            wait: Duration::from_secs(1),
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Take one frame and feed it to the pipeline. Returns `Ok(false)` when
    /// the lane was empty for the whole wait.
    pub async fn poll_once(&self, pipeline: &Pipeline) -> Result<bool, RelayError> {
        let Some(raw) = self.transport.pop(&self.queue, self.wait).await? else {
            return Ok(false);
        };

        match decode_frame(&raw) {
            Ok(Some(event)) => {
                pipeline.dispatch(event).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    error = %e,
                    raw = %String::from_utf8_lossy(&raw),
                    "Dropping undecodable relay frame"
                );
            }
        }
        Ok(true)
    }

    /// Drain the lane until the task is aborted.
    pub async fn run(self, pipeline: Arc<Pipeline>) {
        info!(queue = %self.queue, "Relay consumer started");
        loop {
            if let Err(e) = self.poll_once(&pipeline).await {
                warn!(error = %e, queue = %self.queue, "Relay receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
