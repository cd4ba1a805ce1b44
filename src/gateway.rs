//! Gateway frame decoding
//!
//! The connector forwards raw dispatch frames as `{op, t, d}` (older builds
//! use `type` and `raw_payload`). Known event types decode into typed
//! payloads; everything else is dropped with a log line.

use crate::models::{snowflake, Channel, Member, Message, Role, User, VoiceState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Gateway opcode for dispatch frames.
pub const OP_DISPATCH: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Frame(#[source] serde_json::Error),

    #[error("Undecodable {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw frame as pushed by the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    #[serde(default)]
    pub op: u8,
    #[serde(rename = "t", alias = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "d", alias = "raw_payload", default)]
    pub data: Value,
}

macro_rules! event_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Event types the pipeline understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($variant),+
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name),+
                }
            }

            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(EventKind::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

event_kinds! {
    Ready => "READY",
    GuildCreate => "GUILD_CREATE",
    GuildUpdate => "GUILD_UPDATE",
    GuildDelete => "GUILD_DELETE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnavailableGuild {
    #[serde(with = "snowflake")]
    pub id: u64,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    #[serde(default)]
    pub shard: Option<[u64; 2]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildPayload {
    #[serde(with = "snowflake")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, with = "snowflake::option")]
    pub owner_id: Option<u64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberEvent {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    #[serde(flatten)]
    pub member: Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberRemove {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunk {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleEvent {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRoleDelete {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    #[serde(with = "snowflake")]
    pub role_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Decoded dispatch payload.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(Ready),
    GuildCreate(GuildPayload),
    GuildUpdate(GuildPayload),
    GuildDelete(UnavailableGuild),
    GuildMemberAdd(GuildMemberEvent),
    GuildMemberUpdate(GuildMemberEvent),
    GuildMemberRemove(GuildMemberRemove),
    GuildMembersChunk(GuildMembersChunk),
    GuildRoleCreate(GuildRoleEvent),
    GuildRoleUpdate(GuildRoleEvent),
    GuildRoleDelete(GuildRoleDelete),
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    MessageCreate(Message),
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServerUpdate),
}

impl GatewayEvent {
    pub fn decode(kind: EventKind, data: Value) -> Result<Self, serde_json::Error> {
        use serde_json::from_value as de;
        Ok(match kind {
            EventKind::Ready => Self::Ready(de(data)?),
            EventKind::GuildCreate => Self::GuildCreate(de(data)?),
            EventKind::GuildUpdate => Self::GuildUpdate(de(data)?),
            EventKind::GuildDelete => Self::GuildDelete(de(data)?),
            EventKind::GuildMemberAdd => Self::GuildMemberAdd(de(data)?),
            EventKind::GuildMemberUpdate => Self::GuildMemberUpdate(de(data)?),
            EventKind::GuildMemberRemove => Self::GuildMemberRemove(de(data)?),
            EventKind::GuildMembersChunk => Self::GuildMembersChunk(de(data)?),
            EventKind::GuildRoleCreate => Self::GuildRoleCreate(de(data)?),
            EventKind::GuildRoleUpdate => Self::GuildRoleUpdate(de(data)?),
            EventKind::GuildRoleDelete => Self::GuildRoleDelete(de(data)?),
            EventKind::ChannelCreate => Self::ChannelCreate(de(data)?),
            EventKind::ChannelUpdate => Self::ChannelUpdate(de(data)?),
            EventKind::ChannelDelete => Self::ChannelDelete(de(data)?),
            EventKind::MessageCreate => Self::MessageCreate(de(data)?),
            EventKind::VoiceStateUpdate => Self::VoiceStateUpdate(de(data)?),
            EventKind::VoiceServerUpdate => Self::VoiceServerUpdate(de(data)?),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready(_) => EventKind::Ready,
            Self::GuildCreate(_) => EventKind::GuildCreate,
            Self::GuildUpdate(_) => EventKind::GuildUpdate,
            Self::GuildDelete(_) => EventKind::GuildDelete,
            Self::GuildMemberAdd(_) => EventKind::GuildMemberAdd,
            Self::GuildMemberUpdate(_) => EventKind::GuildMemberUpdate,
            Self::GuildMemberRemove(_) => EventKind::GuildMemberRemove,
            Self::GuildMembersChunk(_) => EventKind::GuildMembersChunk,
            Self::GuildRoleCreate(_) => EventKind::GuildRoleCreate,
            Self::GuildRoleUpdate(_) => EventKind::GuildRoleUpdate,
            Self::GuildRoleDelete(_) => EventKind::GuildRoleDelete,
            Self::ChannelCreate(_) => EventKind::ChannelCreate,
            Self::ChannelUpdate(_) => EventKind::ChannelUpdate,
            Self::ChannelDelete(_) => EventKind::ChannelDelete,
            Self::MessageCreate(_) => EventKind::MessageCreate,
            Self::VoiceStateUpdate(_) => EventKind::VoiceStateUpdate,
            Self::VoiceServerUpdate(_) => EventKind::VoiceServerUpdate,
        }
    }

    fn context(&self) -> (Option<u64>, Option<u64>) {
        match self {
            Self::Ready(_) => (None, None),
            Self::GuildCreate(g) | Self::GuildUpdate(g) => (Some(g.id), None),
            Self::GuildDelete(g) => (Some(g.id), None),
            Self::GuildMemberAdd(e) | Self::GuildMemberUpdate(e) => (Some(e.guild_id), None),
            Self::GuildMemberRemove(e) => (Some(e.guild_id), None),
            Self::GuildMembersChunk(e) => (Some(e.guild_id), None),
            Self::GuildRoleCreate(e) | Self::GuildRoleUpdate(e) => (Some(e.guild_id), None),
            Self::GuildRoleDelete(e) => (Some(e.guild_id), None),
            Self::ChannelCreate(c) | Self::ChannelUpdate(c) | Self::ChannelDelete(c) => {
                (c.guild_id, Some(c.id))
            }
            Self::MessageCreate(m) => (m.guild_id, Some(m.channel_id)),
            Self::VoiceStateUpdate(v) => (v.guild_id, v.channel_id),
            Self::VoiceServerUpdate(v) => (Some(v.guild_id), None),
        }
    }
}

/// Immutable envelope handed to pipeline handlers.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub payload: GatewayEvent,
    pub guild_id: Option<u64>,
    pub channel_id: Option<u64>,
}

impl Event {
    pub fn new(payload: GatewayEvent) -> Self {
        let (guild_id, channel_id) = payload.context();
        Self {
            kind: payload.kind(),
            payload,
            guild_id,
            channel_id,
        }
    }
}

/// Decode one raw relay frame. `Ok(None)` means the frame is valid but not
/// something the pipeline handles.
pub fn decode_frame(raw: &[u8]) -> Result<Option<Event>, DecodeError> {
    let frame: GatewayFrame = serde_json::from_slice(raw).map_err(DecodeError::Frame)?;

    if frame.op != OP_DISPATCH {
        debug!(op = frame.op, "Skipping non-dispatch frame");
        return Ok(None);
    }

    let Some(name) = frame.kind else {
        debug!("Skipping dispatch frame without a type");
        return Ok(None);
    };

    let Some(kind) = EventKind::parse(&name) else {
        warn!(event = %name, "Unknown event type, dropping");
        return Ok(None);
    };

    let payload = GatewayEvent::decode(kind, frame.data)
        .map_err(|source| DecodeError::Payload { kind, source })?;

    Ok(Some(Event::new(payload)))
}
