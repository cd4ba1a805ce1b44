//! Request and response bodies carried in bus envelopes

use super::Operation;
use crate::models::snowflake;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuery {
    #[serde(with = "snowflake")]
    pub user: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildQuery {
    #[serde(with = "snowflake")]
    pub guild: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberQuery {
    #[serde(with = "snowflake")]
    pub guild: u64,
    #[serde(with = "snowflake")]
    pub member: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionQuery {
    #[serde(with = "snowflake")]
    pub guild: u64,
    #[serde(with = "snowflake")]
    pub member: u64,
    #[serde(with = "snowflake")]
    pub channel: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    #[serde(with = "snowflake")]
    pub channel: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, with = "snowflake::option")]
    pub author: Option<u64>,
}

/// `member` defaults to the bot itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedQuery {
    #[serde(with = "snowflake")]
    pub guild: u64,
    #[serde(default, with = "snowflake::option")]
    pub member: Option<u64>,
}

/// `channel` absent or zero means leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConnected {
    #[serde(with = "snowflake")]
    pub guild: u64,
    #[serde(default, with = "snowflake::option")]
    pub channel: Option<u64>,
}

/// Voice credentials forwarded to the audio node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceUpdate {
    pub session: String,
    #[serde(with = "snowflake")]
    pub guild: u64,
    pub endpoint: String,
    pub token: String,
}

/// Decoded request, one variant per operation a responder can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusRequest {
    GetUser(UserQuery),
    GetMember(MemberQuery),
    GetGuild(GuildQuery),
    GetPermission(PermissionQuery),
    SendMessage(SendMessage),
    GetConnected(ConnectedQuery),
    SetConnected(SetConnected),
    VoiceUpdate(VoiceUpdate),
}

impl BusRequest {
    /// `Ok(None)` for `response`, which is never a request.
    pub fn decode(op: Operation, data: Value) -> Result<Option<Self>, serde_json::Error> {
        use serde_json::from_value as de;
        Ok(Some(match op {
            Operation::GetUser => Self::GetUser(de(data)?),
            Operation::GetMember => Self::GetMember(de(data)?),
            Operation::GetGuild => Self::GetGuild(de(data)?),
            Operation::GetPermission => Self::GetPermission(de(data)?),
            Operation::SendMessage => Self::SendMessage(de(data)?),
            Operation::GetConnected => Self::GetConnected(de(data)?),
            Operation::SetConnected => Self::SetConnected(de(data)?),
            Operation::VoiceUpdate => Self::VoiceUpdate(de(data)?),
            Operation::Response => return Ok(None),
        }))
    }

    pub fn op(&self) -> Operation {
        match self {
            Self::GetUser(_) => Operation::GetUser,
            Self::GetMember(_) => Operation::GetMember,
            Self::GetGuild(_) => Operation::GetGuild,
            Self::GetPermission(_) => Operation::GetPermission,
            Self::SendMessage(_) => Operation::SendMessage,
            Self::GetConnected(_) => Operation::GetConnected,
            Self::SetConnected(_) => Operation::SetConnected,
            Self::VoiceUpdate(_) => Operation::VoiceUpdate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub nickname: Option<String>,
    #[serde(with = "snowflake::vec")]
    pub roles: Vec<u64>,
    pub joined_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub name: String,
    pub color: u32,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub name: Option<String>,
    pub kind: u8,
    pub position: i64,
    #[serde(with = "snowflake::option")]
    pub parent: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub name: String,
    pub icon: Option<String>,
    pub region: Option<String>,
    #[serde(with = "snowflake")]
    pub owner: u64,
    pub member_count: u64,
    pub roles: Vec<RoleInfo>,
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub permission: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    #[serde(with = "snowflake")]
    pub channel: u64,
    #[serde(with = "snowflake::vec")]
    pub members: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_accepts_numeric_and_string_ids() {
        let a = BusRequest::decode(Operation::GetMember, json!({"guild": 1, "member": "2"}))
            .unwrap()
            .unwrap();
        assert_eq!(a, BusRequest::GetMember(MemberQuery { guild: 1, member: 2 }));
        assert_eq!(a.op(), Operation::GetMember);
    }

    #[test]
    fn test_response_is_not_a_request() {
        assert!(BusRequest::decode(Operation::Response, json!(null)).unwrap().is_none());
    }

    #[test]
    fn test_set_connected_channel_optional() {
        let req = BusRequest::decode(Operation::SetConnected, json!({"guild": "5"}))
            .unwrap()
            .unwrap();
        assert_eq!(req, BusRequest::SetConnected(SetConnected { guild: 5, channel: None }));
    }

    #[test]
    fn test_bad_payload_fails() {
        assert!(BusRequest::decode(Operation::GetUser, json!({"member": 1})).is_err());
    }
}
