//! Bus responder backed by the coordinator
//!
//! Answers cache lookups for other processes from the roster, falling back to
//! the chat REST API for users and members that are not cached yet. Unknown
//! guilds, members and channels answer with null.

use super::{
    BusRequest, ChannelInfo, ConnectedInfo, ConnectedQuery, GuildInfo, MemberInfo, MemberQuery, Operation,
    PermissionInfo, PermissionQuery, Responder, RoleInfo, SendMessage, SetConnected, UserInfo,
};
use crate::coordinator::Coordinator;
use crate::guard::HandlerError;
use crate::models::EmbedAuthor;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CoordinatorResponder {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorResponder {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<Value>, HandlerError> {
        let Some(user) = self.coordinator.resolve_user(user_id).await? else {
            return Ok(None);
        };
        encode(UserInfo {
            id: user.id,
            username: user.username,
            discriminator: user.discriminator,
            avatar: user.avatar,
        })
    }

    async fn get_member(&self, query: MemberQuery) -> Result<Option<Value>, HandlerError> {
        let member = match self.coordinator.resolve_member(query.guild, query.member).await {
            Ok(Some(member)) => member,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(guild = query.guild, member = query.member, error = %e, "Member lookup failed");
                return Ok(None);
            }
        };

        let roles = if member.roles.is_empty() {
            vec![query.guild]
        } else {
            member.roles
        };

        encode(MemberInfo {
            id: member.user.id,
            username: member.user.username,
            discriminator: member.user.discriminator,
            avatar: member.user.avatar,
            nickname: member.nick,
            roles,
            joined_at: member.joined_at,
        })
    }

    fn get_guild(&self, guild_id: u64) -> Result<Option<Value>, HandlerError> {
        let info = self.coordinator.roster.with_guild(guild_id, |g| {
            let mut roles: Vec<_> = g
                .roles
                .values()
                .map(|r| RoleInfo {
                    id: r.id,
                    name: r.name.clone(),
                    color: r.color,
                    position: r.position,
                })
                .collect();
            roles.sort_by_key(|r| (r.position, r.id));

            let mut channels: Vec<_> = g
                .channels
                .values()
                .map(|c| ChannelInfo {
                    id: c.id,
                    name: c.name.clone(),
                    kind: c.kind,
                    position: c.position,
                    parent: c.parent_id,
                })
                .collect();
            channels.sort_by_key(|c| (c.position, c.id));

            GuildInfo {
                id: g.id,
                name: g.name.clone(),
                icon: g.icon.clone(),
                region: g.region.clone(),
                owner: g.owner_id,
                member_count: g.member_count,
                roles,
                channels,
            }
        });

        match info {
            Some(info) => encode(info),
            None => Ok(None),
        }
    }

    async fn get_permission(&self, query: PermissionQuery) -> Result<Option<Value>, HandlerError> {
        match self.coordinator.resolve_member(query.guild, query.member).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(guild = query.guild, member = query.member, error = %e, "Member lookup failed");
                return Ok(None);
            }
        }

        let channel = (query.channel != 0).then_some(query.channel);
        match self.coordinator.roster.permissions(query.guild, channel, query.member) {
            Some(permission) => encode(PermissionInfo { permission }),
            None => Ok(None),
        }
    }

    async fn send_message(&self, request: SendMessage) -> Result<Option<Value>, HandlerError> {
        let Some(guild_id) = self.coordinator.roster.guild_for_channel(request.channel) else {
            debug!(channel = request.channel, "Message for unknown channel dropped");
            return Ok(None);
        };

        let mut embed = self
            .coordinator
            .embed(Some(guild_id), request.title, request.content);

        if let Some(member) = request
            .author
            .and_then(|author| self.coordinator.roster.member(guild_id, author))
        {
            embed.author = Some(EmbedAuthor {
                name: member.user.tag(),
                icon_url: Some(member.user.avatar_url()),
            });
        }

        self.coordinator.discord.send_embed(request.channel, &embed).await?;
        Ok(None)
    }

    fn get_connected(&self, query: ConnectedQuery) -> Result<Option<Value>, HandlerError> {
        let member = match query.member {
            Some(id) if id != 0 => id,
            _ => self.coordinator.bot_user.id,
        };

        let info = self
            .coordinator
            .roster
            .with_guild(query.guild, |g| {
                let channel = g.voice_channel_of(member)?;
                let mut members: Vec<_> = g
                    .voice_states
                    .values()
                    .filter(|v| v.channel_id == Some(channel))
                    .map(|v| v.user_id)
                    .collect();
                members.sort_unstable();
                Some(ConnectedInfo { channel, members })
            })
            .flatten();

        match info {
            Some(info) => encode(info),
            None => Ok(None),
        }
    }

    async fn set_connected(&self, request: SetConnected) -> Result<Option<Value>, HandlerError> {
        let roster = &self.coordinator.roster;
        if !roster.contains(request.guild) {
            return Ok(None);
        }

        match request.channel.filter(|c| *c != 0) {
            None => {
                self.coordinator.relay.update_voice(request.guild, None).await?;
            }
            Some(channel) => {
                let known = roster
                    .with_guild(request.guild, |g| g.channels.contains_key(&channel))
                    .unwrap_or(false);
                if !known {
                    warn!(guild = request.guild, channel, "Voice join for unknown channel ignored");
                    return Ok(None);
                }
                self.coordinator
                    .relay
                    .update_voice(request.guild, Some(channel))
                    .await?;
            }
        }
        Ok(None)
    }
}

fn encode<T: Serialize>(value: T) -> Result<Option<Value>, HandlerError> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| HandlerError::Fault(format!("unencodable response: {}", e)))
}

#[async_trait]
impl Responder for CoordinatorResponder {
    fn implements(&self, op: Operation) -> bool {
        !matches!(op, Operation::VoiceUpdate | Operation::Response)
    }

    async fn handle(&self, request: BusRequest) -> Result<Option<Value>, HandlerError> {
        match request {
            BusRequest::GetUser(q) => self.get_user(q.user).await,
            BusRequest::GetMember(q) => self.get_member(q).await,
            BusRequest::GetGuild(q) => self.get_guild(q.guild),
            BusRequest::GetPermission(q) => self.get_permission(q).await,
            BusRequest::SendMessage(m) => self.send_message(m).await,
            BusRequest::GetConnected(q) => self.get_connected(q),
            BusRequest::SetConnected(s) => self.set_connected(s).await,
            BusRequest::VoiceUpdate(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{GuildQuery, UserQuery};
    use crate::command::Router;
    use crate::gateway::{GatewayEvent, GuildPayload};
    use crate::models::{Channel, Member, Role, User, VoiceState};
    use crate::testing::{harness, Harness, BOT_ID};
    use serde_json::json;

    fn user(id: u64) -> User {
        User {
            id,
            username: format!("user{}", id),
            discriminator: "0001".into(),
            ..Default::default()
        }
    }

    fn member(id: u64, roles: Vec<u64>) -> Member {
        Member {
            user: user(id),
            roles,
            ..Default::default()
        }
    }

    fn voice(user_id: u64, channel: u64) -> VoiceState {
        VoiceState {
            guild_id: Some(10),
            channel_id: Some(channel),
            user_id,
            session_id: "s".into(),
            member: None,
        }
    }

    fn setup() -> (Harness, CoordinatorResponder) {
        let h = harness(Router::default()).unwrap();
        h.coordinator.roster.apply(&GatewayEvent::GuildCreate(GuildPayload {
            id: 10,
            name: "Guild".into(),
            owner_id: Some(1),
            roles: vec![
                Role {
                    id: 10,
                    name: "@everyone".into(),
                    permissions: 1 << 11,
                    ..Default::default()
                },
                Role {
                    id: 20,
                    name: "DJ".into(),
                    position: 1,
                    color: 0x00FF00,
                    permissions: 1 << 20,
                },
            ],
            channels: vec![
                Channel {
                    id: 100,
                    name: Some("general".into()),
                    ..Default::default()
                },
                Channel {
                    id: 200,
                    name: Some("Music".into()),
                    kind: 2,
                    position: 1,
                    ..Default::default()
                },
            ],
            members: vec![member(1, vec![]), member(2, vec![20]), member(BOT_ID, vec![])],
            voice_states: vec![voice(2, 200), voice(BOT_ID, 200)],
            ..Default::default()
        }));
        let responder = CoordinatorResponder::new(h.coordinator.clone());
        (h, responder)
    }

    #[tokio::test]
    async fn test_get_user_roster_then_rest() {
        let (h, responder) = setup();

        let cached = responder.handle(BusRequest::GetUser(UserQuery { user: 2 })).await.unwrap();
        assert_eq!(cached.unwrap()["username"], "user2");

        h.messenger.add_user(user(77));
        let fetched = responder.handle(BusRequest::GetUser(UserQuery { user: 77 })).await.unwrap();
        assert_eq!(fetched.unwrap()["id"], "77");

        let missing = responder.handle(BusRequest::GetUser(UserQuery { user: 5 })).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_member_defaults_roles_to_everyone() {
        let (_h, responder) = setup();
        let value = responder
            .handle(BusRequest::GetMember(MemberQuery { guild: 10, member: 1 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["roles"], json!(["10"]));

        let unknown_guild = responder
            .handle(BusRequest::GetMember(MemberQuery { guild: 11, member: 1 }))
            .await
            .unwrap();
        assert!(unknown_guild.is_none());
    }

    #[tokio::test]
    async fn test_get_guild_lists_roles_and_channels() {
        let (_h, responder) = setup();
        let value = responder
            .handle(BusRequest::GetGuild(GuildQuery { guild: 10 }))
            .await
            .unwrap()
            .unwrap();
        let info: GuildInfo = serde_json::from_value(value).unwrap();
        assert_eq!(info.name, "Guild");
        assert_eq!(info.owner, 1);
        assert_eq!(info.roles.len(), 2);
        assert_eq!(info.channels.iter().map(|c| c.id).collect::<Vec<_>>(), vec![100, 200]);
    }

    #[tokio::test]
    async fn test_get_permission() {
        let (_h, responder) = setup();
        let value = responder
            .handle(BusRequest::GetPermission(PermissionQuery {
                guild: 10,
                member: 2,
                channel: 0,
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["permission"], json!((1u64 << 11) | (1 << 20)));
    }

    #[tokio::test]
    async fn test_get_connected_defaults_to_bot() {
        let (_h, responder) = setup();
        let value = responder
            .handle(BusRequest::GetConnected(ConnectedQuery { guild: 10, member: None }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!({"channel": "200", "members": ["2", BOT_ID.to_string()]}));

        let absent = responder
            .handle(BusRequest::GetConnected(ConnectedQuery {
                guild: 10,
                member: Some(1),
            }))
            .await
            .unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn test_send_message_attaches_author() {
        let (h, responder) = setup();
        let reply = responder
            .handle(BusRequest::SendMessage(SendMessage {
                channel: 100,
                title: "Now Playing".into(),
                content: "A song".into(),
                author: Some(2),
            }))
            .await
            .unwrap();
        assert!(reply.is_none());

        let embeds = h.messenger.embeds(100);
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds[0].title.as_deref(), Some("Now Playing"));
        assert_eq!(embeds[0].author.as_ref().map(|a| a.name.as_str()), Some("user2#0001"));
    }

    #[tokio::test]
    async fn test_set_connected_sends_voice_state() {
        let (h, responder) = setup();
        responder
            .handle(BusRequest::SetConnected(SetConnected {
                guild: 10,
                channel: Some(200),
            }))
            .await
            .unwrap();
        responder
            .handle(BusRequest::SetConnected(SetConnected {
                guild: 10,
                channel: Some(0),
            }))
            .await
            .unwrap();
        // Unknown channel is ignored.
        responder
            .handle(BusRequest::SetConnected(SetConnected {
                guild: 10,
                channel: Some(999),
            }))
            .await
            .unwrap();

        let frames = h.queue.drain(&h.coordinator.config.relay_send_queue);
        assert_eq!(frames.len(), 2);
        let join: Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(join["data"]["d"]["channel_id"], "200");
        let leave: Value = serde_json::from_slice(&frames[1]).unwrap();
        assert_eq!(leave["data"]["d"]["channel_id"], Value::Null);
    }

    #[test]
    fn test_implements_everything_but_notifications() {
        let h = harness(Router::default()).unwrap();
        let responder = CoordinatorResponder::new(h.coordinator.clone());
        assert!(responder.implements(Operation::GetGuild));
        assert!(!responder.implements(Operation::VoiceUpdate));
        assert!(!responder.implements(Operation::Response));
    }
}
