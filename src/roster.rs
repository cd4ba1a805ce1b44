//! In-memory guild roster
//!
//! Guilds, channels, roles, members and voice states as seen through the
//! gateway. Each guild sits behind its own read/write lock so readers of one
//! guild never wait on writers of another. Guards are `parking_lot` guards,
//! which are not `Send` and so cannot be held across an `.await` in a task.

use crate::gateway::{GatewayEvent, GuildPayload, Ready};
use crate::models::{permissions, Channel, Member, Role, User, VoiceState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Cached state of one guild.
#[derive(Debug, Clone, Default)]
pub struct GuildState {
    pub id: u64,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: u64,
    pub region: Option<String>,
    pub member_count: u64,
    pub unavailable: bool,
    pub roles: HashMap<u64, Role>,
    pub channels: HashMap<u64, Channel>,
    pub members: HashMap<u64, Member>,
    pub voice_states: HashMap<u64, VoiceState>,
}

impl GuildState {
    pub fn from_payload(payload: GuildPayload) -> Self {
        let member_count = payload
            .member_count
            .unwrap_or(payload.members.len() as u64);
        Self {
            id: payload.id,
            name: payload.name,
            icon: payload.icon,
            owner_id: payload.owner_id.unwrap_or_default(),
            region: payload.region,
            member_count,
            unavailable: payload.unavailable,
            roles: payload.roles.into_iter().map(|r| (r.id, r)).collect(),
            channels: payload
                .channels
                .into_iter()
                .map(|mut c| {
                    c.guild_id = Some(payload.id);
                    (c.id, c)
                })
                .collect(),
            members: payload
                .members
                .into_iter()
                .map(|m| (m.user.id, m))
                .collect(),
            voice_states: payload
                .voice_states
                .into_iter()
                .filter(|v| v.channel_id.is_some())
                .map(|mut v| {
                    v.guild_id = Some(payload.id);
                    (v.user_id, v)
                })
                .collect(),
        }
    }

    fn merge_update(&mut self, payload: GuildPayload) {
        self.name = payload.name;
        self.icon = payload.icon;
        if let Some(owner) = payload.owner_id {
            self.owner_id = owner;
        }
        if payload.region.is_some() {
            self.region = payload.region;
        }
        if !payload.roles.is_empty() {
            self.roles = payload.roles.into_iter().map(|r| (r.id, r)).collect();
        }
    }

    /// Effective permission bits of a member, optionally in a channel.
    pub fn permissions(&self, user_id: u64, channel_id: Option<u64>) -> Option<u64> {
        if user_id == self.owner_id {
            return Some(permissions::ALL);
        }

        let member = self.members.get(&user_id)?;

        let mut base = self.roles.get(&self.id).map(|r| r.permissions).unwrap_or(0);
        for role in member.roles.iter().filter_map(|id| self.roles.get(id)) {
            base |= role.permissions;
        }

        if base & permissions::ADMINISTRATOR != 0 {
            return Some(permissions::ALL);
        }

        let Some(channel) = channel_id.and_then(|id| self.channels.get(&id)) else {
            return Some(base);
        };

        let overwrites = &channel.permission_overwrites;

        if let Some(everyone) = overwrites.iter().find(|o| o.id == self.id) {
            base &= !everyone.deny;
            base |= everyone.allow;
        }

        let (mut allow, mut deny) = (0, 0);
        for o in overwrites
            .iter()
            .filter(|o| o.kind == 0 && o.id != self.id && member.roles.contains(&o.id))
        {
            allow |= o.allow;
            deny |= o.deny;
        }
        base &= !deny;
        base |= allow;

        if let Some(own) = overwrites.iter().find(|o| o.kind == 1 && o.id == user_id) {
            base &= !own.deny;
            base |= own.allow;
        }

        Some(base)
    }

    pub fn voice_channel_of(&self, user_id: u64) -> Option<u64> {
        self.voice_states.get(&user_id).and_then(|v| v.channel_id)
    }

    pub fn voice_connections(&self, channel_id: u64) -> usize {
        self.voice_states
            .values()
            .filter(|v| v.channel_id == Some(channel_id))
            .count()
    }

    /// Colour of the member's highest coloured role.
    pub fn member_color(&self, user_id: u64) -> Option<u32> {
        let member = self.members.get(&user_id)?;
        member
            .roles
            .iter()
            .filter_map(|id| self.roles.get(id))
            .filter(|r| r.color != 0)
            .max_by_key(|r| r.position)
            .map(|r| r.color)
    }

    fn upsert_member(&mut self, member: Member) {
        let id = member.user.id;
        match self.members.get_mut(&id) {
            Some(existing) => {
                existing.user = member.user;
                existing.nick = member.nick;
                existing.roles = member.roles;
                if member.joined_at.is_some() {
                    existing.joined_at = member.joined_at;
                }
            }
            None => {
                self.members.insert(id, member);
            }
        }
    }
}

/// Current gateway session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user: User,
    pub shard: Option<[u64; 2]>,
}

/// Aggregate counts for the stats job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterCounts {
    pub guilds: usize,
    pub roles: usize,
    pub channels: usize,
    pub members: u64,
    pub voices: usize,
}

pub type GuildHandle = Arc<RwLock<GuildState>>;

#[derive(Default)]
pub struct Roster {
    guilds: RwLock<HashMap<u64, GuildHandle>>,
    channel_index: RwLock<HashMap<u64, u64>>,
    session: RwLock<Option<Session>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one gateway event.
    pub fn apply(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Ready(ready) => self.apply_ready(ready),
            GatewayEvent::GuildCreate(payload) => {
                if payload.unavailable {
                    self.mark_unavailable(payload.id);
                } else {
                    self.insert_guild(GuildState::from_payload(payload.clone()));
                }
            }
            GatewayEvent::GuildUpdate(payload) => {
                self.update_guild(payload.id, |g| g.merge_update(payload.clone()));
            }
            GatewayEvent::GuildDelete(deleted) => {
                if deleted.unavailable {
                    self.mark_unavailable(deleted.id);
                } else {
                    self.remove_guild(deleted.id);
                }
            }
            GatewayEvent::GuildMemberAdd(e) => {
                self.update_guild(e.guild_id, |g| {
                    if !g.members.contains_key(&e.member.user.id) {
                        g.member_count += 1;
                    }
                    g.upsert_member(e.member.clone());
                });
            }
            GatewayEvent::GuildMemberUpdate(e) => {
                self.update_guild(e.guild_id, |g| g.upsert_member(e.member.clone()));
            }
            GatewayEvent::GuildMemberRemove(e) => {
                self.update_guild(e.guild_id, |g| {
                    g.members.remove(&e.user.id);
                    g.voice_states.remove(&e.user.id);
                    g.member_count = g.member_count.saturating_sub(1);
                });
            }
            GatewayEvent::GuildMembersChunk(e) => {
                self.update_guild(e.guild_id, |g| {
                    for member in &e.members {
                        g.upsert_member(member.clone());
                    }
                });
            }
            GatewayEvent::GuildRoleCreate(e) | GatewayEvent::GuildRoleUpdate(e) => {
                self.update_guild(e.guild_id, |g| {
                    g.roles.insert(e.role.id, e.role.clone());
                });
            }
            GatewayEvent::GuildRoleDelete(e) => {
                self.update_guild(e.guild_id, |g| {
                    g.roles.remove(&e.role_id);
                    for member in g.members.values_mut() {
                        member.roles.retain(|r| *r != e.role_id);
                    }
                });
            }
            GatewayEvent::ChannelCreate(c) | GatewayEvent::ChannelUpdate(c) => {
                if let Some(guild_id) = c.guild_id {
                    self.update_guild(guild_id, |g| {
                        g.channels.insert(c.id, c.clone());
                    });
                    self.channel_index.write().insert(c.id, guild_id);
                }
            }
            GatewayEvent::ChannelDelete(c) => {
                if let Some(guild_id) = c.guild_id {
                    self.update_guild(guild_id, |g| {
                        g.channels.remove(&c.id);
                    });
                }
                self.channel_index.write().remove(&c.id);
            }
            GatewayEvent::VoiceStateUpdate(v) => {
                if let Some(guild_id) = v.guild_id {
                    self.update_guild(guild_id, |g| {
                        if let Some(member) = &v.member {
                            g.upsert_member(member.clone());
                        }
                        match v.channel_id {
                            Some(_) => {
                                let mut state = v.clone();
                                state.member = None;
                                g.voice_states.insert(v.user_id, state);
                            }
                            None => {
                                g.voice_states.remove(&v.user_id);
                            }
                        }
                    });
                }
            }
            GatewayEvent::MessageCreate(_) | GatewayEvent::VoiceServerUpdate(_) => {}
        }
    }

    fn apply_ready(&self, ready: &Ready) {
        *self.session.write() = Some(Session {
            session_id: ready.session_id.clone(),
            user: ready.user.clone(),
            shard: ready.shard,
        });
        // Guilds listed in READY are not new joins when their GUILD_CREATE lands.
        for guild in &ready.guilds {
            if !self.contains(guild.id) {
                self.mark_unavailable(guild.id);
            }
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Insert or replace a guild wholesale.
    pub fn insert_guild(&self, state: GuildState) {
        let id = state.id;
        {
            let mut index = self.channel_index.write();
            index.retain(|_, g| *g != id);
            for channel in state.channels.keys() {
                index.insert(*channel, id);
            }
        }
        self.guilds.write().insert(id, Arc::new(RwLock::new(state)));
    }

    pub fn remove_guild(&self, id: u64) -> Option<GuildState> {
        let removed = self.guilds.write().remove(&id)?;
        self.channel_index.write().retain(|_, g| *g != id);
        let state = removed.read().clone();
        Some(state)
    }

    fn mark_unavailable(&self, id: u64) {
        let handle = self.guilds.write().entry(id).or_insert_with(|| {
            Arc::new(RwLock::new(GuildState {
                id,
                ..Default::default()
            }))
        }).clone();
        handle.write().unavailable = true;
    }

    fn update_guild(&self, id: u64, f: impl FnOnce(&mut GuildState)) {
        match self.guild(id) {
            Some(handle) => f(&mut *handle.write()),
            None => debug!(guild = id, "Event for uncached guild"),
        }
    }

    pub fn guild(&self, id: u64) -> Option<GuildHandle> {
        self.guilds.read().get(&id).cloned()
    }

    /// Run `f` under the guild's read lock.
    pub fn with_guild<R>(&self, id: u64, f: impl FnOnce(&GuildState) -> R) -> Option<R> {
        let handle = self.guild(id)?;
        let guard = handle.read();
        Some(f(&*guard))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.guilds.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.guilds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.read().is_empty()
    }

    /// Handles of every cached guild, taken under the outer lock.
    pub fn handles(&self) -> Vec<GuildHandle> {
        self.guilds.read().values().cloned().collect()
    }

    pub fn guild_for_channel(&self, channel_id: u64) -> Option<u64> {
        self.channel_index.read().get(&channel_id).copied()
    }

    /// Store a member fetched over REST. No-op for uncached guilds.
    pub fn cache_member(&self, guild_id: u64, member: Member) {
        self.update_guild(guild_id, |g| g.upsert_member(member));
    }

    pub fn member(&self, guild_id: u64, user_id: u64) -> Option<Member> {
        self.with_guild(guild_id, |g| g.members.get(&user_id).cloned())
            .flatten()
    }

    /// Look a user up in any cached guild.
    pub fn user(&self, user_id: u64) -> Option<User> {
        self.handles()
            .iter()
            .find_map(|h| h.read().members.get(&user_id).map(|m| m.user.clone()))
    }

    pub fn permissions(&self, guild_id: u64, channel_id: Option<u64>, user_id: u64) -> Option<u64> {
        self.with_guild(guild_id, |g| g.permissions(user_id, channel_id))
            .flatten()
    }

    pub fn voice_channel_of(&self, guild_id: u64, user_id: u64) -> Option<u64> {
        self.with_guild(guild_id, |g| g.voice_channel_of(user_id))
            .flatten()
    }

    pub fn voice_connections(&self, guild_id: u64, channel_id: u64) -> usize {
        self.with_guild(guild_id, |g| g.voice_connections(channel_id))
            .unwrap_or(0)
    }

    /// Guilds where `user_id` currently sits in a voice channel.
    pub fn voice_guilds(&self, user_id: u64) -> Vec<u64> {
        self.handles()
            .iter()
            .filter_map(|h| {
                let g = h.read();
                g.voice_states.contains_key(&user_id).then_some(g.id)
            })
            .collect()
    }

    pub fn counts(&self) -> RosterCounts {
        let mut counts = RosterCounts::default();
        for handle in self.handles() {
            let g = handle.read();
            counts.guilds += 1;
            counts.roles += g.roles.len();
            counts.channels += g.channels.len();
            counts.members += g.member_count;
            counts.voices += g.voice_states.len();
        }
        counts
    }
}
