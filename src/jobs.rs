//! Periodic flush jobs
//!
//! Publishes roster-derived data to the key-value store for the REST backend:
//! - **guilds**: one short-lived `guild:<id>` summary per cached guild
//! - **stats**: aggregate counts under `bot_stats`
//! - **admins**: `bot_admins` / `bot_owners` rebuilt from main-guild roles
//!
//! Each job ticks on its own task. A failed tick is logged and the next tick
//! starts from scratch.

use crate::coordinator::Coordinator;
use crate::kv::{guild_key, strip_quotes, KvError, KEY_BOT_ADMINS, KEY_BOT_OWNERS, KEY_BOT_STATS, KEY_STARTED};
use crate::models::snowflake;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifetime of a `guild:<id>` summary. Outlives a few flush intervals so a
/// missed tick does not blank the dashboard.
pub const GUILD_SUMMARY_TTL: Duration = Duration::from_secs(15);

const TEMP_SUFFIX: &str = "_tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSummary {
    #[serde(with = "snowflake")]
    pub id: u64,
    pub name: String,
    pub icon: Option<String>,
    #[serde(with = "snowflake")]
    pub owner: u64,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotStats {
    pub version: String,
    pub started: String,
    pub shards: u64,
    pub guilds: usize,
    pub roles: usize,
    pub channels: usize,
    pub members: u64,
    /// Guilds where the bot sits in a voice channel.
    pub voices: usize,
}

pub async fn flush_guilds(coordinator: &Coordinator) -> Result<usize, KvError> {
    let summaries: Vec<GuildSummary> = coordinator
        .roster
        .handles()
        .iter()
        .filter_map(|handle| {
            let g = handle.read();
            // Placeholders have no identity yet.
            (!g.unavailable).then(|| GuildSummary {
                id: g.id,
                name: g.name.clone(),
                icon: g.icon.clone(),
                owner: g.owner_id,
                member_count: g.member_count,
            })
        })
        .collect();

    for summary in &summaries {
        let value = serde_json::to_string(summary).map_err(|e| KvError::Invalid {
            key: guild_key(summary.id),
            value: e.to_string(),
        })?;
        coordinator
            .kv
            .set(&guild_key(summary.id), &value, Some(GUILD_SUMMARY_TTL))
            .await?;
    }
    Ok(summaries.len())
}

pub async fn flush_stats(coordinator: &Coordinator) -> Result<BotStats, KvError> {
    let started = coordinator
        .kv
        .get(KEY_STARTED)
        .await?
        .map(|raw| strip_quotes(&raw).to_string())
        .unwrap_or_default();

    let counts = coordinator.roster.counts();
    let stats = BotStats {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started,
        shards: coordinator.relay.shard_count(),
        guilds: counts.guilds,
        roles: counts.roles,
        channels: counts.channels,
        members: counts.members,
        voices: coordinator.roster.voice_guilds(coordinator.bot_user.id).len(),
    };

    let value = serde_json::to_string(&stats).map_err(|e| KvError::Invalid {
        key: KEY_BOT_STATS.to_string(),
        value: e.to_string(),
    })?;
    coordinator.kv.set(KEY_BOT_STATS, &value, None).await?;
    Ok(stats)
}

/// Owners are admins too. Returns `(admins, owners)`.
fn privileged_members(coordinator: &Coordinator) -> Option<(Vec<String>, Vec<String>)> {
    let config = &coordinator.config;
    coordinator.roster.with_guild(config.main_guild, |g| {
        let mut admins = Vec::new();
        let mut owners = Vec::new();
        for member in g.members.values() {
            let owner = member.roles.contains(&config.bot_owner_role);
            let admin = owner || member.roles.contains(&config.bot_admin_role);
            if admin {
                admins.push(member.user.id.to_string());
            }
            if owner {
                owners.push(member.user.id.to_string());
            }
        }
        admins.sort();
        owners.sort();
        (admins, owners)
    })
}

/// Build the set under a temporary key, then swap it in.
async fn replace_set(coordinator: &Coordinator, key: &str, members: &[String]) -> Result<(), KvError> {
    if members.is_empty() {
        return coordinator.kv.delete(key).await;
    }
    let temp = format!("{}{}", key, TEMP_SUFFIX);
    coordinator.kv.delete(&temp).await?;
    coordinator.kv.add_members(&temp, members).await?;
    coordinator.kv.rename(&temp, key).await
}

/// `Ok(false)` when the main guild is not cached yet.
pub async fn flush_admins(coordinator: &Coordinator) -> Result<bool, KvError> {
    let Some((admins, owners)) = privileged_members(coordinator) else {
        return Ok(false);
    };
    replace_set(coordinator, KEY_BOT_ADMINS, &admins).await?;
    replace_set(coordinator, KEY_BOT_OWNERS, &owners).await?;
    debug!(admins = admins.len(), owners = owners.len(), "Flushed bot admins");
    Ok(true)
}

fn every<F, Fut>(name: &'static str, interval: Duration, coordinator: Arc<Coordinator>, job: F) -> JoinHandle<()>
where
    F: Fn(Arc<Coordinator>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), KvError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = job(coordinator.clone()).await {
                warn!(job = name, error = %e, "Flush job failed");
            }
        }
    })
}

/// Start every flush job. Abort the handles to stop them.
pub fn spawn_all(coordinator: Arc<Coordinator>) -> Vec<JoinHandle<()>> {
    let interval = coordinator.config.flush_interval;
    info!(interval_secs = interval.as_secs(), "Starting flush jobs");

    vec![
        every("guilds", interval, coordinator.clone(), |c| async move {
            flush_guilds(&c).await.map(|_| ())
        }),
        every("stats", interval, coordinator.clone(), |c| async move {
            flush_stats(&c).await.map(|_| ())
        }),
        every("admins", interval, coordinator, |c| async move {
            flush_admins(&c).await.map(|_| ())
        }),
    ]
}
