//! Gateway event handlers
//!
//! | Stage      | Events               | Handler                         |
//! |------------|----------------------|---------------------------------|
//! | PreState   | all                  | per-type counters               |
//! | PreState   | READY                | session log                     |
//! | PreState   | GUILD_CREATE         | join notice for new guilds      |
//! | PreState   | GUILD_DELETE         | leave notice, name read pre-removal |
//! | PostState  | all                  | roster absorbs the event        |
//! | Background | MESSAGE_CREATE       | command execution               |
//! | Background | VOICE_STATE_UPDATE   | idle pause / leave / resume     |
//! | Background | VOICE_SERVER_UPDATE  | forward voice credentials       |

use super::{handler_fn, Pipeline, Stage};
use crate::api::endpoints;
use crate::bus::{Operation, VoiceUpdate};
use crate::command::exec;
use crate::coordinator::Coordinator;
use crate::gateway::{Event, EventKind, GatewayEvent, GuildPayload};
use crate::guard::{guarded, HandlerResult, Outcome};
use crate::models::Embed;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const JOIN_COLOR: u32 = 0x43B581;
const LEAVE_COLOR: u32 = 0xF04747;

/// Channel type of a guild text channel.
const GUILD_TEXT: u8 = 0;

/// Build the pipeline with every handler bound to `coordinator`.
pub fn pipeline(coordinator: Arc<Coordinator>) -> Pipeline {
    let c = coordinator;

    Pipeline::builder()
        .on_all(Stage::PreState, {
            let c = c.clone();
            handler_fn("count_event", move |event| {
                let c = c.clone();
                async move {
                    c.stats.record_event(event.kind);
                    Ok(())
                }
            })
        })
        .on(Stage::PreState, &[EventKind::Ready], handler_fn("ready", |event| async move {
            on_ready(&event);
            Ok(())
        }))
        .on(Stage::PreState, &[EventKind::GuildCreate], {
            let c = c.clone();
            handler_fn("guild_join_notice", move |event| {
                let c = c.clone();
                async move { on_guild_create(&c, &event) }
            })
        })
        .on(Stage::PreState, &[EventKind::GuildDelete], {
            let c = c.clone();
            handler_fn("guild_leave_notice", move |event| {
                let c = c.clone();
                async move { on_guild_delete(&c, &event) }
            })
        })
        .on_all(Stage::PostState, {
            let c = c.clone();
            handler_fn("absorb_state", move |event| {
                let c = c.clone();
                async move {
                    c.roster.apply(&event.payload);
                    Ok(())
                }
            })
        })
        .on(Stage::Background, &[EventKind::MessageCreate], {
            let c = c.clone();
            handler_fn("handle_command", move |event| {
                let c = c.clone();
                async move {
                    match &event.payload {
                        GatewayEvent::MessageCreate(message) => {
                            exec::handle_message(&c, message.clone()).await
                        }
                        _ => Ok(()),
                    }
                }
            })
        })
        .on(Stage::Background, &[EventKind::VoiceStateUpdate], {
            let c = c.clone();
            handler_fn("voice_idle", move |event| {
                let c = c.clone();
                async move { on_voice_state_update(&c, &event).await }
            })
        })
        .on(Stage::Background, &[EventKind::VoiceServerUpdate], {
            let c = c.clone();
            handler_fn("voice_forward", move |event| {
                let c = c.clone();
                async move { on_voice_server_update(&c, &event).await }
            })
        })
        .build()
}

fn on_ready(event: &Event) {
    if let GatewayEvent::Ready(ready) = &event.payload {
        info!(
            session = %ready.session_id,
            user = %ready.user.tag(),
            guilds = ready.guilds.len(),
            shard = ?ready.shard,
            "Gateway session ready"
        );
    }
}

fn notice(title: &str, name: &str, id: u64, servers: usize, color: u32) -> Embed {
    let mut embed = Embed::new(title, format!("{} ({})", name, id))
        .color(color)
        .footer(format!("{} servers", servers));
    embed.timestamp = Some(chrono::Utc::now().to_rfc3339());
    embed
}

fn welcome(coordinator: &Coordinator) -> Embed {
    let base = coordinator.site_url("");
    let prefix = &coordinator.config.default_prefix;
    let name = &coordinator.bot_user.username;

    let description = format!(
        "The default prefix is `{prefix}`. To get started, join a voice channel and type `{prefix}play <query>`.\n\n\
         View the full list of commands [here]({base}/commands).\n\n\
         Check out the dashboard for the best experience [here]({base}/dashboard).\n\n\
         Need further help? Join our support server [here]({base}/support).\n\n\
         By using {name}, you agree to our [Terms of Service]({base}/terms)."
    );

    coordinator.embed(None, format!("Thanks for inviting {}!", name), description)
}

fn text_channels(guild: &GuildPayload) -> Vec<u64> {
    let mut channels: Vec<_> = guild
        .channels
        .iter()
        .filter(|c| c.kind == GUILD_TEXT)
        .map(|c| (c.position, c.id))
        .collect();
    channels.sort_unstable();
    channels.into_iter().map(|(_, id)| id).collect()
}

/// Fire-and-forget a follow-up so the inline stage never waits on REST.
fn spawn_followup<F>(name: &'static str, fut: F)
where
    F: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    tokio::spawn(async move {
        match guarded(fut).await {
            Outcome::Ok => {}
            Outcome::Error(e) => warn!(task = name, error = %e, "Follow-up failed"),
            Outcome::Fault(f) => warn!(task = name, fault = %f, "Follow-up faulted"),
        }
    });
}

/// Runs before the roster sees the guild, so `contains` tells a genuine join
/// apart from a guild coming back online.
fn on_guild_create(coordinator: &Arc<Coordinator>, event: &Event) -> HandlerResult {
    let GatewayEvent::GuildCreate(guild) = &event.payload else {
        return Ok(());
    };
    if guild.unavailable || coordinator.roster.contains(guild.id) {
        return Ok(());
    }

    info!(guild = guild.id, name = %guild.name, "Joined guild");

    let servers = coordinator.roster.len() + 1;
    let embed = notice("Guild Join", &guild.name, guild.id, servers, JOIN_COLOR);
    let channels = text_channels(guild);
    let coordinator = coordinator.clone();

    spawn_followup("guild_join", announce_join(coordinator, embed, channels));
    Ok(())
}

async fn announce_join(coordinator: Arc<Coordinator>, notice: Embed, channels: Vec<u64>) -> HandlerResult {
    if let Some(log_channel) = coordinator.config.guilds_channel {
        coordinator.discord.send_embed(log_channel, &notice).await?;
    }

    let welcome = welcome(&coordinator);
    for channel in channels {
        match coordinator.discord.send_embed(channel, &welcome).await {
            Ok(_) => break,
            Err(e) => debug!(channel, error = %e, "Welcome message refused, trying next channel"),
        }
    }
    Ok(())
}

/// Runs before the roster drops the guild so its name is still known.
fn on_guild_delete(coordinator: &Arc<Coordinator>, event: &Event) -> HandlerResult {
    let GatewayEvent::GuildDelete(deleted) = &event.payload else {
        return Ok(());
    };
    if deleted.unavailable {
        debug!(guild = deleted.id, "Guild became unavailable");
        return Ok(());
    }

    let Some(name) = coordinator.roster.with_guild(deleted.id, |g| g.name.clone()) else {
        debug!(guild = deleted.id, "Left uncached guild");
        return Ok(());
    };

    info!(guild = deleted.id, name = %name, "Left guild");

    let Some(log_channel) = coordinator.config.guilds_channel else {
        return Ok(());
    };

    let servers = coordinator.roster.len().saturating_sub(1);
    let embed = notice("Guild Leave", &name, deleted.id, servers, LEAVE_COLOR);
    let coordinator = coordinator.clone();

    spawn_followup("guild_leave", announce_leave(coordinator, log_channel, embed));
    Ok(())
}

async fn announce_leave(coordinator: Arc<Coordinator>, log_channel: u64, notice: Embed) -> HandlerResult {
    coordinator.discord.send_embed(log_channel, &notice).await?;
    Ok(())
}

/// Pause when the bot is left alone, leave after the idle timeout unless the
/// guild keeps the player alive, and resume when someone comes back.
async fn on_voice_state_update(coordinator: &Coordinator, event: &Event) -> HandlerResult {
    let GatewayEvent::VoiceStateUpdate(update) = &event.payload else {
        return Ok(());
    };
    let bot = &coordinator.bot_user;
    if update.user_id == bot.id {
        return Ok(());
    }
    let Some(guild_id) = update.guild_id else {
        return Ok(());
    };
    let Some(bot_channel) = coordinator.roster.voice_channel_of(guild_id, bot.id) else {
        return Ok(());
    };

    let player = endpoints::guild_player(guild_id);

    match update.channel_id {
        None => {
            if coordinator.roster.voice_connections(guild_id, bot_channel) > 1 {
                return Ok(());
            }

            coordinator.api.patch(bot, &player, json!({"paused": true})).await?;
            debug!(guild = guild_id, "Paused player, bot alone in channel");

            let settings = coordinator
                .api
                .get(bot, &endpoints::guild_settings(guild_id))
                .await?;
            if settings.get("keep_alive").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(());
            }

            tokio::time::sleep(coordinator.config.voice_idle_timeout).await;

            if coordinator.roster.voice_channel_of(guild_id, bot.id) != Some(bot_channel)
                || coordinator.roster.voice_connections(guild_id, bot_channel) > 1
            {
                return Ok(());
            }

            coordinator.api.delete(bot, &player).await?;
            info!(guild = guild_id, channel = bot_channel, "Left idle voice channel");
        }
        Some(channel) if channel == bot_channel => {
            if coordinator.roster.voice_connections(guild_id, bot_channel) != 2 {
                return Ok(());
            }

            let state = coordinator.api.get(bot, &player).await?;
            if !state.get("paused").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(());
            }

            coordinator.api.patch(bot, &player, json!({"paused": false})).await?;
            debug!(guild = guild_id, "Resumed player, listener returned");
        }
        Some(_) => {}
    }

    Ok(())
}

/// Hand the voice server credentials to the audio node once the bot's own
/// voice state has arrived.
async fn on_voice_server_update(coordinator: &Coordinator, event: &Event) -> HandlerResult {
    let GatewayEvent::VoiceServerUpdate(update) = &event.payload else {
        return Ok(());
    };

    if coordinator.wait_for_voice(update.guild_id).await.is_none() {
        debug!(guild = update.guild_id, "Bot voice state never arrived, dropping server update");
        return Ok(());
    }

    let session = coordinator
        .roster
        .with_guild(update.guild_id, |g| {
            g.voice_states
                .get(&coordinator.bot_user.id)
                .map(|v| v.session_id.clone())
        })
        .flatten()
        .filter(|s| !s.is_empty())
        .or_else(|| coordinator.roster.session().map(|s| s.session_id))
        .unwrap_or_default();

    let payload = VoiceUpdate {
        session,
        guild: update.guild_id,
        endpoint: update.endpoint.clone().unwrap_or_default(),
        token: update.token.clone(),
    };

    coordinator.bus.publish(Operation::VoiceUpdate, &payload).await?;
    debug!(guild = update.guild_id, "Forwarded voice server update");
    Ok(())
}
