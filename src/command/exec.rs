//! Command execution
//!
//! Runs a routed message through the gate in a fixed order: bot authors,
//! channel permissions, blacklist, disabled, direct-message, requirements,
//! argument validation, then the callback. Refusals are answered with an
//! error embed; only the missing Send Messages permission is silent.

use super::{ArgKind, ArgValue, Command, CommandContext, CommandError, Invocation, Matched, Reply};
use crate::coordinator::Coordinator;
use crate::guard::HandlerResult;
use crate::kv::KEY_BLACKLIST;
use crate::models::{permissions, Message};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const EMBED_LINKS_REQUIRED: &str = "The **Embed Links** permission is required for basic commands.";
pub const BANNED: &str = "You are banned from the bot.";
pub const DISABLED: &str = "This command is currently disabled.";
pub const GUILD_ONLY: &str = "This command cannot be used in Direct Message.";
pub const NO_PERMISSION: &str = "You do not have permission to perform this action.";

/// Whether the bot holds `bits` in a channel. An uncached bot member counts
/// as allowed; the REST call fails loudly if it is not.
fn bot_can(coordinator: &Coordinator, guild_id: u64, channel_id: u64, bits: u64) -> bool {
    match coordinator
        .roster
        .permissions(guild_id, Some(channel_id), coordinator.bot_user.id)
    {
        Some(granted) => granted & bits == bits,
        None => true,
    }
}

/// Message-create entry point.
pub async fn handle_message(coordinator: &Arc<Coordinator>, message: Message) -> HandlerResult {
    if message.author.bot {
        return Ok(());
    }

    let guild_prefix = match message.guild_id {
        Some(guild_id) => Some(coordinator.guild_prefix(guild_id, &message.author).await?),
        None => None,
    };
    let prefixes = super::candidate_prefixes(coordinator.bot_user.id, guild_prefix.as_deref());

    let Some(matched) = coordinator.commands.resolve(&message.content, &prefixes) else {
        return Ok(());
    };

    if let Some(guild_id) = message.guild_id {
        if !bot_can(coordinator, guild_id, message.channel_id, permissions::SEND_MESSAGES) {
            debug!(guild = guild_id, channel = message.channel_id, "Missing Send Messages, ignoring command");
            return Ok(());
        }
        if !bot_can(coordinator, guild_id, message.channel_id, permissions::EMBED_LINKS) {
            coordinator
                .discord
                .send_text(message.channel_id, EMBED_LINKS_REQUIRED)
                .await?;
            return Ok(());
        }
    }

    let started = Instant::now();
    let name = matched.command.name;
    let channel_id = message.channel_id;
    let guild_id = message.guild_id;
    let title = matched.command.title();

    let result = execute(coordinator, matched, message, guild_prefix).await;
    coordinator.stats.record_command(result.is_ok());

    let reply = match result {
        Ok(reply) => reply,
        Err(CommandError::Api(e)) if e.user_message().is_some() => Reply::error(e.to_string()),
        Err(e) if e.is_validation() => Reply::error(e.to_string()),
        Err(e) => return Err(e.into()),
    };

    info!(
        command = name,
        channel = channel_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Command executed"
    );

    match reply {
        Reply::Text(text) => {
            let embed = coordinator.embed(guild_id, title, text);
            coordinator.discord.send_embed(channel_id, &embed).await?;
        }
        Reply::Embed(embed) => {
            coordinator.discord.send_embed(channel_id, &embed).await?;
        }
        Reply::None => {}
    }

    Ok(())
}

/// Gate checks after the permission lookup, then the callback.
async fn execute(
    coordinator: &Arc<Coordinator>,
    matched: Matched,
    message: Message,
    guild_prefix: Option<String>,
) -> Result<Reply, CommandError> {
    let command = &matched.command;

    if coordinator
        .kv
        .is_member(KEY_BLACKLIST, &message.author.id.to_string())
        .await?
    {
        return Ok(Reply::error(BANNED));
    }

    if command.disabled {
        return Ok(Reply::error(DISABLED));
    }

    if !command.allow_dm && message.guild_id.is_none() {
        return Ok(Reply::error(GUILD_ONLY));
    }

    for requirement in &command.requirements {
        if !requirement.check(coordinator, &message.author).await? {
            return Ok(Reply::error(NO_PERMISSION));
        }
    }

    let mut args = matched.parse_args()?;
    resolve_users(coordinator, command, &mut args).await?;

    let invocation = Invocation {
        command: command.clone(),
        prefix: matched.prefix.clone(),
        guild_prefix,
        args,
        message,
    };

    let ctx = CommandContext {
        coordinator: coordinator.clone(),
        invocation,
    };

    command.call(ctx).await
}

/// Replace parsed mentions with full profiles.
async fn resolve_users(
    coordinator: &Coordinator,
    command: &Command,
    args: &mut [Option<ArgValue>],
) -> Result<(), CommandError> {
    for (spec, slot) in command.args.iter().zip(args.iter_mut()) {
        let Some(ArgValue::UserId(id)) = slot else {
            continue;
        };
        match coordinator.resolve_user(*id).await? {
            Some(user) => *slot = Some(ArgValue::User(user)),
            None => {
                return Err(CommandError::InvalidArgument {
                    name: spec.name.to_string(),
                    kind: ArgKind::User.describe(),
                })
            }
        }
    }
    Ok(())
}
