use super::format_duration;
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandResult, Reply, Requirement};
use crate::relay::Activity;
use tracing::info;

/// Event types listed by `inspect`.
const EVENTS_SHOWN: usize = 5;

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("reconnect")
            .arg(ArgSpec::required("shard", ArgKind::Integer))
            .require(Requirement::BotOwner)
            .allow_dm()
            .category(Category::Owner)
            .describe("Ask the connector to reconnect a shard.")
            .run(reconnect),
        Command::build("set_status")
            .arg(ArgSpec::required("status", ArgKind::String))
            .require(Requirement::BotOwner)
            .allow_dm()
            .category(Category::Owner)
            .describe("Change the activity shown on every shard.")
            .run(set_status),
        Command::build("disconnect_all")
            .aliases(&["dcall"])
            .require(Requirement::BotOwner)
            .allow_dm()
            .category(Category::Owner)
            .describe("Leave every voice channel.")
            .run(disconnect_all),
        Command::build("inspect")
            .require(Requirement::BotOwner)
            .allow_dm()
            .category(Category::Owner)
            .describe("Show process-local runtime counters.")
            .run(inspect),
    ]
}

async fn reconnect(ctx: CommandContext) -> CommandResult {
    let relay = &ctx.coordinator.relay;
    let shard = ctx.required_int(0)?;
    let shard = match u64::try_from(shard) {
        Ok(s) if s < relay.shard_count() => s,
        _ => return Ok(Reply::error("The specified shard does not exist.")),
    };

    relay.reconnect(shard).await?;
    info!(shard, "Shard reconnect requested");
    Ok(Reply::text("Reconnecting to the shard."))
}

async fn set_status(ctx: CommandContext) -> CommandResult {
    let status = ctx.required_str(0)?;
    ctx.coordinator
        .relay
        .update_presence(Activity {
            name: status.to_string(),
            kind: 0,
        })
        .await?;
    Ok(Reply::text("Changed the bot status."))
}

async fn disconnect_all(ctx: CommandContext) -> CommandResult {
    let c = &ctx.coordinator;
    let guilds = c.roster.voice_guilds(c.bot_user.id);
    for guild_id in &guilds {
        c.relay.update_voice(*guild_id, None).await?;
    }
    Ok(Reply::text(format!(
        "Disconnected from {} voice channels.",
        guilds.len()
    )))
}

async fn inspect(ctx: CommandContext) -> CommandResult {
    let c = &ctx.coordinator;
    let counts = c.roster.counts();

    let events: String = c
        .stats
        .event_counts()
        .into_iter()
        .take(EVENTS_SHOWN)
        .map(|(kind, n)| format!("`{}` {}\n", kind.as_str(), n))
        .collect();

    let embed = c
        .embed(
            ctx.invocation.message.guild_id,
            "Inspect",
            format!("Up for {}.", format_duration(c.stats.uptime())),
        )
        .field("Guilds", counts.guilds.to_string(), true)
        .field("Members", counts.members.to_string(), true)
        .field("Voice", counts.voices.to_string(), true)
        .field("Shards", c.relay.shard_count().to_string(), true)
        .field(
            "Commands",
            format!("{} ({} failed)", c.stats.commands(), c.stats.command_errors()),
            true,
        )
        .field(
            format!("Events ({})", c.stats.total_events()),
            if events.is_empty() { "None".to_string() } else { events },
            false,
        );

    Ok(Reply::Embed(embed))
}
