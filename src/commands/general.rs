use super::format_duration;
use crate::api::{endpoints, int_field};
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandResult, Reply};
use crate::kv::{strip_quotes, KEY_STARTED, KEY_STATUSES};
use crate::models::Embed;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("help")
            .aliases(&["about", "info"])
            .allow_dm()
            .category(Category::General)
            .describe("Show what the bot can do and where to find help.")
            .run(help),
        Command::build("commands")
            .aliases(&["c"])
            .allow_dm()
            .category(Category::General)
            .describe("Link to the full list of commands.")
            .run(|ctx: CommandContext| async move {
                Ok(Reply::text(format!(
                    "View the full list of commands [here]({}).",
                    commands_url(&ctx)
                )))
            }),
        Command::build("ping")
            .allow_dm()
            .category(Category::General)
            .describe("Measure gateway and HTTP latency.")
            .run(ping),
        Command::build("prefix")
            .arg(ArgSpec::optional("new prefix", ArgKind::String))
            .category(Category::General)
            .describe("Show or change the prefix for this server.")
            .run(prefix),
        Command::build("stats")
            .aliases(&["statistics"])
            .allow_dm()
            .category(Category::General)
            .describe("Show bot statistics.")
            .run(stats),
        Command::build("invite")
            .allow_dm()
            .category(Category::General)
            .describe("Link to add the bot to a server.")
            .run(|ctx: CommandContext| async move {
                Ok(Reply::text(format!(
                    "Invite the bot [here]({}).",
                    ctx.coordinator.site_url("/invite")
                )))
            }),
        Command::build("support")
            .aliases(&["server"])
            .allow_dm()
            .category(Category::General)
            .describe("Link to the support server.")
            .run(|ctx: CommandContext| async move {
                Ok(Reply::text(format!(
                    "Join our support server [here]({}).",
                    ctx.coordinator.site_url("/support")
                )))
            }),
        Command::build("dashboard")
            .aliases(&["website"])
            .allow_dm()
            .category(Category::General)
            .describe("Link to the web dashboard.")
            .run(|ctx: CommandContext| async move {
                Ok(Reply::text(format!(
                    "Check out the dashboard [here]({}).",
                    ctx.coordinator.site_url("/dashboard")
                )))
            }),
    ]
}

/// Prefix shown to the user: the guild's, or the default one in DMs.
fn shown_prefix(ctx: &CommandContext) -> &str {
    ctx.invocation
        .guild_prefix
        .as_deref()
        .unwrap_or(ctx.coordinator.config.default_prefix.as_str())
}

fn commands_url(ctx: &CommandContext) -> String {
    ctx.coordinator.site_url(&format!(
        "/commands?prefix={}",
        endpoints::url_encode(shown_prefix(ctx))
    ))
}

async fn help(ctx: CommandContext) -> CommandResult {
    let c = &ctx.coordinator;
    let name = &c.bot_user.username;
    let guild_id = ctx.invocation.message.guild_id;

    let mut description = format!(
        "{} is a feature-rich music bot. Take control over your music with an intuitive dashboard and more!\n",
        name
    );
    if let Some(prefix) = &ctx.invocation.guild_prefix {
        description.push_str(&format!("\nThe prefix for this server is `{}`.\n", prefix));
    }
    let commands_url = commands_url(&ctx);
    let embed = c
        .embed(guild_id, format!("{} Help", name), description)
        .field("Commands", format!("View the full list of commands [here]({}).", commands_url), false)
        .field(
            "Dashboard",
            format!("Check out the dashboard for the best experience [here]({}).", c.site_url("/dashboard")),
            false,
        )
        .field(
            "Invite",
            format!("Add the bot to another server [here]({}).", c.site_url("/invite")),
            false,
        )
        .field(
            "Support",
            format!("Need further help? Join our support server [here]({}).", c.site_url("/support")),
            false,
        );

    Ok(Reply::Embed(embed))
}

/// One entry of the connector's per-shard status list.
#[derive(Debug, Deserialize)]
struct ShardStatus {
    shard: u64,
    #[serde(default)]
    latency: i64,
}

async fn ping(ctx: CommandContext) -> CommandResult {
    let c = &ctx.coordinator;
    let guild_id = ctx.invocation.message.guild_id;
    let shard = guild_id.map_or(0, |g| c.relay.shard_for_guild(g));

    let statuses: Vec<ShardStatus> = match c.kv.get(KEY_STATUSES).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        None => Vec::new(),
    };
    let latency = statuses
        .iter()
        .find(|s| s.shard == shard)
        .map_or(0, |s| s.latency);

    let mut embed = Embed {
        description: Some("Checking latency...".to_string()),
        color: c.embed_color(guild_id),
        ..Default::default()
    };

    let started = Instant::now();
    let message_id = c.discord.send_embed(ctx.channel_id(), &embed).await?;
    let http_latency = started.elapsed().as_millis();

    embed.title = Some("Pong!".to_string());
    embed.description = Some(format!(
        "Gateway latency: {}ms.\nHTTP latency: {}ms.",
        latency, http_latency
    ));
    c.discord.edit_embed(ctx.channel_id(), message_id, &embed).await?;

    Ok(Reply::None)
}

async fn prefix(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let current = ctx
        .invocation
        .guild_prefix
        .clone()
        .unwrap_or_else(|| ctx.coordinator.config.default_prefix.clone());

    let Some(new_prefix) = ctx.str_arg(0) else {
        return Ok(Reply::text(format!("The prefix for this server is `{}`.", current)));
    };

    ctx.api()
        .patch(
            ctx.author(),
            &endpoints::guild_settings(guild_id),
            serde_json::json!({ "prefix": new_prefix }),
        )
        .await?;
    ctx.coordinator.invalidate_prefix(guild_id).await;

    Ok(Reply::text(format!(
        "The prefix for this server is changed to `{}`.",
        new_prefix
    )))
}

/// Time since the connector started, or since this process started when the
/// connector has not recorded it.
async fn uptime(ctx: &CommandContext) -> Duration {
    let c = &ctx.coordinator;
    let started = match c.kv.get(KEY_STARTED).await {
        Ok(Some(raw)) => {
            let raw = strip_quotes(&raw).trim_end_matches('Z').to_string();
            chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
        }
        _ => None,
    };
    started
        .and_then(|t| (chrono::Utc::now().naive_utc() - t).to_std().ok())
        .unwrap_or_else(|| c.stats.uptime())
}

async fn stats(ctx: CommandContext) -> CommandResult {
    let c = &ctx.coordinator;
    let guild_id = ctx.invocation.message.guild_id;

    let players = c.api.get(ctx.author(), &endpoints::player_stats()).await?;
    let counts = c.roster.counts();
    let shard = guild_id.map_or(0, |g| c.relay.shard_for_guild(g));
    let uptime = uptime(&ctx).await;

    let embed = c
        .embed(
            guild_id,
            format!("{} Statistics", c.bot_user.username),
            format!(
                "Visit the bot status page [here]({}) for more information.",
                c.site_url("/status")
            ),
        )
        .field("Version", env!("CARGO_PKG_VERSION"), true)
        .field("Uptime", format_duration(uptime), true)
        .field("Servers", counts.guilds.to_string(), true)
        .field("Users", counts.members.to_string(), true)
        .field("Players", int_field(&players, "players").to_string(), true)
        .field("Commands", c.stats.commands().to_string(), true)
        .footer(format!("Shard {}/{}", shard, c.relay.shard_count()));

    Ok(Reply::Embed(embed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::exec::handle_message;
    use crate::kv::KeyValue;
    use crate::models::{Message, User};
    use crate::testing::{harness, Sent};

    fn dm(content: &str) -> Message {
        Message {
            id: 1,
            channel_id: 50,
            guild_id: None,
            author: User {
                id: 7,
                username: "someone".into(),
                ..Default::default()
            },
            content: content.into(),
            member: None,
        }
    }

    #[tokio::test]
    async fn test_invite_in_direct_message() {
        let h = harness(super::super::registry()).unwrap();
        handle_message(&h.coordinator, dm("!invite")).await.unwrap();

        let embeds = h.messenger.embeds(50);
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds[0].title.as_deref(), Some("Invite"));
        assert_eq!(
            embeds[0].description.as_deref(),
            Some("Invite the bot [here](https://chorus.test/invite).")
        );
    }

    #[tokio::test]
    async fn test_ping_edits_with_gateway_latency() {
        let h = harness(super::super::registry()).unwrap();
        h.kv.set(KEY_STATUSES, r#"[{"shard":0,"latency":42,"status":"connected"}]"#, None)
            .await
            .unwrap();
        handle_message(&h.coordinator, dm("?ping")).await.unwrap();

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        match &sent[1] {
            Sent::Edit { embed, .. } => {
                assert_eq!(embed.title.as_deref(), Some("Pong!"));
                assert!(embed
                    .description
                    .as_deref()
                    .unwrap()
                    .starts_with("Gateway latency: 42ms."));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_help_lists_links() {
        let h = harness(super::super::registry()).unwrap();
        handle_message(&h.coordinator, dm("!help")).await.unwrap();

        let embed = &h.messenger.embeds(50)[0];
        assert_eq!(embed.title.as_deref(), Some("Chorus Help"));
        let names: Vec<&str> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Commands", "Dashboard", "Invite", "Support"]);
        assert!(embed.fields[0].value.contains("/commands?prefix=%21"));
    }

    #[tokio::test]
    async fn test_commands_links_with_prefix() {
        let h = harness(super::super::registry()).unwrap();
        handle_message(&h.coordinator, dm("!commands")).await.unwrap();
        handle_message(&h.coordinator, dm("!c")).await.unwrap();

        let embeds = h.messenger.embeds(50);
        assert_eq!(embeds.len(), 2);
        for embed in embeds {
            assert_eq!(embed.title.as_deref(), Some("Commands"));
            assert_eq!(
                embed.description.as_deref(),
                Some("View the full list of commands [here](https://chorus.test/commands?prefix=%21).")
            );
        }
    }

    #[tokio::test]
    async fn test_prefix_requires_guild() {
        let h = harness(super::super::registry()).unwrap();
        handle_message(&h.coordinator, dm("!prefix")).await.unwrap();
        let embed = &h.messenger.embeds(50)[0];
        assert_eq!(
            embed.description.as_deref(),
            Some(crate::command::exec::GUILD_ONLY)
        );
    }
}
