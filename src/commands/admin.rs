use super::{format_guild, shorten_lines, SERVERS_SHOWN};
use crate::api::endpoints;
use crate::command::{
    ArgKind, ArgSpec, Category, Command, CommandContext, CommandError, CommandResult, Reply, Requirement,
};
use serde_json::{json, Value};
use tracing::debug;

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("ban_user")
            .arg(ArgSpec::required("user", ArgKind::User))
            .arg(ArgSpec::required("reason", ArgKind::String))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("Ban a user from the bot.")
            .run(ban_user),
        Command::build("unban_user")
            .arg(ArgSpec::required("user", ArgKind::User))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("Lift a ban.")
            .run(unban_user),
        Command::build("echo")
            .arg(ArgSpec::required("content", ArgKind::String))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("Repeat the content as the bot.")
            .run(echo),
        Command::build("find_servers")
            .arg(ArgSpec::required("name", ArgKind::String))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("Search the servers of the bot by name.")
            .run(find_servers),
        Command::build("shared_servers")
            .arg(ArgSpec::required("user", ArgKind::User))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("List the servers owned by a user.")
            .run(shared_servers),
        Command::build("top_servers")
            .arg(ArgSpec::optional("amount", ArgKind::Integer))
            .require(Requirement::BotAdmin)
            .allow_dm()
            .category(Category::Admin)
            .describe("List the largest servers of the bot.")
            .run(top_servers),
    ]
}

const NO_SERVERS: &str = "There are no servers found.";

const TOP_SERVERS_DEFAULT: i64 = 100;

async fn ban_user(ctx: CommandContext) -> CommandResult {
    let user = ctx.required_user(0)?;
    let reason = ctx.required_str(1)?;
    ctx.api()
        .put(
            ctx.author(),
            &endpoints::admin_blacklist_item(user.id),
            json!({ "reason": reason }),
        )
        .await?;
    Ok(Reply::text("The user is banned from the bot."))
}

async fn unban_user(ctx: CommandContext) -> CommandResult {
    let user = ctx.required_user(0)?;
    ctx.api()
        .delete(ctx.author(), &endpoints::admin_blacklist_item(user.id))
        .await?;
    Ok(Reply::text("The user is unbanned from the bot."))
}

async fn echo(ctx: CommandContext) -> CommandResult {
    let content = ctx.required_str(0)?;
    let discord = &ctx.coordinator.discord;

    if let Err(e) = discord
        .delete_message(ctx.channel_id(), ctx.invocation.message.id)
        .await
    {
        debug!(error = %e, "Could not delete the echo trigger");
    }
    discord.send_text(ctx.channel_id(), content).await?;
    Ok(Reply::None)
}

fn server_listing(guilds: &[Value], numbered: bool) -> String {
    let lines: Vec<String> = guilds
        .iter()
        .enumerate()
        .map(|(index, guild)| match numbered {
            true => format!("{}. {}", index + 1, format_guild(guild)),
            false => format_guild(guild),
        })
        .collect();
    shorten_lines(&lines, SERVERS_SHOWN)
}

fn servers_reply(guilds: &[Value], numbered: bool) -> Reply {
    if guilds.is_empty() {
        return Reply::error(NO_SERVERS);
    }
    Reply::text(server_listing(guilds, numbered))
}

async fn find_servers(ctx: CommandContext) -> CommandResult {
    let name = ctx.required_str(0)?;
    let guilds = ctx
        .api()
        .get_array(ctx.author(), &endpoints::admin_guilds_by_name(name))
        .await?;
    Ok(servers_reply(&guilds, false))
}

async fn shared_servers(ctx: CommandContext) -> CommandResult {
    let user = ctx.required_user(0)?;
    let guilds = ctx
        .api()
        .get_array(ctx.author(), &endpoints::admin_guilds_by_owner(user.id))
        .await?;
    Ok(servers_reply(&guilds, false))
}

async fn top_servers(ctx: CommandContext) -> CommandResult {
    let amount = ctx.int_arg(0).unwrap_or(TOP_SERVERS_DEFAULT);
    if amount < 1 {
        return Err(CommandError::InvalidArgument {
            name: "amount".to_string(),
            kind: "a positive integer",
        });
    }
    let guilds = ctx
        .api()
        .get_array(ctx.author(), &endpoints::admin_top_guilds(amount))
        .await?;
    Ok(servers_reply(&guilds, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::exec::{handle_message, NO_PERMISSION};
    use crate::kv::{KeyValue, KEY_BOT_ADMINS};
    use crate::models::{Message, User};
    use crate::testing::{harness, Sent};

    fn dm(content: &str) -> Message {
        Message {
            id: 5,
            channel_id: 60,
            guild_id: None,
            author: User {
                id: 7,
                username: "admin".into(),
                ..Default::default()
            },
            content: content.into(),
            member: None,
        }
    }

    #[tokio::test]
    async fn test_echo_deletes_and_repeats() {
        let h = harness(super::super::registry()).unwrap();
        h.kv.add_members(KEY_BOT_ADMINS, &["7".to_string()]).await.unwrap();

        handle_message(&h.coordinator, dm("!echo hello there")).await.unwrap();

        let sent = h.messenger.sent();
        assert!(matches!(sent[0], Sent::Delete { channel: 60, message: 5 }));
        assert_eq!(h.messenger.texts(60), vec!["hello there".to_string()]);
        assert!(h.messenger.embeds(60).is_empty());
    }

    fn guilds(n: usize) -> Vec<Value> {
        (1..=n)
            .map(|i| json!({"id": i.to_string(), "name": format!("Guild {}", i), "member_count": i * 10}))
            .collect()
    }

    #[test]
    fn test_server_listing_numbered() {
        assert_eq!(
            server_listing(&guilds(2), true),
            "1. Guild 1 `1` (10 members)\n2. Guild 2 `2` (20 members)\n"
        );
    }

    #[test]
    fn test_server_listing_is_shortened() {
        let listing = server_listing(&guilds(20), false);
        assert_eq!(listing.lines().filter(|l| l.starts_with("Guild ")).count(), SERVERS_SHOWN);
        assert!(listing.ends_with("...and 5 more."));
    }

    #[test]
    fn test_no_servers_is_an_error() {
        match servers_reply(&[], false) {
            Reply::Embed(embed) => assert_eq!(embed.description.as_deref(), Some(NO_SERVERS)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_top_servers_rejects_non_positive_amount() {
        let h = harness(super::super::registry()).unwrap();
        h.kv.add_members(KEY_BOT_ADMINS, &["7".to_string()]).await.unwrap();

        handle_message(&h.coordinator, dm("!topservers 0")).await.unwrap();

        let embeds = h.messenger.embeds(60);
        assert_eq!(
            embeds[0].description.as_deref(),
            Some("The argument **amount** must be a positive integer.")
        );
    }

    #[tokio::test]
    async fn test_echo_refused_without_admin() {
        let h = harness(super::super::registry()).unwrap();
        handle_message(&h.coordinator, dm("!echo hello")).await.unwrap();

        let embeds = h.messenger.embeds(60);
        assert_eq!(embeds[0].description.as_deref(), Some(NO_PERMISSION));
        assert!(h.messenger.texts(60).is_empty());
    }
}
