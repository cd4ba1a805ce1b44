//! Message handling through the built-in registry

use chorus_bot::command::exec::{handle_message, BANNED, EMBED_LINKS_REQUIRED, NO_PERMISSION};
use chorus_bot::command::ArgKind;
use chorus_bot::commands;
use chorus_bot::gateway::{GatewayEvent, GuildPayload};
use chorus_bot::kv::{guild_prefix_key, KeyValue, KEY_BLACKLIST};
use chorus_bot::models::{permissions, Message, User};
use chorus_bot::testing::{harness, Harness, Sent, BOT_ID};
use serde_json::json;

const GUILD: u64 = 500;
const CHANNEL: u64 = 600;

async fn setup() -> Harness {
    let h = harness(commands::registry()).unwrap();
    h.kv.set(&guild_prefix_key(GUILD), "\"?\"", None).await.unwrap();
    h
}

fn cache_guild(h: &Harness, everyone: u64) {
    let guild: GuildPayload = serde_json::from_value(json!({
        "id": GUILD.to_string(),
        "name": "Server",
        "owner_id": "1",
        "roles": [{"id": GUILD.to_string(), "name": "@everyone", "permissions": everyone}],
        "channels": [{"id": CHANNEL.to_string(), "type": 0, "name": "general"}],
        "members": [
            {"user": {"id": BOT_ID.to_string(), "username": "Chorus", "discriminator": "0001", "bot": true}, "roles": []}
        ]
    }))
    .unwrap();
    h.coordinator.roster.apply(&GatewayEvent::GuildCreate(guild));
}

fn message(author: u64, content: &str) -> Message {
    Message {
        id: 1,
        channel_id: CHANNEL,
        guild_id: Some(GUILD),
        author: User {
            id: author,
            username: format!("user{}", author),
            discriminator: "0001".into(),
            ..Default::default()
        },
        content: content.into(),
        member: None,
    }
}

fn descriptions(h: &Harness) -> Vec<String> {
    h.messenger
        .embeds(CHANNEL)
        .into_iter()
        .filter_map(|e| e.description)
        .collect()
}

#[tokio::test]
async fn test_guild_prefix_and_mentions() {
    let h = setup().await;

    handle_message(&h.coordinator, message(7, "!invite")).await.unwrap();
    assert!(h.messenger.sent().is_empty());

    handle_message(&h.coordinator, message(7, "?invite")).await.unwrap();
    handle_message(&h.coordinator, message(7, &format!("<@{}> invite", BOT_ID)))
        .await
        .unwrap();
    handle_message(&h.coordinator, message(7, &format!("<@!{}> INVITE", BOT_ID)))
        .await
        .unwrap();

    assert_eq!(h.messenger.embeds(CHANNEL).len(), 3);
    assert_eq!(h.coordinator.stats.commands(), 3);
}

#[tokio::test]
async fn test_bot_authors_are_ignored() {
    let h = setup().await;
    let mut from_bot = message(8, "?invite");
    from_bot.author.bot = true;

    handle_message(&h.coordinator, from_bot).await.unwrap();
    assert!(h.messenger.sent().is_empty());
    assert_eq!(h.coordinator.stats.commands(), 0);
}

#[tokio::test]
async fn test_aliases_resolve() {
    let h = setup().await;
    handle_message(&h.coordinator, message(7, "?server")).await.unwrap();
    handle_message(&h.coordinator, message(7, "?website")).await.unwrap();

    let titles: Vec<_> = h
        .messenger
        .embeds(CHANNEL)
        .into_iter()
        .filter_map(|e| e.title)
        .collect();
    assert_eq!(titles, vec!["Support".to_string(), "Dashboard".to_string()]);
}

#[tokio::test]
async fn test_without_send_permission_is_silent() {
    let h = setup().await;
    cache_guild(&h, permissions::EMBED_LINKS);

    handle_message(&h.coordinator, message(7, "?invite")).await.unwrap();
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn test_without_embed_links_sends_plain_notice() {
    let h = setup().await;
    cache_guild(&h, permissions::SEND_MESSAGES);

    handle_message(&h.coordinator, message(7, "?invite")).await.unwrap();
    assert_eq!(
        h.messenger.sent(),
        vec![Sent::Text {
            channel: CHANNEL,
            content: EMBED_LINKS_REQUIRED.to_string(),
        }]
    );
}

#[tokio::test]
async fn test_blacklisted_user_is_refused() {
    let h = setup().await;
    h.kv.add_members(KEY_BLACKLIST, &["13".to_string()]).await.unwrap();

    handle_message(&h.coordinator, message(13, "?invite")).await.unwrap();
    assert_eq!(descriptions(&h), vec![BANNED.to_string()]);
}

#[tokio::test]
async fn test_owner_commands_need_the_owner_set() {
    let h = setup().await;

    handle_message(&h.coordinator, message(7, "?setstatus hello")).await.unwrap();
    assert_eq!(descriptions(&h), vec![NO_PERMISSION.to_string()]);
    assert_eq!(h.queue.len("gateway.send"), 0);
}

#[tokio::test]
async fn test_argument_errors_are_reported() {
    let h = setup().await;

    handle_message(&h.coordinator, message(7, "?volume")).await.unwrap();
    handle_message(&h.coordinator, message(7, "?volume loud")).await.unwrap();
    handle_message(&h.coordinator, message(7, "?seek soon")).await.unwrap();

    assert_eq!(
        descriptions(&h),
        vec![
            "The required argument **loudness** is missing.".to_string(),
            format!("The argument **loudness** must be {}.", ArgKind::Integer.describe()),
            format!("The argument **position** must be {}.", ArgKind::Duration.describe()),
        ]
    );
    assert_eq!(h.coordinator.stats.command_errors(), 3);
}

#[tokio::test]
async fn test_oversized_durations_are_rejected() {
    let h = setup().await;

    handle_message(&h.coordinator, message(7, "?seek 99999999999999999999h")).await.unwrap();
    handle_message(&h.coordinator, message(7, "?forward 18446744073709551615")).await.unwrap();

    assert_eq!(
        descriptions(&h),
        vec![
            format!("The argument **position** must be {}.", ArgKind::Duration.describe()),
            format!("The argument **amount** must be {}.", ArgKind::Duration.describe()),
        ]
    );
    assert_eq!(h.coordinator.stats.command_errors(), 2);
}
