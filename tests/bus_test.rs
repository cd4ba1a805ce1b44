//! Request/response over a shared bus between a sibling process and the
//! coordinator's responder

use chorus_bot::bus::responder::CoordinatorResponder;
use chorus_bot::bus::{
    BusError, BusTransport, ConnectedInfo, ConnectedQuery, Envelope, GuildInfo, GuildQuery, NoResponder, Operation,
    PermissionInfo, PermissionQuery, RpcBus, SendMessage, SetConnected, UserInfo, UserQuery,
};
use chorus_bot::command::Router;
use chorus_bot::gateway::{GatewayEvent, GuildPayload};
use chorus_bot::testing::{harness, Harness, BOT_ID};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

async fn setup() -> (Harness, RpcBus) {
    let h = harness(Router::default()).unwrap();

    let guild: GuildPayload = serde_json::from_value(json!({
        "id": "10",
        "name": "Guild",
        "owner_id": "1",
        "member_count": 3,
        "roles": [
            {"id": "10", "name": "@everyone", "permissions": 2048},
            {"id": "20", "name": "DJ", "position": 1, "permissions": 1048576}
        ],
        "channels": [
            {"id": "300", "type": 2, "position": 1, "name": "Music"},
            {"id": "100", "type": 0, "position": 0, "name": "general"}
        ],
        "members": [
            {"user": {"id": "1", "username": "owner", "discriminator": "0001"}, "roles": []},
            {"user": {"id": "2", "username": "dj", "discriminator": "0002"}, "roles": ["20"]},
            {"user": {"id": BOT_ID.to_string(), "username": "Chorus", "discriminator": "0001", "bot": true}, "roles": []}
        ],
        "voice_states": [
            {"channel_id": "300", "user_id": "2", "session_id": "a"},
            {"channel_id": "300", "user_id": BOT_ID.to_string(), "session_id": "b"}
        ]
    }))
    .unwrap();
    h.coordinator.roster.apply(&GatewayEvent::GuildCreate(guild));

    let served = h.coordinator.bus.clone();
    let subscription = served.subscribe().await.unwrap();
    tokio::spawn(served.serve(subscription, Arc::new(CoordinatorResponder::new(h.coordinator.clone()))));

    let sibling = RpcBus::new(Arc::new(h.bus.clone()));
    let subscription = sibling.subscribe().await.unwrap();
    tokio::spawn(sibling.clone().serve(subscription, Arc::new(NoResponder)));

    (h, sibling)
}

#[tokio::test]
async fn test_get_guild_round_trip() {
    let (_h, sibling) = setup().await;

    let info: GuildInfo = sibling
        .query(Operation::GetGuild, &GuildQuery { guild: 10 }, TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.name, "Guild");
    assert_eq!(info.owner, 1);
    assert_eq!(info.channels.iter().map(|c| c.id).collect::<Vec<_>>(), vec![100, 300]);
    assert_eq!(sibling.pending_queries(), 0);
}

#[tokio::test]
async fn test_query_is_answered_exactly_once() {
    let (h, sibling) = setup().await;
    let mut wire = h.bus.subscribe().await.unwrap();

    let user: Option<UserInfo> = sibling
        .query(Operation::GetUser, &UserQuery { user: 1 }, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(user.unwrap().username, "owner");

    // Leave room for a duplicate or an echoed answer to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut envelopes = Vec::new();
    while let Ok(Some(payload)) = tokio::time::timeout(Duration::from_millis(20), wire.next()).await {
        envelopes.push(serde_json::from_str::<Envelope>(&payload).unwrap());
    }

    assert_eq!(envelopes.len(), 2, "{:?}", envelopes);
    assert_eq!(envelopes[0].op, Operation::GetUser);
    let id = envelopes[0].id.clone().unwrap();
    assert_eq!(envelopes[1].op, Operation::Response);
    assert_eq!(envelopes[1].id.as_deref(), Some(id.as_str()));
    assert_eq!(sibling.pending_queries(), 0);
}

#[tokio::test]
async fn test_unknown_guild_answers_null() {
    let (_h, sibling) = setup().await;

    let info: Option<GuildInfo> = sibling
        .query(Operation::GetGuild, &GuildQuery { guild: 11 }, TIMEOUT)
        .await
        .unwrap();
    assert!(info.is_none());
}

#[tokio::test]
async fn test_concurrent_queries_are_correlated() {
    let (_h, sibling) = setup().await;

    let users = futures_util::future::join_all((1..=2u64).map(|id| {
        let sibling = sibling.clone();
        async move {
            sibling
                .query::<_, UserInfo>(Operation::GetUser, &UserQuery { user: id }, TIMEOUT)
                .await
        }
    }))
    .await;

    let names: Vec<String> = users
        .into_iter()
        .map(|r| r.unwrap().unwrap().username)
        .collect();
    assert_eq!(names, vec!["owner".to_string(), "dj".to_string()]);
}

#[tokio::test]
async fn test_permission_and_connected() {
    let (_h, sibling) = setup().await;

    let perms: PermissionInfo = sibling
        .query(
            Operation::GetPermission,
            &PermissionQuery {
                guild: 10,
                member: 2,
                channel: 0,
            },
            TIMEOUT,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(perms.permission, 2048 | 1048576);

    let connected: ConnectedInfo = sibling
        .query(
            Operation::GetConnected,
            &ConnectedQuery {
                guild: 10,
                member: None,
            },
            TIMEOUT,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connected.channel, 300);
    assert_eq!(connected.members, vec![2, BOT_ID]);
}

#[tokio::test]
async fn test_set_connected_pushes_voice_frame() {
    let (h, sibling) = setup().await;

    let answer: Option<Value> = sibling
        .query(
            Operation::SetConnected,
            &SetConnected {
                guild: 10,
                channel: None,
            },
            TIMEOUT,
        )
        .await
        .unwrap();
    assert!(answer.is_none());

    let frames = h.queue.drain("gateway.send");
    assert_eq!(frames.len(), 1);
    let frame: Value = serde_json::from_slice(&frames[0]).unwrap();
    assert_eq!(frame["op"], "send");
    assert_eq!(frame["data"]["op"], 4);
    assert_eq!(frame["data"]["d"]["guild_id"], "10");
    assert_eq!(frame["data"]["d"]["channel_id"], Value::Null);
}

#[tokio::test]
async fn test_send_message_attributes_author() {
    let (h, sibling) = setup().await;

    let _: Option<Value> = sibling
        .query(
            Operation::SendMessage,
            &SendMessage {
                channel: 100,
                title: "Now Playing".into(),
                content: "[song](https://x)".into(),
                author: Some(2),
            },
            TIMEOUT,
        )
        .await
        .unwrap();

    let embeds = h.messenger.embeds(100);
    assert_eq!(embeds.len(), 1);
    assert_eq!(embeds[0].title.as_deref(), Some("Now Playing"));
    assert_eq!(embeds[0].author.as_ref().map(|a| a.name.as_str()), Some("dj#0002"));
}

#[tokio::test]
async fn test_query_without_responder_times_out() {
    let h = harness(Router::default()).unwrap();
    let sibling = RpcBus::new(Arc::new(h.bus.clone()));
    let subscription = sibling.subscribe().await.unwrap();
    tokio::spawn(sibling.clone().serve(subscription, Arc::new(NoResponder)));

    let result = sibling
        .query::<_, GuildInfo>(Operation::GetGuild, &GuildQuery { guild: 1 }, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(BusError::Timeout { .. })));
    assert_eq!(sibling.pending_queries(), 0);
}
