//! Shard addressing on the send lane

use chorus_bot::relay::{shard_for_guild, Activity, MemoryQueue, RelayClient, RelayError};
use serde_json::Value;
use std::sync::Arc;

const LANE: &str = "gateway.send";

fn client(shards: u64) -> (Arc<MemoryQueue>, RelayClient) {
    let queue = Arc::new(MemoryQueue::new());
    let relay = RelayClient::new(queue.clone(), LANE, shards);
    (queue, relay)
}

fn frames(queue: &MemoryQueue) -> Vec<Value> {
    queue
        .drain(LANE)
        .iter()
        .map(|raw| serde_json::from_slice(raw).unwrap())
        .collect()
}

#[tokio::test]
async fn test_guild_commands_go_to_the_owning_shard() {
    let (queue, relay) = client(4);
    let guilds = [81384788765712384u64, 110373943822540800, 175928847299117063];

    for guild in guilds {
        relay.update_voice(guild, Some(42)).await.unwrap();
    }
    relay.request_members(guilds[0]).await.unwrap();

    let sent = frames(&queue);
    assert_eq!(sent.len(), 4);
    for (frame, guild) in sent.iter().zip(guilds) {
        assert_eq!(frame["shard"], shard_for_guild(guild, 4));
        assert_eq!(frame["data"]["d"]["guild_id"], guild.to_string());
        assert_eq!(frame["data"]["d"]["channel_id"], "42");
    }
    assert_eq!(sent[3]["data"]["op"], 8);
    assert_eq!(sent[3]["shard"], shard_for_guild(guilds[0], 4));
}

#[tokio::test]
async fn test_presence_uses_activities() {
    let (queue, relay) = client(2);
    relay
        .update_presence(Activity {
            name: "music".into(),
            kind: 2,
        })
        .await
        .unwrap();

    let sent = frames(&queue);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["shard"], 0);
    assert_eq!(sent[1]["shard"], 1);
    let activity = &sent[0]["data"]["d"]["activities"][0];
    assert_eq!(activity["name"], "music");
    assert_eq!(activity["type"], 2);
}

#[tokio::test]
async fn test_reconnect_bounds() {
    let (queue, relay) = client(3);

    relay.reconnect(2).await.unwrap();
    assert!(matches!(
        relay.reconnect(3).await,
        Err(RelayError::UnknownShard { shard: 3, count: 3 })
    ));

    let sent = frames(&queue);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["op"], "reconnect");
    assert!(sent[0].get("data").is_none());
}

#[tokio::test]
async fn test_forward_raw_keeps_op_and_payload() {
    let (queue, relay) = client(2);
    relay
        .forward_raw(1, 3, serde_json::json!({"status": "idle"}))
        .await
        .unwrap();
    assert!(relay.forward_raw(2, 3, Value::Null).await.is_err());

    let sent = frames(&queue);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["op"], "send");
    assert_eq!(sent[0]["shard"], 1);
    assert_eq!(sent[0]["data"], serde_json::json!({"op": 3, "d": {"status": "idle"}}));
}
