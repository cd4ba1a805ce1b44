//! Roster persistence across restarts

use chorus_bot::gateway::{GatewayEvent, GuildPayload, UnavailableGuild};
use chorus_bot::snapshot::SNAPSHOT_VERSION;
use chorus_bot::{Roster, Snapshot, SnapshotError, SnapshotStore};
use serde_json::json;
use tempfile::TempDir;

fn populated() -> Roster {
    let roster = Roster::new();
    for id in [10u64, 20] {
        let guild: GuildPayload = serde_json::from_value(json!({
            "id": id.to_string(),
            "name": format!("Guild {}", id),
            "owner_id": "1",
            "roles": [{"id": id.to_string(), "name": "@everyone", "permissions": 2048}],
            "channels": [{"id": (id * 10).to_string(), "type": 0, "name": "general"}],
            "members": [
                {"user": {"id": "1", "username": "owner", "discriminator": "0001"}, "nick": "boss", "roles": []},
                {"user": {"id": "2", "username": "guest", "discriminator": "0002"}, "roles": []}
            ],
            "voice_states": [{"channel_id": (id * 10 + 1).to_string(), "user_id": "2", "session_id": "s"}]
        }))
        .unwrap();
        roster.apply(&GatewayEvent::GuildCreate(guild));
    }
    roster
}

#[tokio::test]
async fn test_save_then_restore_rebuilds_roster() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("cache.db"));

    let saved = store.save(&populated()).await.unwrap();
    assert_eq!(saved.guilds.len(), 2);
    assert_eq!(saved.member_count(), 4);

    let restored = Roster::new();
    assert_eq!(store.restore_into(&restored).await.unwrap(), 2);

    assert!(restored.contains(10) && restored.contains(20));
    assert_eq!(restored.guild_for_channel(200), Some(20));
    let owner = restored.member(10, 1).unwrap();
    assert_eq!(owner.nick.as_deref(), Some("boss"));
    assert_eq!(owner.user.username, "owner");
    assert_eq!(restored.permissions(10, None, 2), Some(2048));

    // Voice states come back from the gateway, not the file.
    assert_eq!(restored.voice_channel_of(10, 2), None);
    assert_eq!(restored.counts().voices, 0);
}

#[tokio::test]
async fn test_missing_file_starts_cold() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("never-written.db"));

    assert!(store.load().await.unwrap().is_none());
    let roster = Roster::new();
    assert_eq!(store.restore_into(&roster).await.unwrap(), 0);
    assert!(roster.is_empty());
}

#[tokio::test]
async fn test_truncated_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let store = SnapshotStore::new(&path);
    store.save(&populated()).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let roster = Roster::new();
    let err = store.restore_into(&roster).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Corrupt { .. }));
    assert!(roster.is_empty());
}

#[tokio::test]
async fn test_other_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION + 1,
        taken_at: 0,
        guilds: Vec::new(),
    };
    std::fs::write(&path, postcard::to_allocvec(&snapshot).unwrap()).unwrap();

    let err = SnapshotStore::new(&path).load().await.unwrap_err();
    assert!(matches!(err, SnapshotError::Version { found, .. } if found == SNAPSHOT_VERSION + 1));
}

#[tokio::test]
async fn test_save_overwrites_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("cache.db"));

    store.save(&populated()).await.unwrap();
    store.save(&Roster::new()).await.unwrap();

    let loaded = store.load().await.unwrap().unwrap();
    assert!(loaded.guilds.is_empty());
}

#[tokio::test]
async fn test_overwrites_and_placeholders_survive_restore() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path().join("cache.db"));

    let roster = Roster::new();
    let guild: GuildPayload = serde_json::from_value(json!({
        "id": "10",
        "name": "Guild",
        "owner_id": "1",
        "roles": [{"id": "10", "name": "@everyone", "permissions": 18432}],
        "channels": [
            {"id": "100", "type": 0, "name": "general"},
            {"id": "101", "type": 0, "name": "read-only", "permission_overwrites": [
                {"id": "10", "type": 0, "allow": 0, "deny": 2048},
                {"id": "3", "type": 1, "allow": 2048, "deny": 0}
            ]}
        ],
        "members": [
            {"user": {"id": "2", "username": "guest", "discriminator": "0002"}, "roles": []},
            {"user": {"id": "3", "username": "poster", "discriminator": "0003"}, "roles": []}
        ]
    }))
    .unwrap();
    roster.apply(&GatewayEvent::GuildCreate(guild));
    roster.apply(&GatewayEvent::GuildDelete(UnavailableGuild {
        id: 30,
        unavailable: true,
    }));
    store.save(&roster).await.unwrap();

    let restored = Roster::new();
    assert_eq!(store.restore_into(&restored).await.unwrap(), 2);

    assert_eq!(restored.permissions(10, Some(100), 2), Some(2048 | 16384));
    assert_eq!(restored.permissions(10, Some(101), 2), Some(16384));
    assert_eq!(restored.permissions(10, Some(101), 3), Some(2048 | 16384));

    assert_eq!(restored.with_guild(30, |g| g.unavailable), Some(true));
    assert_eq!(restored.with_guild(10, |g| g.unavailable), Some(false));
}
