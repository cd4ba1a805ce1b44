//! Key-value cache shared with the connector and the REST backend
//!
//! Redis strings and sets behind a small trait so command code and jobs can
//! run against an in-memory map in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub const KEY_SHARDS: &str = "gateway_shards";
pub const KEY_STARTED: &str = "gateway_started";
pub const KEY_STATUSES: &str = "gateway_statuses";
pub const KEY_BOT_STATS: &str = "bot_stats";
pub const KEY_BLACKLIST: &str = "blacklists";
pub const KEY_BOT_ADMINS: &str = "bot_admins";
pub const KEY_BOT_OWNERS: &str = "bot_owners";

pub fn guild_key(guild_id: u64) -> String {
    format!("guild:{}", guild_id)
}

pub fn guild_prefix_key(guild_id: u64) -> String {
    format!("guild_prefix:{}", guild_id)
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, KvError>;

    async fn add_members(&self, key: &str, members: &[String]) -> Result<(), KvError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), KvError>;
}

/// Values written by other services are sometimes JSON strings.
pub fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse a key's value, failing with [`KvError::Invalid`].
pub async fn get_parsed<T: std::str::FromStr>(
    kv: &dyn KeyValue,
    key: &str,
) -> Result<Option<T>, KvError> {
    match kv.get(key).await? {
        Some(raw) => strip_quotes(&raw)
            .parse()
            .map(Some)
            .map_err(|_| KvError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
            }),
        None => Ok(None),
    }
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyValue for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        match expiry {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember::<_, _, bool>(key, member).await?)
    }

    async fn add_members(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, members).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.rename::<_, _, ()>(from, to).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Str(String, Option<Instant>),
    Set(HashSet<String>),
}

/// In-process store for tests and local runs.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        let mut members: Vec<String> = match self.entries.lock().get(key) {
            Some(Entry::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        };
        members.sort();
        members
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock();
        let expired = matches!(
            entries.get(key),
            Some(Entry::Str(_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        match entries.get(key) {
            Some(Entry::Str(value, _)) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>) -> Result<(), KvError> {
        let deadline = expiry.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), Entry::Str(value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, KvError> {
        Ok(matches!(
            self.entries.lock().get(key),
            Some(Entry::Set(set)) if set.contains(member)
        ))
    }

    async fn add_members(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        if let Entry::Set(set) = entry {
            set.extend(members.iter().cloned());
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.remove(from) {
            entries.insert(to.to_string(), entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"!\""), "!");
        assert_eq!(strip_quotes("16"), "16");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[tokio::test]
    async fn test_memory_kv_expiry() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_kv_sets_and_rename() {
        let kv = MemoryKv::new();
        kv.add_members("tmp", &["1".to_string(), "2".to_string()]).await.unwrap();
        kv.rename("tmp", "admins").await.unwrap();
        assert!(kv.is_member("admins", "2").await.unwrap());
        assert!(!kv.is_member("admins", "3").await.unwrap());
        assert!(!kv.contains("tmp"));
    }

    #[tokio::test]
    async fn test_get_parsed() {
        let kv = MemoryKv::new();
        kv.set(KEY_SHARDS, "\"4\"", None).await.unwrap();
        assert_eq!(get_parsed::<u64>(&kv, KEY_SHARDS).await.unwrap(), Some(4));

        kv.set(KEY_SHARDS, "four", None).await.unwrap();
        assert!(matches!(
            get_parsed::<u64>(&kv, KEY_SHARDS).await,
            Err(KvError::Invalid { .. })
        ));
    }
}
