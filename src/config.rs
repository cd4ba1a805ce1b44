//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token for the chat REST API
    pub bot_token: String,

    /// REST backend base URL
    pub api_url: String,

    /// Shared secret sent as `Authorization` to the backend
    pub api_secret: String,

    /// Redis URL for the relay queue, the bus and the key-value cache
    pub redis_url: String,

    /// Support guild whose roles define bot admins and owners
    pub main_guild: u64,

    pub bot_owner_role: u64,

    pub bot_admin_role: u64,

    /// Channel receiving guild join/leave notices
    pub guilds_channel: Option<u64>,

    /// Public website, used for dashboard links
    pub base_uri: String,

    /// Roster snapshot file
    pub snapshot_path: PathBuf,

    /// Lane the connector pushes gateway frames onto
    pub relay_receive_queue: String,

    /// Lane the connector reads shard commands from
    pub relay_send_queue: String,

    /// Broadcast channel for the RPC bus
    pub bus_channel: String,

    /// Timeout for backend and chat REST requests
    pub api_timeout: Duration,

    /// How long the bot stays alone in a voice channel before leaving
    pub voice_idle_timeout: Duration,

    /// Interval of the background flush jobs
    pub flush_interval: Duration,

    /// Prefix shown when a guild has none configured
    pub default_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: "http://127.0.0.1:8000".to_string(),
            api_secret: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            main_guild: 0,
            bot_owner_role: 0,
            bot_admin_role: 0,
            guilds_channel: None,
            base_uri: "http://localhost".to_string(),
            snapshot_path: PathBuf::from("./cache.db"),
            relay_receive_queue: "gateway".to_string(),
            relay_send_queue: "gateway.send".to_string(),
            bus_channel: "main".to_string(),
            api_timeout: Duration::from_secs(5),
            voice_idle_timeout: Duration::from_secs(60),
            flush_interval: Duration::from_secs(5),
            default_prefix: "!".to_string(),
        }
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} not set", name))
}

fn id(name: &str) -> Result<u64> {
    required(name)?
        .parse()
        .with_context(|| format!("{} is not a valid id", name))
}

fn optional_id(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map(Some)
            .with_context(|| format!("{} is not a valid id", name)),
        _ => Ok(None),
    }
}

fn secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            api_url: required("API_URL")?,
            api_secret: required("API_SECRET")?,
            redis_url: required("REDIS_URL")?,
            main_guild: id("MAIN_GUILD")?,
            bot_owner_role: id("BOT_OWNER_ROLE")?,
            bot_admin_role: id("BOT_ADMIN_ROLE")?,
            guilds_channel: optional_id("GUILDS_CHANNEL")?,
            base_uri: std::env::var("BASE_URI").unwrap_or(defaults.base_uri),
            snapshot_path: std::env::var("SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            relay_receive_queue: std::env::var("RELAY_RECEIVE_QUEUE")
                .unwrap_or(defaults.relay_receive_queue),
            relay_send_queue: std::env::var("RELAY_SEND_QUEUE")
                .unwrap_or(defaults.relay_send_queue),
            bus_channel: std::env::var("BUS_CHANNEL").unwrap_or(defaults.bus_channel),
            api_timeout: secs("API_TIMEOUT_SECS", defaults.api_timeout),
            voice_idle_timeout: secs("VOICE_IDLE_TIMEOUT_SECS", defaults.voice_idle_timeout),
            flush_interval: defaults.flush_interval,
            default_prefix: std::env::var("DEFAULT_PREFIX").unwrap_or(defaults.default_prefix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relay_receive_queue, "gateway");
        assert_eq!(config.relay_send_queue, "gateway.send");
        assert_eq!(config.bus_channel, "main");
        assert_eq!(config.snapshot_path, PathBuf::from("./cache.db"));
        assert_eq!(config.api_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_secs_falls_back_on_garbage() {
        std::env::set_var("CHORUS_TEST_TIMEOUT", "soon");
        assert_eq!(secs("CHORUS_TEST_TIMEOUT", Duration::from_secs(3)), Duration::from_secs(3));
        std::env::set_var("CHORUS_TEST_TIMEOUT", "7");
        assert_eq!(secs("CHORUS_TEST_TIMEOUT", Duration::from_secs(3)), Duration::from_secs(7));
        std::env::remove_var("CHORUS_TEST_TIMEOUT");
    }
}
