//! Chorus - Entry Point
//!
//! Environment:
//! - `RUST_LOG`: filter directives (default `info`)
//! - `LOG_FORMAT=json`: JSON lines instead of ANSI output
//!
//! See [`chorus_bot::Config::from_env`] for everything else.

use anyhow::Context;
use chorus_bot::api::{ApiClient, ApiConfig};
use chorus_bot::bus::responder::CoordinatorResponder;
use chorus_bot::discord::{DiscordRest, Messenger};
use chorus_bot::kv::{get_parsed, KeyValue, RedisKv, KEY_SHARDS};
use chorus_bot::relay::{InboundConsumer, QueueTransport, RedisQueue};
use chorus_bot::{
    commands, events, jobs, Config, Coordinator, CoordinatorParts, RedisBus, RelayClient, Roster,
    RpcBus, SnapshotStore,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder
            .with_ansi(false)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder
            .with_ansi(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    }

    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "Panic");
    }));
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging()?;

    info!("Chorus v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let snapshots = SnapshotStore::new(config.snapshot_path.clone());
    let snapshot = snapshots
        .load()
        .await
        .context("Roster snapshot is unreadable; move it aside to start cold")?;

    let redis_client = redis::Client::open(config.redis_url.as_str()).context("Invalid REDIS_URL")?;
    let conn = redis::aio::ConnectionManager::new(redis_client.clone())
        .await
        .context("Redis connection failed")?;

    let kv: Arc<dyn KeyValue> = Arc::new(RedisKv::new(conn.clone()));
    let shard_count: u64 = get_parsed(kv.as_ref(), KEY_SHARDS)
        .await?
        .filter(|n| *n > 0)
        .context("Shard count is not in the cache; is the connector running?")?;
    info!(shards = shard_count, "Shard count loaded");

    let discord = Arc::new(DiscordRest::new(&config.bot_token, config.api_timeout)?);
    let bot_user = discord.current_user().await.context("Cannot fetch bot identity")?;
    info!(id = bot_user.id, username = %bot_user.username, "Logged in");

    let api = ApiClient::new(ApiConfig {
        base_url: config.api_url.clone(),
        secret: config.api_secret.clone(),
        timeout: config.api_timeout,
    })?;

    let queue: Arc<dyn QueueTransport> = Arc::new(RedisQueue::connect(&redis_client, conn.clone()).await?);
    let relay = RelayClient::new(queue.clone(), config.relay_send_queue.clone(), shard_count);
    let bus = RpcBus::new(Arc::new(RedisBus::new(
        redis_client.clone(),
        conn,
        config.bus_channel.clone(),
    )));

    let receive_queue = config.relay_receive_queue.clone();
    let main_guild = config.main_guild;

    let coordinator = Arc::new(Coordinator::new(CoordinatorParts {
        config,
        roster: Roster::new(),
        kv,
        api,
        discord,
        relay,
        bus: bus.clone(),
        commands: commands::registry(),
        bot_user,
    }));
    info!(commands = coordinator.commands.len(), "Command registry built");

    if let Some(snapshot) = snapshot {
        let members = snapshot.member_count();
        let guilds = snapshot.restore(&coordinator.roster);
        info!(guilds, members, "Restored roster snapshot");
    }

    let pipeline = Arc::new(events::handlers::pipeline(coordinator.clone()));

    let mut tasks = Vec::new();

    let subscription = bus.subscribe().await?;
    let responder = Arc::new(CoordinatorResponder::new(coordinator.clone()));
    tasks.push(tokio::spawn(bus.serve(subscription, responder)));

    let consumer = InboundConsumer::new(queue, receive_queue);
    tasks.push(tokio::spawn(consumer.run(pipeline)));

    tasks.extend(jobs::spawn_all(coordinator.clone()));

    if main_guild != 0 {
        if let Err(e) = coordinator.relay.request_members(main_guild).await {
            warn!(error = %e, guild = main_guild, "Could not request main guild members");
        }
    }

    info!("Chorus is running");
    shutdown_signal().await;
    info!("Shutting down");

    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }

    snapshots
        .save(&coordinator.roster)
        .await
        .context("Failed to write roster snapshot")?;

    Ok(())
}
