//! Broadcast transports for the RPC bus

use super::BusError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// One shared channel. Every subscriber sees every payload, including its own.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, payload: String) -> Result<(), BusError>;

    /// Start receiving. Payloads published after this returns are delivered.
    async fn subscribe(&self) -> Result<BoxStream<'static, String>, BusError>;
}

/// Redis PUBLISH / SUBSCRIBE on a single channel.
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    channel: String,
}

impl RedisBus {
    pub fn new(client: redis::Client, conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            client,
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl BusTransport for RedisBus {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        debug!(channel = %self.channel, "Subscribed to bus channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(error = %e, "Non-text bus payload");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}

/// In-process broadcast channel for tests and single-process runs.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<String>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BusTransport for LocalBus {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        // No subscribers is not an error on a broadcast bus.
        let _ = self.tx.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, BusError> {
        let stream = BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(error = %e, "Bus subscriber lagged");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
