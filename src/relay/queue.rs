//! Durable queue transports
//!
//! The relay lanes are Redis lists: producers `LPUSH`, consumers `BRPOP`, so
//! each lane is FIFO and survives either side restarting.

use super::RelayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), RelayError>;

    /// Wait up to `wait` for the next item.
    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, RelayError>;
}

/// Redis lists. Blocking pops get their own connection so they never stall
/// pushes sharing the manager.
pub struct RedisQueue {
    producer: ConnectionManager,
    consumer: tokio::sync::Mutex<MultiplexedConnection>,
}

impl RedisQueue {
    pub async fn connect(client: &redis::Client, producer: ConnectionManager) -> Result<Self, RelayError> {
        let consumer = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            producer,
            consumer: tokio::sync::Mutex::new(consumer),
        })
    }
}

#[async_trait]
impl QueueTransport for RedisQueue {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        let mut conn = self.producer.clone();
        conn.lpush::<_, _, ()>(queue, payload).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, RelayError> {
        let mut conn = self.consumer.lock().await;
        let item: Option<(String, Vec<u8>)> = conn.brpop(queue, wait.as_secs_f64()).await?;
        Ok(item.map(|(_, payload)| payload))
    }
}

/// In-process lanes for tests and local runs.
#[derive(Default)]
pub struct MemoryQueue {
    lanes: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.lanes.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Remove everything queued on a lane, oldest first.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lanes
            .lock()
            .get_mut(queue)
            .map(|lane| lane.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        self.lanes
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<Vec<u8>>, RelayError> {
        let deadline = Instant::now() + wait;
        loop {
            let item = self.lanes.lock().get_mut(queue).and_then(VecDeque::pop_front);
            if item.is_some() {
                return Ok(item);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.push("lane", b"one".to_vec()).await.unwrap();
        queue.push("lane", b"two".to_vec()).await.unwrap();
        assert_eq!(queue.len("lane"), 2);

        let wait = Duration::from_millis(10);
        assert_eq!(queue.pop("lane", wait).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(queue.pop("lane", wait).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(queue.pop("lane", wait).await.unwrap(), None);
    }
}
