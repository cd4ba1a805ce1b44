//! Cross-process RPC bus
//!
//! Request/response on top of one broadcast channel shared by every process.
//!
//! - **Envelope**: `{op, id?, data}` as JSON
//! - **Query**: carries a fresh correlation id and waits for a `response`
//!   envelope echoing it, up to a caller-supplied timeout
//! - **Notification**: no id, no response
//! - **Responder**: declares the operations it serves; only those are decoded,
//!   and each handled query is answered exactly once
//!
//! Since every subscriber sees every envelope, `response` envelopes are only
//! ever matched against pending queries and never reach a responder.

mod payloads;
pub mod responder;
mod transport;

pub use payloads::*;
pub use transport::{BusTransport, LocalBus, RedisBus};

use crate::guard::{catch_panic, HandlerError, Outcome};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus transport error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Bus payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No response to {op} within {timeout:?}")]
    Timeout { op: Operation, timeout: Duration },

    #[error("A query needs a non-zero timeout")]
    InvalidTimeout,

    #[error("{0} cannot be sent as a query")]
    NotQuery(Operation),

    #[error("Bus subscription closed")]
    Closed,
}

/// Closed set of bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetUser,
    GetMember,
    GetGuild,
    GetPermission,
    SendMessage,
    GetConnected,
    SetConnected,
    VoiceUpdate,
    Response,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetUser => "get_user",
            Operation::GetMember => "get_member",
            Operation::GetGuild => "get_guild",
            Operation::GetPermission => "get_permission",
            Operation::SendMessage => "send_message",
            Operation::GetConnected => "get_connected",
            Operation::SetConnected => "set_connected",
            Operation::VoiceUpdate => "voice_update",
            Operation::Response => "response",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Serves a subset of operations.
#[async_trait]
pub trait Responder: Send + Sync {
    fn implements(&self, op: Operation) -> bool;

    /// `Ok(None)` answers with null data.
    async fn handle(&self, request: BusRequest) -> Result<Option<Value>, HandlerError>;
}

/// Responder that serves nothing, for processes that only query.
pub struct NoResponder;

#[async_trait]
impl Responder for NoResponder {
    fn implements(&self, _op: Operation) -> bool {
        false
    }

    async fn handle(&self, _request: BusRequest) -> Result<Option<Value>, HandlerError> {
        Ok(None)
    }
}

/// Live subscription handed to [`RpcBus::serve`].
pub struct Subscription {
    stream: BoxStream<'static, String>,
}

type Pending = Mutex<HashMap<String, oneshot::Sender<Value>>>;

/// Removes the correlation slot however the query ends.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct Inner {
    transport: Arc<dyn BusTransport>,
    pending: Pending,
}

#[derive(Clone)]
pub struct RpcBus {
    inner: Arc<Inner>,
}

impl RpcBus {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn pending_queries(&self) -> usize {
        self.inner.pending.lock().len()
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(envelope)?;
        self.inner.transport.publish(payload).await
    }

    /// Fire-and-forget notification.
    pub async fn publish<T: Serialize>(&self, op: Operation, data: &T) -> Result<(), BusError> {
        debug!(%op, "Bus publish");
        self.send(&Envelope {
            op,
            id: None,
            data: serde_json::to_value(data)?,
        })
        .await
    }

    /// Send a query and wait for its response. `Ok(None)` when the responder
    /// answered with null. Requires a running [`serve`](Self::serve) loop on
    /// this bus to receive the response.
    pub async fn query<T, R>(&self, op: Operation, data: &T, timeout: Duration) -> Result<Option<R>, BusError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        if timeout.is_zero() {
            return Err(BusError::InvalidTimeout);
        }
        if matches!(op, Operation::Response | Operation::VoiceUpdate) {
            return Err(BusError::NotQuery(op));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        debug!(%op, id = %id, "Bus query");
        self.send(&Envelope {
            op,
            id: Some(id),
            data: serde_json::to_value(data)?,
        })
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Value::Null)) => Ok(None),
            Ok(Ok(value)) => Ok(Some(serde_json::from_value(value)?)),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout { op, timeout }),
        }
    }

    pub async fn respond(&self, id: String, data: Value) -> Result<(), BusError> {
        self.send(&Envelope {
            op: Operation::Response,
            id: Some(id),
            data,
        })
        .await
    }

    pub async fn subscribe(&self) -> Result<Subscription, BusError> {
        Ok(Subscription {
            stream: self.inner.transport.subscribe().await?,
        })
    }

    /// Route every envelope from `subscription` until it ends.
    pub async fn serve(self, mut subscription: Subscription, responder: Arc<dyn Responder>) {
        info!("Bus listener started");
        while let Some(raw) = subscription.stream.next().await {
            self.route(&raw, &responder);
        }
        warn!("Bus subscription ended");
    }

    /// Handle one raw envelope. Returns the responder task when one was spawned.
    pub fn route(&self, raw: &str, responder: &Arc<dyn Responder>) -> Option<JoinHandle<Outcome>> {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, raw, "Ignoring unrecognised bus envelope");
                return None;
            }
        };

        if envelope.op == Operation::Response {
            if let Some(id) = envelope.id {
                if let Some(tx) = self.inner.pending.lock().remove(&id) {
                    let _ = tx.send(envelope.data);
                }
            }
            return None;
        }

        if !responder.implements(envelope.op) {
            return None;
        }

        let op = envelope.op;
        let id = envelope.id;
        let request = BusRequest::decode(op, envelope.data);
        let bus = self.clone();
        let responder = Arc::clone(responder);

        Some(tokio::spawn(async move {
            let (data, outcome) = match request {
                Ok(Some(request)) => match catch_panic(responder.handle(request)).await {
                    Ok(Ok(data)) => (data.unwrap_or(Value::Null), Outcome::Ok),
                    Ok(Err(HandlerError::Fault(msg))) => (Value::Null, Outcome::Fault(msg)),
                    Ok(Err(e)) => (Value::Null, Outcome::Error(e.to_string())),
                    Err(panic) => (Value::Null, Outcome::Fault(format!("panic: {}", panic))),
                },
                Ok(None) => (Value::Null, Outcome::Ok),
                Err(e) => (Value::Null, Outcome::Error(format!("undecodable {} payload: {}", op, e))),
            };

            match &outcome {
                Outcome::Ok => {}
                Outcome::Error(e) => warn!(%op, error = %e, "Bus request failed"),
                Outcome::Fault(f) => error!(%op, fault = %f, "Recovered from bus responder fault"),
            }

            if let Some(id) = id {
                if let Err(e) = bus.respond(id, data).await {
                    warn!(%op, error = %e, "Failed to publish bus response");
                }
            }
            outcome
        }))
    }
}
