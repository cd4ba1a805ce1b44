//! Fault isolation for handler tasks
//!
//! Every event handler and bus responder runs through [`guarded`], which turns
//! the result or a panic into an explicit [`Outcome`]. Nothing escapes to the
//! dispatcher or the runtime.

use crate::api::ApiError;
use crate::bus::BusError;
use crate::command::CommandError;
use crate::discord::DiscordError;
use crate::kv::KvError;
use crate::relay::RelayError;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Error returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler hit a state it cannot recover from. Treated like a panic.
    #[error("{0}")]
    Fault(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Discord(#[from] DiscordError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

pub type HandlerResult = Result<(), HandlerError>;

/// What happened to one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Handler returned an error.
    Error(String),
    /// Handler panicked or declared a fault.
    Fault(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault(_))
    }
}

impl From<HandlerResult> for Outcome {
    fn from(result: HandlerResult) -> Self {
        match result {
            Ok(()) => Outcome::Ok,
            Err(HandlerError::Fault(msg)) => Outcome::Fault(msg),
            Err(e) => Outcome::Error(e.to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Await `fut`, converting a panic into `Err(message)`.
pub async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(panic_message)
}

/// Run a handler future and classify how it ended.
pub async fn guarded<F>(fut: F) -> Outcome
where
    F: Future<Output = HandlerResult>,
{
    match catch_panic(fut).await {
        Ok(result) => result.into(),
        Err(message) => Outcome::Fault(format!("panic: {}", message)),
    }
}
