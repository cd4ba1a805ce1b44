//! Chorus shard coordinator
//!
//! Sits between a sharded gateway connector and the rest of a multi-process
//! music bot. Gateway frames arrive on a Redis list, run through a staged
//! event pipeline that keeps a roster of guilds, members and voice states,
//! and drive the text-command router. Sibling processes query the roster
//! over a Redis pub/sub RPC bus.
//!
//! # Architecture
//!
//! ```text
//! connector ──► relay (receive lane) ──► events::Pipeline ──► roster
//!     ▲                                        │              ▲
//!     │                                        ▼              │
//!     └──── relay (send lane) ◄──── command router        bus responder ◄──► sibling processes
//!                                              │
//!                                              ▼
//!                                   REST backend / chat REST
//! ```
//!
//! - **Relay**: shard-addressed commands out, raw dispatch frames in
//! - **Events**: three stages, each handler isolated from the others' faults
//! - **Bus**: fire-and-forget broadcasts plus correlated queries with timeouts
//! - **Snapshot**: roster persisted on shutdown, restored on start

pub mod api;
pub mod bus;
pub mod command;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod discord;
pub mod events;
pub mod gateway;
pub mod guard;
pub mod jobs;
pub mod kv;
pub mod models;
pub mod relay;
pub mod roster;
pub mod snapshot;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::{ApiClient, ApiConfig, ApiError};
pub use bus::{BusError, LocalBus, Operation, RedisBus, Responder, RpcBus};
pub use command::{Command, CommandContext, CommandError, Reply, Router};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorParts};
pub use events::{Pipeline, Stage};
pub use gateway::{Event, EventKind, GatewayEvent};
pub use guard::{HandlerError, Outcome};
pub use relay::{InboundConsumer, RelayClient, RelayError};
pub use roster::Roster;
pub use snapshot::{Snapshot, SnapshotError, SnapshotStore};
