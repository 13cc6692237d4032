//! Request/response correlation over a fire-and-forget channel pair.
//!
//! Every outbound request is tagged with a fresh [`CallId`] and its
//! continuation is parked in a registry. When a response envelope arrives
//! with the same id the continuation is removed and run exactly once.
//! Responses with no pending call are dropped and counted.
//!
//! [`Engine`] is the single-threaded core. [`SharedEngine`] wraps it for
//! multi-threaded hosts, and [`adapt_incoming_stream`] feeds a raw inbound
//! stream into the engine's event type.

mod allocator;
mod dispatch;
mod error;
mod inbound;
mod outbound;
mod registry;
mod shared;

pub use allocator::IdAllocator;
pub use dispatch::{Dispatched, Engine, Event, UnmatchedLog, UnmatchedObserver};
pub use error::EngineError;
pub use inbound::adapt_incoming_stream;
pub use registry::{Continuation, PendingCalls};
pub use shared::SharedEngine;
pub use tether_types::{CallId, Envelope};
