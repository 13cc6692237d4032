//! Async host for the Tether correlation engine.
//!
//! A [`Host`] owns one [`Engine`](tether_engine::Engine) and the engine side
//! of one channel pair. Applications issue calls through a [`HostHandle`];
//! a transport moves envelopes through the [`RemoteSide`]. Continuations run
//! on the host task and their effects arrive on the completion receiver.
//!
//! ```text
//! HostHandle ──calls──▶ Host ──outbound──▶ RemoteSide (transport)
//!                        ▲                      │
//!                        └──────inbound─────────┘
//! ```

mod channel;
mod config;
mod error;
mod host;

pub use channel::{EngineSide, RemoteSide, channel_pair};
pub use config::{ConfigError, HostConfig};
pub use error::HostError;
pub use host::{Host, HostHandle, HostStats};
pub use tether_engine::UnmatchedLog;
