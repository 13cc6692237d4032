//! The channel pair between one engine and its transport.
//!
//! [`EngineSide`] holds the outbound sender and the only inbound receiver. It
//! is not `Clone` and [`Host::bind`](crate::Host::bind) consumes it, so a pair
//! can never feed two registries. [`RemoteSide`] is what a transport drives:
//! it takes requests off the outbound queue and pushes responses in.

use tether_types::Envelope;
use tokio::sync::mpsc;

use crate::config::HostConfig;
use crate::error::HostError;

/// The engine's end of a channel pair.
///
/// Cannot be cloned:
///
/// ```compile_fail
/// let config = tether_host::HostConfig::default();
/// let (side, _remote) = tether_host::channel_pair::<u8, u8>(&config);
/// let second = side.clone();
/// ```
///
/// and binding it consumes it:
///
/// ```compile_fail
/// use tether_host::{Host, HostConfig, channel_pair};
///
/// let config = HostConfig::default();
/// let (side, _remote) = channel_pair::<u8, u8>(&config);
/// let first = Host::<u8, u8, ()>::bind(&config, side);
/// let second = Host::<u8, u8, ()>::bind(&config, side);
/// ```
pub struct EngineSide<I, O> {
    pub(crate) outbound: mpsc::Sender<Envelope<I>>,
    pub(crate) inbound: mpsc::Receiver<Envelope<O>>,
}

impl<I, O> EngineSide<I, O> {
    /// Wrap channels created by a transport.
    ///
    /// Ownership of the receiver is what ties the pair to one engine.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Envelope<I>>, inbound: mpsc::Receiver<Envelope<O>>) -> Self {
        Self { outbound, inbound }
    }
}

/// The transport's end of a channel pair.
pub struct RemoteSide<I, O> {
    requests: mpsc::Receiver<Envelope<I>>,
    responses: mpsc::Sender<Envelope<O>>,
}

impl<I, O> RemoteSide<I, O> {
    /// Next request emitted by the engine, or `None` once the host is gone.
    pub async fn recv_request(&mut self) -> Option<Envelope<I>> {
        self.requests.recv().await
    }

    /// Deliver a response to the engine.
    pub async fn send_response(&self, envelope: Envelope<O>) -> Result<(), HostError> {
        self.responses
            .send(envelope)
            .await
            .map_err(|_| HostError::InboundClosed)
    }

    /// Extra sender for transports that answer from several tasks.
    #[must_use]
    pub fn responder(&self) -> mpsc::Sender<Envelope<O>> {
        self.responses.clone()
    }

    #[must_use]
    pub fn into_parts(self) -> (mpsc::Receiver<Envelope<I>>, mpsc::Sender<Envelope<O>>) {
        (self.requests, self.responses)
    }
}

/// Create a bounded channel pair sized by `config`.
#[must_use]
pub fn channel_pair<I, O>(config: &HostConfig) -> (EngineSide<I, O>, RemoteSide<I, O>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity());
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity());
    (
        EngineSide::new(outbound_tx, inbound_rx),
        RemoteSide {
            requests: outbound_rx,
            responses: inbound_tx,
        },
    )
}
