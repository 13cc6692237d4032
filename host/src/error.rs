use tether_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// The host loop has stopped; the call was not accepted or will never
    /// be answered.
    #[error("host stopped")]
    Closed,
    /// The transport dropped its end of the outbound channel.
    #[error("outbound channel closed")]
    OutboundClosed,
    /// The transport dropped its end of the inbound channel.
    #[error("inbound channel closed")]
    InboundClosed,
    #[error(transparent)]
    Engine(#[from] EngineError),
}
