//! Inbound adapter.

use futures_util::{Stream, StreamExt};
use tether_types::Envelope;

use crate::dispatch::Event;

/// Turn raw inbound envelopes into `ResponseArrived` events.
///
/// One event per envelope, in arrival order. Nothing is buffered.
pub fn adapt_incoming_stream<I, O, E, S>(raw: S) -> impl Stream<Item = Event<I, O, E>>
where
    S: Stream<Item = Envelope<O>>,
{
    raw.map(Event::ResponseArrived)
}
