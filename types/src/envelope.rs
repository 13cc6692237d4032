use serde::{Deserialize, Serialize};

use crate::CallId;

/// A payload tagged with the call it belongs to.
///
/// The same shape crosses the boundary in both directions: outbound it carries
/// a request, inbound it carries the response to the call with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: CallId,
    pub payload: T,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn new(id: CallId, payload: T) -> Self {
        Self { id, payload }
    }

    /// Split into id and payload.
    #[must_use]
    pub fn into_parts(self) -> (CallId, T) {
        (self.id, self.payload)
    }

    /// Replace the payload, keeping the id.
    ///
    /// Transports use this to answer a request without touching correlation.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            payload: f(self.payload),
        }
    }
}
