//! Boundary types for Tether.
//!
//! Pure data with no IO and no async: the identifier that correlates a call
//! with its response, and the envelope exchanged with the external channel.

mod envelope;
mod ids;

pub use envelope::Envelope;
pub use ids::CallId;
