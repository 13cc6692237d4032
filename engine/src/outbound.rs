//! Outbound envelope construction.

use tether_types::Envelope;

use crate::allocator::IdAllocator;
use crate::error::EngineError;

/// Pair `payload` with a freshly allocated id.
///
/// Advances the allocator; transmitting the envelope is the caller's job.
pub fn build<I>(ids: &mut IdAllocator, payload: I) -> Result<Envelope<I>, EngineError> {
    let id = ids.allocate().ok_or(EngineError::IdSpaceExhausted)?;
    Ok(Envelope::new(id, payload))
}
