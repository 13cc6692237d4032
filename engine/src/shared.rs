//! Engine shared between threads.
//!
//! Each transition holds the lock only while the registry and counter change.
//! Continuations and the unmatched-response observer run after the guard is
//! released, so either may call back into the same handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_types::{CallId, Envelope};

use crate::dispatch::Engine;
use crate::error::EngineError;

pub struct SharedEngine<I, O, E> {
    inner: Arc<Mutex<Engine<I, O, E>>>,
}

impl<I, O, E> SharedEngine<I, O, E> {
    #[must_use]
    pub fn new(engine: Engine<I, O, E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    // Continuations never run under the lock, so a poisoned guard still holds
    // a consistent registry.
    fn lock(&self) -> MutexGuard<'_, Engine<I, O, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim an id and register `continuation` as one locked step.
    ///
    /// The caller transmits the returned envelope after the lock is gone.
    pub fn submit_call(
        &self,
        payload: I,
        continuation: impl FnOnce(O) -> E + Send + 'static,
    ) -> Result<Envelope<I>, EngineError> {
        self.lock().submit_continuation(payload, Box::new(continuation))
    }

    /// Remove the matching entry under the lock, then run it unlocked.
    pub fn handle_incoming(&self, envelope: Envelope<O>) -> Option<E> {
        let (id, payload) = envelope.into_parts();
        let taken = self.lock().take_pending(id);
        taken.complete(payload)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending_count()
    }

    #[must_use]
    pub fn is_pending(&self, id: CallId) -> bool {
        self.lock().is_pending(id)
    }

    #[must_use]
    pub fn unmatched_count(&self) -> u64 {
        self.lock().unmatched_count()
    }
}

impl<I, O, E> Clone for SharedEngine<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I, O, E> From<Engine<I, O, E>> for SharedEngine<I, O, E> {
    fn from(engine: Engine<I, O, E>) -> Self {
        Self::new(engine)
    }
}
