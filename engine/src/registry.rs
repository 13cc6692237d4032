//! Pending call registry.
//!
//! Owns the continuation of every call that has been issued but not yet
//! answered. Entries leave only by being matched; there is no expiry.

use std::collections::HashMap;

use tether_types::CallId;

/// Single-use callback run with the response payload of its call.
pub type Continuation<O, E> = Box<dyn FnOnce(O) -> E + Send>;

/// Continuations of issued calls, keyed by call id.
pub struct PendingCalls<O, E> {
    entries: HashMap<CallId, Continuation<O, E>>,
}

impl<O, E> PendingCalls<O, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `continuation` under a freshly allocated `id`.
    ///
    /// Freshness is the allocator's guarantee and is only checked in debug
    /// builds.
    pub fn insert(&mut self, id: CallId, continuation: Continuation<O, E>) {
        let previous = self.entries.insert(id, continuation);
        debug_assert!(previous.is_none(), "call id {id} registered twice");
    }

    /// Remove and return the continuation for `id`, if one is pending.
    pub fn take(&mut self, id: CallId) -> Option<Continuation<O, E>> {
        self.entries.remove(&id)
    }

    #[must_use]
    pub fn contains(&self, id: CallId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outstanding ids in issue order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<O, E> Default for PendingCalls<O, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, E> std::fmt::Debug for PendingCalls<O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("ids", &self.pending_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Continuation<&'static str, String> {
        Box::new(|payload| payload.to_string())
    }

    #[test]
    fn take_removes_entry() {
        let mut pending = PendingCalls::new();
        pending.insert(CallId::new(0), echo());
        assert!(pending.contains(CallId::new(0)));

        let k = pending.take(CallId::new(0)).expect("registered");
        assert_eq!(k("hi"), "hi");
        assert!(pending.is_empty());
        assert!(pending.take(CallId::new(0)).is_none());
    }

    #[test]
    fn take_of_unknown_id_leaves_registry_unchanged() {
        let mut pending = PendingCalls::new();
        pending.insert(CallId::new(3), echo());
        pending.insert(CallId::new(1), echo());

        assert!(pending.take(CallId::new(7)).is_none());
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.pending_ids(), vec![CallId::new(1), CallId::new(3)]);
    }
}
