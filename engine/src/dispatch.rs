//! Dispatch handler: the engine's two state transitions.
//!
//! The engine has a single operational state described entirely by the id
//! counter and the pending registry. Each event is applied to completion
//! before the next one is accepted:
//!
//! - `CallRequested` allocates an id, registers the continuation and yields
//!   the envelope to emit.
//! - `ResponseArrived` removes the matching continuation and runs it. A
//!   response with no pending call is counted and dropped.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Deserialize;
use tether_types::{CallId, Envelope};

use crate::allocator::IdAllocator;
use crate::error::EngineError;
use crate::outbound;
use crate::registry::{Continuation, PendingCalls};

/// Observer invoked with the id of every dropped response.
pub type UnmatchedObserver = Arc<dyn Fn(CallId) + Send + Sync>;

/// Result of removing a pending continuation.
pub(crate) enum Taken<O, E> {
    Found(Continuation<O, E>),
    /// No call was pending. The observer, if any, is still to be notified.
    Missing(CallId, Option<UnmatchedObserver>),
}

impl<O, E> Taken<O, E> {
    /// Run the continuation, or notify the observer of the miss.
    pub(crate) fn complete(self, payload: O) -> Option<E> {
        match self {
            Self::Found(continuation) => Some(continuation(payload)),
            Self::Missing(id, observer) => {
                if let Some(observer) = observer {
                    observer(id);
                }
                None
            }
        }
    }
}

/// How an unmatched response is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedLog {
    /// Counted only.
    Off,
    #[default]
    Debug,
    Warn,
}

/// The engine's input messages.
pub enum Event<I, O, E> {
    CallRequested {
        payload: I,
        continuation: Continuation<O, E>,
    },
    ResponseArrived(Envelope<O>),
}

impl<I, O, E> From<Envelope<O>> for Event<I, O, E> {
    fn from(envelope: Envelope<O>) -> Self {
        Self::ResponseArrived(envelope)
    }
}

impl<I: fmt::Debug, O: fmt::Debug, E> fmt::Debug for Event<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallRequested { payload, .. } => f
                .debug_struct("CallRequested")
                .field("payload", payload)
                .finish_non_exhaustive(),
            Self::ResponseArrived(envelope) => {
                f.debug_tuple("ResponseArrived").field(envelope).finish()
            }
        }
    }
}

/// What a single dispatch step produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatched<I, E> {
    /// Hand this envelope to the outbound channel.
    Emit(Envelope<I>),
    /// A response matched; `effect` is what its continuation returned.
    Completed { id: CallId, effect: E },
    /// A response matched nothing and was dropped.
    Unmatched(CallId),
}

/// Correlation state for one outbound/inbound channel pair.
///
/// Not `Clone`: two engines sharing a channel pair would each see responses
/// meant for the other.
pub struct Engine<I, O, E> {
    ids: IdAllocator,
    pending: PendingCalls<O, E>,
    unmatched: u64,
    unmatched_log: UnmatchedLog,
    on_unmatched: Option<UnmatchedObserver>,
    _request: PhantomData<fn(I)>,
}

impl<I, O, E> Engine<I, O, E> {
    /// Fresh engine: no pending calls, next id 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            pending: PendingCalls::new(),
            unmatched: 0,
            unmatched_log: UnmatchedLog::default(),
            on_unmatched: None,
            _request: PhantomData,
        }
    }

    /// Engine whose ids continue from `ids` instead of 0.
    #[must_use]
    pub fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            ids,
            ..Self::new()
        }
    }

    pub fn with_unmatched_log(mut self, level: UnmatchedLog) -> Self {
        self.unmatched_log = level;
        self
    }

    /// Install an observer for dropped responses.
    ///
    /// It runs after the registry has been updated; under a
    /// [`SharedEngine`](crate::SharedEngine) it runs with the lock released.
    pub fn on_unmatched(mut self, observer: impl Fn(CallId) + Send + Sync + 'static) -> Self {
        self.on_unmatched = Some(Arc::new(observer));
        self
    }

    /// Issue a call: allocate an id, register `continuation`, and return the
    /// envelope to transmit.
    ///
    /// On failure nothing is registered and the counter does not move.
    pub fn submit_call(
        &mut self,
        payload: I,
        continuation: impl FnOnce(O) -> E + Send + 'static,
    ) -> Result<Envelope<I>, EngineError> {
        self.submit_continuation(payload, Box::new(continuation))
    }

    /// [`submit_call`](Self::submit_call) for an already boxed continuation.
    pub fn submit_continuation(
        &mut self,
        payload: I,
        continuation: Continuation<O, E>,
    ) -> Result<Envelope<I>, EngineError> {
        let envelope = outbound::build(&mut self.ids, payload)?;
        self.pending.insert(envelope.id, continuation);
        tracing::trace!(id = %envelope.id, pending = self.pending.len(), "Call issued");
        Ok(envelope)
    }

    /// Route a response to its continuation and return the effect it
    /// produced. Unknown ids yield `None` and leave the registry untouched.
    pub fn handle_incoming(&mut self, envelope: Envelope<O>) -> Option<E> {
        let (id, payload) = envelope.into_parts();
        self.take_pending(id).complete(payload)
    }

    /// Apply one event.
    pub fn dispatch(&mut self, event: Event<I, O, E>) -> Result<Dispatched<I, E>, EngineError> {
        match event {
            Event::CallRequested {
                payload,
                continuation,
            } => self.submit_continuation(payload, continuation).map(Dispatched::Emit),
            Event::ResponseArrived(envelope) => {
                let id = envelope.id;
                Ok(match self.handle_incoming(envelope) {
                    Some(effect) => Dispatched::Completed { id, effect },
                    None => Dispatched::Unmatched(id),
                })
            }
        }
    }

    /// Remove the continuation for `id` without running it.
    ///
    /// A miss is counted and logged here; running the continuation or the
    /// observer is left to [`Taken::complete`] so a locked caller can release
    /// the lock first.
    pub(crate) fn take_pending(&mut self, id: CallId) -> Taken<O, E> {
        if let Some(continuation) = self.pending.take(id) {
            tracing::debug!(id = %id, pending = self.pending.len(), "Call completed");
            return Taken::Found(continuation);
        }
        self.record_unmatched(id);
        Taken::Missing(id, self.on_unmatched.clone())
    }

    fn record_unmatched(&mut self, id: CallId) {
        self.unmatched += 1;
        match self.unmatched_log {
            UnmatchedLog::Off => {}
            UnmatchedLog::Debug => {
                tracing::debug!(id = %id, total = self.unmatched, "Dropping unmatched response");
            }
            UnmatchedLog::Warn => {
                tracing::warn!(id = %id, total = self.unmatched, "Dropping unmatched response");
            }
        }
    }

    /// The id the next call will receive, or `None` once ids are exhausted.
    #[must_use]
    pub fn next_id(&self) -> Option<CallId> {
        self.ids.peek()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, id: CallId) -> bool {
        self.pending.contains(id)
    }

    /// Outstanding call ids in issue order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<CallId> {
        self.pending.pending_ids()
    }

    /// Responses dropped so far because no call was pending for their id.
    #[must_use]
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched
    }
}

impl<I, O, E> Default for Engine<I, O, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O, E> fmt::Debug for Engine<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("next_id", &self.ids.peek())
            .field("pending", &self.pending)
            .field("unmatched", &self.unmatched)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Continuation that records which call it belonged to.
    fn recorder(log: &Log, tag: &'static str) -> impl FnOnce(String) -> String + Send + 'static {
        let log = log.clone();
        move |payload| {
            let line = format!("{tag}({payload})");
            log.lock().expect("log lock").push(line.clone());
            line
        }
    }

    fn env(id: u64, payload: &str) -> Envelope<String> {
        Envelope::new(CallId::new(id), payload.to_string())
    }

    #[test]
    fn fresh_engine_is_empty() {
        let engine: Engine<(), (), ()> = Engine::new();
        assert_eq!(engine.next_id(), Some(CallId::new(0)));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.unmatched_count(), 0);
    }

    #[test]
    fn ids_are_issued_in_order() {
        let mut engine: Engine<u32, (), ()> = Engine::new();
        let ids: Vec<u64> = (0..10)
            .map(|n| engine.submit_call(n, |()| ()).unwrap().id.value())
            .collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert_eq!(engine.pending_count(), 10);
    }

    #[test]
    fn walkthrough_out_of_order_with_stray_id() {
        let log: Log = Arc::default();
        let mut engine: Engine<&str, String, String> = Engine::new();

        let a = engine.submit_call("A", recorder(&log, "k1")).unwrap();
        assert_eq!(a, Envelope::new(CallId::new(0), "A"));
        assert_eq!(engine.pending_ids(), vec![CallId::new(0)]);

        let b = engine.submit_call("B", recorder(&log, "k2")).unwrap();
        assert_eq!(b, Envelope::new(CallId::new(1), "B"));
        assert_eq!(engine.next_id(), Some(CallId::new(2)));
        assert_eq!(engine.pending_ids(), vec![CallId::new(0), CallId::new(1)]);

        let effect = engine.handle_incoming(env(1, "B-reply"));
        assert_eq!(effect.as_deref(), Some("k2(B-reply)"));
        assert_eq!(engine.pending_ids(), vec![CallId::new(0)]);

        assert!(engine.handle_incoming(env(7, "?")).is_none());
        assert_eq!(engine.pending_ids(), vec![CallId::new(0)]);
        assert_eq!(engine.next_id(), Some(CallId::new(2)));

        let effect = engine.handle_incoming(env(0, "A-reply"));
        assert_eq!(effect.as_deref(), Some("k1(A-reply)"));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.next_id(), Some(CallId::new(2)));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["k2(B-reply)".to_string(), "k1(A-reply)".to_string()]
        );
    }

    #[test]
    fn each_continuation_runs_at_most_once() {
        let log: Log = Arc::default();
        let mut engine: Engine<(), String, String> = Engine::new();
        let call = engine.submit_call((), recorder(&log, "k")).unwrap();

        assert!(engine.handle_incoming(env(call.id.value(), "first")).is_some());
        assert!(engine.handle_incoming(env(call.id.value(), "second")).is_none());

        assert_eq!(*log.lock().unwrap(), vec!["k(first)".to_string()]);
        assert_eq!(engine.unmatched_count(), 1);
    }

    #[test]
    fn responses_route_regardless_of_arrival_order() {
        let mut engine: Engine<u64, u64, (u64, u64)> = Engine::new();
        for n in 0..5 {
            engine.submit_call(n * 10, move |reply| (n, reply)).unwrap();
        }

        for id in [3, 0, 4, 1, 2] {
            let effect = engine.handle_incoming(Envelope::new(CallId::new(id), id + 100));
            assert_eq!(effect, Some((id, id + 100)));
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn miss_leaves_registry_unchanged_and_notifies_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = seen.clone();
        let mut engine: Engine<(), String, ()> = Engine::new()
            .with_unmatched_log(UnmatchedLog::Warn)
            .on_unmatched(move |id| observer_seen.lock().unwrap().push(id));
        engine.submit_call((), |_| ()).unwrap();

        assert!(engine.handle_incoming(env(42, "stray")).is_none());

        assert_eq!(engine.pending_ids(), vec![CallId::new(0)]);
        assert_eq!(engine.unmatched_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![CallId::new(42)]);
    }

    #[test]
    fn dispatch_covers_both_transitions() {
        let mut engine: Engine<&str, String, usize> = Engine::new();

        let emitted = engine
            .dispatch(Event::CallRequested {
                payload: "len",
                continuation: Box::new(|reply: String| reply.len()),
            })
            .unwrap();
        assert_eq!(emitted, Dispatched::Emit(Envelope::new(CallId::new(0), "len")));

        let completed = engine.dispatch(env(0, "four").into()).unwrap();
        assert_eq!(
            completed,
            Dispatched::Completed {
                id: CallId::new(0),
                effect: 4
            }
        );

        let dropped = engine.dispatch(env(0, "again").into()).unwrap();
        assert_eq!(dropped, Dispatched::Unmatched(CallId::new(0)));
    }

    #[test]
    fn registry_accounting_returns_to_zero() {
        let mut engine: Engine<(), (), ()> = Engine::new();
        let ids: Vec<CallId> = (0..25)
            .map(|_| engine.submit_call((), |()| ()).unwrap().id)
            .collect();
        assert_eq!(engine.pending_count(), 25);

        for id in ids.into_iter().rev() {
            assert!(engine.handle_incoming(Envelope::new(id, ())).is_some());
        }
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.unmatched_count(), 0);
    }

    #[test]
    fn exhausted_ids_reject_without_registering() {
        let mut engine: Engine<(), (), ()> =
            Engine::with_allocator(IdAllocator::starting_at(u64::MAX));

        let last = engine.submit_call((), |()| ()).unwrap();
        assert_eq!(last.id, CallId::new(u64::MAX));

        let err = engine.submit_call((), |()| ()).unwrap_err();
        assert_eq!(err, EngineError::IdSpaceExhausted);
        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.next_id(), None);
    }
}
