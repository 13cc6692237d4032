//! Host loop: a single task that owns one engine and one channel pair.
//!
//! Calls queued through [`HostHandle`] and responses arriving from the
//! transport are applied to the engine one at a time. Engine steps never
//! wait on a channel: registered envelopes go to an outbox and completed
//! effects to a backlog, and both are drained by their own `select!` arms
//! as the transport and the application make room. Inbound responses are
//! therefore always read, whatever the state of the outbound side.
//!
//! New calls are only taken while the outbox is below the outbound channel
//! capacity, which is where backpressure on callers comes from.
//!
//! The loop ends when the inbound channel closes, when the outbound channel
//! closes, or when every handle is gone and nothing is left in flight.

use std::collections::VecDeque;
use std::pin::pin;

use futures_util::{Stream, StreamExt, stream};
use tether_engine::{Continuation, Engine, Event, adapt_incoming_stream};
use tether_types::{CallId, Envelope};
use tokio::sync::{mpsc, oneshot};

use crate::channel::EngineSide;
use crate::config::HostConfig;
use crate::error::HostError;

/// Counters reported when the host loop returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub issued: u64,
    pub completed: u64,
    pub unmatched: u64,
    /// Calls still waiting for a response when the loop ended.
    pub pending: usize,
    /// Times the pending count climbed to the configured warning threshold.
    pub backlog_warnings: u64,
}

type Ack = oneshot::Sender<Result<CallId, HostError>>;

/// A call queued by a handle.
///
/// The continuation returns `None` for calls whose result goes straight to
/// the caller rather than to the completion channel.
struct CallCommand<I, O, E> {
    payload: I,
    continuation: Continuation<O, Option<E>>,
    ack: Ack,
}

enum Flow {
    Continue,
    Stop,
}

fn receiver_stream<T>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
}

/// Engine state plus everything waiting to leave the host.
struct Core<I, O, E> {
    engine: Engine<I, O, Option<E>>,
    /// Registered envelopes not yet accepted by the outbound channel.
    outbox: VecDeque<(Envelope<I>, Ack)>,
    outbox_limit: usize,
    /// Effects not yet accepted by the completion channel.
    finished: VecDeque<E>,
    completion_reader: bool,
    pending_warn_threshold: Option<usize>,
    issued: u64,
    completed: u64,
    backlog_warnings: u64,
}

impl<I, O, E> Core<I, O, E> {
    fn new(engine: Engine<I, O, Option<E>>, config: &HostConfig) -> Self {
        Self {
            engine,
            outbox: VecDeque::new(),
            outbox_limit: config.outbound_capacity(),
            finished: VecDeque::new(),
            completion_reader: true,
            pending_warn_threshold: config.pending_warn_threshold(),
            issued: 0,
            completed: 0,
            backlog_warnings: 0,
        }
    }

    fn accepts_calls(&self) -> bool {
        self.outbox.len() < self.outbox_limit
    }

    /// Register a call and queue its envelope. The ack is answered once the
    /// envelope is transmitted, or right away if the engine refuses the call.
    fn accept(&mut self, command: CallCommand<I, O, E>) {
        let CallCommand {
            payload,
            continuation,
            ack,
        } = command;
        match self.engine.submit_continuation(payload, continuation) {
            Ok(envelope) => {
                self.issued += 1;
                if self.reached_warn_threshold() {
                    self.backlog_warnings += 1;
                    tracing::warn!(
                        pending = self.engine.pending_count(),
                        "Pending calls reached warning threshold; responses may be going missing"
                    );
                }
                self.outbox.push_back((envelope, ack));
            }
            Err(e) => {
                tracing::warn!("Call rejected: {e}");
                let _ = ack.send(Err(e.into()));
            }
        }
    }

    fn reached_warn_threshold(&self) -> bool {
        self.pending_warn_threshold == Some(self.engine.pending_count())
    }

    fn receive(&mut self, event: Event<I, O, Option<E>>) {
        // The inbound adapter yields responses only.
        let Event::ResponseArrived(envelope) = event else {
            return;
        };
        let id = envelope.id;
        // `None` here is a miss, already counted and logged by the engine.
        let Some(effect) = self.engine.handle_incoming(envelope) else {
            return;
        };
        self.completed += 1;
        match effect {
            Some(effect) if self.completion_reader => self.finished.push_back(effect),
            Some(_) => tracing::trace!(id = %id, "Completion reader gone, effect dropped"),
            None => {}
        }
    }

    fn transmit(&mut self, permit: mpsc::Permit<'_, Envelope<I>>) {
        if let Some((envelope, ack)) = self.outbox.pop_front() {
            let id = envelope.id;
            permit.send(envelope);
            tracing::trace!(id = %id, "Envelope handed to transport");
            let _ = ack.send(Ok(id));
        }
    }

    /// The outbound channel is gone: nothing queued will ever be sent.
    fn fail_outbox(&mut self) {
        for (envelope, ack) in self.outbox.drain(..) {
            tracing::debug!(id = %envelope.id, "Call not transmitted");
            let _ = ack.send(Err(HostError::OutboundClosed));
        }
    }

    fn deliver(&mut self, permit: mpsc::Permit<'_, E>) {
        if let Some(effect) = self.finished.pop_front() {
            permit.send(effect);
        }
    }

    fn drop_completions(&mut self) {
        tracing::debug!(
            dropped = self.finished.len(),
            "Completion reader gone, discarding effects"
        );
        self.completion_reader = false;
        self.finished.clear();
    }

    fn is_idle(&self) -> bool {
        self.engine.pending_count() == 0 && self.outbox.is_empty() && self.finished.is_empty()
    }

    fn stats(&self) -> HostStats {
        HostStats {
            issued: self.issued,
            completed: self.completed,
            unmatched: self.engine.unmatched_count(),
            pending: self.engine.pending_count(),
            backlog_warnings: self.backlog_warnings,
        }
    }
}

/// The single owner of an engine and its channel pair.
///
/// Built by [`Host::bind`], driven by [`Host::run`].
pub struct Host<I, O, E> {
    core: Core<I, O, E>,
    calls: mpsc::Receiver<CallCommand<I, O, E>>,
    outbound: mpsc::Sender<Envelope<I>>,
    inbound: mpsc::Receiver<Envelope<O>>,
    completions: mpsc::Sender<E>,
}

impl<I, O, E> Host<I, O, E> {
    /// Bind a fresh engine to `side`.
    ///
    /// Returns the host, a handle for issuing calls, and the receiver of
    /// completed effects. Effects the receiver has no room for are held by
    /// the host until it does; dropping the receiver discards them.
    pub fn bind(
        config: &HostConfig,
        side: EngineSide<I, O>,
    ) -> (Self, HostHandle<I, O, E>, mpsc::Receiver<E>) {
        let (calls_tx, calls_rx) = mpsc::channel(config.call_queue_capacity());
        let (completions_tx, completions_rx) = mpsc::channel(config.completion_capacity());
        let EngineSide { outbound, inbound } = side;
        let engine = Engine::new().with_unmatched_log(config.unmatched_log());

        let host = Self {
            core: Core::new(engine, config),
            calls: calls_rx,
            outbound,
            inbound,
            completions: completions_tx,
        };
        (host, HostHandle { calls: calls_tx }, completions_rx)
    }

    /// Process events until the loop ends, then report counters.
    pub async fn run(self) -> HostStats {
        let Self {
            mut core,
            mut calls,
            outbound,
            inbound,
            completions,
        } = self;
        let mut inbound = pin!(adapt_incoming_stream::<I, O, Option<E>, _>(
            receiver_stream(inbound)
        ));
        let mut accepting = true;

        tracing::info!("Host started");
        loop {
            let take_calls = accepting && core.accepts_calls();
            let flush_outbox = !core.outbox.is_empty();
            let flush_finished = core.completion_reader && !core.finished.is_empty();

            let flow = tokio::select! {
                command = calls.recv(), if take_calls => match command {
                    Some(command) => {
                        core.accept(command);
                        Flow::Continue
                    }
                    None => {
                        tracing::debug!("All host handles dropped");
                        accepting = false;
                        Flow::Continue
                    }
                },
                event = inbound.next() => match event {
                    Some(event) => {
                        core.receive(event);
                        Flow::Continue
                    }
                    None => {
                        tracing::info!("Inbound channel closed");
                        Flow::Stop
                    }
                },
                permit = outbound.reserve(), if flush_outbox => match permit {
                    Ok(permit) => {
                        core.transmit(permit);
                        Flow::Continue
                    }
                    Err(_) => {
                        tracing::warn!("Outbound channel closed, stopping host");
                        core.fail_outbox();
                        Flow::Stop
                    }
                },
                permit = completions.reserve(), if flush_finished => match permit {
                    Ok(permit) => {
                        core.deliver(permit);
                        Flow::Continue
                    }
                    Err(_) => {
                        core.drop_completions();
                        Flow::Continue
                    }
                },
            };

            if matches!(flow, Flow::Stop) || (!accepting && core.is_idle()) {
                break;
            }
        }

        // Hand over whatever fits without waiting.
        while let Some(effect) = core.finished.pop_front() {
            if completions.try_send(effect).is_err() {
                break;
            }
        }

        let stats = core.stats();
        tracing::info!(
            issued = stats.issued,
            completed = stats.completed,
            unmatched = stats.unmatched,
            pending = stats.pending,
            "Host stopped"
        );
        stats
    }
}

/// Cloneable entry point for issuing calls to a running [`Host`].
pub struct HostHandle<I, O, E> {
    calls: mpsc::Sender<CallCommand<I, O, E>>,
}

impl<I, O, E> Clone for HostHandle<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
        }
    }
}

impl<I, O, E> HostHandle<I, O, E> {
    /// Issue a call. `continuation` runs on the host task with the response
    /// and its return value is sent to the completion channel.
    ///
    /// Resolves with the call's id once its envelope is on the outbound
    /// channel.
    pub async fn call(
        &self,
        payload: I,
        continuation: impl FnOnce(O) -> E + Send + 'static,
    ) -> Result<CallId, HostError> {
        self.submit(
            payload,
            Box::new(move |response| Some(continuation(response))),
        )
        .await
    }

    async fn submit(
        &self,
        payload: I,
        continuation: Continuation<O, Option<E>>,
    ) -> Result<CallId, HostError> {
        let (ack, acked) = oneshot::channel();
        self.calls
            .send(CallCommand {
                payload,
                continuation,
                ack,
            })
            .await
            .map_err(|_| HostError::Closed)?;
        acked.await.map_err(|_| HostError::Closed)?
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.calls.is_closed()
    }
}

impl<I, O, E> HostHandle<I, O, E>
where
    O: Send + 'static,
{
    /// Issue a call and wait for its response payload.
    ///
    /// Nothing is sent to the completion channel for these calls. There is
    /// no timeout: if the response never arrives this waits until the host
    /// stops.
    pub async fn request(&self, payload: I) -> Result<O, HostError> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            payload,
            Box::new(move |response| {
                let _ = tx.send(response);
                None
            }),
        )
        .await?;
        rx.await.map_err(|_| HostError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use tether_engine::{EngineError, IdAllocator};

    use super::*;
    use crate::channel::channel_pair;

    fn test_core(config: &HostConfig) -> Core<u8, u8, u8> {
        Core::new(Engine::new(), config)
    }

    fn command(
        payload: u8,
        continuation: Continuation<u8, Option<u8>>,
    ) -> (CallCommand<u8, u8, u8>, oneshot::Receiver<Result<CallId, HostError>>) {
        let (ack, acked) = oneshot::channel();
        (
            CallCommand {
                payload,
                continuation,
                ack,
            },
            acked,
        )
    }

    fn respond(core: &mut Core<u8, u8, u8>, id: u64, payload: u8) {
        core.receive(Envelope::new(CallId::new(id), payload).into());
    }

    #[tokio::test]
    async fn receiver_stream_yields_until_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let items: Vec<i32> = receiver_stream(rx).collect().await;
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn accepted_call_is_acked_when_transmitted() {
        let mut core = test_core(&HostConfig::default());
        let (outbound, mut outbound_rx) = mpsc::channel(1);
        let (cmd, mut acked) = command(5, Box::new(|reply| Some(reply + 1)));

        core.accept(cmd);
        assert!(core.engine.is_pending(CallId::new(0)));
        assert_eq!(core.outbox.len(), 1);
        assert!(acked.try_recv().is_err(), "no ack before transmission");

        core.transmit(outbound.try_reserve().unwrap());

        assert_eq!(
            outbound_rx.try_recv().unwrap(),
            Envelope::new(CallId::new(0), 5)
        );
        assert_eq!(acked.try_recv().unwrap().unwrap(), CallId::new(0));
        assert!(core.outbox.is_empty());
    }

    #[test]
    fn outbox_limit_pauses_new_calls() {
        let config = HostConfig::from_toml("outbound_capacity = 2").unwrap();
        let mut core = test_core(&config);
        for n in 0..2 {
            core.accept(command(n, Box::new(Some)).0);
        }
        assert!(!core.accepts_calls());

        let (outbound, _outbound_rx) = mpsc::channel(4);
        core.transmit(outbound.try_reserve().unwrap());
        assert!(core.accepts_calls());
    }

    #[test]
    fn closed_outbound_fails_queued_calls() {
        let mut core = test_core(&HostConfig::default());
        let (cmd, mut acked) = command(1, Box::new(Some));
        core.accept(cmd);

        core.fail_outbox();

        assert!(matches!(
            acked.try_recv().unwrap(),
            Err(HostError::OutboundClosed)
        ));
        assert_eq!(core.stats().pending, 1);
    }

    #[test]
    fn rejected_call_reports_engine_error() {
        let mut core: Core<u8, u8, u8> = Core::new(
            Engine::with_allocator(IdAllocator::starting_at(u64::MAX)),
            &HostConfig::default(),
        );
        core.accept(command(1, Box::new(Some)).0);

        let (cmd, mut acked) = command(2, Box::new(Some));
        core.accept(cmd);

        assert!(matches!(
            acked.try_recv().unwrap(),
            Err(HostError::Engine(EngineError::IdSpaceExhausted))
        ));
        assert_eq!(core.stats().issued, 1);
        assert_eq!(core.outbox.len(), 1);
    }

    #[test]
    fn only_call_effects_reach_the_backlog() {
        let mut core = test_core(&HostConfig::default());
        core.accept(command(1, Box::new(|reply| Some(reply * 2))).0);
        core.accept(command(2, Box::new(|_| None)).0);

        respond(&mut core, 1, 7);
        respond(&mut core, 0, 4);
        respond(&mut core, 9, 0);

        assert_eq!(core.finished, VecDeque::from([8]));
        let stats = core.stats();
        assert_eq!((stats.completed, stats.unmatched, stats.pending), (2, 1, 0));
    }

    #[test]
    fn dropped_reader_discards_backlog_and_later_effects() {
        let mut core = test_core(&HostConfig::default());
        core.accept(command(1, Box::new(Some)).0);
        core.accept(command(2, Box::new(Some)).0);
        respond(&mut core, 0, 10);

        core.drop_completions();
        assert!(core.finished.is_empty());

        respond(&mut core, 1, 11);
        assert!(core.finished.is_empty());
        assert_eq!(core.stats().completed, 2);
    }

    #[test]
    fn threshold_warns_each_time_pending_climbs_to_it() {
        let config =
            HostConfig::default().with_pending_warn_threshold(NonZeroUsize::new(2).unwrap());
        let mut core = test_core(&config);

        core.accept(command(0, Box::new(Some)).0);
        assert_eq!(core.stats().backlog_warnings, 0);
        core.accept(command(1, Box::new(Some)).0);
        assert_eq!(core.stats().backlog_warnings, 1);
        core.accept(command(2, Box::new(Some)).0);
        assert_eq!(core.stats().backlog_warnings, 1);

        respond(&mut core, 0, 0);
        respond(&mut core, 1, 0);
        core.accept(command(3, Box::new(Some)).0);
        assert_eq!(core.stats().backlog_warnings, 2);
    }

    #[tokio::test]
    async fn host_without_calls_stops_when_handles_drop() {
        let config = HostConfig::default();
        let (side, _remote) = channel_pair::<(), ()>(&config);
        let (host, handle, _completions) = Host::<(), (), ()>::bind(&config, side);

        drop(handle);
        assert_eq!(host.run().await, HostStats::default());
    }
}
