//! # Host Adapter Interface
//!
//! Both chip generations sit behind the same [`HostAdapter`] trait. The
//! chip specific state machine is an [`AdapterEngine`], which needs
//! exclusive access for every operation. [`Adapter`] wraps an engine into a
//! mutex, the Rust rendition of running with the adapter's interrupt masked,
//! and delivers the events the engine recorded to a [`CompletionHandler`]
//! after the lock is released. Handlers may therefore submit new requests
//! from inside their callbacks.

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{Arc, Mutex},
};

use tracing::trace;

use super::{
    error::{LibErrorCode, RequestError},
    scsi::{Completion, RequestId, ScsiRequest},
};

/// The two chip generations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipFamily {
    /// ASC chips with LRAM queue slots.
    Narrow,
    /// ADV chips with carrier queues in host memory.
    Wide,
}

impl Display for ChipFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Narrow => write!(f, "narrow"),
            Self::Wide => write!(f, "wide"),
        }
    }
}

/// Result of [`HostAdapter::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The request is on its way to the chip. Exactly one completion will
    /// follow.
    Accepted,
    /// Out of queue resources or the target is gated. Retry later.
    Busy,
    /// The request can never be accepted.
    Error(RequestError),
}

/// Result of [`HostAdapter::abort`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbortStatus {
    /// The request was aborted and completed with [`Aborted`] status.
    ///
    /// [`Aborted`]: super::scsi::CompletionStatus::Aborted
    Aborted,
    /// The request is unknown or already completed.
    NotFound,
    /// The chip did not cooperate.
    Error,
}

/// Result of [`HostAdapter::reset_bus`] and [`HostAdapter::reset_device`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetStatus {
    /// The reset happened. Every affected request was completed.
    Success,
    /// The chip did not cooperate.
    Error,
}

/// Out-of-band conditions, reported separately from request completions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsyncEvent {
    /// A SCSI bus reset the host did not ask for.
    BusResetDetected,
    /// The host reset the bus.
    HostBusReset,
    /// The wide RISC failed a DMA read; the adapter reset chip and bus.
    RdmaFailure,
    /// The wide RISC found a carrier that was not ready.
    CarrierReadyFailure,
    /// The wide RISC read an invalid carrier or request.
    RdmaInvalidCarrier,
    /// A target's queue depth was lowered after TASK SET FULL.
    QueueDepthReduced {
        /// Target id.
        target: u8,
        /// New depth.
        depth: u8,
    },
    /// An async code the host does not know.
    Unknown(u8),
}

/// Something an engine wants to tell the [`CompletionHandler`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A request was accepted.
    Submitted(RequestId),
    /// A request finished.
    Completed(Completion),
    /// An async condition occurred.
    Async(AsyncEvent),
}

/// Receives completions and async events.
pub trait CompletionHandler: Debug + Send + Sync {
    /// A request finished. Called exactly once per accepted request.
    fn on_request_complete(&self, completion: Completion);

    /// A request was accepted by the chip.
    fn on_request_submit(&self, _id: RequestId) {}

    /// An async condition occurred.
    fn on_async_event(&self, _event: AsyncEvent) {}
}

/// A handler that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler {}

impl CompletionHandler for NullHandler {
    fn on_request_complete(&self, _completion: Completion) {}
}

/// Chip independent host adapter interface.
pub trait HostAdapter: Debug + Send + Sync {
    /// The chip generation.
    fn family(&self) -> ChipFamily;

    /// Queue a request. Non-blocking.
    fn submit(&self, request: ScsiRequest) -> SubmitStatus;

    /// Handle the adapter's interrupt. Returns whether this adapter had an
    /// interrupt pending, which matters on shared lines.
    fn service_interrupt(&self) -> bool;

    /// Abort a queued request.
    fn abort(&self, id: RequestId) -> AbortStatus;

    /// Reset the SCSI bus. Every outstanding request completes with reset
    /// status.
    fn reset_bus(&self) -> ResetStatus;

    /// Reset one target. Its outstanding requests complete with reset
    /// status.
    fn reset_device(&self, target: u8) -> ResetStatus;
}

/// Counters kept by every engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AdapterStats {
    /// Requests accepted.
    pub submitted: u64,
    /// Submissions answered with busy.
    pub busy: u64,
    /// Completions delivered, synthesized ones included.
    pub completed: u64,
    /// Interrupts claimed.
    pub interrupts: u64,
    /// RISC halts handled (narrow).
    pub halts: u64,
    /// Scatter-gather continuations copied (narrow).
    pub sg_continuations: u64,
    /// Requests aborted.
    pub aborted: u64,
    /// Bus resets, requested or detected.
    pub bus_resets: u64,
}

/// The chip specific half of an adapter.
///
/// Engines never call out while they run. Completions and async events are
/// queued and picked up with [`AdapterEngine::take_events`].
pub trait AdapterEngine: Debug + Send {
    /// The chip generation.
    fn family(&self) -> ChipFamily;

    /// See [`HostAdapter::submit`].
    fn submit(&mut self, request: ScsiRequest) -> SubmitStatus;

    /// See [`HostAdapter::service_interrupt`].
    fn service_interrupt(&mut self) -> bool;

    /// See [`HostAdapter::abort`].
    fn abort(&mut self, id: RequestId) -> AbortStatus;

    /// See [`HostAdapter::reset_bus`].
    fn reset_bus(&mut self) -> ResetStatus;

    /// See [`HostAdapter::reset_device`].
    fn reset_device(&mut self, target: u8) -> ResetStatus;

    /// Drain the events recorded since the last call.
    fn take_events(&mut self) -> Vec<AdapterEvent>;

    /// Requests accepted and not yet completed.
    fn outstanding(&self) -> usize;

    /// Counters.
    fn stats(&self) -> AdapterStats;

    /// The sticky internal consistency error, if any occurred.
    fn last_error(&self) -> Option<LibErrorCode>;
}

/// Events recorded by an engine, in the order they happened.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<AdapterEvent>,
}

impl EventQueue {
    /// Record a completion.
    pub fn complete(&mut self, completion: Completion) {
        trace!("completion {completion:?}");
        self.events.push(AdapterEvent::Completed(completion));
    }

    /// Record an accepted request.
    pub fn submitted(&mut self, id: RequestId) {
        self.events.push(AdapterEvent::Submitted(id));
    }

    /// Record an async event.
    pub fn async_event(&mut self, event: AsyncEvent) {
        self.events.push(AdapterEvent::Async(event));
    }

    /// Take everything recorded so far.
    pub fn take(&mut self) -> Vec<AdapterEvent> {
        std::mem::take(&mut self.events)
    }
}

/// A host adapter made of an engine and a completion handler.
#[derive(Debug)]
pub struct Adapter<E: AdapterEngine> {
    engine: Mutex<E>,
    handler: Arc<dyn CompletionHandler>,
}

impl<E: AdapterEngine> Adapter<E> {
    /// Combine an initialized engine with the handler receiving its events.
    pub fn new(engine: E, handler: Arc<dyn CompletionHandler>) -> Self {
        Self {
            engine: Mutex::new(engine),
            handler,
        }
    }

    /// Run `f` on the engine and deliver what it recorded.
    fn with_engine<T>(&self, f: impl FnOnce(&mut E) -> T) -> T {
        let (result, events) = {
            let mut engine = self.engine.lock().unwrap();
            let result = f(&mut engine);

            (result, engine.take_events())
        };

        for event in events {
            match event {
                AdapterEvent::Submitted(id) => self.handler.on_request_submit(id),
                AdapterEvent::Completed(completion) => self.handler.on_request_complete(completion),
                AdapterEvent::Async(event) => self.handler.on_async_event(event),
            }
        }

        result
    }

    /// Counters of the engine.
    #[must_use]
    pub fn stats(&self) -> AdapterStats {
        self.engine.lock().unwrap().stats()
    }

    /// The sticky internal consistency error.
    #[must_use]
    pub fn last_error(&self) -> Option<LibErrorCode> {
        self.engine.lock().unwrap().last_error()
    }

    /// Requests accepted and not yet completed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.engine.lock().unwrap().outstanding()
    }

    /// Inspect the engine. Events are not delivered.
    #[allow(clippy::must_use_candidate)]
    pub fn inspect<T>(&self, f: impl FnOnce(&E) -> T) -> T {
        f(&self.engine.lock().unwrap())
    }

    /// Change engine state behind the adapter's back.
    #[cfg(test)]
    pub(crate) fn inspect_mut<T>(&self, f: impl FnOnce(&mut E) -> T) -> T {
        f(&mut self.engine.lock().unwrap())
    }
}

impl<E: AdapterEngine> HostAdapter for Adapter<E> {
    fn family(&self) -> ChipFamily {
        self.engine.lock().unwrap().family()
    }

    fn submit(&self, request: ScsiRequest) -> SubmitStatus {
        self.with_engine(|e| e.submit(request))
    }

    fn service_interrupt(&self) -> bool {
        self.with_engine(|e| e.service_interrupt())
    }

    fn abort(&self, id: RequestId) -> AbortStatus {
        self.with_engine(|e| e.abort(id))
    }

    fn reset_bus(&self) -> ResetStatus {
        self.with_engine(|e| e.reset_bus())
    }

    fn reset_device(&self, target: u8) -> ResetStatus {
        self.with_engine(|e| e.reset_device(target))
    }
}

/// Collects everything an adapter reports. Useful in tests and the demo.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    completions: Mutex<Vec<Completion>>,
    submitted: Mutex<Vec<RequestId>>,
    async_events: Mutex<Vec<AsyncEvent>>,
}

impl RecordingHandler {
    /// Take the completions received so far.
    #[must_use]
    pub fn take_completions(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.completions.lock().unwrap())
    }

    /// Take the async events received so far.
    #[must_use]
    pub fn take_async_events(&self) -> Vec<AsyncEvent> {
        std::mem::take(&mut *self.async_events.lock().unwrap())
    }

    /// Ids of all accepted requests, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<RequestId> {
        self.submitted.lock().unwrap().clone()
    }
}

impl CompletionHandler for RecordingHandler {
    fn on_request_complete(&self, completion: Completion) {
        self.completions.lock().unwrap().push(completion);
    }

    fn on_request_submit(&self, id: RequestId) {
        self.submitted.lock().unwrap().push(id);
    }

    fn on_async_event(&self, event: AsyncEvent) {
        self.async_events.lock().unwrap().push(event);
    }
}
