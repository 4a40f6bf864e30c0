//! # Shared Interrupt Lines
//!
//! Several adapters may hang off one interrupt line. The line has no way to
//! tell who raised it, so every adapter is asked in turn and reports whether
//! it had something pending.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::trace;

use super::adapter::HostAdapter;

/// An interrupt line shared by several host adapters.
#[derive(Default, Debug)]
pub struct SharedIrq {
    registered: Mutex<Vec<Arc<dyn HostAdapter>>>,
    adapters: ArcSwap<Vec<Arc<dyn HostAdapter>>>,
}

impl SharedIrq {
    /// Create a line without any adapters.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Attach an adapter to the line.
    pub fn register(&self, adapter: Arc<dyn HostAdapter>) {
        let mut registered = self.registered.lock().unwrap();

        registered.push(adapter);

        // It's okay to use store here, because we only have a single
        // writer (serialized by the mutex).
        self.adapters.store(Arc::new(registered.clone()));
    }

    /// Number of attached adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.load().len()
    }

    /// Whether no adapter is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Service the line once. Every adapter is asked, even after one of
    /// them claimed the interrupt, because several may be pending at once.
    ///
    /// Returns whether any adapter had a pending interrupt.
    pub fn service(&self) -> bool {
        let adapters = self.adapters.load();

        let claimed = adapters
            .iter()
            .map(|adapter| adapter.service_interrupt())
            .fold(false, |any, claimed| any | claimed);

        trace!("shared irq serviced {} adapters, claimed={claimed}", adapters.len());
        claimed
    }
}
