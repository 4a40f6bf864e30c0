//! # Interrupt Line
//!
//! This module exposes an abstract [`InterruptLine`] trait, which is
//! implemented by whatever receives the adapter's interrupt. The chip
//! simulators raise interrupts through it without any knowledge about the
//! receiver.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
};

/// An interrupt line with a single operation: [`InterruptLine::interrupt`].
pub trait InterruptLine: Debug + Send + Sync + 'static {
    /// Send a single edge-triggered interrupt.
    fn interrupt(&self);
}

/// A dummy interrupt line for chips whose interrupts aren't wired to
/// anything. The engines are then driven by polling.
#[derive(Default, Debug, Clone, Copy)]
pub struct DummyInterruptLine {}

impl InterruptLine for DummyInterruptLine {
    fn interrupt(&self) {}
}

/// Remembers raised edges until somebody collects them.
///
/// Chips raise interrupts while their own state is locked, so the handler
/// must not run from inside [`InterruptLine::interrupt`]. The platform
/// loop calls [`LatchedInterruptLine::take`] and services the adapters
/// afterwards.
#[derive(Default, Debug)]
pub struct LatchedInterruptLine {
    pending: AtomicU64,
}

impl LatchedInterruptLine {
    /// Return the number of edges raised since the last call and reset
    /// the latch.
    #[must_use]
    pub fn take(&self) -> u64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Whether an edge was raised and not yet collected.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }
}

impl InterruptLine for LatchedInterruptLine {
    fn interrupt(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latched_line_collects_edges() {
        let line = LatchedInterruptLine::default();

        assert!(!line.is_pending());
        line.interrupt();
        line.interrupt();

        assert!(line.is_pending());
        assert_eq!(line.take(), 2);
        assert_eq!(line.take(), 0);
    }
}
