//! # Millisecond Delays
//!
//! The engines never block on timers. Where the chips require the host to
//! wait, e.g. for a RISC stop acknowledge or an idle command, they poll a
//! fixed number of times and sleep in between through a [`Delay`].

use std::{fmt::Debug, time::Duration};

/// A millisecond sleep primitive provided by the platform.
pub trait Delay: Debug + Send + Sync {
    /// Sleep for `ms` milliseconds.
    fn delay_ms(&self, ms: u64);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay {}

impl Delay for StdDelay {
    fn delay_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Returns immediately. Used with simulated chips, which answer every
/// handshake synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay {}

impl Delay for NoDelay {
    fn delay_ms(&self, _ms: u64) {}
}
