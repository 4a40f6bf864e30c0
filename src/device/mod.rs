//! # Host Adapter Engines
//!
//! This module contains the queueing and completion engines for both
//! AdvanSys chip generations together with the platform collaborators they
//! talk to. It should never depend on hypervisor, x86 or Linux specific
//! parts.

#![deny(missing_docs)]
#![deny(rustdoc::all)]
#![deny(clippy::must_use_candidate)]
#![deny(missing_debug_implementations)]

pub mod adapter;
pub mod bus;
pub mod config;
pub mod constants;
pub mod delay;
pub mod error;
pub mod firmware;
pub mod host_memory;
pub mod interrupt_line;
pub mod narrow;
pub mod negotiation;
pub mod scsi;
pub mod shared_irq;
pub mod sim_target;
pub mod wide;
