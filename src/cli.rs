//! This module implements the CLI interface.
//!
//! The demo has no real hardware to talk to. Every knob here shapes the
//! simulated boards and the workload pushed through them.
use advansys::device::config::WideChip;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging. Can be specified multiple times to
    /// increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Which boards to put on the shared interrupt line.
    #[arg(long, value_enum, default_value_t = Family::Both)]
    pub family: Family,

    /// Revision of the wide board.
    #[arg(long, value_enum, default_value_t = WideRevision::Asc38C1600)]
    pub wide_chip: WideRevision,

    /// Number of READ(10) requests submitted to every board.
    #[arg(long, default_value_t = 64)]
    pub requests: u32,

    /// Scatter-gather elements per request.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=255))]
    pub sg_elements: u16,

    /// Number of simulated disks on each bus.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=15))]
    pub targets: u8,

    /// Use the Ultra period table on the narrow board.
    #[arg(long)]
    pub ultra: bool,

    /// Reset the SCSI bus while bringing up the boards.
    #[arg(long)]
    pub reset_bus: bool,

    /// Really sleep where the chips ask the host to wait.
    #[arg(long)]
    pub real_delays: bool,
}

/// Board selection.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    /// Only the ASC board.
    Narrow,
    /// Only the ADV board.
    Wide,
    /// One of each, sharing an interrupt line.
    Both,
}

impl Family {
    pub fn narrow(self) -> bool {
        matches!(self, Self::Narrow | Self::Both)
    }

    pub fn wide(self) -> bool {
        matches!(self, Self::Wide | Self::Both)
    }
}

/// Wide chip revision as spelled on the command line.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum WideRevision {
    #[value(name = "3550")]
    Asc3550,
    #[value(name = "38c0800")]
    Asc38C0800,
    #[value(name = "38c1600")]
    Asc38C1600,
}

impl From<WideRevision> for WideChip {
    fn from(rev: WideRevision) -> Self {
        match rev {
            WideRevision::Asc3550 => Self::Asc3550,
            WideRevision::Asc38C0800 => Self::Asc38C0800,
            WideRevision::Asc38C1600 => Self::Asc38C1600,
        }
    }
}
