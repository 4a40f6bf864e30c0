//! # Error Types
//!
//! Fatal init-time faults keep an adapter offline ([`InitError`]). Malformed
//! requests are rejected up front ([`RequestError`]). Internal consistency
//! violations found while the adapter runs are not errors in the Rust sense:
//! they are logged and remembered as a sticky [`LibErrorCode`] while the
//! affected request completes with an error status.

use super::host_memory::DmaError;

/// Reasons an adapter could not be brought online.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// The chip did not answer with the expected signature.
    #[error("chip signature mismatch: byte {byte:#04x}, word {word:#06x}")]
    BadSignature {
        /// Value of the signature byte register.
        byte: u8,
        /// Value of the signature word register.
        word: u16,
    },

    /// Microcode read back from LRAM does not match its checksum.
    #[error("microcode checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    MicrocodeChecksum {
        /// Checksum shipped with the image.
        expected: u32,
        /// Checksum of what the chip holds.
        actual: u32,
    },

    /// The microcode image does not fit the chip's LRAM.
    #[error("microcode image of {len:#x} bytes does not fit")]
    MicrocodeTooLarge {
        /// Image length in bytes.
        len: usize,
    },

    /// RAM BIST pre-test failed.
    #[error("RAM BIST pre-test failed: {value:#04x}")]
    BistPreTest {
        /// BIST register value.
        value: u8,
    },

    /// RAM BIST found a defect.
    #[error("RAM BIST RAM test failed: {value:#04x}")]
    BistRamTest {
        /// BIST register value.
        value: u8,
    },

    /// The RISC did not halt when asked to.
    #[error("RISC did not halt")]
    ChipNotHalted,

    /// The RISC stayed halted after it was started.
    #[error("RISC did not start")]
    RiscNotRunning,

    /// The RISC program counter did not take the microcode entry point.
    #[error("RISC program counter reads {actual:#06x}, expected {expected:#06x}")]
    ProgramCounter {
        /// The entry point.
        expected: u16,
        /// What the register reads back.
        actual: u16,
    },

    /// The carrier pool cannot provide both queue stoppers.
    #[error("no carrier available for the queue stoppers")]
    NoCarrier,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Not enough DMA memory for the adapter's pools.
    #[error(transparent)]
    Dma(#[from] DmaError),
}

/// Reasons a request is rejected before it reaches the chip.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Target id beyond what the chip addresses.
    #[error("target {target} out of range (max {max})")]
    InvalidTarget {
        /// Requested target.
        target: u8,
        /// Highest valid id.
        max: u8,
    },

    /// Logical unit beyond 7.
    #[error("LUN {lun} out of range")]
    InvalidLun {
        /// Requested LUN.
        lun: u8,
    },

    /// CDB empty or longer than 12 bytes.
    #[error("invalid CDB length {len}")]
    InvalidCdbLength {
        /// Length of the CDB.
        len: usize,
    },

    /// Scatter-gather list without elements.
    #[error("empty scatter-gather list")]
    EmptyScatterGather,

    /// Scatter-gather list longer than the adapter accepts.
    #[error("scatter-gather list of {len} elements exceeds {max}")]
    ScatterGatherTooLong {
        /// Number of elements.
        len: usize,
        /// Maximum accepted.
        max: usize,
    },

    /// The data buffer totals more than a 32-bit transfer count holds.
    #[error("data buffer of {len} bytes exceeds the transfer count")]
    DataTooLong {
        /// Total length of the buffer.
        len: u64,
    },

    /// The request needs more queue slots than the adapter can ever free.
    #[error("request needs {needed} queues, adapter offers {max}")]
    TooManyQueues {
        /// Slots the request occupies.
        needed: u8,
        /// Slots usable by one request.
        max: u8,
    },

    /// A data direction was given without a buffer.
    #[error("data phase without data buffer")]
    MissingData,

    /// Sense buffer longer than 255 bytes.
    #[error("sense buffer too long")]
    SenseTooLong,

    /// Another outstanding request uses the same id.
    #[error("request id already outstanding")]
    DuplicateId,

    /// The adapter failed to initialize or was taken offline.
    #[error("adapter is offline")]
    Offline,
}

/// Internal consistency violations, detected at run time.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum LibErrorCode {
    /// Queue accounting would underflow on completion.
    #[error("active queue count underflow")]
    CurQng,

    /// The links of a request's scatter-gather queues are broken.
    #[error("scatter-gather queue links corrupted")]
    SgQLinks,

    /// A harvested queue carried an unexpected status.
    #[error("unexpected queue status")]
    QStatus,

    /// The RISC halted with a code the host does not know.
    #[error("unknown RISC halt code")]
    UnknownHalt,

    /// The RISC did not acknowledge a stop request.
    #[error("RISC stop request not acknowledged")]
    StopTimeout,

    /// The wide RISC did not finish an idle command in time.
    #[error("idle command timed out")]
    IdleCommandTimeout,

    /// The RISC linked a carrier or request outside the host's pools.
    #[error("carrier queue links corrupted")]
    CarrierLinks,

    /// A completion referenced a request the host does not know.
    #[error("completion for unknown request")]
    UnknownRequest,
}
