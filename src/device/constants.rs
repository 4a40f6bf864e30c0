//! Constants shared by both chip generations.
//!
//! Chip specific register maps live next to the engines in
//! `narrow::constants` and `wide::constants`.

#![allow(missing_docs)]

pub const MAX_NARROW_TID: u8 = 7;
pub const MAX_WIDE_TID: u8 = 15;
pub const MAX_LUN: u8 = 7;

/// The longest CDB either chip accepts.
pub const MAX_CDB_LEN: usize = 12;

/// Chip signature read back from both generations.
pub mod signature {
    pub const ID_BYTE: u8 = 0x25;
    pub const ID_WORD: u16 = 0x04C1;
    pub const ID_WORD_FIX: u16 = 0x00C1;
}

/// SCSI operation codes the engines look at.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
}

/// SAM status byte values.
pub mod sam {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const BUSY: u8 = 0x08;
    pub const TASK_SET_FULL: u8 = 0x28;
}

/// Request done status, written by the RISC.
pub mod qd {
    pub const IN_PROGRESS: u8 = 0x00;
    pub const NO_ERROR: u8 = 0x01;
    pub const ABORTED_BY_HOST: u8 = 0x02;
    pub const WITH_ERROR: u8 = 0x04;
}

/// Host (adapter) status, written by the RISC or synthesized by the host.
pub mod qhsta {
    pub const NO_ERROR: u8 = 0x00;
    pub const M_SEL_TIMEOUT: u8 = 0x11;
    pub const M_DATA_OVER_RUN: u8 = 0x12;
    pub const M_UNEXPECTED_BUS_FREE: u8 = 0x13;
    pub const D_QDONE_SG_LIST_CORRUPTED: u8 = 0x21;
    pub const D_HOST_ABORT_FAILED: u8 = 0x23;
    pub const D_LRAM_CMP_ERROR: u8 = 0x24;
    pub const M_SCSI_BUS_RESET: u8 = 0x30;
    pub const M_SCSI_BUS_RESET_UNSOL: u8 = 0x31;
    pub const M_BUS_DEVICE_RESET: u8 = 0x32;
    pub const M_WTM_TIMEOUT: u8 = 0x41;
    pub const M_BAD_CMPL_STATUS_IN: u8 = 0x42;
    pub const M_NO_AUTO_REQ_SENSE: u8 = 0x43;
    pub const M_AUTO_REQ_SENSE_FAIL: u8 = 0x44;
    pub const M_INVALID_DEVICE: u8 = 0x45;
    pub const M_HUNG_REQ_SCSI_BUS_RESET: u8 = 0x48;
}

/// Tag message codes placed in front of a queued command.
pub mod tag {
    pub const SIMPLE: u8 = 0x20;
    pub const HEAD_OF_QUEUE: u8 = 0x21;
    pub const ORDERED: u8 = 0x22;
}

/// SCSI messages used during negotiation.
pub mod msg {
    pub const EXTENDED_MESSAGE: u8 = 0x01;
    pub const MESSAGE_REJECT: u8 = 0x07;
    pub const BUS_DEVICE_RESET: u8 = 0x0C;

    pub const EXTENDED_SDTR: u8 = 0x01;
    pub const EXTENDED_WDTR: u8 = 0x03;

    pub const SDTR_LEN: u8 = 0x03;
    pub const WDTR_LEN: u8 = 0x02;
}

/// INQUIRY response fields.
pub mod inquiry {
    /// Shortest response that still carries the capability byte.
    pub const MIN_LEN: usize = 8;
    /// Response length that reaches the SPI-3 clocking field.
    pub const CLOCKING_LEN: usize = 57;

    pub const RESPONSE_FORMAT_MASK: u8 = 0x0F;
    pub const ANSI_VERSION_MASK: u8 = 0x07;

    pub const FLAG_SOFT_RESET: u8 = 0x01;
    pub const FLAG_CMD_QUEUE: u8 = 0x02;
    pub const FLAG_LINKED: u8 = 0x08;
    pub const FLAG_SYNC: u8 = 0x10;
    pub const FLAG_WBUS16: u8 = 0x20;
    pub const FLAG_WBUS32: u8 = 0x40;

    pub const CLOCKING_MASK: u8 = 0x0C;
    pub const CLOCKING_ST_ONLY: u8 = 0x00;
    pub const CLOCKING_DT_ONLY: u8 = 0x04;
    pub const CLOCKING_ST_AND_DT: u8 = 0x0C;

    /// `cdb[1]` bits selecting vital product data or command support data.
    pub const EVPD_AND_CMDDT: u8 = 0x03;
}
