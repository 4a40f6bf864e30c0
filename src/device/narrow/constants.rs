//! Register map, LRAM layout and bit definitions of the narrow chips.

#![allow(missing_docs)]

/// I/O port offsets.
pub mod iop {
    pub const SIG_WORD: u64 = 0x00;
    pub const SIG_BYTE: u64 = 0x01;
    pub const CONFIG_LOW: u64 = 0x02;
    pub const RAM_DATA: u64 = 0x08;
    pub const RAM_ADDR: u64 = 0x0A;
    pub const REG_PC: u64 = 0x0C;
    pub const STATUS: u64 = 0x0E;
    pub const CTRL: u64 = 0x0F;

    /// Size of the I/O window.
    pub const WINDOW: u64 = 0x10;
}

/// Bits of the low configuration word.
pub mod cfg0 {
    pub const HOST_INT_ON: u16 = 0x0020;
}

/// Chip status word, read from [`iop::STATUS`].
pub mod csw {
    pub const INT_PENDING: u16 = 0x0080;
    pub const SCSI_RESET_LATCH: u16 = 0x0040;
    pub const SCSI_RESET_ACTIVE: u16 = 0x0010;
    pub const HALTED: u16 = 0x0008;
}

/// Chip interrupt word, written to [`iop::STATUS`].
pub mod ciw {
    pub const CLR_SCSI_RESET_INT: u16 = 0x1000;
    pub const INT_ACK: u16 = 0x0100;
}

/// Chip control byte at [`iop::CTRL`].
pub mod cc {
    pub const CHIP_RESET: u8 = 0x80;
    pub const SCSI_RESET: u8 = 0x40;
    pub const HALT: u8 = 0x20;
    pub const SINGLE_STEP: u8 = 0x10;
    pub const DMA_ABLE: u8 = 0x08;
    pub const TEST: u8 = 0x04;
    pub const BANK_ONE: u8 = 0x02;
    pub const DIAG: u8 = 0x01;
}

/// Microcode variables in LRAM.
pub mod ascv {
    pub const MSGOUT_BEG: u16 = 0x0000;
    pub const MSGIN_BEG: u16 = 0x0008;
    pub const SDTR_DATA_BEG: u16 = 0x0010;
    pub const SDTR_DONE_BEG: u16 = 0x0018;
    pub const MAX_DVC_QNG_BEG: u16 = 0x0020;
    pub const ASCDVC_ERR_CODE_W: u16 = 0x0030;
    pub const MCODE_CHKSUM_W: u16 = 0x0032;
    pub const MCODE_SIZE_W: u16 = 0x0034;
    pub const STOP_CODE_B: u16 = 0x0036;
    pub const OVERRUN_PADDR_D: u16 = 0x0038;
    pub const OVERRUN_BSIZE_D: u16 = 0x003C;
    pub const HALTCODE_W: u16 = 0x0040;
    pub const NEXTRDY_B: u16 = 0x0048;
    pub const DONENEXT_B: u16 = 0x0049;
    pub const USE_TAGGED_QNG_B: u16 = 0x004A;
    pub const SCSIBUSY_B: u16 = 0x004B;
    pub const Q_DONE_IN_PROGRESS_B: u16 = 0x004C;
    pub const CURCDB_B: u16 = 0x004D;
    pub const BUSY_QHEAD_B: u16 = 0x004F;
    pub const DISC1_QHEAD_B: u16 = 0x0050;
    pub const DISC_ENABLE_B: u16 = 0x0052;
    pub const CAN_TAGGED_QNG_B: u16 = 0x0053;
    pub const HOSTSCSI_ID_B: u16 = 0x0055;
    pub const FREE_Q_HEAD_W: u16 = 0x0058;
    pub const DONE_Q_TAIL_W: u16 = 0x005A;
    pub const HOST_FLAG_B: u16 = 0x005D;
    pub const TOTAL_READY_Q_B: u16 = 0x0064;
    pub const WTM_FLAG_B: u16 = 0x0068;
    pub const RISC_FLAG_B: u16 = 0x006A;
    pub const REQ_SG_LIST_QP: u16 = 0x006B;
}

/// LRAM geometry.
pub mod lram {
    /// Where the microcode is loaded.
    pub const MCODE_START_ADDR: u16 = 0x0080;
    /// Start of the queue slot area. Slot 0 holds the RISC's per target
    /// active counters.
    pub const QADR_BEG: u16 = 0x4000;
    /// Size of a queue slot.
    pub const QBLK_SIZE: u16 = 0x40;
    /// Size of the simulated LRAM.
    pub const SIZE: u16 = 0x8000;
}

/// Byte offsets inside a queue slot.
pub mod slot {
    pub const FWD: u16 = 0;
    pub const BWD: u16 = 1;
    pub const STATUS: u16 = 2;
    pub const QNO: u16 = 3;
    pub const CNTL: u16 = 4;
    pub const SG_QUEUE_CNT: u16 = 5;
    pub const TARGET_ID: u16 = 6;
    pub const TARGET_LUN: u16 = 7;
    pub const DATA_ADDR: u16 = 8;
    pub const DATA_CNT: u16 = 12;
    pub const SENSE_ADDR: u16 = 16;
    pub const SENSE_LEN: u16 = 20;
    pub const EXTRA_BYTES: u16 = 21;
    pub const SRB_PTR: u16 = 22;
    pub const TARGET_IX: u16 = 26;
    pub const FLAG: u16 = 27;
    pub const CDB_LEN: u16 = 28;
    pub const TAG_CODE: u16 = 29;
    pub const VM_ID: u16 = 30;
    pub const DONE_STAT: u16 = 32;
    pub const HOST_STAT: u16 = 33;
    pub const SCSI_STAT: u16 = 34;
    pub const SCSI_MSG: u16 = 35;
    pub const CDB_BEG: u16 = 36;
    pub const FIRST_SG_WK_QP: u16 = 48;
    pub const SG_WK_QP: u16 = 49;
    pub const SG_WK_IX: u16 = 50;
    pub const REMAIN_XFER_ADDR: u16 = 56;
    pub const REMAIN_XFER_CNT: u16 = 60;

    /// Host written request fields, copied as one block.
    pub const CPY_BEG: u16 = 4;
    pub const CPY_END: u16 = 32;

    /// Completion fields the host copies out.
    pub const DONE_INFO_BEG: u16 = 22;
    pub const DONE_INFO_END: u16 = 32;

    /// Header of a scatter-gather queue.
    pub const SGHD_CPY_BEG: u16 = 2;
    /// First scatter-gather entry of a scatter-gather queue.
    pub const SGQ_LIST_BEG: u16 = 8;
}

/// Queue status byte.
pub mod qs {
    pub const FREE: u8 = 0x00;
    pub const READY: u8 = 0x01;
    pub const DISC1: u8 = 0x02;
    pub const DISC2: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const ABORTED: u8 = 0x40;
    pub const DONE: u8 = 0x80;
}

/// Queue control byte.
pub mod qc {
    pub const NO_CALLBACK: u8 = 0x01;
    pub const SG_SWAP_QUEUE: u8 = 0x02;
    pub const SG_HEAD: u8 = 0x04;
    pub const DATA_IN: u8 = 0x08;
    pub const DATA_OUT: u8 = 0x10;
    pub const URGENT: u8 = 0x20;
    pub const MSG_OUT: u8 = 0x40;
    pub const REQ_SENSE: u8 = 0x80;
}

/// Control byte of a scatter-gather queue.
pub mod qcsg {
    pub const SG_XFER_LIST: u8 = 0x02;
    pub const SG_XFER_MORE: u8 = 0x04;
    pub const SG_XFER_END: u8 = 0x08;
}

/// Halt codes the RISC leaves in [`ascv::HALTCODE_W`].
pub mod halt {
    pub const EXTMSG_IN: u16 = 0x8000;
    pub const CHK_CONDITION: u16 = 0x8100;
    pub const SS_QUEUE_FULL: u16 = 0x8200;
    pub const DISABLE_ASYN_USE_SYN_FIX: u16 = 0x8300;
    pub const ENABLE_ASYN_USE_SYN_FIX: u16 = 0x8400;
    pub const SDTR_REJECTED: u16 = 0x4000;
    pub const HOST_COPY_SG_LIST_TO_RISC: u16 = 0x2000;
}

/// Stop code handshake.
pub mod stop {
    pub const REQ_RISC_STOP: u8 = 0x01;
    pub const ACK_RISC_STOP: u8 = 0x03;
}

pub mod host_flag {
    pub const IN_ISR: u8 = 0x01;
    pub const ACK_INT: u8 = 0x02;
}

pub mod risc_flag {
    pub const GEN_INT: u8 = 0x01;
    pub const REQ_SG_LIST: u8 = 0x02;
}

/// Tag code bits cleared on CHECK CONDITION before the sense request.
pub const TAG_CODE_SENSE_MASK: u8 = 0xDC;

/// End of a queue chain.
pub const QLINK_END: u8 = 0xFF;

/// Slots kept free at all times.
pub const MIN_FREE_Q: u8 = 2;

/// Scatter-gather entries held by one scatter-gather queue.
pub const SG_LIST_PER_Q: usize = 7;

/// Scatter-gather entries the slots of one request hold at a time.
pub const MAX_SG_LIST: usize = 255;

/// Longest scatter-gather list accepted from the host. Entries beyond
/// [`MAX_SG_LIST`] are copied in while the command runs.
pub const MAX_HOST_SG_LIST: usize = 1024;

/// Queue depth below which TASK SET FULL no longer lowers the limit.
pub const MIN_TAGGED_CMD: u8 = 7;

/// Largest REQ/ACK offset.
pub const SYN_MAX_OFFSET: u8 = 0x0F;

/// Asynchronous transfers.
pub const ASYN_SDTR_DATA: u8 = 0x00;

/// Overrun buffer the RISC spills excess data into.
pub const OVERRUN_BSIZE: u32 = 0x48;

/// Synchronous period factors, indexed by the high nibble of SDTR data.
pub const SYN_XFER_PERIOD: [u8; 8] = [25, 30, 35, 40, 50, 60, 70, 85];

/// Ultra period factors.
pub const SYN_ULTRA_XFER_PERIOD: [u8; 16] =
    [12, 19, 25, 32, 38, 44, 50, 57, 63, 69, 75, 82, 88, 94, 100, 107];

/// Polls of the stop code acknowledge, [`STOP_POLL_DELAY_MS`] apart.
pub const STOP_POLL_COUNT: u32 = 20;
pub const STOP_POLL_DELAY_MS: u64 = 100;

/// Re-acknowledges of a still pending interrupt.
pub const INT_ACK_RETRIES: u32 = 3;
