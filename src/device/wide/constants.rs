//! Register map, microcode variables and record layouts of the wide chips.

#![allow(missing_docs)]

/// I/O register offsets. Byte and word registers share addresses; the
/// access width selects the register.
pub mod iop {
    /// Word: chip id.
    pub const CHIP_ID_0: u64 = 0x00;
    /// Byte: interrupt status. Reading it clears it.
    pub const INTR_STATUS: u64 = 0x00;
    /// Byte: chip id.
    pub const CHIP_ID_1: u64 = 0x01;
    /// Word: control register.
    pub const CTRL_REG: u64 = 0x02;
    /// Byte: interrupt enables.
    pub const INTR_ENABLES: u64 = 0x02;
    pub const RAM_ADDR: u64 = 0x04;
    pub const RAM_DATA: u64 = 0x06;
    /// Byte: tickle register.
    pub const TICKLE: u64 = 0x08;
    pub const RISC_CSR: u64 = 0x0A;
    pub const SCSI_CFG1: u64 = 0x0E;
    /// Dword: command queue address register (38C1600).
    pub const COMMA: u64 = 0x14;
    /// Byte: RAM built-in self test.
    pub const RAM_BIST: u64 = 0x1F;
    pub const PC: u64 = 0x2A;

    /// Size of the I/O window.
    pub const WINDOW: u64 = 0x40;
}

/// Interrupt status bits.
pub mod intr_status {
    /// A request completed.
    pub const INTRA: u8 = 0x01;
    /// An async condition, see [`super::mc::INTRB_CODE`].
    pub const INTRB: u8 = 0x02;
    pub const INTRC: u8 = 0x04;
}

/// Interrupt enable bits.
pub mod intr_enable {
    pub const HOST_INTR: u8 = 0x01;
    pub const GLOBAL_INTR: u8 = 0x80;
}

/// Control register commands.
pub mod ctrl {
    pub const CMD_RESET: u16 = 0x00C6;
    pub const CMD_WR_IO_REG: u16 = 0x00C5;
}

/// RISC control and status.
pub mod risc_csr {
    pub const STOP: u16 = 0x0000;
    pub const RUN: u16 = 0x4000;
}

/// Tickle register values.
pub mod tickle {
    pub const NOP: u8 = 0x00;
    /// Fetch the command queue.
    pub const A: u8 = 0x01;
    /// Run the idle command.
    pub const B: u8 = 0x02;
    pub const C: u8 = 0x03;
}

/// RAM BIST modes and results.
pub mod bist {
    pub const NORMAL_MODE: u8 = 0x00;
    pub const PRE_TEST_MODE: u8 = 0x40;
    pub const RAM_TEST_MODE: u8 = 0x80;

    pub const PRE_TEST_VALUE: u8 = 0x05;
    pub const NORMAL_VALUE: u8 = 0x00;
    pub const RAM_TEST_DONE: u8 = 0x10;
    pub const RESULT_MASK: u8 = 0x0F;

    /// Milliseconds to let each mode settle.
    pub const SETTLE_MS: u64 = 10;
}

/// Microcode variables in LRAM.
pub mod mc {
    pub const CODE_BEGIN_ADDR: u16 = 0x0028;
    pub const CODE_END_ADDR: u16 = 0x002A;
    pub const CODE_CHK_SUM: u16 = 0x002C;
    pub const CHIP_TYPE: u16 = 0x009A;
    pub const INTRB_CODE: u16 = 0x009B;
    pub const WDTR_ABLE: u16 = 0x009C;
    pub const SDTR_ABLE: u16 = 0x009E;
    pub const TAGQNG_ABLE: u16 = 0x00A0;
    pub const DISC_ENABLE: u16 = 0x00A2;
    pub const IDLE_CMD_STATUS: u16 = 0x00A4;
    pub const IDLE_CMD: u16 = 0x00A6;
    pub const IDLE_CMD_PARAMETER: u16 = 0x00A8;
    pub const DEFAULT_SCSI_CFG0: u16 = 0x00AC;
    pub const DEFAULT_SCSI_CFG1: u16 = 0x00AE;
    pub const DEFAULT_SEL_MASK: u16 = 0x00B2;
    pub const SDTR_DONE: u16 = 0x00B6;
    pub const NUMBER_OF_QUEUED_CMD: u16 = 0x00C0;
    pub const NUMBER_OF_MAX_CMD: u16 = 0x00D0;
    pub const WDTR_DONE: u16 = 0x0124;
    pub const ICQ: u16 = 0x0160;
    pub const IRQ: u16 = 0x0164;
    pub const PPR_ABLE: u16 = 0x017A;
}

/// Values of [`mc::CHIP_TYPE`].
pub mod chip_type {
    pub const ASC3550: u16 = 0x01;
    pub const ASC38C0800: u16 = 0x02;
    pub const ASC38C1600: u16 = 0x03;
}

/// Bits of the default SCSI configuration 0 word.
pub mod cfg0 {
    pub const PARITY_EN: u16 = 0x2000;
    pub const QUEUE_128: u16 = 0x0400;
    pub const SEL_TMO_LONG: u16 = 0x0040;
    pub const OUR_ID_EN: u16 = 0x0010;
}

/// Bits of the default SCSI configuration 1 word.
pub mod cfg1 {
    pub const FLTR_DISABLE: u16 = 0x0040;
    pub const TERM_CTL_SEL: u16 = 0x0080;
    pub const TERM_CTL_H: u16 = 0x0020;
    pub const TERM_CTL_L: u16 = 0x0010;
}

/// Idle commands.
pub mod idle {
    pub const COMPLETED: u16 = 0x0000;
    pub const STOP_CHIP: u16 = 0x0001;
    pub const STOP_CHIP_SEND_INT: u16 = 0x0002;
    pub const SEND_INT: u16 = 0x0004;
    pub const ABORT: u16 = 0x0008;
    pub const DEVICE_RESET: u16 = 0x0010;
    pub const SCSI_RESET_START: u16 = 0x0020;
    pub const SCSI_RESET_END: u16 = 0x0040;

    pub const STATUS_SUCCESS: u16 = 0x0001;
    pub const STATUS_FAILURE: u16 = 0x0002;

    /// Polls of the idle command status, one millisecond apart.
    pub const WAIT_MS: u32 = 100;
}

/// Async condition codes in [`mc::INTRB_CODE`].
pub mod async_code {
    pub const RDMA_FAILURE: u8 = 0x01;
    pub const SCSI_BUS_RESET_DET: u8 = 0x02;
    pub const CARRIER_READY_FAILURE: u8 = 0x03;
    pub const RDMA_IN_CARR_AND_Q_INVALID: u8 = 0x04;
    pub const HOST_SCSI_BUS_RESET: u8 = 0x80;
}

/// Carrier `next_vpa` encoding.
pub mod carr {
    /// `next_vpa` of a queue's stopper.
    pub const CQ_STOPPER: u32 = 0x0000_0000;
    /// The RISC finished the request of this carrier.
    pub const RQ_DONE: u32 = 0x0000_0001;
    /// The request finished with good status and no residual. The
    /// status fields of the request were not written.
    pub const RQ_GOOD: u32 = 0x0000_0002;
    pub const NEXT_VPA_MASK: u32 = 0xFFFF_FFF0;

    /// Size and alignment of a carrier.
    pub const SIZE: u32 = 16;
}

/// Request control byte.
pub mod qc {
    pub const DATA_CHECK: u8 = 0x01;
    pub const DATA_OUT: u8 = 0x02;
    pub const START_MOTOR: u8 = 0x04;
    pub const NO_OVERRUN: u8 = 0x08;
    pub const FREEZE_TIDQ: u8 = 0x10;
}

/// Byte offsets inside a request record. The first [`req::MC_LEN`] bytes
/// are read and written by the RISC.
pub mod req {
    pub const CNTL: usize = 0;
    pub const TARGET_CMD: usize = 1;
    pub const TARGET_ID: usize = 2;
    pub const TARGET_LUN: usize = 3;
    pub const DATA_ADDR: usize = 4;
    pub const DATA_CNT: usize = 8;
    pub const SENSE_ADDR: usize = 12;
    pub const CARR_PA: usize = 16;
    pub const MFLAG: usize = 20;
    pub const SENSE_LEN: usize = 21;
    pub const CDB_LEN: usize = 22;
    pub const SCSI_CNTL: usize = 23;
    pub const DONE_STATUS: usize = 24;
    pub const SCSI_STATUS: usize = 25;
    pub const HOST_STATUS: usize = 26;
    pub const SG_WORKING_IX: usize = 27;
    pub const CDB: usize = 28;
    pub const SG_REAL_ADDR: usize = 40;
    pub const SCSIQ_RPTR: usize = 44;
    pub const CDB16: usize = 48;
    pub const SCSIQ_PTR: usize = 52;
    pub const CARR_VA: usize = 56;

    pub const MC_LEN: usize = 60;

    /// Size of a request record in the host pool.
    pub const SIZE: u32 = 64;
}

/// Scatter-gather block layout.
pub mod sg {
    pub const SG_CNT: usize = 3;
    pub const SG_PTR: usize = 4;
    pub const LIST: usize = 8;

    /// Elements per block.
    pub const PER_BLOCK: usize = 15;

    /// Size of a block.
    pub const SIZE: u32 = 8 + 8 * PER_BLOCK as u32;
}

/// LRAM size of each chip.
pub const MEMSIZE_3550: u32 = 0x2000;
pub const MEMSIZE_38C0800: u32 = 0x4000;
pub const MEMSIZE_38C1600: u32 = 0x8000;

/// Carriers beyond the request pool, so that both stoppers and a few
/// requests on their way back always have one.
pub const CARRIER_SURPLUS: u16 = 15;

/// Longest scatter-gather list accepted.
pub const MAX_SG_LIST: usize = 255;

/// Milliseconds the chip is held in reset.
pub const CHIP_RESET_MS: u64 = 100;
