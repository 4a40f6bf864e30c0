//! # Wide Chip Port
//!
//! Register access to the wide chips. LRAM sits behind an address/data
//! register pair just like on the narrow chips, but the queues themselves
//! live in host memory, so LRAM traffic is limited to microcode variables.

use tracing::trace;

use crate::device::bus::{BusDeviceRef, Request, RequestSize};

use super::constants::iop;

/// Register and LRAM access to one wide chip.
#[derive(Debug, Clone)]
pub struct AdvPort {
    io: BusDeviceRef,
}

impl AdvPort {
    /// Wrap the chip's I/O window.
    #[must_use]
    pub fn new(io: BusDeviceRef) -> Self {
        Self { io }
    }

    fn read8(&self, reg: u64) -> u8 {
        self.io.read(Request::new(reg, RequestSize::Size1)) as u8
    }

    fn write8(&self, reg: u64, value: u8) {
        self.io.write(Request::new(reg, RequestSize::Size1), value.into());
    }

    fn read16(&self, reg: u64) -> u16 {
        self.io.read(Request::new(reg, RequestSize::Size2)) as u16
    }

    fn write16(&self, reg: u64, value: u16) {
        self.io.write(Request::new(reg, RequestSize::Size2), value.into());
    }

    /// The chip id byte.
    #[must_use]
    pub fn chip_id_byte(&self) -> u8 {
        self.read8(iop::CHIP_ID_1)
    }

    /// The chip id word.
    #[must_use]
    pub fn chip_id_word(&self) -> u16 {
        self.read16(iop::CHIP_ID_0)
    }

    /// Read and clear the interrupt status.
    #[must_use]
    pub fn take_intr_status(&self) -> u8 {
        self.read8(iop::INTR_STATUS)
    }

    /// Write the interrupt enables.
    pub fn set_intr_enables(&self, value: u8) {
        self.write8(iop::INTR_ENABLES, value);
    }

    /// Issue a control register command.
    pub fn set_ctrl(&self, cmd: u16) {
        trace!("wide ctrl <- {cmd:#06x}");
        self.write16(iop::CTRL_REG, cmd);
    }

    /// Write the tickle register.
    pub fn tickle(&self, value: u8) {
        trace!("wide tickle <- {value:#04x}");
        self.write8(iop::TICKLE, value);
    }

    /// The RISC control and status word.
    #[must_use]
    pub fn risc_csr(&self) -> u16 {
        self.read16(iop::RISC_CSR)
    }

    /// Start or stop the RISC.
    pub fn set_risc_csr(&self, value: u16) {
        self.write16(iop::RISC_CSR, value);
    }

    /// The RISC program counter.
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.read16(iop::PC)
    }

    /// Set the RISC program counter.
    pub fn set_pc(&self, pc: u16) {
        self.write16(iop::PC, pc);
    }

    /// Point the RISC at a new command queue tail (38C1600).
    pub fn set_comma(&self, pa: u32) {
        trace!("wide COMMA <- {pa:#010x}");
        self.io.write(Request::new(iop::COMMA, RequestSize::Size4), pa.into());
    }

    /// Write SCSI configuration 1, which holds the termination control.
    pub fn set_scsi_cfg1(&self, value: u16) {
        self.write16(iop::SCSI_CFG1, value);
    }

    /// The RAM BIST register.
    #[must_use]
    pub fn ram_bist(&self) -> u8 {
        self.read8(iop::RAM_BIST)
    }

    /// Select a RAM BIST mode.
    pub fn set_ram_bist(&self, mode: u8) {
        self.write8(iop::RAM_BIST, mode);
    }

    fn set_lram_addr(&self, addr: u16) {
        self.write16(iop::RAM_ADDR, addr);
    }

    /// Read the LRAM word at `addr`.
    #[must_use]
    pub fn read_word(&self, addr: u16) -> u16 {
        self.set_lram_addr(addr);
        self.read16(iop::RAM_DATA)
    }

    /// Write the LRAM word at `addr`.
    pub fn write_word(&self, addr: u16, value: u16) {
        self.set_lram_addr(addr);
        self.write16(iop::RAM_DATA, value);
    }

    /// Read the LRAM byte at `addr`.
    #[must_use]
    pub fn read_byte(&self, addr: u16) -> u8 {
        let [low, high] = self.read_word(addr & !1).to_le_bytes();

        if addr & 1 == 0 {
            low
        } else {
            high
        }
    }

    /// Write the LRAM byte at `addr`.
    pub fn write_byte(&self, addr: u16, value: u8) {
        let mut bytes = self.read_word(addr & !1).to_le_bytes();
        bytes[usize::from(addr & 1)] = value;

        self.write_word(addr & !1, u16::from_le_bytes(bytes));
    }

    /// Read the little-endian LRAM dword at `addr`.
    #[must_use]
    pub fn read_dword(&self, addr: u16) -> u32 {
        self.set_lram_addr(addr);
        let low = self.read16(iop::RAM_DATA);
        let high = self.read16(iop::RAM_DATA);

        u32::from(low) | (u32::from(high) << 16)
    }

    /// Write the little-endian LRAM dword at `addr`.
    pub fn write_dword(&self, addr: u16, value: u32) {
        self.set_lram_addr(addr);
        self.write16(iop::RAM_DATA, value as u16);
        self.write16(iop::RAM_DATA, (value >> 16) as u16);
    }

    /// Set or clear the bits of `mask` in the LRAM word at `addr`.
    pub fn update_word(&self, addr: u16, mask: u16, set: bool) {
        let word = self.read_word(addr);
        self.write_word(addr, if set { word | mask } else { word & !mask });
    }

    /// Stream `words` into LRAM starting at `addr`.
    pub fn write_words(&self, addr: u16, words: impl Iterator<Item = u16>) {
        self.set_lram_addr(addr);
        for word in words {
            self.write16(iop::RAM_DATA, word);
        }
    }

    /// Set `count` words starting at `addr` to zero.
    pub fn clear_words(&self, addr: u16, count: usize) {
        self.write_words(addr, std::iter::repeat(0).take(count));
    }

    /// Sum of `count` words starting at `addr`.
    #[must_use]
    pub fn sum_words(&self, addr: u16, count: usize) -> u32 {
        self.set_lram_addr(addr);
        (0..count).fold(0u32, |sum, _| {
            sum.wrapping_add(u32::from(self.read16(iop::RAM_DATA)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::{config::WideChip, wide::sim::SimAdvChip};

    fn port() -> AdvPort {
        let chip: BusDeviceRef = Arc::new(Mutex::new(SimAdvChip::bare(WideChip::Asc38C0800)));
        AdvPort::new(chip)
    }

    #[test]
    fn byte_and_word_registers_share_addresses() {
        let port = port();

        assert_eq!(port.chip_id_word(), 0x04C1);
        assert_eq!(port.chip_id_byte(), 0x25);
        assert_eq!(port.take_intr_status(), 0);
    }

    #[test]
    fn bitmask_updates_keep_other_targets() {
        let port = port();

        port.write_word(0x9C, 0x00F0);
        port.update_word(0x9C, 0x0001, true);
        port.update_word(0x9C, 0x0010, false);
        assert_eq!(port.read_word(0x9C), 0x00E1);

        port.write_byte(0x9B, 0x80);
        assert_eq!(port.read_byte(0x9B), 0x80);
        assert_eq!(port.read_byte(0x9A), 0x00);
    }

    #[test]
    fn dwords_are_little_endian() {
        let port = port();

        port.write_dword(0x160, 0xDEAD_BEE0);
        assert_eq!(port.read_word(0x160), 0xBEE0);
        assert_eq!(port.read_dword(0x160), 0xDEAD_BEE0);
        assert_eq!(port.sum_words(0x160, 2), 0xBEE0 + 0xDEAD);
    }
}
