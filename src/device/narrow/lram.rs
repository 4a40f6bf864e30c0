//! # Narrow Chip Port
//!
//! The narrow chips expose their local RAM through an address register
//! and a data register that advances by one word per access. Byte
//! variables are read-modify-written as the word they live in.

use tracing::trace;

use crate::device::bus::{BusDeviceRef, Request, RequestSize};

use super::constants::{iop, lram};

/// Register and LRAM access to one narrow chip.
#[derive(Debug, Clone)]
pub struct AscPort {
    io: BusDeviceRef,
}

/// LRAM address of queue slot `q_no`.
#[must_use]
pub const fn qaddr(q_no: u8) -> u16 {
    lram::QADR_BEG + (q_no as u16) * lram::QBLK_SIZE
}

impl AscPort {
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

    /// The signature byte.
    #[must_use]
    pub fn sig_byte(&self) -> u8 {
        self.read8(iop::SIG_BYTE)
    }

    /// The signature word.
    #[must_use]
    pub fn sig_word(&self) -> u16 {
        self.read16(iop::SIG_WORD)
    }

    /// Chip status word.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.read16(iop::STATUS)
    }

    /// Issue chip interrupt word commands.
    pub fn set_status(&self, ciw: u16) {
        self.write16(iop::STATUS, ciw);
    }

    /// Chip control byte.
    #[must_use]
    pub fn control(&self) -> u8 {
        self.read8(iop::CTRL)
    }

    /// Write the chip control byte.
    pub fn set_control(&self, cc: u8) {
        trace!("narrow control <- {cc:#04x}");
        self.write8(iop::CTRL, cc);
    }

    /// The low configuration word.
    #[must_use]
    pub fn config_low(&self) -> u16 {
        self.read16(iop::CONFIG_LOW)
    }

    /// Write the low configuration word.
    pub fn set_config_low(&self, value: u16) {
        self.write16(iop::CONFIG_LOW, value);
    }

    /// The RISC program counter.
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.read16(iop::REG_PC)
    }

    /// Set the RISC program counter.
    pub fn set_pc(&self, pc: u16) {
        self.write16(iop::REG_PC, pc);
    }

    /// The current LRAM address.
    #[must_use]
    pub fn lram_addr(&self) -> u16 {
        self.read16(iop::RAM_ADDR)
    }

    /// Point the LRAM window at `addr`.
    pub fn set_lram_addr(&self, addr: u16) {
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
        let word = self.read_word(addr & !1);

        if addr & 1 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    /// Write the LRAM byte at `addr`, keeping its neighbour.
    pub fn write_byte(&self, addr: u16, value: u8) {
        let word = self.read_word(addr & !1);

        let word = if addr & 1 == 0 {
            (word & 0xFF00) | u16::from(value)
        } else {
            (word & 0x00FF) | (u16::from(value) << 8)
        };

        self.write_word(addr & !1, word);
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

    /// Stream words out of LRAM. `addr` and the length of `buf` must be
    /// even.
    pub fn read_block(&self, addr: u16, buf: &mut [u8]) {
        debug_assert!(addr & 1 == 0 && buf.len() % 2 == 0);

        self.set_lram_addr(addr);
        for pair in buf.chunks_exact_mut(2) {
            pair.copy_from_slice(&self.read16(iop::RAM_DATA).to_le_bytes());
        }
    }

    /// Stream words into LRAM. See [`AscPort::read_block`].
    pub fn write_block(&self, addr: u16, buf: &[u8]) {
        debug_assert!(addr & 1 == 0 && buf.len() % 2 == 0);

        self.set_lram_addr(addr);
        for pair in buf.chunks_exact(2) {
            self.write16(iop::RAM_DATA, u16::from_le_bytes([pair[0], pair[1]]));
        }
    }

    /// Set `words` words starting at `addr` to `value`.
    pub fn fill_words(&self, addr: u16, value: u16, words: usize) {
        self.set_lram_addr(addr);
        for _ in 0..words {
            self.write16(iop::RAM_DATA, value);
        }
    }

    /// Sum of `words` words starting at `addr`.
    #[must_use]
    pub fn sum_words(&self, addr: u16, words: usize) -> u32 {
        self.set_lram_addr(addr);
        (0..words).fold(0u32, |sum, _| {
            sum.wrapping_add(u32::from(self.read16(iop::RAM_DATA)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::narrow::sim::SimAscChip;

    fn port() -> AscPort {
        let chip: BusDeviceRef = Arc::new(Mutex::new(SimAscChip::bare()));
        AscPort::new(chip)
    }

    #[test]
    fn byte_writes_keep_the_neighbour() {
        let port = port();

        port.write_word(0x100, 0xbeef);
        port.write_byte(0x101, 0x12);
        assert_eq!(port.read_word(0x100), 0x12ef);

        port.write_byte(0x100, 0x34);
        assert_eq!(port.read_byte(0x100), 0x34);
        assert_eq!(port.read_byte(0x101), 0x12);
    }

    #[test]
    fn dwords_are_little_endian() {
        let port = port();

        port.write_dword(0x200, 0x1234_5678);
        assert_eq!(port.read_word(0x200), 0x5678);
        assert_eq!(port.read_word(0x202), 0x1234);
        assert_eq!(port.read_dword(0x200), 0x1234_5678);
    }

    #[test]
    fn blocks_stream_through_the_data_register() {
        let port = port();
        let data: Vec<u8> = (0..16).collect();

        port.write_block(0x300, &data);

        let mut back = [0u8; 16];
        port.read_block(0x300, &mut back);
        assert_eq!(back.to_vec(), data);
        assert_eq!(port.lram_addr(), 0x310);
        assert_eq!(
            port.sum_words(0x300, 8),
            data.chunks(2).map(|w| u32::from(u16::from_le_bytes([w[0], w[1]]))).sum()
        );
    }

    #[test]
    fn slot_addresses() {
        assert_eq!(qaddr(0), 0x4000);
        assert_eq!(qaddr(1), 0x4040);
        assert_eq!(qaddr(0xF3), 0x4000 + 0xF3 * 0x40);
    }
}
