//! # RISC Microcode
//!
//! Both chips run firmware out of their local RAM. The host copies the
//! image in word by word and verifies it by summing the words read back.

use std::{fs, path::Path};

use super::bus::le;

/// A microcode image together with the checksum it ships with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Microcode {
    image: Vec<u8>,
    checksum: u32,
}

/// Sum of little-endian 16-bit words. A trailing odd byte counts as the low
/// byte of a word.
#[must_use]
pub fn word_sum(bytes: &[u8]) -> u32 {
    bytes.chunks(2).fold(0u32, |sum, w| {
        let word = u16::from_le_bytes([w[0], w.get(1).copied().unwrap_or(0)]);
        sum.wrapping_add(u32::from(word))
    })
}

/// Offsets inside a wide image that delimit the checksummed code section.
pub mod wide_layout {
    /// Word holding the start of the code section.
    pub const CODE_BEGIN_ADDR: usize = 0x28;
    /// Word holding the end of the code section.
    pub const CODE_END_ADDR: usize = 0x2A;
    /// Where generated images put their code section.
    pub const CODE_START: u16 = 0x0200;
}

impl Microcode {
    /// Wrap an image and its expected checksum.
    #[must_use]
    pub const fn new(image: Vec<u8>, checksum: u32) -> Self {
        Self { image, checksum }
    }

    /// Load an image from a file. The checksum is supplied separately, as
    /// the vendor does.
    pub fn from_file(path: &Path, checksum: u32) -> Result<Self, std::io::Error> {
        Ok(Self::new(fs::read(path)?, checksum))
    }

    /// The raw image, padded to whole words.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// The expected checksum.
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The image as little-endian words.
    pub fn words(&self) -> impl Iterator<Item = u16> + '_ {
        self.image
            .chunks(2)
            .map(|w| u16::from_le_bytes([w[0], w.get(1).copied().unwrap_or(0)]))
    }

    /// The code section `[begin, end)` a wide image declares in its header.
    #[must_use]
    pub fn wide_code_section(&self) -> Option<(u16, u16)> {
        if self.image.len() < wide_layout::CODE_END_ADDR + 2 {
            return None;
        }

        let begin = le::u16_at(&self.image, wide_layout::CODE_BEGIN_ADDR);
        let end = le::u16_at(&self.image, wide_layout::CODE_END_ADDR);

        (begin <= end && usize::from(end) <= self.image.len()).then_some((begin, end))
    }

    /// A deterministic filler image for the narrow simulator. The whole
    /// image is checksummed.
    #[must_use]
    pub fn generated_narrow(len: usize, seed: u32) -> Self {
        let image = filler(len, seed);
        let checksum = word_sum(&image);

        Self::new(image, checksum)
    }

    /// A deterministic filler image for the wide simulator. The first
    /// [`wide_layout::CODE_START`] bytes hold the zeroed variable area and
    /// the header words; the rest is checksummed code.
    #[must_use]
    pub fn generated_wide(len: usize, seed: u32) -> Self {
        let start = usize::from(wide_layout::CODE_START);
        let len = len.max(start + 2) & !1;
        let end = u16::try_from(len).unwrap_or(u16::MAX & !1);

        let mut image = vec![0; usize::from(end)];
        image[start..].copy_from_slice(&filler(usize::from(end) - start, seed));
        le::put_u16(&mut image, wide_layout::CODE_BEGIN_ADDR, wide_layout::CODE_START);
        le::put_u16(&mut image, wide_layout::CODE_END_ADDR, end);

        let checksum = word_sum(&image[start..]);
        Self::new(image, checksum)
    }
}

/// xorshift filler, good enough to catch dropped or swapped words.
fn filler(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;

    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_sum_is_little_endian() {
        assert_eq!(word_sum(&[0x01, 0x02, 0x03, 0x04]), 0x0201 + 0x0403);
        assert_eq!(word_sum(&[0xff]), 0xff);
    }

    #[test]
    fn generated_images_carry_their_checksum() {
        let narrow = Microcode::generated_narrow(0x400, 7);
        assert_eq!(narrow.checksum(), word_sum(narrow.image()));
        assert_eq!(narrow.words().count(), 0x200);

        let wide = Microcode::generated_wide(0x1000, 7);
        let (begin, end) = wide.wide_code_section().unwrap();
        assert_eq!((begin, end), (0x200, 0x1000));
        assert_eq!(
            wide.checksum(),
            word_sum(&wide.image()[usize::from(begin)..usize::from(end)])
        );
    }

    #[test]
    fn truncated_wide_header_is_rejected() {
        assert_eq!(Microcode::new(vec![0; 0x20], 0).wide_code_section(), None);
    }
}
