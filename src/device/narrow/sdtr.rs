//! Synchronous transfer parameters of the narrow chips.
//!
//! SDTR data is one byte per target: the high nibble indexes the chip's
//! period table, the low nibble is the REQ/ACK offset.

use super::constants::{SYN_MAX_OFFSET, SYN_ULTRA_XFER_PERIOD, SYN_XFER_PERIOD};

/// The period table of one chip.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SdtrTable {
    periods: &'static [u8],
    min_index: u8,
    max_index: u8,
}

impl SdtrTable {
    /// Fast-10 chips.
    pub const STANDARD: Self = Self {
        periods: &SYN_XFER_PERIOD,
        min_index: 0,
        max_index: 7,
    };

    /// Ultra chips.
    pub const ULTRA: Self = Self {
        periods: &SYN_ULTRA_XFER_PERIOD,
        min_index: 0,
        max_index: 15,
    };

    /// The table for a chip with or without Ultra support.
    #[must_use]
    pub const fn for_chip(ultra: bool) -> Self {
        if ultra {
            Self::ULTRA
        } else {
            Self::STANDARD
        }
    }

    /// Fastest period factor.
    #[must_use]
    pub fn min_period(&self) -> u8 {
        self.periods[usize::from(self.min_index)]
    }

    /// Slowest period factor.
    #[must_use]
    pub fn max_period(&self) -> u8 {
        self.periods[usize::from(self.max_index)]
    }

    /// Table index for `period`. Periods slower than the table yield an
    /// index past its end.
    #[must_use]
    pub fn period_index(&self, period: u8) -> u8 {
        if period > self.max_period() {
            return self.max_index + 1;
        }

        (self.min_index..self.max_index.saturating_sub(1))
            .find(|&i| period <= self.periods[usize::from(i)])
            .unwrap_or(self.max_index)
    }

    /// SDTR data for a period/offset pair, `None` if the period is too
    /// slow.
    #[must_use]
    pub fn sdtr_data(&self, period: u8, offset: u8) -> Option<u8> {
        let index = self.period_index(period);

        (index <= self.max_index).then_some((index << 4) | (offset & SYN_MAX_OFFSET))
    }

    /// The period factor encoded in `data`.
    #[must_use]
    pub fn period_of(&self, data: u8) -> u8 {
        self.periods[usize::from((data >> 4) & self.max_index)]
    }

    /// The offset encoded in `data`.
    #[must_use]
    pub const fn offset_of(data: u8) -> u8 {
        data & SYN_MAX_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn periods_map_to_the_next_slower_entry() {
        let t = SdtrTable::STANDARD;

        assert_eq!(t.period_index(12), 0);
        assert_eq!(t.period_index(25), 0);
        assert_eq!(t.period_index(26), 1);
        assert_eq!(t.period_index(50), 4);
        assert_eq!(t.period_index(85), 7);
        assert_eq!(t.period_index(86), 8);
    }

    #[test]
    fn slow_periods_have_no_sdtr_data() {
        assert_eq!(SdtrTable::STANDARD.sdtr_data(100, 15), None);
        assert_eq!(SdtrTable::ULTRA.sdtr_data(100, 15), Some(0xEF));
        assert_eq!(SdtrTable::STANDARD.sdtr_data(50, 8), Some(0x48));
    }

    proptest! {
        #[test]
        fn encoded_period_is_never_faster_than_requested(period in 12u8..=85, offset in 0u8..=15) {
            let t = SdtrTable::STANDARD;
            let data = t.sdtr_data(period.max(t.min_period()), offset).unwrap();

            prop_assert!(t.period_of(data) >= period.max(t.min_period()));
            prop_assert_eq!(SdtrTable::offset_of(data), offset);
        }
    }
}
