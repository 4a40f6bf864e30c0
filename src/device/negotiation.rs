//! # Transfer Negotiation State
//!
//! Per target the adapters track whether synchronous transfers (SDTR), wide
//! transfers (WDTR), DT clocking (PPR) and tag queuing may be used. A
//! capability needs two things to become active: the board configuration
//! must allow it and the device must claim it in its INQUIRY data. The
//! engines snoop every successful standard INQUIRY to LUN 0 and feed the
//! response through here.

use tracing::debug;

use super::constants::inquiry;

/// Mask bit of a target id.
#[must_use]
pub const fn tid_bit(tid: u8) -> u16 {
    1 << tid
}

/// The fields of a standard INQUIRY response the engines care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    /// Number of valid bytes in the response.
    pub len: usize,
    /// ANSI version (byte 2).
    pub ansi_version: u8,
    /// Response data format (byte 3).
    pub response_format: u8,
    /// Additional length (byte 4).
    pub additional_len: u8,
    /// Capability flags (byte 7).
    pub flags: u8,
    /// Vendor identification.
    pub vendor: [u8; 8],
    /// Product identification.
    pub product: [u8; 16],
    /// Product revision level.
    pub revision: [u8; 4],
    /// SPI-3 clocking field (byte 56), if returned.
    pub clocking: Option<u8>,
}

impl Inquiry {
    /// Parse the response. Returns `None` if it is too short to carry the
    /// capability byte.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < inquiry::MIN_LEN {
            return None;
        }

        let field = |range: std::ops::Range<usize>| -> Vec<u8> {
            let mut out = vec![b' '; range.len()];
            if let Some(src) = data.get(range.start..range.end.min(data.len())) {
                out[..src.len()].copy_from_slice(src);
            }
            out
        };

        let mut vendor = [0; 8];
        let mut product = [0; 16];
        let mut revision = [0; 4];
        vendor.copy_from_slice(&field(8..16));
        product.copy_from_slice(&field(16..32));
        revision.copy_from_slice(&field(32..36));

        Some(Self {
            len: data.len(),
            ansi_version: data[2] & inquiry::ANSI_VERSION_MASK,
            response_format: data[3] & inquiry::RESPONSE_FORMAT_MASK,
            additional_len: data[4],
            flags: data[7],
            vendor,
            product,
            revision,
            clocking: data.get(inquiry::CLOCKING_LEN - 1).copied(),
        })
    }

    /// Whether the device speaks SCSI-2 or later. Older devices don't
    /// report capability bits.
    #[must_use]
    pub const fn is_scsi2(&self) -> bool {
        self.response_format >= 2 || self.ansi_version >= 2
    }

    /// Claims synchronous transfers.
    #[must_use]
    pub const fn sync(&self) -> bool {
        self.flags & inquiry::FLAG_SYNC != 0
    }

    /// Claims 16-bit wide transfers.
    #[must_use]
    pub const fn wbus16(&self) -> bool {
        self.flags & inquiry::FLAG_WBUS16 != 0
    }

    /// Claims command queuing.
    #[must_use]
    pub const fn cmd_que(&self) -> bool {
        self.flags & inquiry::FLAG_CMD_QUEUE != 0
    }

    /// Claims DT clocking.
    #[must_use]
    pub fn dt(&self) -> bool {
        self.clocking.is_some_and(|c| {
            matches!(
                c & inquiry::CLOCKING_MASK,
                inquiry::CLOCKING_DT_ONLY | inquiry::CLOCKING_ST_AND_DT
            )
        })
    }
}

/// Devices that claim tag queuing but break when it is used.
///
/// Each entry is a prefix of the combined vendor and product fields plus
/// the exact revision.
const TAG_QUEUING_BLOCKLIST: &[(&[u8], &[u8; 4])] = &[(b"QUANTUM XP34301".as_slice(), b"1071")];

/// Whether tag queuing may be used with this device.
#[must_use]
pub fn tag_queuing_safe(inq: &Inquiry) -> bool {
    if usize::from(inq.additional_len) < 32 {
        return true;
    }

    let mut ident = [0u8; 24];
    ident[..8].copy_from_slice(&inq.vendor);
    ident[8..].copy_from_slice(&inq.product);

    !TAG_QUEUING_BLOCKLIST
        .iter()
        .any(|(prefix, rev)| ident.starts_with(prefix) && &inq.revision == *rev)
}

/// Capabilities a target may use after looking at its INQUIRY data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Synchronous transfers.
    pub sync: bool,
    /// Wide transfers.
    pub wide: bool,
    /// Tag queuing.
    pub tag_queuing: bool,
    /// DT clocking.
    pub dt: bool,
}

/// How one capability changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Transition {
    /// Same as before.
    #[default]
    Unchanged,
    /// Newly activated. The matching done bit was cleared.
    Enabled,
    /// Deactivated.
    Disabled,
}

/// Result of feeding an INQUIRY through [`NegotiationState::update`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Change {
    /// Synchronous transfers.
    pub sdtr: Transition,
    /// Wide transfers.
    pub wdtr: Transition,
    /// Tag queuing.
    pub tagqng: Transition,
    /// DT clocking.
    pub ppr: Transition,
}

impl Change {
    /// Whether anything changed.
    #[must_use]
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// How a new claim combines with the current state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Merge {
    /// The claim replaces the current state. A capability the device no
    /// longer claims is dropped.
    Replace,
    /// The claim only adds capabilities.
    Accumulate,
}

/// Negotiation bookkeeping of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiationState {
    /// Configured SDTR permission.
    pub sdtr_enable: u16,
    /// Configured WDTR permission.
    pub wdtr_enable: u16,
    /// Configured tag queuing permission.
    pub tagqng_enable: u16,
    /// Whether the chip can do DT clocking at all.
    pub dt_capable: bool,

    /// Targets to negotiate synchronous transfers with.
    pub sdtr_able: u16,
    /// Targets to negotiate wide transfers with.
    pub wdtr_able: u16,
    /// Targets using tag queuing.
    pub tagqng_able: u16,
    /// Targets to negotiate DT clocking with.
    pub ppr_able: u16,

    /// Targets whose SDTR negotiation completed.
    pub sdtr_done: u16,
    /// Targets whose WDTR negotiation completed.
    pub wdtr_done: u16,
}

impl NegotiationState {
    /// Fresh state for the given configured permissions. Nothing is active
    /// until a device claims it.
    #[must_use]
    pub const fn new(sdtr_enable: u16, wdtr_enable: u16, tagqng_enable: u16, dt_capable: bool) -> Self {
        Self {
            sdtr_enable,
            wdtr_enable,
            tagqng_enable,
            dt_capable,
            sdtr_able: 0,
            wdtr_able: 0,
            tagqng_able: 0,
            ppr_able: 0,
            sdtr_done: 0,
            wdtr_done: 0,
        }
    }

    /// Capabilities target `tid` may use given what it claims.
    #[must_use]
    pub fn evaluate(&self, tid: u8, inq: &Inquiry) -> Capabilities {
        let bit = tid_bit(tid);

        if !inq.is_scsi2() {
            return Capabilities::default();
        }

        Capabilities {
            sync: self.sdtr_enable & bit != 0 && inq.sync(),
            wide: self.wdtr_enable & bit != 0 && inq.wbus16(),
            tag_queuing: self.tagqng_enable & bit != 0 && inq.cmd_que() && tag_queuing_safe(inq),
            dt: self.dt_capable
                && self.sdtr_enable & bit != 0
                && inq.len >= inquiry::CLOCKING_LEN
                && inq.dt(),
        }
    }

    /// Fold `caps` into the state of target `tid`.
    ///
    /// Newly enabled SDTR clears the SDTR done bit. Newly enabled WDTR
    /// clears both done bits, because an accepted WDTR drops the target
    /// back to asynchronous transfers.
    pub fn update(&mut self, tid: u8, caps: Capabilities, merge: Merge) -> Change {
        let bit = tid_bit(tid);

        let change = Change {
            sdtr: Self::apply(&mut self.sdtr_able, bit, caps.sync, merge),
            wdtr: Self::apply(&mut self.wdtr_able, bit, caps.wide, merge),
            tagqng: Self::apply(&mut self.tagqng_able, bit, caps.tag_queuing, merge),
            ppr: Self::apply(&mut self.ppr_able, bit, caps.dt, merge),
        };

        if change.wdtr == Transition::Enabled {
            self.wdtr_done &= !bit;
            self.sdtr_done &= !bit;
        }

        if change.sdtr == Transition::Enabled || change.ppr == Transition::Enabled {
            self.sdtr_done &= !bit;
        }

        if change.any() {
            debug!("target {tid} capabilities now {caps:?} ({change:?})");
        }

        change
    }

    fn apply(mask: &mut u16, bit: u16, claimed: bool, merge: Merge) -> Transition {
        let was = *mask & bit != 0;

        match (was, claimed, merge) {
            (false, true, _) => {
                *mask |= bit;
                Transition::Enabled
            }
            (true, false, Merge::Replace) => {
                *mask &= !bit;
                Transition::Disabled
            }
            _ => Transition::Unchanged,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutils {
    use crate::device::constants::inquiry;

    /// Build a standard INQUIRY response.
    pub(crate) fn inquiry_bytes(flags: u8, vendor: &[u8], product: &[u8], rev: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 36];
        data[2] = 2;
        data[3] = 2;
        data[4] = 31;
        data[7] = flags;
        data[8..16].fill(b' ');
        data[16..32].fill(b' ');
        data[8..8 + vendor.len()].copy_from_slice(vendor);
        data[16..16 + product.len()].copy_from_slice(product);
        data[32..32 + rev.len()].copy_from_slice(rev);
        data
    }

    pub(crate) fn capable_disk() -> Vec<u8> {
        inquiry_bytes(
            inquiry::FLAG_SYNC | inquiry::FLAG_WBUS16 | inquiry::FLAG_CMD_QUEUE,
            b"SEAGATE",
            b"ST39236LW",
            b"0004",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_inquiry_is_rejected() {
        assert_eq!(Inquiry::parse(&[0; 7]), None);
        assert!(Inquiry::parse(&[0; 8]).is_some());
    }

    #[test]
    fn blocklisted_device_never_gets_tag_queuing() {
        let mut data = inquiry_bytes(inquiry::FLAG_CMD_QUEUE, b"QUANTUM", b"XP34301", b"1071");
        data[4] = 32;
        let inq = Inquiry::parse(&data).unwrap();

        assert!(!tag_queuing_safe(&inq));

        let state = NegotiationState::new(0xff, 0, 0xff, false);
        assert!(!state.evaluate(2, &inq).tag_queuing);
    }

    #[test]
    fn blocklist_needs_exact_revision() {
        let mut data = inquiry_bytes(inquiry::FLAG_CMD_QUEUE, b"QUANTUM", b"XP34301", b"1080");
        data[4] = 32;

        assert!(tag_queuing_safe(&Inquiry::parse(&data).unwrap()));
    }

    #[test]
    fn scsi1_devices_claim_nothing() {
        let mut data = capable_disk();
        data[2] = 1;
        data[3] = 1;

        let state = NegotiationState::new(0xffff, 0xffff, 0xffff, true);
        assert_eq!(
            state.evaluate(0, &Inquiry::parse(&data).unwrap()),
            Capabilities::default()
        );
    }

    #[test]
    fn enabling_wdtr_rearms_both_negotiations() {
        let mut state = NegotiationState::new(0xffff, 0xffff, 0xffff, false);
        state.sdtr_done = 0xffff;
        state.wdtr_done = 0xffff;

        let inq = Inquiry::parse(&capable_disk()).unwrap();
        let caps = state.evaluate(3, &inq);
        let change = state.update(3, caps, Merge::Accumulate);

        assert_eq!(change.wdtr, Transition::Enabled);
        assert_eq!(state.wdtr_done, !tid_bit(3));
        assert_eq!(state.sdtr_done, !tid_bit(3));

        // A second identical INQUIRY changes nothing.
        assert!(!state.update(3, caps, Merge::Accumulate).any());
    }

    #[test]
    fn dt_needs_the_clocking_field() {
        let mut data = capable_disk();
        let state = NegotiationState::new(0xffff, 0xffff, 0xffff, true);

        assert!(!state.evaluate(1, &Inquiry::parse(&data).unwrap()).dt);

        data.resize(inquiry::CLOCKING_LEN, 0);
        data[56] = inquiry::CLOCKING_ST_AND_DT;
        assert!(state.evaluate(1, &Inquiry::parse(&data).unwrap()).dt);
    }

    proptest! {
        #[test]
        fn disabled_capabilities_are_never_activated(
            sdtr in any::<u16>(), wdtr in any::<u16>(), tagqng in any::<u16>(),
            tid in 0u8..16, flags in any::<u8>(),
        ) {
            let mut state = NegotiationState::new(sdtr, wdtr, tagqng, true);
            let mut data = inquiry_bytes(flags, b"VENDOR", b"PRODUCT", b"0001");
            data.resize(inquiry::CLOCKING_LEN, 0xff);
            let inq = Inquiry::parse(&data).unwrap();

            let caps = state.evaluate(tid, &inq);
            state.update(tid, caps, Merge::Replace);

            prop_assert_eq!(state.sdtr_able & !sdtr, 0);
            prop_assert_eq!(state.wdtr_able & !wdtr, 0);
            prop_assert_eq!(state.tagqng_able & !tagqng, 0);
            prop_assert_eq!(caps.sync, sdtr & tid_bit(tid) != 0 && inq.sync());
        }
    }
}
