//! # Simulated SCSI Targets
//!
//! Both chip simulators execute commands against the same target model. A
//! target answers INQUIRY from its configured response, reads return a
//! fixed pattern and every other command completes according to a script
//! that tests fill with [`Outcome`]s.

use std::collections::VecDeque;

use tracing::trace;

use super::{
    bus::BusDeviceRef,
    constants::{inquiry, opcode},
    host_memory::DmaSegment,
    negotiation::tid_bit,
};

/// How a scripted command ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All data transferred, GOOD status.
    Good,
    /// GOOD status, but the last `n` bytes were not transferred.
    Underrun(u32),
    /// The target offered more data than the request asked for.
    Overrun,
    /// CHECK CONDITION with the target's sense data.
    CheckCondition,
    /// TASK SET FULL. The command is retried once the adapter backs off.
    QueueFull,
    /// BUSY status.
    Busy,
    /// The target does not answer selection.
    SelectionTimeout,
    /// The adapter gave up on the command and reset the bus.
    Hung,
    /// The target keeps the command until [`SimTargets::release_held`].
    Hold,
}

/// One simulated target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTarget {
    /// Standard INQUIRY response.
    pub inquiry: Vec<u8>,
    /// Sense data returned after CHECK CONDITION.
    pub sense: Vec<u8>,
    /// Answer SDTR with MESSAGE REJECT.
    pub rejects_sdtr: bool,
    /// Fastest synchronous period factor the target accepts.
    pub min_period: u8,
    /// Largest REQ/ACK offset the target accepts.
    pub max_offset: u8,
    /// Extended message the target sends on its first selection.
    pub unsolicited_msg: Option<[u8; 8]>,
    script: VecDeque<Outcome>,
}

impl SimTarget {
    /// A SCSI-2 disk claiming synchronous, wide and tagged operation.
    #[must_use]
    pub fn disk() -> Self {
        let mut inquiry = vec![0u8; 36];
        inquiry[2] = 2;
        inquiry[3] = 2;
        inquiry[4] = 31;
        inquiry[7] = inquiry::FLAG_SYNC | inquiry::FLAG_WBUS16 | inquiry::FLAG_CMD_QUEUE;
        inquiry[8..16].copy_from_slice(b"SIMDISK ");
        inquiry[16..32].copy_from_slice(b"VIRTUAL DISK    ");
        inquiry[32..36].copy_from_slice(b"0100");

        Self::with_inquiry(inquiry)
    }

    /// A target answering INQUIRY with `inquiry`.
    #[must_use]
    pub fn with_inquiry(inquiry: Vec<u8>) -> Self {
        Self {
            inquiry,
            // Fixed format, NOT READY, medium not present.
            sense: vec![0x70, 0, 0x02, 0, 0, 0, 0, 10, 0, 0, 0, 0, 0x3A, 0, 0, 0, 0, 0],
            rejects_sdtr: false,
            min_period: 25,
            max_offset: 15,
            unsolicited_msg: None,
            script: VecDeque::new(),
        }
    }

    /// Queue the outcome of a future command.
    pub fn push_outcome(&mut self, outcome: Outcome) {
        self.script.push_back(outcome);
    }

    /// The outcome of the next command. INQUIRY and REQUEST SENSE always
    /// succeed and do not consume the script.
    fn next_outcome(&mut self, cdb: &[u8]) -> Outcome {
        match cdb.first().copied() {
            Some(opcode::INQUIRY | opcode::REQUEST_SENSE) => Outcome::Good,
            _ => self.script.pop_front().unwrap_or(Outcome::Good),
        }
    }

    fn data_in(&self, cdb: &[u8], len: usize, tid: u8) -> Vec<u8> {
        match cdb.first().copied() {
            Some(opcode::INQUIRY) => {
                let alloc = usize::from(cdb.get(4).copied().unwrap_or(0));
                self.inquiry[..self.inquiry.len().min(alloc).min(len)].to_vec()
            }
            Some(opcode::REQUEST_SENSE) => self.sense[..self.sense.len().min(len)].to_vec(),
            _ => (0..len).map(|i| (i as u8) ^ tid).collect(),
        }
    }
}

/// A command the simulated RISC executed, for inspection by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    /// Target id.
    pub target: u8,
    /// Logical unit.
    pub lun: u8,
    /// The CDB.
    pub cdb: Vec<u8>,
    /// Tag message code the command was queued with.
    pub tag_code: u8,
    /// Data segments, in transfer order.
    pub segments: Vec<DmaSegment>,
}

/// The targets on one simulated bus.
#[derive(Debug, Clone)]
pub struct SimTargets {
    targets: Vec<Option<SimTarget>>,
    released: u16,
    log: Vec<ExecutedCommand>,
}

impl SimTargets {
    /// A bus without targets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: vec![None; 16],
            released: 0,
            log: Vec::new(),
        }
    }

    /// Connect `target` as `tid`.
    pub fn attach(&mut self, tid: u8, target: SimTarget) {
        self.targets[usize::from(tid)] = Some(target);
    }

    /// The target with id `tid`, if connected.
    pub fn get_mut(&mut self, tid: u8) -> Option<&mut SimTarget> {
        self.targets.get_mut(usize::from(tid))?.as_mut()
    }

    /// The target with id `tid`, if connected.
    #[must_use]
    pub fn get(&self, tid: u8) -> Option<&SimTarget> {
        self.targets.get(usize::from(tid))?.as_ref()
    }

    /// Let every held command of `tid` finish with GOOD status.
    pub fn release_held(&mut self, tid: u8) {
        self.released |= tid_bit(tid);
    }

    /// Whether held commands of `tid` were released.
    pub(crate) fn is_released(&self, tid: u8) -> bool {
        self.released & tid_bit(tid) != 0
    }

    /// Forget a release once the target has no held commands left.
    pub(crate) fn clear_release(&mut self, tid: u8) {
        self.released &= !tid_bit(tid);
    }

    /// Decide how a command ends.
    pub(crate) fn begin(&mut self, tid: u8, cdb: &[u8]) -> Outcome {
        match self.get_mut(tid) {
            Some(target) => target.next_outcome(cdb),
            None => Outcome::SelectionTimeout,
        }
    }

    /// Run the data phase. Returns the number of bytes transferred.
    ///
    /// Data-in is written into the segments. Data-out is only counted.
    pub(crate) fn transfer(
        &self,
        dma: &BusDeviceRef,
        tid: u8,
        cdb: &[u8],
        data_in: bool,
        segments: &[DmaSegment],
        underrun: u32,
    ) -> u32 {
        let total: u64 = segments.iter().map(|s| u64::from(s.len)).sum();
        let len = u32::try_from(total).unwrap_or(u32::MAX).saturating_sub(underrun);

        if !data_in {
            return len;
        }

        let data = self
            .get(tid)
            .map(|t| t.data_in(cdb, len as usize, tid))
            .unwrap_or_default();

        scatter(dma, segments, &data)
    }

    /// Write the target's sense data. Returns the number of valid bytes.
    pub(crate) fn write_sense(&self, dma: &BusDeviceRef, tid: u8, sense: DmaSegment) -> u8 {
        let data = self.get(tid).map(|t| t.sense.clone()).unwrap_or_default();
        let len = data.len().min(sense.len as usize);

        dma.write_bulk(u64::from(sense.addr), &data[..len]);
        len as u8
    }

    /// Record an executed command.
    pub(crate) fn record(&mut self, command: ExecutedCommand) {
        trace!(
            "sim target {} executes {:02x?} tag {:#04x}",
            command.target,
            command.cdb,
            command.tag_code
        );
        self.log.push(command);
    }

    /// Commands executed so far.
    #[must_use]
    pub fn executed(&self) -> &[ExecutedCommand] {
        &self.log
    }
}

impl Default for SimTargets {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `data` into consecutive segments. Returns the bytes written.
pub(crate) fn scatter(dma: &BusDeviceRef, segments: &[DmaSegment], data: &[u8]) -> u32 {
    let mut done = 0usize;

    for seg in segments {
        if done == data.len() {
            break;
        }

        let take = (data.len() - done).min(seg.len as usize);
        dma.write_bulk(u64::from(seg.addr), &data[done..done + take]);
        done += take;
    }

    done as u32
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{bus::BusDevice, host_memory::HostMemory};

    #[test]
    fn inquiry_is_truncated_to_the_allocation_length() {
        let mut targets = SimTargets::new();
        targets.attach(2, SimTarget::disk());

        let mem = Arc::new(HostMemory::anonymous(0x3000).unwrap());
        let dma: BusDeviceRef = mem.clone();
        let segs = [DmaSegment::new(0x1000, 0x100)];
        let cdb = [opcode::INQUIRY, 0, 0, 0, 24, 0];

        assert_eq!(targets.begin(2, &cdb), Outcome::Good);
        assert_eq!(targets.transfer(&dma, 2, &cdb, true, &segs, 0), 24);

        let mut vendor = [0u8; 8];
        mem.read_bulk(0x1008, &mut vendor);
        assert_eq!(&vendor, b"SIMDISK ");
    }

    #[test]
    fn script_is_consumed_in_order() {
        let mut targets = SimTargets::new();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::Busy);
        disk.push_outcome(Outcome::Underrun(12));
        targets.attach(0, disk);

        let read = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        assert_eq!(targets.begin(0, &[opcode::INQUIRY, 0, 0, 0, 36, 0]), Outcome::Good);
        assert_eq!(targets.begin(0, &read), Outcome::Busy);
        assert_eq!(targets.begin(0, &read), Outcome::Underrun(12));
        assert_eq!(targets.begin(0, &read), Outcome::Good);
        assert_eq!(targets.begin(5, &read), Outcome::SelectionTimeout);
    }

    #[test]
    fn scatter_spans_segments() {
        let mem = Arc::new(HostMemory::anonymous(0x3000).unwrap());
        let dma: BusDeviceRef = mem.clone();

        let written = scatter(
            &dma,
            &[DmaSegment::new(0x1000, 2), DmaSegment::new(0x2000, 8)],
            &[1, 2, 3, 4, 5],
        );

        let mut tail = [0u8; 3];
        mem.read_bulk(0x2000, &mut tail);
        assert_eq!(written, 5);
        assert_eq!(tail, [3, 4, 5]);
    }
}
