//! # Narrow RISC Simulator
//!
//! A register level model of a narrow chip: the I/O window, 32K of LRAM
//! behind the address/data register pair and a RISC that runs the queue
//! protocol against [`SimTargets`]. The RISC only makes progress when
//! [`SimAscChip::run`] is called, which gives tests full control over
//! interleaving.
//!
//! The model follows what the host expects to see, not the microcode's
//! internals. Requests are fetched in chain order from `NEXTRDY_B`,
//! completed requests are appended behind `DONENEXT_B`, and every decision
//! the microcode leaves to the host is raised as a halt.

use std::{fmt, sync::Arc};

use tracing::{debug, trace};

use crate::device::{
    bus::{BusDeviceRef, Request, RequestSize, SingleThreadedBusDevice},
    constants::{qd, qhsta, sam, signature},
    host_memory::DmaSegment,
    interrupt_line::InterruptLine,
    sim_target::{ExecutedCommand, Outcome, SimTargets},
};

use super::{
    constants::{ascv, cc, ciw, csw, halt, iop, lram, qc, qcsg, qs, slot, stop, QLINK_END},
    lram::qaddr,
    queue::{ExtMsg, ReadyQueue, SgQueueHeader, CPY_LEN},
};

/// Message exchanges per request before the target gives up negotiating.
const MAX_MSG_ROUNDS: u8 = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Select,
    MsgOut,
    Command,
    Sense,
    Retry,
}

/// A request the RISC has fetched.
#[derive(Debug, Clone)]
struct Command {
    q_no: u8,
    tix: u8,
    cdb: Vec<u8>,
    tag_code: u8,
    data_in: bool,
    segments: Vec<DmaSegment>,
    sg_more: bool,
    sg_requested: bool,
    phase: Phase,
    outcome: Option<Outcome>,
    msg_rounds: u8,
    replied: bool,
    sense: bool,
}

impl Command {
    const fn tid(&self) -> u8 {
        self.tix & 7
    }

    fn total(&self) -> u32 {
        self.segments.iter().fold(0, |sum, s| sum.saturating_add(s.len))
    }
}

enum Step {
    Waiting,
    Posted,
    Halted,
}

/// A simulated narrow chip.
pub struct SimAscChip {
    lram: Vec<u8>,
    sig_word: u16,
    ctrl: u8,
    config_low: u16,
    pc: u16,
    ram_addr: u16,
    int_pending: bool,
    reset_latch: bool,
    stall_stop: bool,

    dma: BusDeviceRef,
    irq: Arc<dyn InterruptLine>,
    targets: SimTargets,
    in_flight: Vec<Command>,
    /// Targets that already sent their unsolicited message.
    spoke_up: u16,
}

impl fmt::Debug for SimAscChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimAscChip")
            .field("ctrl", &self.ctrl)
            .field("int_pending", &self.int_pending)
            .field("reset_latch", &self.reset_latch)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SimAscChip {
    /// A halted chip that reaches host memory through `dma` and signals
    /// completions on `irq`.
    #[must_use]
    pub fn new(dma: BusDeviceRef, irq: Arc<dyn InterruptLine>) -> Self {
        Self {
            lram: vec![0; usize::from(lram::SIZE)],
            sig_word: signature::ID_WORD,
            ctrl: cc::HALT,
            config_low: 0,
            pc: 0,
            ram_addr: 0,
            int_pending: false,
            reset_latch: false,
            stall_stop: false,
            dma,
            irq,
            targets: SimTargets::new(),
            in_flight: Vec::new(),
            spoke_up: 0,
        }
    }

    /// A chip without host memory, for register level tests.
    #[cfg(test)]
    pub(crate) fn bare() -> Self {
        use crate::device::{host_memory::HostMemory, interrupt_line::DummyInterruptLine};

        Self::new(
            Arc::new(HostMemory::anonymous(0x1000).unwrap()),
            Arc::new(DummyInterruptLine {}),
        )
    }

    /// The targets on the chip's bus.
    pub fn targets_mut(&mut self) -> &mut SimTargets {
        &mut self.targets
    }

    /// The targets on the chip's bus.
    #[must_use]
    pub const fn targets(&self) -> &SimTargets {
        &self.targets
    }

    /// Make the chip answer with another signature word.
    pub fn set_signature(&mut self, word: u16) {
        self.sig_word = word;
    }

    /// Ignore stop requests from the host.
    pub fn stall_stop_ack(&mut self, stall: bool) {
        self.stall_stop = stall;
    }

    /// Assert the interrupt without posting anything.
    pub fn raise_interrupt(&mut self) {
        self.int_pending = true;
        self.irq.interrupt();
    }

    /// Halt the RISC with `code` as if the microcode asked for help.
    pub fn inject_halt(&mut self, code: u16) {
        self.halt(code, 0);
    }

    /// Another initiator reset the SCSI bus. Everything in flight is lost.
    pub fn inject_bus_reset(&mut self) {
        debug!("sim: foreign SCSI bus reset");

        self.in_flight.clear();
        self.reset_latch = true;
        self.irq.interrupt();
    }

    /// The LRAM word at `addr`.
    #[must_use]
    pub fn read_lram_word(&self, addr: u16) -> u16 {
        let a = usize::from(addr & (lram::SIZE - 2));
        u16::from_le_bytes([self.lram[a], self.lram[a + 1]])
    }

    /// The LRAM byte at `addr`.
    #[must_use]
    pub fn lram_byte(&self, addr: u16) -> u8 {
        self.lram[usize::from(addr & (lram::SIZE - 1))]
    }

    fn lram_dword(&self, addr: u16) -> u32 {
        u32::from(self.read_lram_word(addr)) | (u32::from(self.read_lram_word(addr + 2)) << 16)
    }

    fn store_byte(&mut self, addr: u16, value: u8) {
        self.lram[usize::from(addr & (lram::SIZE - 1))] = value;
    }

    fn store_word(&mut self, addr: u16, value: u16) {
        let a = usize::from(addr & (lram::SIZE - 2));
        self.lram[a..a + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn store_dword(&mut self, addr: u16, value: u32) {
        self.store_word(addr, value as u16);
        self.store_word(addr + 2, (value >> 16) as u16);
    }

    fn fwd(&self, q_no: u8) -> u8 {
        self.lram_byte(qaddr(q_no) + slot::FWD)
    }

    fn status(&self) -> u16 {
        let mut csw = 0;

        if self.int_pending {
            csw |= csw::INT_PENDING;
        }
        if self.reset_latch {
            csw |= csw::SCSI_RESET_LATCH;
        }
        if self.ctrl & cc::HALT != 0 {
            csw |= csw::HALTED;
        }

        csw
    }

    fn data_write(&mut self, value: u16) {
        let addr = self.ram_addr;
        self.store_word(addr, value);
        self.ram_addr = addr.wrapping_add(2);

        if addr == ascv::STOP_CODE_B && value as u8 & stop::REQ_RISC_STOP != 0 && !self.stall_stop {
            trace!("sim: RISC stopped");
            self.store_byte(ascv::STOP_CODE_B, stop::ACK_RISC_STOP);
        }
    }

    fn set_control(&mut self, value: u8) {
        if value & cc::CHIP_RESET != 0 {
            self.in_flight.clear();
            self.int_pending = false;
        }

        if value & cc::SCSI_RESET != 0 && self.ctrl & cc::SCSI_RESET == 0 {
            self.scsi_bus_reset();
        }

        self.ctrl = value;
    }

    /// The RISC completes what it holds with reset status and latches the
    /// reset.
    fn scsi_bus_reset(&mut self) {
        let lost = std::mem::take(&mut self.in_flight);

        for cmd in &lost {
            self.post(cmd, qd::WITH_ERROR, qhsta::M_SCSI_BUS_RESET, 0, cmd.total(), 0);
        }

        self.reset_latch = true;
        self.irq.interrupt();
    }

    fn halt(&mut self, code: u16, q_no: u8) -> Step {
        trace!("sim: halt {code:#06x} on slot {q_no}");

        self.store_word(ascv::HALTCODE_W, code);
        self.store_byte(ascv::CURCDB_B, q_no);
        self.ctrl |= cc::HALT | cc::SINGLE_STEP;
        self.int_pending = true;
        self.irq.interrupt();

        Step::Halted
    }

    /// Let the RISC work until it waits for the host or the targets.
    /// Returns whether anything changed.
    pub fn run(&mut self) -> bool {
        if self.ctrl & (cc::HALT | cc::CHIP_RESET) != 0
            || self.lram_byte(ascv::STOP_CODE_B) != 0
        {
            return false;
        }

        let mut progress = self.fetch();
        let mut i = 0;

        while i < self.in_flight.len() {
            let mut cmd = self.in_flight.remove(i);
            let before = (cmd.phase, cmd.outcome, cmd.msg_rounds);

            match self.advance(&mut cmd) {
                Step::Posted => {
                    progress = true;
                    self.release_done(cmd.tid());
                }
                Step::Waiting => {
                    progress |= before != (cmd.phase, cmd.outcome, cmd.msg_rounds);
                    self.in_flight.insert(i, cmd);
                    i += 1;
                }
                Step::Halted => {
                    self.in_flight.insert(i, cmd);
                    return true;
                }
            }
        }

        progress
    }

    /// Fetch ready requests in chain order.
    fn fetch(&mut self) -> bool {
        let mut q = self.lram_byte(ascv::NEXTRDY_B);
        let mut fetched = false;

        while q != QLINK_END {
            let base = qaddr(q);
            let status = self.lram_byte(base + slot::STATUS);
            let cntl = self.lram_byte(base + slot::CNTL);

            if status & qs::READY == 0
                || status & qs::DONE != 0
                || cntl & qcsg::SG_XFER_LIST != 0
                || self.in_flight.iter().any(|c| c.q_no == q)
            {
                break;
            }

            let cmd = self.load(q);
            let mut last = q;
            for _ in 0..self.lram_byte(base + slot::SG_QUEUE_CNT) {
                last = self.fwd(last);
            }

            let active = lram::QADR_BEG + u16::from(cmd.tix);
            self.store_byte(active, self.lram_byte(active).wrapping_add(1));
            trace!("sim: fetched slot {q} for target {}", cmd.tid());

            self.in_flight.push(cmd);
            fetched = true;

            q = self.fwd(last);
            self.store_byte(ascv::NEXTRDY_B, q);
        }

        fetched
    }

    fn load(&self, q_no: u8) -> Command {
        let base = usize::from(qaddr(q_no));
        let mut image = [0u8; CPY_LEN];
        image.copy_from_slice(
            &self.lram[base + usize::from(slot::CPY_BEG)..base + usize::from(slot::CPY_END)],
        );
        let head = ReadyQueue::from_bytes(&image);

        let cdb_beg = base + usize::from(slot::CDB_BEG);
        let cdb = self.lram[cdb_beg..cdb_beg + usize::from(head.cdb_len.min(12))].to_vec();

        let mut segments = Vec::new();
        if head.data_cnt != 0 || head.cntl & qc::SG_HEAD != 0 {
            segments.push(DmaSegment::new(head.data_addr, head.data_cnt));
        }

        let mut sg_more = false;
        if head.cntl & qc::SG_HEAD != 0 {
            let (more_segments, more) = self.read_sg_queues(q_no, head.sg_queue_cnt);
            segments.extend(more_segments);
            sg_more = more;
        }

        Command {
            q_no,
            tix: head.target_ix,
            cdb,
            tag_code: head.tag_code,
            data_in: head.cntl & qc::DATA_IN != 0,
            segments,
            sg_more,
            sg_requested: false,
            phase: Phase::Select,
            outcome: None,
            msg_rounds: 0,
            replied: false,
            sense: false,
        }
    }

    /// Entries of the scatter-gather queues behind `head_q`, and whether
    /// the host holds more.
    fn read_sg_queues(&self, head_q: u8, queue_cnt: u8) -> (Vec<DmaSegment>, bool) {
        let mut segments = Vec::new();
        let mut q = head_q;

        for _ in 0..queue_cnt {
            q = self.fwd(q);
            let base = qaddr(q);

            let mut image = [0u8; 6];
            for (k, b) in image.iter_mut().enumerate() {
                *b = self.lram_byte(base + slot::SGHD_CPY_BEG + k as u16);
            }
            let header = SgQueueHeader::from_bytes(&image);

            for k in 0..=u16::from(header.sg_list_cnt) {
                let entry = base + slot::SGQ_LIST_BEG + k * 8;
                segments.push(DmaSegment::new(self.lram_dword(entry), self.lram_dword(entry + 4)));
            }

            if header.cntl & qcsg::SG_XFER_MORE != 0 {
                return (segments, true);
            }
            if header.cntl & qcsg::SG_XFER_END != 0 {
                break;
            }
        }

        (segments, false)
    }

    fn aborted(&self, cmd: &Command) -> bool {
        self.lram_byte(qaddr(cmd.q_no) + slot::STATUS) & qs::ABORTED != 0
    }

    fn advance(&mut self, cmd: &mut Command) -> Step {
        let tid = cmd.tid();
        let base = qaddr(cmd.q_no);

        loop {
            if self.aborted(cmd) {
                self.post(cmd, qd::ABORTED_BY_HOST, qhsta::NO_ERROR, 0, cmd.total(), 0);
                return Step::Posted;
            }

            match cmd.phase {
                Phase::Select => {
                    if self.targets.get(tid).is_none() {
                        self.post(cmd, qd::WITH_ERROR, qhsta::M_SEL_TIMEOUT, 0, cmd.total(), 0);
                        return Step::Posted;
                    }
                    cmd.phase = Phase::MsgOut;
                }

                Phase::MsgOut => {
                    let cntl = self.lram_byte(base + slot::CNTL);

                    if cntl & qc::MSG_OUT != 0 && cmd.msg_rounds < MAX_MSG_ROUNDS {
                        cmd.msg_rounds += 1;
                        if let Some(halted) = self.message_out(cmd) {
                            return halted;
                        }
                        continue;
                    }

                    if cntl & qc::MSG_OUT != 0 {
                        self.store_byte(base + slot::CNTL, cntl & !qc::MSG_OUT);
                    }

                    let unsolicited = self.targets.get(tid).and_then(|t| t.unsolicited_msg);
                    if let (Some(bytes), 0, false) = (unsolicited, cmd.msg_rounds, cmd.sense) {
                        if self.spoke_up & (1 << tid) == 0 {
                            self.spoke_up |= 1 << tid;
                            cmd.msg_rounds += 1;
                            self.message_in(ExtMsg::from_bytes(bytes));
                            return self.halt(halt::EXTMSG_IN, cmd.q_no);
                        }
                    }

                    cmd.phase = if cmd.sense { Phase::Sense } else { Phase::Command };
                }

                Phase::Command => {
                    if cmd.sg_requested {
                        let (more_segments, more) =
                            self.read_sg_queues(cmd.q_no, self.lram_byte(base + slot::SG_QUEUE_CNT));
                        cmd.segments.extend(more_segments);
                        cmd.sg_more = more;
                        cmd.sg_requested = false;
                    }

                    if cmd.sg_more {
                        cmd.sg_requested = true;
                        self.store_byte(ascv::REQ_SG_LIST_QP, cmd.q_no);
                        return self.halt(halt::HOST_COPY_SG_LIST_TO_RISC, cmd.q_no);
                    }

                    return self.execute(cmd);
                }

                Phase::Sense => {
                    if self.lram_byte(base + slot::CNTL) & qc::MSG_OUT != 0 {
                        cmd.msg_rounds = 0;
                        cmd.replied = false;
                        cmd.phase = Phase::MsgOut;
                        continue;
                    }

                    let sense = DmaSegment::new(
                        self.lram_dword(base + slot::SENSE_ADDR),
                        u32::from(self.lram_byte(base + slot::SENSE_LEN)),
                    );
                    let len = self.targets.write_sense(&self.dma, tid, sense);

                    self.post(cmd, qd::WITH_ERROR, qhsta::NO_ERROR, sam::CHECK_CONDITION, cmd.total(), len);
                    return Step::Posted;
                }

                Phase::Retry => {
                    if self.lram_byte(ascv::SCSIBUSY_B) & (1 << tid) != 0 {
                        return Step::Waiting;
                    }
                    cmd.phase = Phase::Command;
                }
            }
        }
    }

    /// Deliver the message-out buffer to the target. Returns the halt the
    /// target's answer caused, if any.
    fn message_out(&mut self, cmd: &mut Command) -> Option<Step> {
        let tid = cmd.tid();
        let base = qaddr(cmd.q_no);
        let target = self.targets.get(tid)?.clone();

        let mut bytes = [0u8; ExtMsg::LEN];
        for (k, b) in bytes.iter_mut().enumerate() {
            *b = self.lram_byte(ascv::MSGOUT_BEG + k as u16);
        }
        let out = ExtMsg::from_bytes(bytes);

        if out.is_sdtr() {
            let acceptable =
                out.xfer_period() >= target.min_period && out.req_ack_offset() <= target.max_offset;

            if target.rejects_sdtr || (cmd.replied && !acceptable) {
                return Some(self.halt(halt::SDTR_REJECTED, cmd.q_no));
            }

            if !cmd.replied {
                cmd.replied = true;
                self.message_in(ExtMsg::sdtr(
                    out.xfer_period().max(target.min_period),
                    out.req_ack_offset().min(target.max_offset),
                ));
                return Some(self.halt(halt::EXTMSG_IN, cmd.q_no));
            }
        }

        let cntl = self.lram_byte(base + slot::CNTL) & !qc::MSG_OUT;
        self.store_byte(base + slot::CNTL, cntl);
        None
    }

    fn message_in(&mut self, msg: ExtMsg) {
        for (k, &b) in msg.to_bytes().iter().enumerate() {
            self.store_byte(ascv::MSGIN_BEG + k as u16, b);
        }
    }

    /// Run the command phase against the target.
    fn execute(&mut self, cmd: &mut Command) -> Step {
        let tid = cmd.tid();
        let base = qaddr(cmd.q_no);

        let outcome = match cmd.outcome {
            Some(outcome) => outcome,
            None => {
                let outcome = self.targets.begin(tid, &cmd.cdb);
                self.targets.record(ExecutedCommand {
                    target: tid,
                    lun: cmd.tix >> 3,
                    cdb: cmd.cdb.clone(),
                    tag_code: cmd.tag_code,
                    segments: cmd.segments.clone(),
                });
                cmd.outcome = Some(outcome);
                outcome
            }
        };

        let total = cmd.total();

        match outcome {
            Outcome::Good | Outcome::Underrun(_) | Outcome::Hold => {
                if outcome == Outcome::Hold && !self.targets.is_released(tid) {
                    return Step::Waiting;
                }

                let underrun = match outcome {
                    Outcome::Underrun(n) => n,
                    _ => 0,
                };
                let moved = self.transfer(cmd, underrun);
                self.post(cmd, qd::NO_ERROR, qhsta::NO_ERROR, sam::GOOD, total - moved, 0);
            }
            Outcome::Overrun => {
                let moved = self.transfer(cmd, 0);
                self.post(cmd, qd::WITH_ERROR, qhsta::M_DATA_OVER_RUN, sam::GOOD, total - moved, 0);
            }
            Outcome::CheckCondition => {
                if self.lram_byte(base + slot::SENSE_LEN) != 0 {
                    self.store_byte(base + slot::SCSI_STAT, sam::CHECK_CONDITION);
                    cmd.sense = true;
                    cmd.phase = Phase::Sense;
                    return self.halt(halt::CHK_CONDITION, cmd.q_no);
                }
                self.post(cmd, qd::WITH_ERROR, qhsta::NO_ERROR, sam::CHECK_CONDITION, total, 0);
            }
            Outcome::QueueFull => {
                self.store_byte(base + slot::SCSI_STAT, sam::TASK_SET_FULL);
                cmd.outcome = None;
                cmd.phase = Phase::Retry;
                return self.halt(halt::SS_QUEUE_FULL, cmd.q_no);
            }
            Outcome::Busy => {
                self.post(cmd, qd::WITH_ERROR, qhsta::NO_ERROR, sam::BUSY, total, 0);
            }
            Outcome::SelectionTimeout => {
                self.post(cmd, qd::WITH_ERROR, qhsta::M_SEL_TIMEOUT, 0, total, 0);
            }
            Outcome::Hung => {
                self.post(cmd, qd::WITH_ERROR, qhsta::M_HUNG_REQ_SCSI_BUS_RESET, 0, total, 0);
            }
        }

        Step::Posted
    }

    fn transfer(&self, cmd: &Command, underrun: u32) -> u32 {
        self.targets
            .transfer(&self.dma, cmd.tid(), &cmd.cdb, cmd.data_in, &cmd.segments, underrun)
    }

    /// Forget a release once the target holds no more commands.
    fn release_done(&mut self, tid: u8) {
        let holding = self
            .in_flight
            .iter()
            .any(|c| c.tid() == tid && c.outcome == Some(Outcome::Hold));

        if !holding {
            self.targets.clear_release(tid);
        }
    }

    /// Write the completion into the head slot and append the request to
    /// the done list.
    fn post(&mut self, cmd: &Command, done: u8, host: u8, scsi: u8, remain: u32, sense_len: u8) {
        let base = qaddr(cmd.q_no);

        self.store_byte(base + slot::DONE_STAT, done);
        self.store_byte(base + slot::HOST_STAT, host);
        self.store_byte(base + slot::SCSI_STAT, scsi);
        self.store_byte(base + slot::SENSE_LEN, sense_len);
        self.store_dword(base + slot::REMAIN_XFER_CNT, remain);

        let status = self.lram_byte(base + slot::STATUS);
        self.store_byte(base + slot::STATUS, qs::DONE | (status & qs::ABORTED));

        let mut last = cmd.q_no;
        for _ in 0..self.lram_byte(base + slot::SG_QUEUE_CNT) {
            last = self.fwd(last);
        }
        self.store_byte(qaddr(last) + slot::FWD, QLINK_END);

        let done_next = self.lram_byte(ascv::DONENEXT_B);
        self.store_byte(qaddr(done_next) + slot::FWD, cmd.q_no);
        self.store_byte(ascv::DONENEXT_B, last);

        let active = lram::QADR_BEG + u16::from(cmd.tix);
        self.store_byte(active, self.lram_byte(active).saturating_sub(1));

        trace!("sim: slot {} done {done:#04x}/{host:#04x}/{scsi:#04x}", cmd.q_no);

        self.int_pending = true;
        self.irq.interrupt();
    }
}

impl SingleThreadedBusDevice for SimAscChip {
    fn size(&self) -> u64 {
        iop::WINDOW
    }

    fn read(&mut self, req: Request) -> u64 {
        match (req.addr, req.size) {
            (iop::SIG_WORD, RequestSize::Size2) => self.sig_word.into(),
            (iop::SIG_BYTE, RequestSize::Size1) => signature::ID_BYTE.into(),
            (iop::CONFIG_LOW, RequestSize::Size2) => self.config_low.into(),
            (iop::RAM_DATA, RequestSize::Size2) => {
                let value = self.read_lram_word(self.ram_addr);
                self.ram_addr = self.ram_addr.wrapping_add(2);
                value.into()
            }
            (iop::RAM_ADDR, RequestSize::Size2) => self.ram_addr.into(),
            (iop::REG_PC, RequestSize::Size2) => self.pc.into(),
            (iop::STATUS, RequestSize::Size2) => self.status().into(),
            (iop::CTRL, RequestSize::Size1) => self.ctrl.into(),
            _ => {
                debug!("sim: unhandled read {req}");
                0
            }
        }
    }

    fn write(&mut self, req: Request, value: u64) {
        match (req.addr, req.size) {
            (iop::CONFIG_LOW, RequestSize::Size2) => self.config_low = value as u16,
            (iop::RAM_DATA, RequestSize::Size2) => self.data_write(value as u16),
            (iop::RAM_ADDR, RequestSize::Size2) => self.ram_addr = value as u16,
            (iop::REG_PC, RequestSize::Size2) => self.pc = value as u16,
            (iop::STATUS, RequestSize::Size2) => {
                let ciw = value as u16;

                if ciw & ciw::INT_ACK != 0 {
                    self.int_pending = false;
                }
                if ciw & ciw::CLR_SCSI_RESET_INT != 0 {
                    self.reset_latch = false;
                }
            }
            (iop::CTRL, RequestSize::Size1) => self.set_control(value as u8),
            _ => debug!("sim: unhandled write {req} <- {value:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_reg(chip: &mut SimAscChip, addr: u64, size: RequestSize, value: u64) {
        chip.write(Request::new(addr, size), value);
    }

    #[test]
    fn status_follows_halt_and_reset_latch() {
        let mut chip = SimAscChip::bare();
        assert_eq!(chip.status(), csw::HALTED);

        write_reg(&mut chip, iop::CTRL, RequestSize::Size1, 0);
        assert_eq!(chip.status(), 0);

        write_reg(&mut chip, iop::CTRL, RequestSize::Size1, u64::from(cc::SCSI_RESET));
        assert_ne!(chip.status() & csw::SCSI_RESET_LATCH, 0);

        write_reg(&mut chip, iop::STATUS, RequestSize::Size2, u64::from(ciw::CLR_SCSI_RESET_INT));
        assert_eq!(chip.status() & csw::SCSI_RESET_LATCH, 0);
    }

    #[test]
    fn stop_requests_are_acknowledged_unless_stalled() {
        let mut chip = SimAscChip::bare();

        write_reg(&mut chip, iop::RAM_ADDR, RequestSize::Size2, u64::from(ascv::STOP_CODE_B));
        write_reg(&mut chip, iop::RAM_DATA, RequestSize::Size2, u64::from(stop::REQ_RISC_STOP));
        assert_eq!(chip.lram_byte(ascv::STOP_CODE_B), stop::ACK_RISC_STOP);

        chip.stall_stop_ack(true);
        write_reg(&mut chip, iop::RAM_ADDR, RequestSize::Size2, u64::from(ascv::STOP_CODE_B));
        write_reg(&mut chip, iop::RAM_DATA, RequestSize::Size2, u64::from(stop::REQ_RISC_STOP));
        assert_eq!(chip.lram_byte(ascv::STOP_CODE_B), stop::REQ_RISC_STOP);
    }

    #[test]
    fn halted_or_stopped_risc_does_nothing() {
        let mut chip = SimAscChip::bare();
        assert!(!chip.run());

        write_reg(&mut chip, iop::CTRL, RequestSize::Size1, 0);
        chip.store_byte(ascv::STOP_CODE_B, stop::REQ_RISC_STOP);
        assert!(!chip.run());
    }

    #[test]
    fn injected_halt_single_steps_the_risc() {
        let mut chip = SimAscChip::bare();
        write_reg(&mut chip, iop::CTRL, RequestSize::Size1, 0);

        chip.inject_halt(halt::CHK_CONDITION);

        assert_eq!(chip.read_lram_word(ascv::HALTCODE_W), halt::CHK_CONDITION);
        assert_eq!(chip.ctrl & (cc::HALT | cc::SINGLE_STEP), cc::HALT | cc::SINGLE_STEP);
        assert_ne!(chip.status() & csw::INT_PENDING, 0);
    }
}
