//! # Wide RISC Simulator
//!
//! A register level model of the three wide chips. LRAM is only used for
//! the microcode variables; requests are fetched from the ICQ in host
//! memory and handed back on the IRQ exactly as the host's carrier code
//! expects. Like the narrow model, the RISC only makes progress in
//! [`SimAdvChip::run`], while idle commands are executed as soon as the
//! host tickles them.

use std::{fmt, sync::Arc};

use tracing::{debug, trace};

use crate::device::{
    bus::{BusDeviceRef, Request, RequestSize, SingleThreadedBusDevice},
    config::WideChip,
    constants::{qd, qhsta, sam, signature, tag},
    host_memory::DmaSegment,
    interrupt_line::InterruptLine,
    negotiation::tid_bit,
    sim_target::{ExecutedCommand, Outcome, SimTargets},
};

use super::{
    carrier::Carrier,
    constants::{
        async_code,
        bist,
        carr::{CQ_STOPPER, RQ_DONE, RQ_GOOD},
        ctrl, idle, intr_enable, intr_status, iop, mc, qc, req, risc_csr, tickle, MAX_SG_LIST,
    },
    engine::memsize,
    request::AdvScsiReqQ,
    sg::{blocks_required, SgBlock},
};

/// Which RAM BIST stage reports a defect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BistFault {
    /// The pre-test.
    PreTest,
    /// The RAM test.
    RamTest,
}

/// A request the RISC took off the ICQ.
#[derive(Debug, Clone)]
struct AdvCommand {
    carrier_pa: u32,
    areq: u32,
    tid: u8,
    lun: u8,
    cdb: Vec<u8>,
    tag_code: u8,
    data_in: bool,
    segments: Vec<DmaSegment>,
    sense: Option<DmaSegment>,
    outcome: Option<Outcome>,
}

impl AdvCommand {
    fn total(&self) -> u32 {
        self.segments.iter().fold(0, |sum, s| sum.saturating_add(s.len))
    }
}

/// How a completion is reported.
#[derive(Debug, Copy, Clone, Default)]
struct Report {
    done: u8,
    host: u8,
    scsi: u8,
    residual: u32,
    sense_len: u8,
}

/// A simulated wide chip.
pub struct SimAdvChip {
    chip: WideChip,
    lram: Vec<u8>,
    sig_word: u16,
    intr_status: u8,
    intr_enables: u8,
    ctrl: u16,
    ram_addr: u16,
    last_tickle: u8,
    running: bool,
    pc: u16,
    scsi_cfg1: u16,
    comma: u32,
    bist_mode: u8,
    bist_fault: Option<BistFault>,
    stall_idle: bool,

    /// The ICQ carrier the RISC looks at next.
    icq: u32,
    /// The IRQ stopper.
    irq: u32,
    tickled: bool,

    dma: BusDeviceRef,
    irq_line: Arc<dyn InterruptLine>,
    targets: SimTargets,
    in_flight: Vec<AdvCommand>,
}

impl fmt::Debug for SimAdvChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimAdvChip")
            .field("chip", &self.chip)
            .field("running", &self.running)
            .field("intr_status", &self.intr_status)
            .field("icq", &self.icq)
            .field("irq", &self.irq)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SimAdvChip {
    /// A stopped chip of revision `chip` that reaches host memory through
    /// `dma` and signals interrupts on `irq`.
    #[must_use]
    pub fn new(chip: WideChip, dma: BusDeviceRef, irq: Arc<dyn InterruptLine>) -> Self {
        Self {
            chip,
            lram: vec![0; memsize(chip) as usize],
            sig_word: signature::ID_WORD,
            intr_status: 0,
            intr_enables: 0,
            ctrl: 0,
            ram_addr: 0,
            last_tickle: tickle::NOP,
            running: false,
            pc: 0,
            scsi_cfg1: 0,
            comma: 0,
            bist_mode: bist::NORMAL_MODE,
            bist_fault: None,
            stall_idle: false,
            icq: 0,
            irq: 0,
            tickled: false,
            dma,
            irq_line: irq,
            targets: SimTargets::new(),
            in_flight: Vec::new(),
        }
    }

    /// A chip without host memory, for register level tests.
    #[cfg(test)]
    pub(crate) fn bare(chip: WideChip) -> Self {
        use crate::device::{host_memory::HostMemory, interrupt_line::DummyInterruptLine};

        Self::new(
            chip,
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

    /// Make a RAM BIST stage fail, or pass again with `None`.
    pub fn fail_bist(&mut self, fault: Option<BistFault>) {
        self.bist_fault = fault;
    }

    /// Leave idle commands unanswered.
    pub fn stall_idle(&mut self, stall: bool) {
        self.stall_idle = stall;
    }

    /// The last value written to the COMMA register.
    #[must_use]
    pub const fn comma(&self) -> u32 {
        self.comma
    }

    /// The tickle register.
    #[must_use]
    pub const fn last_tickle(&self) -> u8 {
        self.last_tickle
    }

    /// The SCSI configuration 1 register.
    #[must_use]
    pub const fn scsi_cfg1(&self) -> u16 {
        self.scsi_cfg1
    }

    /// The LRAM word at `addr`.
    #[must_use]
    pub fn read_lram_word(&self, addr: u16) -> u16 {
        let a = self.lram_index(addr) & !1;
        u16::from_le_bytes([self.lram[a], self.lram[a + 1]])
    }

    /// The LRAM byte at `addr`.
    #[must_use]
    pub fn read_lram_byte(&self, addr: u16) -> u8 {
        self.lram[self.lram_index(addr)]
    }

    /// The LRAM dword at `addr`.
    #[must_use]
    pub fn read_lram_dword(&self, addr: u16) -> u32 {
        u32::from(self.read_lram_word(addr)) | (u32::from(self.read_lram_word(addr + 2)) << 16)
    }

    /// Overwrite the LRAM word at `addr`, as the microcode would.
    pub fn write_lram_word(&mut self, addr: u16, value: u16) {
        let a = self.lram_index(addr) & !1;
        self.lram[a..a + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn lram_index(&self, addr: u16) -> usize {
        usize::from(addr) & (self.lram.len() - 1)
    }

    fn raise(&mut self, bits: u8) {
        self.intr_status |= bits;

        if self.intr_enables & intr_enable::GLOBAL_INTR != 0 {
            self.irq_line.interrupt();
        }
    }

    fn async_condition(&mut self, code: u8, extra: u8) {
        let a = self.lram_index(mc::INTRB_CODE);
        self.lram[a] = code;
        self.raise(intr_status::INTRB | extra);
    }

    /// Another initiator reset the SCSI bus. The RISC gives back
    /// everything it holds and reports the reset.
    pub fn inject_bus_reset(&mut self) {
        debug!("sim: foreign SCSI bus reset");

        for cmd in std::mem::take(&mut self.in_flight) {
            let report = Report {
                done: qd::WITH_ERROR,
                host: qhsta::M_SCSI_BUS_RESET_UNSOL,
                residual: cmd.total(),
                ..Report::default()
            };
            self.post(&cmd, report);
        }

        self.async_condition(async_code::SCSI_BUS_RESET_DET, intr_status::INTRA);
    }

    /// A DMA read of the RISC failed.
    pub fn inject_rdma_failure(&mut self) {
        self.async_condition(async_code::RDMA_FAILURE, 0);
    }

    /// The RISC found the ICQ stopper not ready and stopped looking. Only
    /// the 38C1600 keeps watching COMMA.
    pub fn inject_carrier_ready_failure(&mut self) {
        if self.chip != WideChip::Asc38C1600 {
            self.tickled = false;
        }

        self.async_condition(async_code::CARRIER_READY_FAILURE, 0);
    }

    fn bist_result(&self) -> u8 {
        match (self.bist_mode, self.bist_fault) {
            (bist::PRE_TEST_MODE, Some(BistFault::PreTest)) => 0x0A,
            (bist::PRE_TEST_MODE, _) => bist::PRE_TEST_VALUE,
            (bist::RAM_TEST_MODE, Some(BistFault::RamTest)) => bist::RAM_TEST_DONE | 0x03,
            (bist::RAM_TEST_MODE, _) => bist::RAM_TEST_DONE,
            _ => bist::NORMAL_VALUE,
        }
    }

    fn set_ctrl(&mut self, value: u16) {
        if value == ctrl::CMD_RESET {
            trace!("sim: chip reset");

            self.running = false;
            self.in_flight.clear();
            self.intr_status = 0;
            self.tickled = false;
            self.last_tickle = tickle::NOP;
        }

        self.ctrl = value;
    }

    fn set_risc_csr(&mut self, value: u16) {
        let run = value & risc_csr::RUN != 0;

        if run && !self.running {
            self.icq = self.read_lram_dword(mc::ICQ);
            self.irq = self.read_lram_dword(mc::IRQ);
            trace!("sim: RISC started, ICQ {:#x}, IRQ {:#x}", self.icq, self.irq);
        }

        self.running = run;
    }

    fn tickle(&mut self, value: u8) {
        // The 3550 only sees changes of the register.
        if self.chip == WideChip::Asc3550 && value == self.last_tickle {
            trace!("sim: tickle {value:#04x} lost");
            return;
        }

        self.last_tickle = value;

        match value {
            tickle::A => self.tickled = true,
            tickle::B => self.idle_command(),
            _ => {}
        }
    }

    /// Run the idle command the host left in LRAM.
    fn idle_command(&mut self) {
        if !self.running || self.stall_idle {
            return;
        }

        let cmd = self.read_lram_word(mc::IDLE_CMD);
        let param = self.read_lram_dword(mc::IDLE_CMD_PARAMETER);

        // Requests still on the ICQ can be aborted and reset too.
        self.fetch();

        let status = match cmd {
            idle::ABORT => match self.in_flight.iter().position(|c| c.areq == param) {
                Some(i) => {
                    let cmd = self.in_flight.remove(i);
                    let report = Report {
                        done: qd::ABORTED_BY_HOST,
                        residual: cmd.total(),
                        ..Report::default()
                    };
                    self.post(&cmd, report);
                    self.release_done(cmd.tid);
                    idle::STATUS_SUCCESS
                }
                None => idle::STATUS_FAILURE,
            },
            idle::DEVICE_RESET => {
                let tid = param as u8;
                self.purge(|c| c.tid == tid, qhsta::M_BUS_DEVICE_RESET);
                self.targets.clear_release(tid);
                idle::STATUS_SUCCESS
            }
            idle::SCSI_RESET_START => idle::STATUS_SUCCESS,
            idle::SCSI_RESET_END => {
                self.purge(|_| true, qhsta::M_SCSI_BUS_RESET);
                self.async_condition(async_code::HOST_SCSI_BUS_RESET, 0);
                idle::STATUS_SUCCESS
            }
            idle::SEND_INT => {
                self.raise(intr_status::INTRC);
                idle::STATUS_SUCCESS
            }
            idle::STOP_CHIP | idle::STOP_CHIP_SEND_INT => {
                self.running = false;
                if cmd == idle::STOP_CHIP_SEND_INT {
                    self.raise(intr_status::INTRC);
                }
                idle::STATUS_SUCCESS
            }
            other => {
                debug!("sim: unsupported idle command {other:#06x}");
                idle::STATUS_FAILURE
            }
        };

        self.write_lram_word(mc::IDLE_CMD_STATUS, status);
        self.write_lram_word(mc::IDLE_CMD, idle::COMPLETED);
    }

    /// Give back every command matching `filter` with `host` status.
    fn purge(&mut self, filter: impl Fn(&AdvCommand) -> bool, host: u8) {
        let (lost, kept) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition::<Vec<_>, _>(|c| filter(c));
        self.in_flight = kept;

        for cmd in &lost {
            let report = Report {
                done: qd::WITH_ERROR,
                host,
                residual: cmd.total(),
                ..Report::default()
            };
            self.post(cmd, report);
        }
    }

    /// Let the RISC work until it waits for the host or the targets.
    /// Returns whether anything changed.
    pub fn run(&mut self) -> bool {
        if !self.running {
            return false;
        }

        let mut progress = false;

        if self.tickled {
            self.tickled = false;
            progress |= self.fetch();
        }

        let mut i = 0;
        while i < self.in_flight.len() {
            let mut cmd = self.in_flight.remove(i);
            let started = cmd.outcome.is_some();

            if self.execute(&mut cmd) {
                progress = true;
                self.release_done(cmd.tid);
            } else {
                progress |= !started;
                self.in_flight.insert(i, cmd);
                i += 1;
            }
        }

        progress
    }

    /// Take every request off the ICQ up to the stopper.
    fn fetch(&mut self) -> bool {
        let mut fetched = false;

        for _ in 0..0x1_0000 {
            let carrier = Carrier::read(&self.dma, self.icq);
            if carrier.is_stopper() {
                break;
            }

            let cmd = self.load(self.icq, carrier.areq_vpa);
            trace!("sim: fetched request {:#x} on carrier {:#x}", cmd.areq, cmd.carrier_pa);

            self.in_flight.push(cmd);
            self.icq = carrier.next_pa();
            fetched = true;
        }

        fetched
    }

    fn load(&self, carrier_pa: u32, areq: u32) -> AdvCommand {
        let record = AdvScsiReqQ::read(&self.dma, areq);
        let tid = record.target_id;

        let segments = if record.sg_real_addr != 0 {
            SgBlock::read_chain(&self.dma, record.sg_real_addr, blocks_required(MAX_SG_LIST))
        } else if record.data_cnt != 0 {
            vec![DmaSegment::new(record.data_addr, record.data_cnt)]
        } else {
            Vec::new()
        };

        AdvCommand {
            carrier_pa,
            areq,
            tid,
            lun: record.target_lun,
            cdb: record.cdb().to_vec(),
            tag_code: if self.read_lram_word(mc::TAGQNG_ABLE) & tid_bit(tid & 0x0F) != 0 {
                tag::SIMPLE
            } else {
                0
            },
            data_in: record.cntl & qc::DATA_CHECK != 0 && record.cntl & qc::DATA_OUT == 0,
            segments,
            sense: (record.sense_len != 0)
                .then(|| DmaSegment::new(record.sense_addr, u32::from(record.sense_len))),
            outcome: None,
        }
    }

    /// Run `cmd` against its target. Returns whether it was posted.
    fn execute(&mut self, cmd: &mut AdvCommand) -> bool {
        let tid = cmd.tid;

        let outcome = match cmd.outcome {
            Some(outcome) => outcome,
            None => {
                let outcome = self.targets.begin(tid, &cmd.cdb);
                self.targets.record(ExecutedCommand {
                    target: tid,
                    lun: cmd.lun,
                    cdb: cmd.cdb.clone(),
                    tag_code: cmd.tag_code,
                    segments: cmd.segments.clone(),
                });
                cmd.outcome = Some(outcome);
                outcome
            }
        };

        let total = cmd.total();
        let error = |host: u8, scsi: u8| Report {
            done: qd::WITH_ERROR,
            host,
            scsi,
            residual: total,
            sense_len: 0,
        };

        let report = match outcome {
            Outcome::Good | Outcome::Underrun(_) | Outcome::Hold => {
                if outcome == Outcome::Hold && !self.targets.is_released(tid) {
                    return false;
                }

                let underrun = match outcome {
                    Outcome::Underrun(n) => n,
                    _ => 0,
                };
                let moved = self.transfer(cmd, underrun);

                Report {
                    done: qd::NO_ERROR,
                    residual: total - moved,
                    ..Report::default()
                }
            }
            Outcome::Overrun => {
                let moved = self.transfer(cmd, 0);
                Report {
                    residual: total - moved,
                    ..error(qhsta::M_DATA_OVER_RUN, sam::GOOD)
                }
            }
            Outcome::CheckCondition => {
                let sense_len = cmd
                    .sense
                    .map_or(0, |seg| self.targets.write_sense(&self.dma, tid, seg));
                Report {
                    sense_len,
                    ..error(qhsta::NO_ERROR, sam::CHECK_CONDITION)
                }
            }
            Outcome::QueueFull => error(qhsta::NO_ERROR, sam::TASK_SET_FULL),
            Outcome::Busy => error(qhsta::NO_ERROR, sam::BUSY),
            Outcome::SelectionTimeout => error(qhsta::M_SEL_TIMEOUT, 0),
            Outcome::Hung => error(qhsta::M_HUNG_REQ_SCSI_BUS_RESET, 0),
        };

        self.post(cmd, report);
        true
    }

    fn transfer(&self, cmd: &AdvCommand, underrun: u32) -> u32 {
        self.targets
            .transfer(&self.dma, cmd.tid, &cmd.cdb, cmd.data_in, &cmd.segments, underrun)
    }

    /// Forget a release once the target holds no more commands.
    fn release_done(&mut self, tid: u8) {
        let holding = self
            .in_flight
            .iter()
            .any(|c| c.tid == tid && c.outcome == Some(Outcome::Hold));

        if !holding {
            self.targets.clear_release(tid);
        }
    }

    /// Hand `cmd` back on the IRQ. The carrier it came on becomes the new
    /// IRQ stopper.
    fn post(&mut self, cmd: &AdvCommand, report: Report) {
        let good = report.done == qd::NO_ERROR && report.residual == 0;

        if !good {
            let base = u64::from(cmd.areq);
            let byte = |at: usize| Request::new(base + at as u64, RequestSize::Size1);

            self.dma.write(byte(req::DONE_STATUS), report.done.into());
            self.dma.write(byte(req::HOST_STATUS), report.host.into());
            self.dma.write(byte(req::SCSI_STATUS), report.scsi.into());
            self.dma.write(byte(req::SENSE_LEN), report.sense_len.into());
            self.dma.write(
                Request::new(base + req::DATA_CNT as u64, RequestSize::Size4),
                report.residual.into(),
            );
        }

        Carrier {
            next_vpa: CQ_STOPPER,
            ..Carrier::read(&self.dma, cmd.carrier_pa)
        }
        .write(&self.dma);

        let stopper = Carrier::read(&self.dma, self.irq);
        Carrier {
            areq_vpa: cmd.areq,
            next_vpa: cmd.carrier_pa | RQ_DONE | if good { RQ_GOOD } else { 0 },
            ..stopper
        }
        .write(&self.dma);

        self.irq = cmd.carrier_pa;

        trace!(
            "sim: request {:#x} done {:#04x}/{:#04x}/{:#04x}",
            cmd.areq,
            report.done,
            report.host,
            report.scsi
        );

        self.raise(intr_status::INTRA);
    }
}

impl SingleThreadedBusDevice for SimAdvChip {
    fn size(&self) -> u64 {
        iop::WINDOW
    }

    fn read(&mut self, req: Request) -> u64 {
        match (req.addr, req.size) {
            (iop::INTR_STATUS, RequestSize::Size1) => std::mem::take(&mut self.intr_status).into(),
            (iop::CHIP_ID_0, RequestSize::Size2) => self.sig_word.into(),
            (iop::CHIP_ID_1, RequestSize::Size1) => signature::ID_BYTE.into(),
            (iop::CTRL_REG, RequestSize::Size2) => self.ctrl.into(),
            (iop::INTR_ENABLES, RequestSize::Size1) => self.intr_enables.into(),
            (iop::RAM_ADDR, RequestSize::Size2) => self.ram_addr.into(),
            (iop::RAM_DATA, RequestSize::Size2) => {
                let value = self.read_lram_word(self.ram_addr);
                self.ram_addr = self.ram_addr.wrapping_add(2);
                value.into()
            }
            (iop::TICKLE, RequestSize::Size1) => self.last_tickle.into(),
            (iop::RISC_CSR, RequestSize::Size2) => {
                if self.running {
                    risc_csr::RUN.into()
                } else {
                    risc_csr::STOP.into()
                }
            }
            (iop::SCSI_CFG1, RequestSize::Size2) => self.scsi_cfg1.into(),
            (iop::COMMA, RequestSize::Size4) => self.comma.into(),
            (iop::RAM_BIST, RequestSize::Size1) => self.bist_result().into(),
            (iop::PC, RequestSize::Size2) => self.pc.into(),
            _ => {
                debug!("sim: unhandled read {req}");
                0
            }
        }
    }

    fn write(&mut self, req: Request, value: u64) {
        match (req.addr, req.size) {
            (iop::CTRL_REG, RequestSize::Size2) => self.set_ctrl(value as u16),
            (iop::INTR_ENABLES, RequestSize::Size1) => self.intr_enables = value as u8,
            (iop::RAM_ADDR, RequestSize::Size2) => self.ram_addr = value as u16,
            (iop::RAM_DATA, RequestSize::Size2) => {
                let addr = self.ram_addr;
                self.write_lram_word(addr, value as u16);
                self.ram_addr = addr.wrapping_add(2);
            }
            (iop::TICKLE, RequestSize::Size1) => self.tickle(value as u8),
            (iop::RISC_CSR, RequestSize::Size2) => self.set_risc_csr(value as u16),
            (iop::SCSI_CFG1, RequestSize::Size2) => self.scsi_cfg1 = value as u16,
            (iop::COMMA, RequestSize::Size4) => {
                self.comma = value as u32;
                self.tickled = true;
            }
            (iop::RAM_BIST, RequestSize::Size1) => self.bist_mode = value as u8,
            (iop::PC, RequestSize::Size2) => self.pc = value as u16,
            _ => debug!("sim: unhandled write {req} <- {value:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_reg(chip: &mut SimAdvChip, addr: u64, size: RequestSize, value: u64) {
        chip.write(Request::new(addr, size), value);
    }

    fn read_reg(chip: &mut SimAdvChip, addr: u64, size: RequestSize) -> u64 {
        chip.read(Request::new(addr, size))
    }

    #[test]
    fn interrupt_status_clears_on_read() {
        let mut chip = SimAdvChip::bare(WideChip::Asc38C0800);

        chip.inject_rdma_failure();
        assert_eq!(
            read_reg(&mut chip, iop::INTR_STATUS, RequestSize::Size1),
            u64::from(intr_status::INTRB)
        );
        assert_eq!(read_reg(&mut chip, iop::INTR_STATUS, RequestSize::Size1), 0);
        assert_eq!(chip.read_lram_byte(mc::INTRB_CODE), async_code::RDMA_FAILURE);
    }

    #[test]
    fn bist_stages_report_faults() {
        let mut chip = SimAdvChip::bare(WideChip::Asc38C1600);

        write_reg(&mut chip, iop::RAM_BIST, RequestSize::Size1, bist::PRE_TEST_MODE.into());
        assert_eq!(
            read_reg(&mut chip, iop::RAM_BIST, RequestSize::Size1),
            u64::from(bist::PRE_TEST_VALUE)
        );

        chip.fail_bist(Some(BistFault::RamTest));
        write_reg(&mut chip, iop::RAM_BIST, RequestSize::Size1, bist::RAM_TEST_MODE.into());
        assert_eq!(
            read_reg(&mut chip, iop::RAM_BIST, RequestSize::Size1) as u8 & bist::RESULT_MASK,
            0x03
        );
    }

    #[test]
    fn the_3550_drops_repeated_tickles() {
        let mut chip = SimAdvChip::bare(WideChip::Asc3550);
        chip.running = true;

        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::A.into());
        assert!(chip.tickled);
        chip.tickled = false;

        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::A.into());
        assert!(!chip.tickled);

        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::NOP.into());
        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::A.into());
        assert!(chip.tickled);
    }

    #[test]
    fn idle_commands_need_a_running_risc() {
        let mut chip = SimAdvChip::bare(WideChip::Asc38C0800);
        chip.write_lram_word(mc::IDLE_CMD, idle::SCSI_RESET_START);

        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::B.into());
        assert_eq!(chip.read_lram_word(mc::IDLE_CMD), idle::SCSI_RESET_START);

        chip.running = true;
        write_reg(&mut chip, iop::TICKLE, RequestSize::Size1, tickle::B.into());
        assert_eq!(chip.read_lram_word(mc::IDLE_CMD), idle::COMPLETED);
        assert_eq!(chip.read_lram_word(mc::IDLE_CMD_STATUS), idle::STATUS_SUCCESS);
    }

    #[test]
    fn chip_reset_stops_the_risc() {
        let mut chip = SimAdvChip::bare(WideChip::Asc38C0800);

        write_reg(&mut chip, iop::RISC_CSR, RequestSize::Size2, risc_csr::RUN.into());
        assert_eq!(
            read_reg(&mut chip, iop::RISC_CSR, RequestSize::Size2),
            u64::from(risc_csr::RUN)
        );

        write_reg(&mut chip, iop::CTRL_REG, RequestSize::Size2, ctrl::CMD_RESET.into());
        assert_eq!(read_reg(&mut chip, iop::RISC_CSR, RequestSize::Size2), 0);
        assert!(!chip.run());
    }
}
