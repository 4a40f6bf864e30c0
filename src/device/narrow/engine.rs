//! # Narrow Engine
//!
//! The host half of the narrow chips' queue protocol. Requests live in LRAM
//! queue slots; this module owns the bookkeeping the RISC does not: per
//! target and total queue counts, the mapping from slot handles back to
//! the caller's requests and the negotiation state.
//!
//! The operations are split over the sibling modules `exec` (submission),
//! `isr` (interrupt and done list), `halt` (RISC halt handling) and
//! `reset` (abort and resets).

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::device::{
    adapter::{
        AbortStatus, AdapterEngine, AdapterEvent, AdapterStats, ChipFamily, EventQueue,
        ResetStatus, SubmitStatus,
    },
    bus::BusDeviceRef,
    config::AdapterConfig,
    constants::signature,
    delay::Delay,
    error::{InitError, LibErrorCode},
    firmware::Microcode,
    host_memory::{DmaAllocator, DmaSegment},
    negotiation::NegotiationState,
    scsi::{Completion, CompletionStatus, RequestId, ScsiRequest},
};

use super::{
    constants::{ascv, cc, cfg0, ciw, csw, lram, slot, OVERRUN_BSIZE, QLINK_END, ASYN_SDTR_DATA},
    lram::{qaddr, AscPort},
    sdtr::SdtrTable,
};

/// Host side state of an accepted request.
#[derive(Debug)]
pub(super) struct Pending {
    pub(super) request: ScsiRequest,
    /// First scatter-gather entry not yet copied into LRAM.
    pub(super) next_sg_index: usize,
    /// Entries still to be copied.
    pub(super) remain_sg: usize,
}

/// Queueing and completion engine of one narrow adapter.
#[derive(Debug)]
pub struct NarrowEngine {
    pub(super) port: AscPort,
    pub(super) dma: BusDeviceRef,
    pub(super) delay: Arc<dyn Delay>,
    pub(super) config: AdapterConfig,
    pub(super) microcode: Microcode,
    pub(super) overrun: DmaSegment,
    pub(super) sdtr: SdtrTable,

    pub(super) max_total_qng: u8,
    pub(super) cur_total_qng: u8,
    pub(super) last_q_shortage: u8,
    pub(super) cur_dvc_qng: [u8; 8],
    pub(super) max_dvc_qng: [u8; 8],
    pub(super) req_count: [u32; 8],
    pub(super) unit_not_ready: u8,
    pub(super) queue_full_or_busy: u8,
    pub(super) negotiation: NegotiationState,

    pub(super) pending: HashMap<u32, Pending>,
    pub(super) handles: HashMap<RequestId, u32>,
    pub(super) next_handle: u32,

    pub(super) events: EventQueue,
    pub(super) stats: AdapterStats,
    pub(super) last_error: Option<LibErrorCode>,
    pub(super) offline: bool,
}

impl NarrowEngine {
    /// Bring up the chip behind `io`.
    ///
    /// The overrun buffer the RISC spills excess data into is taken from
    /// `allocator`. On error the chip is left halted.
    pub fn new(
        io: BusDeviceRef,
        dma: BusDeviceRef,
        allocator: &mut DmaAllocator,
        delay: Arc<dyn Delay>,
        config: AdapterConfig,
        microcode: Microcode,
    ) -> Result<Self, InitError> {
        config.validate(ChipFamily::Narrow)?;

        let overrun = allocator.alloc(OVERRUN_BSIZE, 8)?;
        let mut negotiation =
            NegotiationState::new(config.sdtr_enable & 0xFF, 0, config.tagqng_enable & 0xFF, false);
        negotiation.sdtr_able = negotiation.sdtr_enable;

        let mut engine = Self {
            port: AscPort::new(io),
            dma,
            delay,
            sdtr: SdtrTable::for_chip(config.ultra),
            max_total_qng: config.max_host_qng,
            cur_total_qng: 0,
            last_q_shortage: 0,
            cur_dvc_qng: [0; 8],
            max_dvc_qng: [config.max_dvc_qng; 8],
            req_count: [0; 8],
            unit_not_ready: 0,
            queue_full_or_busy: 0,
            negotiation,
            pending: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
            events: EventQueue::default(),
            stats: AdapterStats::default(),
            last_error: None,
            offline: false,
            config,
            microcode,
            overrun,
        };

        let reset_bus = engine.config.reset_bus_on_init;
        engine.init_chip(reset_bus)?;

        info!(
            "narrow adapter online: {} queues, SCSI id {}",
            engine.max_total_qng, engine.config.chip_scsi_id
        );

        Ok(engine)
    }

    /// Run the chip initialization from the signature check to starting
    /// the RISC.
    pub(super) fn init_chip(&mut self, reset_bus: bool) -> Result<(), InitError> {
        let (byte, word) = (self.port.sig_byte(), self.port.sig_word());

        if byte != signature::ID_BYTE
            || (word != signature::ID_WORD && word != signature::ID_WORD_FIX)
        {
            return Err(InitError::BadSignature { byte, word });
        }

        self.port.set_control(cc::HALT);
        if self.port.status() & csw::HALTED == 0 {
            return Err(InitError::ChipNotHalted);
        }

        if reset_bus {
            self.reset_chip_and_bus();
            self.delay
                .delay_ms(u64::from(self.config.scsi_reset_wait_secs) * 1000);
        }

        self.load_microcode()?;
        self.init_microcode_vars();
        self.init_queue_links();

        self.port.set_pc(lram::MCODE_START_ADDR);
        let pc = self.port.pc();
        if pc != lram::MCODE_START_ADDR {
            return Err(InitError::ProgramCounter {
                expected: lram::MCODE_START_ADDR,
                actual: pc,
            });
        }

        self.port
            .set_config_low(self.port.config_low() | cfg0::HOST_INT_ON);
        self.port.set_control(0);

        if self.port.status() & csw::HALTED != 0 {
            return Err(InitError::RiscNotRunning);
        }

        Ok(())
    }

    /// Pulse chip and SCSI bus reset. The RISC is left halted.
    pub(super) fn reset_chip_and_bus(&self) {
        self.port
            .set_control(cc::CHIP_RESET | cc::SCSI_RESET | cc::HALT);
        self.port.set_control(cc::CHIP_RESET | cc::HALT);
        self.port.set_control(cc::HALT);
        self.port.set_status(ciw::CLR_SCSI_RESET_INT);
        self.port.set_status(0);
    }

    fn load_microcode(&self) -> Result<(), InitError> {
        let mut image = self.microcode.image().to_vec();
        if image.len() % 2 != 0 {
            image.push(0);
        }

        if usize::from(lram::MCODE_START_ADDR) + image.len() > usize::from(lram::QADR_BEG) {
            return Err(InitError::MicrocodeTooLarge { len: image.len() });
        }

        let expected = self.microcode.checksum();

        self.port.write_block(lram::MCODE_START_ADDR, &image);
        self.port.write_word(ascv::MCODE_CHKSUM_W, expected as u16);
        self.port.write_word(ascv::MCODE_SIZE_W, image.len() as u16);

        let actual = self
            .port
            .sum_words(lram::MCODE_START_ADDR, image.len() / 2);
        if actual != expected {
            return Err(InitError::MicrocodeChecksum { expected, actual });
        }

        debug!("narrow microcode loaded: {:#x} bytes", image.len());
        Ok(())
    }

    fn init_microcode_vars(&self) {
        for tid in 0..8u8 {
            let i = usize::from(tid);
            let tid = u16::from(tid);

            self.port
                .write_byte(ascv::SDTR_DATA_BEG + tid, self.config.sdtr_data[i]);
            self.port
                .write_byte(ascv::SDTR_DONE_BEG + tid, ASYN_SDTR_DATA);
            self.port
                .write_byte(ascv::MAX_DVC_QNG_BEG + tid, self.max_dvc_qng[i]);
        }

        let tagged = self.negotiation.tagqng_able as u8;

        self.port
            .write_byte(ascv::DISC_ENABLE_B, self.config.disc_enable as u8);
        self.port
            .write_byte(ascv::HOSTSCSI_ID_B, 1 << self.config.chip_scsi_id);
        self.port.write_byte(ascv::USE_TAGGED_QNG_B, tagged);
        self.port.write_byte(ascv::CAN_TAGGED_QNG_B, tagged);
        self.port
            .write_dword(ascv::OVERRUN_PADDR_D, self.overrun.addr);
        self.port.write_dword(ascv::OVERRUN_BSIZE_D, OVERRUN_BSIZE);
    }

    /// Link slots `1..=max` into the free list and park the three spare
    /// slots on themselves.
    fn init_queue_links(&self) {
        let max = self.max_total_qng;

        self.port.fill_words(
            qaddr(1),
            0,
            (usize::from(max) + 3) * usize::from(lram::QBLK_SIZE) / 2,
        );

        for q in 1..=max {
            let fwd = if q == max { QLINK_END } else { q + 1 };
            let base = qaddr(q);

            self.port
                .write_word(base + slot::FWD, u16::from_le_bytes([fwd, q - 1]));
            self.port
                .write_word(base + slot::STATUS, u16::from(q) << 8);
        }

        for q in max + 1..=max + 3 {
            let base = qaddr(q);

            self.port
                .write_word(base + slot::FWD, u16::from_le_bytes([q, q]));
            self.port
                .write_word(base + slot::STATUS, u16::from(q) << 8);
        }

        self.port.write_byte(ascv::NEXTRDY_B, 1);
        self.port.write_byte(ascv::DONENEXT_B, max);
        self.port.write_word(ascv::FREE_Q_HEAD_W, 1);
        self.port.write_word(ascv::DONE_Q_TAIL_W, u16::from(max));
        self.port.write_byte(ascv::BUSY_QHEAD_B, max + 1);
        self.port.write_byte(ascv::DISC1_QHEAD_B, max + 2);
        self.port.write_byte(ascv::TOTAL_READY_Q_B, max);

        self.port.write_word(ascv::ASCDVC_ERR_CODE_W, 0);
        self.port.write_word(ascv::HALTCODE_W, 0);
        self.port.write_byte(ascv::STOP_CODE_B, 0);
        self.port.write_byte(ascv::SCSIBUSY_B, 0);
        self.port.write_byte(ascv::WTM_FLAG_B, 0);
        self.port.write_byte(ascv::Q_DONE_IN_PROGRESS_B, 0);
        self.port.write_byte(ascv::REQ_SG_LIST_QP, QLINK_END);

        self.port.fill_words(lram::QADR_BEG, 0, 32);
    }

    /// Forget everything the host knew about queued requests. Used after
    /// the chip was reset.
    pub(super) fn reset_queue_state(&mut self) {
        self.cur_total_qng = 0;
        self.last_q_shortage = 0;
        self.cur_dvc_qng = [0; 8];
        self.queue_full_or_busy = 0;
        self.negotiation.sdtr_done = 0;
    }

    /// Remember an internal consistency violation.
    pub(super) fn set_error(&mut self, code: LibErrorCode) {
        warn!("narrow adapter: {code}");
        self.last_error = Some(code);
    }

    /// A handle no outstanding request uses. Zero marks aborted slots and
    /// is never handed out.
    pub(super) fn alloc_handle(&mut self) -> u32 {
        loop {
            let handle = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1).max(1);

            if !self.pending.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Report request `handle` as finished.
    pub(super) fn complete(&mut self, handle: u32, status: CompletionStatus) {
        let Some(pending) = self.pending.remove(&handle) else {
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        let request = pending.request;
        self.handles.remove(&request.id);
        self.stats.completed += 1;

        self.events.complete(Completion {
            id: request.id,
            target: request.target,
            lun: request.lun,
            status,
        });
    }

    /// Complete every outstanding request with `status`, oldest handle
    /// first.
    pub(super) fn drain_pending(&mut self, status: CompletionStatus) {
        let mut handles: Vec<u32> = self.pending.keys().copied().collect();
        handles.sort_unstable();

        if !handles.is_empty() {
            debug!("draining {} requests with {status:?}", handles.len());
        }

        for handle in handles {
            self.complete(handle, status);
        }
    }

    /// Negotiation state of the targets.
    #[must_use]
    pub const fn negotiation(&self) -> &NegotiationState {
        &self.negotiation
    }

    /// Queue depth limit of target `tid`.
    #[must_use]
    pub fn max_dvc_qng(&self, tid: u8) -> u8 {
        self.max_dvc_qng[usize::from(tid & 7)]
    }

    /// Requests of target `tid` on the chip.
    #[must_use]
    pub fn cur_dvc_qng(&self, tid: u8) -> u8 {
        self.cur_dvc_qng[usize::from(tid & 7)]
    }

    /// Slots held by requests.
    #[must_use]
    pub const fn cur_total_qng(&self) -> u8 {
        self.cur_total_qng
    }

    /// Number of queue slots.
    #[must_use]
    pub const fn max_total_qng(&self) -> u8 {
        self.max_total_qng
    }

    /// Length of the free chain from the free list head to the done list
    /// tail. `None` if the chain is broken.
    #[must_use]
    pub fn free_queue_count(&self) -> Option<usize> {
        let head = self.port.read_word(ascv::FREE_Q_HEAD_W) as u8;
        let tail = self.port.read_word(ascv::DONE_Q_TAIL_W) as u8;
        let limit = usize::from(self.max_total_qng) + 3;

        let mut count = 1;
        let mut q = head;

        while q != tail {
            q = self.port.read_byte(qaddr(q) + slot::FWD);

            if q == QLINK_END || count > limit {
                return None;
            }
            count += 1;
        }

        Some(count)
    }
}

impl AdapterEngine for NarrowEngine {
    fn family(&self) -> ChipFamily {
        ChipFamily::Narrow
    }

    fn submit(&mut self, request: ScsiRequest) -> SubmitStatus {
        self.execute(request)
    }

    fn service_interrupt(&mut self) -> bool {
        self.isr()
    }

    fn abort(&mut self, id: RequestId) -> AbortStatus {
        self.abort_request(id)
    }

    fn reset_bus(&mut self) -> ResetStatus {
        self.reset_scsi_bus()
    }

    fn reset_device(&mut self, target: u8) -> ResetStatus {
        self.reset_target(target)
    }

    fn take_events(&mut self) -> Vec<AdapterEvent> {
        self.events.take()
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }

    fn stats(&self) -> AdapterStats {
        self.stats
    }

    fn last_error(&self) -> Option<LibErrorCode> {
        self.last_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        bus::BusDevice,
        narrow::testutils::{rig, Rig},
    };

    #[test]
    fn init_links_every_slot_into_the_free_chain() {
        let Rig { adapter, .. } = rig();

        adapter.inspect(|e| {
            assert_eq!(e.free_queue_count(), Some(usize::from(e.max_total_qng())));
            assert_eq!(e.cur_total_qng(), 0);
            assert_eq!(e.port.read_byte(ascv::NEXTRDY_B), 1);
            assert_eq!(e.port.read_byte(ascv::DONENEXT_B), e.max_total_qng());
        });
    }

    #[test]
    fn wrong_signature_keeps_the_adapter_offline() {
        let rig = rig();
        rig.chip.lock().unwrap().set_signature(0x1234);

        let io: BusDeviceRef = rig.chip.clone();
        let mut allocator = DmaAllocator::new(rig.mem.size()).unwrap();

        let err = NarrowEngine::new(
            io,
            rig.mem.clone(),
            &mut allocator,
            Arc::new(crate::device::delay::NoDelay {}),
            AdapterConfig::narrow(),
            Microcode::generated_narrow(0x800, 1),
        )
        .unwrap_err();

        assert_eq!(
            err,
            InitError::BadSignature {
                byte: 0x25,
                word: 0x1234
            }
        );
    }

    #[test]
    fn corrupted_microcode_is_detected() {
        let rig = rig();
        let io: BusDeviceRef = rig.chip.clone();
        let mut allocator = DmaAllocator::new(rig.mem.size()).unwrap();
        let good = Microcode::generated_narrow(0x800, 1);

        let err = NarrowEngine::new(
            io,
            rig.mem.clone(),
            &mut allocator,
            Arc::new(crate::device::delay::NoDelay {}),
            AdapterConfig::narrow(),
            Microcode::new(good.image().to_vec(), good.checksum() + 1),
        )
        .unwrap_err();

        assert!(matches!(err, InitError::MicrocodeChecksum { .. }));
    }

    #[test]
    fn oversized_microcode_is_rejected() {
        let rig = rig();
        let io: BusDeviceRef = rig.chip.clone();
        let mut allocator = DmaAllocator::new(rig.mem.size()).unwrap();

        let err = NarrowEngine::new(
            io,
            rig.mem.clone(),
            &mut allocator,
            Arc::new(crate::device::delay::NoDelay {}),
            AdapterConfig::narrow(),
            Microcode::generated_narrow(0x4000, 1),
        )
        .unwrap_err();

        assert_eq!(err, InitError::MicrocodeTooLarge { len: 0x4000 });
    }
}
