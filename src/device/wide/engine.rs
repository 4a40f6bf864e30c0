//! # Wide Engine
//!
//! The host half of the wide chips' carrier protocol. Request records,
//! scatter-gather blocks and carriers all live in host memory; LRAM only
//! holds the microcode and its variables. The engine owns the three pools,
//! the mapping from records back to the caller's requests and the
//! negotiation state.
//!
//! Submission is in `exec`, interrupt handling in `isr` and everything
//! that goes through an idle command (abort and resets) in `idle`.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::device::{
    adapter::{
        AbortStatus, AdapterEngine, AdapterEvent, AdapterStats, ChipFamily, EventQueue,
        ResetStatus, SubmitStatus,
    },
    bus::BusDeviceRef,
    config::{AdapterConfig, Termination, WideChip},
    constants::{signature, MAX_WIDE_TID},
    delay::Delay,
    error::{InitError, LibErrorCode},
    firmware::Microcode,
    host_memory::DmaAllocator,
    negotiation::{tid_bit, NegotiationState},
    scsi::{Completion, CompletionStatus, RequestId, ScsiRequest},
};

use super::{
    carrier::{CarrierPool, CarrierQueues},
    constants::{
        bist, cfg0, cfg1, chip_type, intr_enable, mc, risc_csr, CARRIER_SURPLUS, MEMSIZE_3550,
        MEMSIZE_38C0800, MEMSIZE_38C1600,
    },
    port::AdvPort,
    request::{ReqSlot, RequestPool},
    sg::{SgBlockId, SgPool},
};

/// LRAM size of `chip`.
#[must_use]
pub const fn memsize(chip: WideChip) -> u32 {
    match chip {
        WideChip::Asc3550 => MEMSIZE_3550,
        WideChip::Asc38C0800 => MEMSIZE_38C0800,
        WideChip::Asc38C1600 => MEMSIZE_38C1600,
    }
}

/// Host side state of an accepted request.
#[derive(Debug)]
pub(super) struct Pending {
    pub(super) request: ScsiRequest,
    pub(super) sg_blocks: Vec<SgBlockId>,
}

/// Queueing and completion engine of one wide adapter.
#[derive(Debug)]
pub struct WideEngine {
    pub(super) port: AdvPort,
    pub(super) dma: BusDeviceRef,
    pub(super) delay: Arc<dyn Delay>,
    pub(super) config: AdapterConfig,
    pub(super) chip: WideChip,
    pub(super) microcode: Microcode,

    pub(super) carriers: CarrierQueues,
    pub(super) requests: RequestPool,
    pub(super) sg: SgPool,
    pub(super) negotiation: NegotiationState,

    pub(super) pending: HashMap<ReqSlot, Pending>,
    pub(super) handles: HashMap<RequestId, ReqSlot>,

    pub(super) events: EventQueue,
    pub(super) stats: AdapterStats,
    pub(super) last_error: Option<LibErrorCode>,
    pub(super) offline: bool,
}

impl WideEngine {
    /// Bring up the chip behind `io`.
    ///
    /// Carriers, request records and scatter-gather blocks are taken from
    /// `allocator` once and kept across chip resets.
    pub fn new(
        io: BusDeviceRef,
        dma: BusDeviceRef,
        allocator: &mut DmaAllocator,
        delay: Arc<dyn Delay>,
        config: AdapterConfig,
        microcode: Microcode,
    ) -> Result<Self, InitError> {
        config.validate(ChipFamily::Wide)?;

        let carrier_count = u16::from(config.max_host_qng) + CARRIER_SURPLUS;
        Self::with_carriers(io, dma, allocator, delay, config, microcode, carrier_count)
    }

    /// Like [`WideEngine::new`], with an explicit carrier pool size.
    pub fn with_carriers(
        io: BusDeviceRef,
        dma: BusDeviceRef,
        allocator: &mut DmaAllocator,
        delay: Arc<dyn Delay>,
        config: AdapterConfig,
        microcode: Microcode,
        carrier_count: u16,
    ) -> Result<Self, InitError> {
        config.validate(ChipFamily::Wide)?;

        let pool = CarrierPool::new(dma.clone(), allocator, carrier_count)?;
        let carriers = CarrierQueues::new(pool)?;
        let requests = RequestPool::new(dma.clone(), allocator, config.max_host_qng)?;
        let sg = SgPool::new(dma.clone(), allocator, config.sg_blocks)?;
        let chip = config.wide_chip;

        let mut engine = Self {
            port: AdvPort::new(io),
            dma,
            delay,
            chip,
            microcode,
            carriers,
            requests,
            sg,
            negotiation: NegotiationState::new(
                config.sdtr_enable,
                config.wdtr_enable,
                config.tagqng_enable,
                chip == WideChip::Asc38C1600,
            ),
            pending: HashMap::new(),
            handles: HashMap::new(),
            events: EventQueue::default(),
            stats: AdapterStats::default(),
            last_error: None,
            offline: false,
            config,
        };

        let reset_bus = engine.config.reset_bus_on_init;
        engine.init_chip(reset_bus)?;

        info!(
            "wide adapter online: {:?}, {} requests, {carrier_count} carriers, SCSI id {}",
            engine.chip, engine.config.max_host_qng, engine.config.chip_scsi_id
        );

        Ok(engine)
    }

    /// Run the chip initialization from the signature check to starting
    /// the RISC.
    pub(super) fn init_chip(&mut self, reset_bus: bool) -> Result<(), InitError> {
        let (byte, word) = (self.port.chip_id_byte(), self.port.chip_id_word());

        if byte != signature::ID_BYTE || word != signature::ID_WORD {
            return Err(InitError::BadSignature { byte, word });
        }

        self.port.set_risc_csr(risc_csr::STOP);

        if self.chip != WideChip::Asc3550 {
            self.ram_bist()?;
        }

        self.load_microcode()?;
        self.init_microcode_vars();

        self.carriers.rebuild()?;
        self.port.write_dword(mc::ICQ, self.carriers.icq_stopper_pa());
        self.port.write_dword(mc::IRQ, self.carriers.irq_stopper_pa());
        if self.chip == WideChip::Asc38C1600 {
            self.port.set_comma(self.carriers.icq_stopper_pa());
        }

        self.port
            .set_intr_enables(intr_enable::HOST_INTR | intr_enable::GLOBAL_INTR);

        let begin = self.port.read_word(mc::CODE_BEGIN_ADDR);
        self.port.set_pc(begin);
        let pc = self.port.pc();
        if pc != begin {
            return Err(InitError::ProgramCounter {
                expected: begin,
                actual: pc,
            });
        }

        self.port.set_risc_csr(risc_csr::RUN);
        if self.port.risc_csr() & risc_csr::RUN == 0 {
            return Err(InitError::RiscNotRunning);
        }

        if reset_bus {
            if !self.scsi_bus_pulse() {
                return Err(InitError::RiscNotRunning);
            }

            // The host reset interrupt of the pulse is not news to anyone.
            let _ = self.port.take_intr_status();
            self.delay
                .delay_ms(u64::from(self.config.scsi_reset_wait_secs) * 1000);
        }

        Ok(())
    }

    /// Run the RAM built-in self test.
    fn ram_bist(&self) -> Result<(), InitError> {
        self.port.set_ram_bist(bist::PRE_TEST_MODE);
        self.delay.delay_ms(bist::SETTLE_MS);
        let value = self.port.ram_bist();
        if value & bist::RESULT_MASK != bist::PRE_TEST_VALUE {
            return Err(InitError::BistPreTest { value });
        }

        self.port.set_ram_bist(bist::NORMAL_MODE);
        self.delay.delay_ms(bist::SETTLE_MS);
        let value = self.port.ram_bist();
        if value != bist::NORMAL_VALUE {
            return Err(InitError::BistPreTest { value });
        }

        self.port.set_ram_bist(bist::RAM_TEST_MODE);
        self.delay.delay_ms(bist::SETTLE_MS);
        let value = self.port.ram_bist();
        if value & bist::RAM_TEST_DONE == 0 || value & bist::RESULT_MASK != 0 {
            return Err(InitError::BistRamTest { value });
        }

        self.port.set_ram_bist(bist::NORMAL_MODE);
        Ok(())
    }

    /// Copy the image to LRAM 0, clear the rest of LRAM and verify the
    /// code section.
    fn load_microcode(&self) -> Result<(), InitError> {
        let memsize = memsize(self.chip) as usize;
        let len = self.microcode.image().len();

        if len > memsize {
            return Err(InitError::MicrocodeTooLarge { len });
        }

        let (begin, end) = self
            .microcode
            .wide_code_section()
            .ok_or(InitError::InvalidConfig("microcode without code section header"))?;

        self.port.write_words(0, self.microcode.words());
        let loaded = len.div_ceil(2) * 2;
        self.port
            .clear_words(loaded as u16, (memsize - loaded) / 2);

        let expected = self.microcode.checksum();
        let actual = self
            .port
            .sum_words(begin, usize::from(end - begin) / 2);
        if actual != expected {
            return Err(InitError::MicrocodeChecksum { expected, actual });
        }

        self.port.write_word(mc::CODE_CHK_SUM, expected as u16);

        debug!(
            "wide microcode loaded: {len:#x} bytes, code {begin:#06x}..{end:#06x}"
        );
        Ok(())
    }

    fn init_microcode_vars(&self) {
        let chip = match self.chip {
            WideChip::Asc3550 => chip_type::ASC3550,
            WideChip::Asc38C0800 => chip_type::ASC38C0800,
            WideChip::Asc38C1600 => chip_type::ASC38C1600,
        };
        self.port.write_byte(mc::CHIP_TYPE, chip as u8);

        // Empty until a target answered INQUIRY. A restarted chip gets
        // back what was learned, but renegotiates.
        let neg = &self.negotiation;
        for (var, value) in [
            (mc::WDTR_ABLE, neg.wdtr_able),
            (mc::SDTR_ABLE, neg.sdtr_able),
            (mc::TAGQNG_ABLE, neg.tagqng_able),
            (mc::PPR_ABLE, neg.ppr_able),
            (mc::SDTR_DONE, 0),
            (mc::WDTR_DONE, 0),
        ] {
            self.port.write_word(var, value);
        }

        self.port.write_word(mc::DISC_ENABLE, self.config.disc_enable);
        self.port.write_word(
            mc::DEFAULT_SCSI_CFG0,
            cfg0::PARITY_EN
                | cfg0::QUEUE_128
                | cfg0::SEL_TMO_LONG
                | cfg0::OUR_ID_EN
                | u16::from(self.config.chip_scsi_id),
        );

        let mut scsi_cfg1 = match self.config.termination {
            Termination::Automatic => 0,
            Termination::Low => cfg1::TERM_CTL_SEL | cfg1::TERM_CTL_L,
            Termination::HighLow => cfg1::TERM_CTL_SEL | cfg1::TERM_CTL_H | cfg1::TERM_CTL_L,
            Termination::Off => cfg1::TERM_CTL_SEL,
        };
        if self.chip == WideChip::Asc3550 {
            scsi_cfg1 |= cfg1::FLTR_DISABLE;
        }
        self.port.set_scsi_cfg1(scsi_cfg1);
        self.port.write_word(mc::DEFAULT_SCSI_CFG1, scsi_cfg1);

        self.port
            .write_word(mc::DEFAULT_SEL_MASK, tid_bit(self.config.chip_scsi_id));

        for tid in 0..=MAX_WIDE_TID {
            let max_cmd = if neg.tagqng_able & tid_bit(tid) != 0 {
                self.config.max_dvc_qng
            } else {
                1
            };
            self.port.write_byte(mc::NUMBER_OF_MAX_CMD + u16::from(tid), max_cmd);
            self.port.write_byte(mc::NUMBER_OF_QUEUED_CMD + u16::from(tid), 0);
        }
    }

    /// Forget what the targets negotiated. Used after bus resets.
    pub(super) fn forget_negotiation(&mut self) {
        self.negotiation.sdtr_done = 0;
        self.negotiation.wdtr_done = 0;
    }

    /// Remember an internal consistency violation.
    pub(super) fn set_error(&mut self, code: LibErrorCode) {
        warn!("wide adapter: {code}");
        self.last_error = Some(code);
    }

    /// Report the request in `slot` as finished and give back its record
    /// and scatter-gather blocks.
    pub(super) fn complete(&mut self, slot: ReqSlot, status: CompletionStatus) {
        let Some(pending) = self.pending.remove(&slot) else {
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        self.sg.free_chain(&pending.sg_blocks);
        self.requests.release(slot);

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

    /// Complete every outstanding request with `status`, lowest record
    /// first.
    pub(super) fn drain_pending(&mut self, status: CompletionStatus) {
        let mut slots: Vec<ReqSlot> = self.pending.keys().copied().collect();
        slots.sort_unstable();

        if !slots.is_empty() {
            debug!("draining {} requests with {status:?}", slots.len());
        }

        for slot in slots {
            self.complete(slot, status);
        }
    }

    /// Negotiation state of the targets.
    #[must_use]
    pub const fn negotiation(&self) -> &NegotiationState {
        &self.negotiation
    }

    /// The chip revision.
    #[must_use]
    pub const fn chip(&self) -> WideChip {
        self.chip
    }

    /// Free carriers, request records and scatter-gather blocks.
    #[must_use]
    pub fn free_resources(&self) -> (usize, usize, usize) {
        (
            self.carriers.pool().free_len(),
            self.requests.free_len(),
            self.sg.free_len(),
        )
    }

    /// Carriers in the pool.
    #[must_use]
    pub fn carrier_count(&self) -> usize {
        self.carriers.pool().count()
    }

    /// Requests on carriers that were not harvested yet.
    #[must_use]
    pub const fn carriers_pending(&self) -> usize {
        self.carriers.pending()
    }

    /// Whether init failed after a reset and the adapter refuses requests.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.offline
    }
}

impl AdapterEngine for WideEngine {
    fn family(&self) -> ChipFamily {
        ChipFamily::Wide
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
