//! Interrupt service.
//!
//! INTRA means the RISC linked finished requests into the IRQ. INTRB means
//! it posted an async condition code in LRAM. Both may be set at once; the
//! IRQ is always harvested before the condition is acted on, so that a
//! chip restart caused by the condition only drains what really is still
//! outstanding.

use tracing::{debug, error, trace, warn};

use crate::device::{
    adapter::AsyncEvent,
    config::WideChip,
    constants::{inquiry, opcode, qd, qhsta},
    error::LibErrorCode,
    negotiation::{tid_bit, Inquiry, Merge, Transition},
    scsi::{CompletionStatus, RawStatus},
};

use super::{
    carrier::Harvested,
    constants::{async_code, intr_status, mc, tickle},
    engine::WideEngine,
};

impl WideEngine {
    pub(super) fn isr(&mut self) -> bool {
        let status = self.port.take_intr_status();

        if status & (intr_status::INTRA | intr_status::INTRB | intr_status::INTRC) == 0 {
            return false;
        }

        self.stats.interrupts += 1;

        let code = (status & intr_status::INTRB != 0).then(|| self.port.read_byte(mc::INTRB_CODE));

        if code == Some(async_code::CARRIER_READY_FAILURE)
            && self.carriers.pending() != 0
            && self.chip != WideChip::Asc38C1600
        {
            // The RISC looked at the ICQ too early. Make it look again.
            self.port.tickle(tickle::A);
            if self.chip == WideChip::Asc3550 {
                self.port.tickle(tickle::NOP);
            }
        }

        self.drain_irq();

        if let Some(code) = code {
            self.async_condition(code);
        }

        true
    }

    /// Harvest the IRQ until the stopper is reached.
    pub(super) fn drain_irq(&mut self) {
        loop {
            match self.carriers.harvest() {
                Ok(Some(done)) => self.finish(done),
                Ok(None) => break,
                Err(code) => {
                    self.set_error(code);
                    break;
                }
            }
        }
    }

    /// Complete the request the RISC handed back in `done`.
    fn finish(&mut self, done: Harvested) {
        let Some(slot) = self.requests.slot_of(done.areq_vpa) else {
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        let Some(pending) = self.pending.get(&slot) else {
            warn!("record {} completed twice", slot.0);
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        let raw = if done.good {
            RawStatus {
                done: qd::NO_ERROR,
                ..RawStatus::default()
            }
        } else {
            let record = self.requests.read(slot);

            RawStatus {
                done: record.done_status,
                host: record.host_status,
                scsi: record.scsi_status,
                residual: record.data_cnt,
                sense_len: record.sense_len,
            }
        };

        let request = &pending.request;
        let status = raw.classify(request.data.len());

        trace!("record {} done: {raw:?} -> {status:?}", slot.0);

        let probe = match status {
            CompletionStatus::Good { residual }
                if request.opcode() == opcode::INQUIRY
                    && request.lun == 0
                    && request.cdb.get(1).copied().unwrap_or(0) & inquiry::EVPD_AND_CMDDT == 0 =>
            {
                let len = request.data.len().saturating_sub(u64::from(residual));
                let max = usize::try_from(len).unwrap_or(usize::MAX).min(inquiry::CLOCKING_LEN);

                Some((request.target, request.data.read_prefix(&self.dma, max)))
            }
            _ => None,
        };

        if raw.host == qhsta::M_HUNG_REQ_SCSI_BUS_RESET {
            warn!("target {} hung, the RISC reset the bus", request.target);
        }

        self.requests.clear_cntl(slot);

        if let Some((tid, data)) = probe {
            self.inquiry_handling(tid, &data);
        }

        self.complete(slot, status);
    }

    /// Adjust negotiation and queueing of `tid` to what its INQUIRY data
    /// claims. Capabilities only ever get added here; a bus reset is what
    /// makes the targets negotiate from scratch.
    pub(super) fn inquiry_handling(&mut self, tid: u8, data: &[u8]) {
        let Some(inq) = Inquiry::parse(data) else {
            return;
        };

        let caps = self.negotiation.evaluate(tid, &inq);
        let change = self.negotiation.update(tid, caps, Merge::Accumulate);
        let bit = tid_bit(tid);

        if change.wdtr == Transition::Enabled {
            self.port.update_word(mc::WDTR_ABLE, bit, true);
            self.port.update_word(mc::WDTR_DONE, bit, false);
            self.port.update_word(mc::SDTR_DONE, bit, false);
        }

        if change.sdtr == Transition::Enabled {
            self.port.update_word(mc::SDTR_ABLE, bit, true);
            self.port.update_word(mc::SDTR_DONE, bit, false);
        }

        if change.ppr == Transition::Enabled {
            self.port.update_word(mc::PPR_ABLE, bit, true);
            self.port.update_word(mc::SDTR_DONE, bit, false);
        }

        if change.tagqng == Transition::Enabled {
            self.port.update_word(mc::TAGQNG_ABLE, bit, true);
            self.port
                .write_byte(mc::NUMBER_OF_MAX_CMD + u16::from(tid), self.config.max_dvc_qng);
        }

        if change.any() {
            debug!("wide target {tid}: {change:?}");
        }
    }

    /// Act on the async condition code of an INTRB.
    fn async_condition(&mut self, code: u8) {
        match code {
            async_code::SCSI_BUS_RESET_DET => {
                warn!("wide adapter: SCSI bus reset detected");
                self.stats.bus_resets += 1;
                self.events.async_event(AsyncEvent::BusResetDetected);
                self.restart_chip(false);
            }
            async_code::RDMA_FAILURE => {
                error!("wide adapter: RISC DMA read failed, restarting chip and bus");
                self.events.async_event(AsyncEvent::RdmaFailure);
                self.restart_chip(true);
            }
            async_code::CARRIER_READY_FAILURE => {
                debug!("wide adapter: carrier not ready");
                self.events.async_event(AsyncEvent::CarrierReadyFailure);
            }
            async_code::RDMA_IN_CARR_AND_Q_INVALID => {
                error!("wide adapter: RISC read an invalid carrier or request");
                self.events.async_event(AsyncEvent::RdmaInvalidCarrier);
            }
            async_code::HOST_SCSI_BUS_RESET => {
                debug!("wide adapter: host bus reset done");
                self.events.async_event(AsyncEvent::HostBusReset);
            }
            other => {
                warn!("wide adapter: unknown async code {other:#04x}");
                self.events.async_event(AsyncEvent::Unknown(other));
            }
        }
    }
}
