//! Abort and reset.
//!
//! Changing slots behind the RISC's back requires the RISC to stand still:
//! the host requests a stop through `STOP_CODE_B`, edits LRAM and releases
//! the RISC again. Resets tear everything down and reinitialize the chip.

use tracing::{debug, error, info, warn};

use crate::device::{
    adapter::{AbortStatus, AsyncEvent, ResetStatus},
    constants::MAX_NARROW_TID,
    error::LibErrorCode,
    negotiation::tid_bit,
    scsi::{CompletionStatus, RequestId},
};

use super::{
    constants::{
        ascv, cc, ciw, csw, qcsg, qs, slot, stop, ASYN_SDTR_DATA, STOP_POLL_COUNT,
        STOP_POLL_DELAY_MS,
    },
    engine::NarrowEngine,
    lram::qaddr,
};

/// Status reads while the SCSI reset line is still asserted.
const RESET_ACTIVE_POLL: u32 = 1000;

/// A request slot the RISC has not finished with.
#[derive(Debug, Copy, Clone)]
struct LiveSlot {
    q_no: u8,
    status: u8,
    handle: u32,
    tid: u8,
}

impl NarrowEngine {
    /// Ask the RISC to stop fetching and wait for the acknowledge.
    pub(super) fn stop_queue(&mut self) -> bool {
        if self.port.read_byte(ascv::STOP_CODE_B) != 0 {
            warn!("narrow RISC stop already in progress");
            return false;
        }

        self.port.write_byte(ascv::STOP_CODE_B, stop::REQ_RISC_STOP);

        for _ in 0..STOP_POLL_COUNT {
            if self.port.read_byte(ascv::STOP_CODE_B) & stop::ACK_RISC_STOP == stop::ACK_RISC_STOP {
                return true;
            }
            self.delay.delay_ms(STOP_POLL_DELAY_MS);
        }

        self.set_error(LibErrorCode::StopTimeout);
        self.start_queue();
        false
    }

    pub(super) fn start_queue(&self) {
        self.port.write_byte(ascv::STOP_CODE_B, 0);
    }

    /// Request slots the RISC still owns.
    fn live_slots(&self) -> Vec<LiveSlot> {
        (1..=self.max_total_qng)
            .filter_map(|q_no| {
                let base = qaddr(q_no);
                let status = self.port.read_byte(base + slot::STATUS);
                let cntl = self.port.read_byte(base + slot::CNTL);

                let live = status & qs::READY != 0
                    && status & qs::ABORTED == 0
                    && cntl & qcsg::SG_XFER_LIST == 0;

                live.then(|| LiveSlot {
                    q_no,
                    status,
                    handle: self.port.read_dword(base + slot::SRB_PTR),
                    tid: self.port.read_byte(base + slot::TARGET_IX) & 7,
                })
            })
            .collect()
    }

    /// Mark a slot aborted. The RISC completes it without callback.
    fn mark_aborted(&self, live: &LiveSlot) {
        let base = qaddr(live.q_no);

        self.port.write_dword(base + slot::SRB_PTR, 0);
        self.port
            .write_byte(base + slot::STATUS, live.status | qs::ABORTED);
    }

    pub(super) fn abort_request(&mut self, id: RequestId) -> AbortStatus {
        let Some(&handle) = self.handles.get(&id) else {
            return AbortStatus::NotFound;
        };

        if !self.stop_queue() {
            return AbortStatus::Error;
        }

        let found = self
            .live_slots()
            .into_iter()
            .find(|live| live.handle == handle);

        if let Some(live) = found {
            self.mark_aborted(&live);
            self.complete(handle, CompletionStatus::Aborted);
            self.stats.aborted += 1;
            debug!("request {id} aborted in slot {}", live.q_no);
        }

        self.start_queue();

        if found.is_some() {
            AbortStatus::Aborted
        } else {
            AbortStatus::NotFound
        }
    }

    /// Abort every queued request of `target` and forget its transfer
    /// agreement.
    pub(super) fn reset_target(&mut self, target: u8) -> ResetStatus {
        if target > MAX_NARROW_TID || self.offline {
            return ResetStatus::Error;
        }

        if !self.stop_queue() {
            return ResetStatus::Error;
        }

        for live in self.live_slots().into_iter().filter(|l| l.tid == target) {
            self.mark_aborted(&live);

            if live.handle != 0 {
                self.complete(live.handle, CompletionStatus::Reset);
            }
        }

        self.negotiation.sdtr_done &= !tid_bit(target);
        self.port
            .write_byte(ascv::SDTR_DONE_BEG + u16::from(target), ASYN_SDTR_DATA);

        self.start_queue();
        info!("narrow target {target} reset");

        ResetStatus::Success
    }

    /// Reset the SCSI bus and reinitialize the chip.
    pub(super) fn reset_scsi_bus(&mut self) -> ResetStatus {
        self.port.set_control(cc::HALT);
        self.drain_done_list();
        self.drain_pending(CompletionStatus::Reset);
        self.reset_queue_state();

        if let Err(e) = self.init_chip(true) {
            error!("narrow adapter did not come back after bus reset: {e}");
            self.offline = true;
            return ResetStatus::Error;
        }

        self.offline = false;
        self.stats.bus_resets += 1;
        self.events.async_event(AsyncEvent::HostBusReset);
        info!("narrow SCSI bus reset");

        ResetStatus::Success
    }

    /// Recover from a bus reset some other device asserted.
    pub(super) fn handle_reset_latch(&mut self) {
        warn!("narrow adapter detected a SCSI bus reset");

        self.negotiation.sdtr_done = 0;

        for _ in 0..RESET_ACTIVE_POLL {
            if self.port.status() & csw::SCSI_RESET_ACTIVE == 0 {
                break;
            }
        }

        self.port.set_control(cc::CHIP_RESET | cc::HALT);
        self.port.set_control(cc::HALT);
        self.port.set_status(ciw::CLR_SCSI_RESET_INT);
        self.port.set_status(0);

        self.drain_pending(CompletionStatus::Reset);
        self.reset_queue_state();

        if let Err(e) = self.init_chip(false) {
            error!("narrow adapter did not come back after bus reset: {e}");
            self.offline = true;
        }

        self.stats.bus_resets += 1;
        self.events.async_event(AsyncEvent::BusResetDetected);
    }

    /// Pulse SCSI reset to free a hung bus. The RISC completes what it
    /// still holds with reset status.
    pub(super) fn reset_hung_bus(&self) {
        warn!("narrow request hung, resetting SCSI bus");

        self.port.set_control(cc::HALT);
        self.port.set_control(cc::SCSI_RESET | cc::HALT);
        self.port.set_control(cc::HALT);
        self.port.set_status(ciw::CLR_SCSI_RESET_INT);
        self.port.set_status(0);
        self.port.set_control(0);
    }
}
