//! Idle commands, abort and resets.
//!
//! The wide RISC runs one host command at a time out of its idle loop. The
//! host writes the parameter and the command into LRAM, tickles B and polls
//! until the RISC clears the command word. Requests the RISC gives up on
//! come back through the IRQ like any other completion.

use tracing::{debug, error, info, warn};

use crate::device::{
    adapter::{AbortStatus, ResetStatus},
    config::WideChip,
    constants::MAX_WIDE_TID,
    error::LibErrorCode,
    negotiation::tid_bit,
    scsi::{CompletionStatus, RequestId},
};

use super::{
    constants::{ctrl, idle, mc, risc_csr, tickle, CHIP_RESET_MS},
    engine::WideEngine,
};

impl WideEngine {
    /// Run idle command `cmd` and return the status the RISC left.
    pub(super) fn send_idle_cmd(&mut self, cmd: u16, param: u32) -> Result<u16, LibErrorCode> {
        self.port.write_word(mc::IDLE_CMD_STATUS, 0);
        self.port.write_dword(mc::IDLE_CMD_PARAMETER, param);
        self.port.write_word(mc::IDLE_CMD, cmd);

        self.port.tickle(tickle::B);
        if self.chip == WideChip::Asc3550 {
            self.port.tickle(tickle::NOP);
        }

        for _ in 0..idle::WAIT_MS {
            if self.port.read_word(mc::IDLE_CMD) == idle::COMPLETED {
                let status = self.port.read_word(mc::IDLE_CMD_STATUS);
                debug!("idle command {cmd:#06x}({param:#x}) -> {status:#06x}");
                return Ok(status);
            }

            self.delay.delay_ms(1);
        }

        self.set_error(LibErrorCode::IdleCommandTimeout);
        Err(LibErrorCode::IdleCommandTimeout)
    }

    /// Assert and release the SCSI reset line. Returns whether the RISC
    /// acknowledged both halves.
    pub(super) fn scsi_bus_pulse(&mut self) -> bool {
        [idle::SCSI_RESET_START, idle::SCSI_RESET_END]
            .into_iter()
            .all(|cmd| self.send_idle_cmd(cmd, 0) == Ok(idle::STATUS_SUCCESS))
    }

    pub(super) fn abort_request(&mut self, id: RequestId) -> AbortStatus {
        let Some(&slot) = self.handles.get(&id) else {
            return AbortStatus::NotFound;
        };

        let pa = self.requests.pa(slot);

        match self.send_idle_cmd(idle::ABORT, pa) {
            Ok(idle::STATUS_SUCCESS) => {
                // The aborted request is already on the IRQ.
                self.isr();
                self.stats.aborted += 1;
                debug!("request {id} aborted");

                if self.pending.contains_key(&slot) {
                    warn!("aborted request {id} was not handed back, completing it");
                    self.complete(slot, CompletionStatus::Aborted);
                }

                AbortStatus::Aborted
            }
            Ok(_) => {
                // Too late, the request finished on its own.
                self.isr();
                AbortStatus::NotFound
            }
            Err(_) => AbortStatus::Error,
        }
    }

    /// Send a BUS DEVICE RESET message to `target`.
    pub(super) fn reset_target(&mut self, target: u8) -> ResetStatus {
        if target > MAX_WIDE_TID || self.offline {
            return ResetStatus::Error;
        }

        match self.send_idle_cmd(idle::DEVICE_RESET, u32::from(target)) {
            Ok(idle::STATUS_SUCCESS) => {}
            Ok(status) => {
                warn!("wide target {target} reset refused: {status:#06x}");
                return ResetStatus::Error;
            }
            Err(_) => return ResetStatus::Error,
        }

        self.isr();

        let bit = tid_bit(target);
        self.negotiation.sdtr_done &= !bit;
        self.negotiation.wdtr_done &= !bit;
        self.port.update_word(mc::SDTR_DONE, bit, false);
        self.port.update_word(mc::WDTR_DONE, bit, false);

        info!("wide target {target} reset");
        ResetStatus::Success
    }

    /// Reset the SCSI bus. Everything outstanding completes with reset
    /// status.
    pub(super) fn reset_scsi_bus(&mut self) -> ResetStatus {
        if self.offline {
            return ResetStatus::Error;
        }

        if !self.scsi_bus_pulse() {
            return ResetStatus::Error;
        }

        // Picks up the purged requests and the host reset condition.
        self.isr();
        self.drain_pending(CompletionStatus::Reset);

        self.forget_negotiation();
        self.port.write_word(mc::SDTR_DONE, 0);
        self.port.write_word(mc::WDTR_DONE, 0);
        self.stats.bus_resets += 1;

        self.delay
            .delay_ms(u64::from(self.config.scsi_reset_wait_secs) * 1000);

        info!("wide SCSI bus reset");
        ResetStatus::Success
    }

    /// Reset the chip and bring it up again. Requests still outstanding
    /// complete with reset status. If init fails the adapter goes offline.
    pub(super) fn restart_chip(&mut self, reset_bus: bool) {
        self.port.set_risc_csr(risc_csr::STOP);
        self.port.set_ctrl(ctrl::CMD_RESET);
        self.delay.delay_ms(CHIP_RESET_MS);
        self.port.set_ctrl(ctrl::CMD_WR_IO_REG);

        self.drain_pending(CompletionStatus::Reset);
        self.forget_negotiation();

        if let Err(e) = self.init_chip(reset_bus) {
            error!("wide adapter failed to restart: {e}");
            self.offline = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::device::{
        adapter::{AbortStatus, AsyncEvent, HostAdapter, ResetStatus, SubmitStatus},
        config::WideChip,
        error::LibErrorCode,
        negotiation::tid_bit,
        scsi::{CompletionStatus, RequestId},
        sim_target::{Outcome, SimTarget},
        wide::{
            constants::mc,
            testutils::{inquiry_request, read_10, rig},
        },
    };

    fn held_target() -> SimTarget {
        let mut t = SimTarget::disk();
        for _ in 0..4 {
            t.push_outcome(Outcome::Hold);
        }
        t
    }

    #[test]
    fn abort_completes_the_request_once() {
        for chip in [WideChip::Asc3550, WideChip::Asc38C1600] {
            let rig = rig(chip);
            rig.attach(3, held_target());

            assert_eq!(
                rig.adapter.submit(read_10(RequestId(1), 3, 0x2_0000, 0x200)),
                SubmitStatus::Accepted
            );
            rig.settle();

            assert_eq!(rig.adapter.abort(RequestId(1)), AbortStatus::Aborted);
            assert_eq!(rig.adapter.abort(RequestId(1)), AbortStatus::NotFound);

            let done = rig.handler.take_completions();
            assert_eq!(done.len(), 1, "{chip:?}");
            assert_eq!(done[0].status, CompletionStatus::Aborted);
            assert_eq!(rig.adapter.stats().aborted, 1);

            rig.release(3);
            assert!(rig.handler.take_completions().is_empty());
        }
    }

    #[test]
    fn aborting_an_unknown_request_is_not_found() {
        let rig = rig(WideChip::Asc38C0800);

        assert_eq!(rig.adapter.abort(RequestId(42)), AbortStatus::NotFound);
    }

    #[test]
    fn device_reset_completes_only_that_target() {
        let rig = rig(WideChip::Asc38C0800);
        rig.attach(1, held_target());
        rig.attach(2, held_target());

        for (id, tid) in [(1, 1), (2, 2), (3, 1)] {
            assert_eq!(
                rig.adapter.submit(read_10(RequestId(id), tid, 0x2_0000, 0x200)),
                SubmitStatus::Accepted
            );
        }
        rig.settle();

        assert_eq!(rig.adapter.reset_device(1), ResetStatus::Success);

        let mut done = rig.handler.take_completions();
        done.sort_by_key(|c| c.id);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| c.target == 1 && c.status == CompletionStatus::Reset));
        assert_eq!(rig.adapter.outstanding(), 1);

        assert_eq!(rig.adapter.reset_device(16), ResetStatus::Error);
    }

    #[test]
    fn device_reset_renegotiates() {
        let rig = rig(WideChip::Asc38C0800);
        rig.attach(6, SimTarget::disk());
        assert_eq!(
            rig.adapter.submit(inquiry_request(RequestId(1), 6, 0x2_0000)),
            SubmitStatus::Accepted
        );
        rig.settle();

        rig.chip.lock().unwrap().write_lram_word(mc::SDTR_DONE, tid_bit(6) | tid_bit(2));
        assert_eq!(rig.adapter.reset_device(6), ResetStatus::Success);

        assert_eq!(rig.chip.lock().unwrap().read_lram_word(mc::SDTR_DONE), tid_bit(2));
        rig.adapter.inspect(|e| assert_ne!(e.negotiation().sdtr_able & tid_bit(6), 0));
    }

    #[test]
    fn bus_reset_completes_everything() {
        let rig = rig(WideChip::Asc38C1600);
        rig.attach(0, held_target());
        rig.attach(8, held_target());

        for (id, tid) in [(1, 0), (2, 8), (3, 8)] {
            assert_eq!(
                rig.adapter.submit(read_10(RequestId(id), tid, 0x2_0000, 0x200)),
                SubmitStatus::Accepted
            );
        }
        rig.settle();

        assert_eq!(rig.adapter.reset_bus(), ResetStatus::Success);

        let done = rig.handler.take_completions();
        assert_eq!(done.len(), 3);
        assert!(done.iter().all(|c| c.status == CompletionStatus::Reset));
        assert_eq!(rig.handler.take_async_events(), vec![AsyncEvent::HostBusReset]);
        assert_eq!(rig.adapter.stats().bus_resets, 1);

        rig.adapter.inspect(|e| {
            assert_eq!(e.free_resources().1, usize::from(e.config.max_host_qng));
            assert_eq!(e.carriers_pending(), 0);
        });
    }

    #[test]
    fn silent_risc_times_out() {
        let rig = rig(WideChip::Asc38C0800);
        rig.chip.lock().unwrap().stall_idle(true);

        assert_eq!(rig.adapter.reset_bus(), ResetStatus::Error);
        assert_eq!(rig.adapter.last_error(), Some(LibErrorCode::IdleCommandTimeout));
    }
}
