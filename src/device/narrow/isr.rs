//! Interrupt service and the done list.

use tracing::{debug, trace, warn};

use crate::device::{
    constants::{inquiry, opcode, qd, qhsta},
    error::LibErrorCode,
    negotiation::{Inquiry, Merge, Transition},
    scsi::{CompletionStatus, RawStatus},
};

use super::{
    constants::{ascv, cc, ciw, csw, host_flag, lram, qc, qs, risc_flag, slot, INT_ACK_RETRIES, QLINK_END},
    engine::NarrowEngine,
    lram::qaddr,
    queue::DoneInfo,
};

/// Reads of the RISC flag while it is still raising an interrupt.
const GEN_INT_POLL: u32 = 0x7FFF;

/// What one pass over the done list found.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum QDone {
    /// The done list is empty.
    Empty,
    /// One request was taken off the list.
    Harvested,
    /// The queue structures are corrupted. Stop harvesting.
    Fatal,
}

impl NarrowEngine {
    pub(super) fn isr(&mut self) -> bool {
        let status = self.port.status();

        if status & (csw::INT_PENDING | csw::SCSI_RESET_LATCH) == 0 {
            return false;
        }

        self.stats.interrupts += 1;

        if status & csw::SCSI_RESET_LATCH != 0 {
            self.handle_reset_latch();
            return true;
        }

        let ctrl = self.port.control();
        let mut saved_ctrl =
            ctrl & !(cc::SCSI_RESET | cc::CHIP_RESET | cc::SINGLE_STEP | cc::DIAG | cc::TEST);

        let saved_addr = self.port.lram_addr();
        let saved_flag = self.port.read_byte(ascv::HOST_FLAG_B) & !host_flag::IN_ISR;
        self.port
            .write_byte(ascv::HOST_FLAG_B, saved_flag | host_flag::IN_ISR);

        self.ack_interrupt();

        if status & csw::HALTED != 0 && ctrl & cc::SINGLE_STEP != 0 {
            self.chip_halted();
            saved_ctrl &= !cc::HALT;
        }

        self.drain_done_list();

        self.port.write_byte(ascv::HOST_FLAG_B, saved_flag);
        self.port.set_lram_addr(saved_addr);
        self.port.set_control(saved_ctrl);

        true
    }

    fn ack_interrupt(&self) {
        let flag = self.port.read_byte(ascv::HOST_FLAG_B) & !host_flag::ACK_INT;

        for _ in 0..GEN_INT_POLL {
            if self.port.read_byte(ascv::RISC_FLAG_B) & risc_flag::GEN_INT == 0 {
                break;
            }
        }

        self.port
            .write_byte(ascv::HOST_FLAG_B, flag | host_flag::ACK_INT);
        self.port.set_status(ciw::INT_ACK);

        for _ in 0..INT_ACK_RETRIES {
            if self.port.status() & csw::INT_PENDING == 0 {
                break;
            }
            self.port.set_status(ciw::INT_ACK);
        }

        self.port.write_byte(ascv::HOST_FLAG_B, flag);
    }

    /// Harvest until the done list is empty or found corrupted.
    pub(super) fn drain_done_list(&mut self) {
        loop {
            match self.isr_qdone() {
                QDone::Harvested => continue,
                QDone::Empty => break,
                QDone::Fatal => {
                    warn!("narrow done list corrupted, harvesting stopped");
                    break;
                }
            }
        }
    }

    /// Take the request after the host's done tail off the done list.
    pub(super) fn isr_qdone(&mut self) -> QDone {
        let done_tail = self.port.read_word(ascv::DONE_Q_TAIL_W) as u8;
        let q_no = self.port.read_byte(qaddr(done_tail) + slot::FWD);

        if q_no == QLINK_END {
            return QDone::Empty;
        }

        self.port.write_word(ascv::DONE_Q_TAIL_W, u16::from(q_no));

        let info = DoneInfo::read(&self.port, q_no);
        self.port.write_byte(
            qaddr(q_no) + slot::STATUS,
            info.q_status & !(qs::READY | qs::ABORTED),
        );

        let tid = info.target_ix & 7;
        let ti = usize::from(tid);
        let bit = 1u8 << tid;
        let mut n_used = 1u8;

        if info.cntl & qc::SG_HEAD != 0 {
            let mut q = q_no;

            for _ in 0..info.sg_queue_cnt {
                q = self.port.read_byte(qaddr(q) + slot::FWD);

                if q == QLINK_END {
                    self.set_error(LibErrorCode::SgQLinks);
                    self.fail(&info, qhsta::D_QDONE_SG_LIST_CORRUPTED);
                    return QDone::Fatal;
                }

                self.port.write_byte(qaddr(q) + slot::STATUS, qs::FREE);
            }

            n_used += info.sg_queue_cnt;
            self.port.write_word(ascv::DONE_Q_TAIL_W, u16::from(q));
        }

        if self.queue_full_or_busy & bit != 0 {
            let active = self
                .port
                .read_byte(lram::QADR_BEG + u16::from(info.target_ix));

            if active < self.max_dvc_qng[ti] {
                let busy = self.port.read_byte(ascv::SCSIBUSY_B) & !bit;
                self.port.write_byte(ascv::SCSIBUSY_B, busy);
                self.queue_full_or_busy &= !bit;
                debug!("target {tid} accepts commands again");
            }
        }

        if self.cur_total_qng < n_used {
            self.set_error(LibErrorCode::CurQng);
            self.fail(&info, info.host_stat);
            return QDone::Fatal;
        }

        self.cur_total_qng -= n_used;
        self.cur_dvc_qng[ti] = self.cur_dvc_qng[ti].saturating_sub(1);

        if info.srb_ptr == 0 || info.q_status & qs::ABORTED != 0 {
            trace!("slot {q_no} was aborted, dropping");
            return QDone::Harvested;
        }

        if info.q_status != qs::DONE {
            self.set_error(LibErrorCode::QStatus);
            self.fail(&info, info.host_stat);
            return QDone::Fatal;
        }

        let mut raw = RawStatus {
            done: info.done_stat,
            host: info.host_stat,
            scsi: info.scsi_stat,
            residual: info.remain_bytes.saturating_add(u32::from(info.extra_bytes)),
            sense_len: info.sense_len,
        };

        if raw.done == qd::WITH_ERROR {
            match raw.host {
                qhsta::M_DATA_OVER_RUN if info.cntl & (qc::DATA_IN | qc::DATA_OUT) == 0 => {
                    raw.done = qd::NO_ERROR;
                    raw.host = qhsta::NO_ERROR;
                }
                qhsta::M_HUNG_REQ_SCSI_BUS_RESET => self.reset_hung_bus(),
                _ => {}
            }
        }

        self.finish(info.srb_ptr, raw);
        QDone::Harvested
    }

    /// Complete request `handle` from the RISC's status bytes.
    fn finish(&mut self, handle: u32, raw: RawStatus) {
        let Some(pending) = self.pending.get(&handle) else {
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        let request = &pending.request;
        let status = raw.classify(request.data.len());

        let probe = (request.opcode() == opcode::INQUIRY
            && request.lun == 0
            && request.cdb.get(1).copied().unwrap_or(0) & inquiry::EVPD_AND_CMDDT == 0)
            .then(|| match status {
                CompletionStatus::Good { residual } => {
                    let len = request.data.len().saturating_sub(u64::from(residual));
                    let max = usize::try_from(len).unwrap_or(usize::MAX).min(inquiry::CLOCKING_LEN);

                    Some((request.target, request.data.read_prefix(&self.dma, max)))
                }
                _ => None,
            })
            .flatten();

        if let Some((tid, data)) = probe {
            self.inquiry_handling(tid, &data);
        }

        self.complete(handle, status);
    }

    /// Complete the request of a corrupted slot with an error.
    fn fail(&mut self, info: &DoneInfo, host_stat: u8) {
        if info.srb_ptr == 0 {
            return;
        }

        self.complete(
            info.srb_ptr,
            CompletionStatus::Error {
                done_status: qd::WITH_ERROR,
                host_status: host_stat,
                scsi_status: info.scsi_stat,
            },
        );
    }

    /// Adjust negotiation and queueing of `tid` to what its INQUIRY data
    /// claims.
    pub(super) fn inquiry_handling(&mut self, tid: u8, data: &[u8]) {
        let Some(inq) = Inquiry::parse(data) else {
            return;
        };

        let caps = self.negotiation.evaluate(tid, &inq);
        let change = self.negotiation.update(tid, caps, Merge::Replace);

        if change.tagqng == Transition::Unchanged {
            return;
        }

        let ti = usize::from(tid);
        let tagged = self.negotiation.tagqng_able as u8;

        self.max_dvc_qng[ti] = if change.tagqng == Transition::Enabled {
            self.config.max_tag_qng[ti]
        } else {
            self.config.max_dvc_qng
        };

        self.port
            .write_byte(ascv::DISC_ENABLE_B, self.config.disc_enable as u8);
        self.port.write_byte(ascv::USE_TAGGED_QNG_B, tagged);
        self.port.write_byte(ascv::CAN_TAGGED_QNG_B, tagged);
        self.port
            .write_byte(ascv::MAX_DVC_QNG_BEG + u16::from(tid), self.max_dvc_qng[ti]);

        debug!(
            "target {tid}: tag queuing {:?}, depth {}",
            change.tagqng, self.max_dvc_qng[ti]
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::device::{
        adapter::{HostAdapter, SubmitStatus},
        constants::opcode,
        host_memory::DmaSegment,
        narrow::testutils::{inquiry_request, read_10, rig, Rig},
        negotiation::tid_bit,
        scsi::{CompletionStatus, DataBuffer, DataDirection, RequestId, ScsiRequest},
        sim_target::{Outcome, SimTarget},
    };

    #[test]
    fn quiet_chip_is_not_claimed() {
        let Rig { adapter, .. } = rig();

        assert!(!adapter.service_interrupt());
        assert_eq!(adapter.stats().interrupts, 0);
    }

    #[test]
    fn inquiry_enables_tag_queuing() {
        let rig = rig();
        rig.attach(3, SimTarget::disk());

        assert_eq!(
            rig.adapter.submit(inquiry_request(RequestId(1), 3, 0x8000)),
            SubmitStatus::Accepted
        );
        rig.settle();

        let done = rig.handler.take_completions();
        assert_eq!(done.len(), 1);
        assert!(done[0].status.is_good());

        rig.adapter.inspect(|e| {
            assert_ne!(e.negotiation().tagqng_able & tid_bit(3), 0);
            assert_eq!(e.max_dvc_qng(3), e.config.max_tag_qng[3]);
        });
    }

    #[test]
    fn check_condition_returns_sense() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::CheckCondition);
        rig.attach(0, disk);

        let sense = DmaSegment::new(0x9000, 32);
        rig.adapter
            .submit(read_10(RequestId(5), 0, 0x8000, 512).with_sense(sense));
        rig.settle();

        let done = rig.handler.take_completions();
        assert_eq!(
            done[0].status,
            CompletionStatus::CheckCondition { sense_len: 18 }
        );
        assert_eq!(rig.read_mem(0x9000, 3), vec![0x70, 0, 0x02]);
        assert_eq!(rig.adapter.outstanding(), 0);
    }

    #[test]
    fn busy_and_selection_timeout_are_reported() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::Busy);
        rig.attach(0, disk);

        rig.adapter.submit(read_10(RequestId(1), 0, 0x8000, 512));
        rig.adapter.submit(read_10(RequestId(2), 6, 0x8000, 512));
        rig.settle();

        let mut done = rig.handler.take_completions();
        done.sort_by_key(|c| c.id);

        assert_eq!(done[0].status, CompletionStatus::Busy { scsi_status: 0x08 });
        assert_eq!(done[1].status, CompletionStatus::SelectionTimeout);
    }

    #[test]
    fn underrun_is_a_good_completion_with_residual() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::Underrun(100));
        rig.attach(0, disk);

        rig.adapter.submit(read_10(RequestId(1), 0, 0x8000, 512));
        rig.settle();

        assert_eq!(
            rig.handler.take_completions()[0].status,
            CompletionStatus::Good { residual: 100 }
        );
    }

    #[test]
    fn overrun_without_data_phase_is_not_an_error() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::Overrun);
        disk.push_outcome(Outcome::Overrun);
        rig.attach(0, disk);

        rig.adapter
            .submit(ScsiRequest::new(RequestId(1), 0, 0, &[opcode::TEST_UNIT_READY, 0, 0, 0, 0, 0]));
        rig.adapter.submit(read_10(RequestId(2), 0, 0x8000, 512));
        rig.settle();

        let mut done = rig.handler.take_completions();
        done.sort_by_key(|c| c.id);

        assert_eq!(done[0].status, CompletionStatus::Good { residual: 0 });
        assert!(matches!(
            done[1].status,
            CompletionStatus::Error { host_status: 0x12, .. }
        ));
    }

    #[test]
    fn harvesting_twice_changes_nothing() {
        let rig = rig();
        rig.attach(0, SimTarget::disk());

        rig.adapter.submit(read_10(RequestId(1), 0, 0x8000, 512));
        rig.settle();
        assert_eq!(rig.handler.take_completions().len(), 1);

        rig.adapter.inspect(|e| {
            assert_eq!(e.cur_total_qng(), 0);
        });

        // A spurious interrupt finds the done list empty.
        rig.chip.lock().unwrap().raise_interrupt();
        assert!(rig.adapter.service_interrupt());
        assert!(rig.handler.take_completions().is_empty());
        rig.adapter.inspect(|e| {
            assert_eq!(e.free_queue_count(), Some(usize::from(e.max_total_qng())));
        });
    }

    #[test]
    fn data_reaches_every_segment() {
        let rig = rig();
        rig.attach(1, SimTarget::disk());

        let request = ScsiRequest::new(RequestId(1), 1, 0, &[opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 2, 0])
            .with_data(
                DataDirection::In,
                DataBuffer::ScatterGather(vec![
                    DmaSegment::new(0x8000, 4),
                    DmaSegment::new(0xA000, 4),
                ]),
            );

        rig.adapter.submit(request);
        rig.settle();

        assert!(rig.handler.take_completions()[0].status.is_good());
        assert_eq!(rig.read_mem(0xA000, 4), vec![5, 4, 7, 6]);
    }
}
