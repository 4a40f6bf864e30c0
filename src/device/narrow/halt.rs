//! # RISC Halt Handling
//!
//! The narrow microcode stops and asks the host for help whenever a
//! decision needs more than the RISC knows: answering an extended message,
//! preparing autosense, backing off a full target or copying more
//! scatter-gather entries. The RISC halts with a code in `HALTCODE_W` and
//! the slot it works on in `CURCDB_B`; the host patches LRAM, clears the
//! code and lets the RISC continue.

use tracing::{debug, trace, warn};

use crate::device::{
    adapter::AsyncEvent,
    constants::{msg, sam},
    error::LibErrorCode,
    negotiation::tid_bit,
};

use super::{
    constants::{
        ascv, halt, lram, qc, qs, slot, ASYN_SDTR_DATA, MAX_SG_LIST, MIN_TAGGED_CMD, QLINK_END,
        SYN_MAX_OFFSET, TAG_CODE_SENSE_MASK,
    },
    engine::NarrowEngine,
    lram::qaddr,
    queue::ExtMsg,
};

impl NarrowEngine {
    /// Serve the halt the RISC is waiting in.
    pub(super) fn chip_halted(&mut self) {
        let code = self.port.read_word(ascv::HALTCODE_W);
        let q_no = self.port.read_byte(ascv::CURCDB_B);
        let tix = self.port.read_byte(qaddr(q_no) + slot::TARGET_IX);
        let tid = tix & 7;

        self.stats.halts += 1;
        trace!("narrow RISC halted: code {code:#06x}, slot {q_no}, target {tid}");

        match code {
            halt::EXTMSG_IN => self.halt_extmsg_in(q_no, tid),
            halt::CHK_CONDITION => self.halt_check_condition(q_no, tid),
            halt::SDTR_REJECTED => self.halt_sdtr_rejected(q_no, tid),
            halt::SS_QUEUE_FULL => self.halt_queue_full(q_no, tid, tix),
            halt::HOST_COPY_SG_LIST_TO_RISC => self.halt_copy_sg_list(),
            halt::DISABLE_ASYN_USE_SYN_FIX | halt::ENABLE_ASYN_USE_SYN_FIX => {
                debug!("asynchronous transfer fix {code:#06x} for target {tid}");
            }
            _ => {
                warn!("unknown narrow halt code {code:#06x}");
                self.set_error(LibErrorCode::UnknownHalt);
            }
        }

        self.port.write_word(ascv::HALTCODE_W, 0);
    }

    fn cntl(&self, q_no: u8) -> u8 {
        self.port.read_byte(qaddr(q_no) + slot::CNTL)
    }

    fn set_cntl(&self, q_no: u8, cntl: u8) {
        self.port.write_byte(qaddr(q_no) + slot::CNTL, cntl);
    }

    /// Record the transfer agreement with `tid` for the microcode.
    fn set_chip_sdtr(&self, tid: u8, data: u8) {
        self.port
            .write_byte(ascv::SDTR_DONE_BEG + u16::from(tid), data);
    }

    fn forget_sdtr(&mut self, tid: u8) {
        let bit = tid_bit(tid);

        self.negotiation.sdtr_able &= !bit;
        self.negotiation.sdtr_done &= !bit;
        self.set_chip_sdtr(tid, ASYN_SDTR_DATA);
    }

    fn halt_extmsg_in(&mut self, q_no: u8, tid: u8) {
        let mut ext = ExtMsg::read(&self.port, ascv::MSGIN_BEG);
        let mut cntl = self.cntl(q_no);
        let bit = tid_bit(tid);

        if ext.is_sdtr() {
            let mut accept = true;

            if ext.req_ack_offset() > SYN_MAX_OFFSET {
                accept = false;
                ext.set_req_ack_offset(SYN_MAX_OFFSET);
            }

            if ext.xfer_period() < self.sdtr.min_period() || ext.xfer_period() > self.sdtr.max_period() {
                accept = false;
                ext.set_xfer_period(self.sdtr.min_period());
            }

            let period = ext.xfer_period();
            let offset = ext.req_ack_offset();
            let data = self.sdtr.sdtr_data(period, offset);

            if accept && data.is_none() {
                cntl |= qc::MSG_OUT;
                self.forget_sdtr(tid);
            }

            if offset == 0 {
                cntl &= !qc::MSG_OUT;
                self.forget_sdtr(tid);
                debug!("target {tid} asks for asynchronous transfers");
            } else if accept && cntl & qc::MSG_OUT != 0 {
                // The target answered our own request.
                cntl &= !qc::MSG_OUT;
                self.negotiation.sdtr_done |= bit;
                self.negotiation.sdtr_able |= bit;
                self.set_chip_sdtr(tid, data.unwrap_or(ASYN_SDTR_DATA));
                debug!("target {tid} agreed to period {period}, offset {offset}");
            } else {
                cntl |= qc::MSG_OUT;
                let data = self.msg_out_sdtr(period, offset);
                self.set_chip_sdtr(tid, data);
                self.negotiation.sdtr_done |= bit;
                self.negotiation.sdtr_able |= bit;
                debug!("counter offer to target {tid}: period {period}, offset {offset}");
            }
        } else if ext.is_wdtr() {
            ext.set_wdtr_width(0);
            ext.write(&self.port, ascv::MSGOUT_BEG);
            cntl |= qc::MSG_OUT;
        } else {
            ext.set_msg_type(msg::MESSAGE_REJECT);
            ext.write(&self.port, ascv::MSGOUT_BEG);
            cntl |= qc::MSG_OUT;
        }

        self.set_cntl(q_no, cntl);
    }

    fn halt_check_condition(&mut self, q_no: u8, tid: u8) {
        let bit = tid_bit(tid);
        let base = qaddr(q_no);
        let mut cntl = self.cntl(q_no) | qc::REQ_SENSE;

        if self.negotiation.sdtr_able & bit != 0 {
            self.negotiation.sdtr_done &= !bit;
            self.msg_out_init_sdtr(tid);
            cntl |= qc::MSG_OUT;
        }
        self.set_cntl(q_no, cntl);

        let tag_code = self.port.read_byte(base + slot::TAG_CODE) & TAG_CODE_SENSE_MASK;
        self.port.write_byte(base + slot::TAG_CODE, tag_code);

        let status = self.port.read_byte(base + slot::STATUS) | qs::READY | qs::BUSY;
        self.port.write_byte(base + slot::STATUS, status);

        let busy = self.port.read_byte(ascv::SCSIBUSY_B) & !(1u8 << tid);
        self.port.write_byte(ascv::SCSIBUSY_B, busy);
    }

    fn halt_sdtr_rejected(&mut self, q_no: u8, tid: u8) {
        if ExtMsg::read(&self.port, ascv::MSGOUT_BEG).is_sdtr() {
            debug!("target {tid} rejected SDTR, staying asynchronous");
            self.forget_sdtr(tid);
        }

        let cntl = self.cntl(q_no) & !qc::MSG_OUT;
        self.set_cntl(q_no, cntl);
    }

    fn halt_queue_full(&mut self, q_no: u8, tid: u8, tix: u8) {
        let ti = usize::from(tid);
        let bit = 1u8 << tid;
        let scsi_status = self.port.read_byte(qaddr(q_no) + slot::SCSI_STAT);
        let active = self.port.read_byte(lram::QADR_BEG + u16::from(tix));

        if active == 0 || self.cur_dvc_qng[ti] == 0 {
            return;
        }

        let busy = self.port.read_byte(ascv::SCSIBUSY_B) | bit;
        self.port.write_byte(ascv::SCSIBUSY_B, busy);
        self.queue_full_or_busy |= bit;

        if scsi_status == sam::TASK_SET_FULL && active > MIN_TAGGED_CMD {
            let depth = active - 1;

            self.max_dvc_qng[ti] = depth;
            self.port
                .write_byte(ascv::MAX_DVC_QNG_BEG + u16::from(tid), depth);
            self.events
                .async_event(AsyncEvent::QueueDepthReduced { target: tid, depth });

            debug!("target {tid} task set full, depth lowered to {depth}");
        }
    }

    /// Refill the scatter-gather queues of a request whose list is longer
    /// than its slots hold.
    fn halt_copy_sg_list(&mut self) {
        let q_no = self.port.read_byte(ascv::REQ_SG_LIST_QP);
        if q_no == QLINK_END {
            return;
        }

        let base = qaddr(q_no);
        let handle = self.port.read_dword(base + slot::SRB_PTR);

        let Some(pending) = self.pending.get(&handle) else {
            self.set_error(LibErrorCode::UnknownRequest);
            return;
        };

        let start = pending.next_sg_index;
        let count = pending.remain_sg.min(MAX_SG_LIST - 1);
        let entries = pending.request.data.segments()[start..start + count].to_vec();
        let more = pending.remain_sg > count;

        let first = self.port.read_byte(base + slot::FIRST_SG_WK_QP);
        self.port.write_byte(base + slot::SG_WK_QP, first);

        self.write_sg_queues(q_no, &entries, more);

        if let Some(pending) = self.pending.get_mut(&handle) {
            pending.next_sg_index += count;
            pending.remain_sg -= count;
        }

        self.port.write_byte(ascv::REQ_SG_LIST_QP, QLINK_END);
        self.stats.sg_continuations += 1;

        trace!("copied {count} more scatter-gather entries into slot {q_no}");
    }
}

#[cfg(test)]
mod tests {
    use crate::device::{
        adapter::{AsyncEvent, HostAdapter, SubmitStatus},
        constants::opcode,
        error::LibErrorCode,
        host_memory::DmaSegment,
        narrow::{
            constants::halt,
            queue::ExtMsg,
            testutils::{inquiry_request, read_10, rig},
        },
        negotiation::tid_bit,
        scsi::{CompletionStatus, DataBuffer, DataDirection, RequestId, ScsiRequest},
        sim_target::{Outcome, SimTarget},
    };

    #[test]
    fn sdtr_is_negotiated_down_to_what_the_target_accepts() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.min_period = 50;
        disk.max_offset = 8;
        rig.attach(2, disk);

        rig.adapter.submit(read_10(RequestId(1), 2, 0x8000, 512));
        rig.settle();

        assert!(rig.handler.take_completions()[0].status.is_good());
        rig.adapter.inspect(|e| {
            assert_ne!(e.negotiation().sdtr_done & tid_bit(2), 0);
            assert_eq!(e.port.read_byte(super::ascv::SDTR_DONE_BEG + 2), 0x48);
        });
        assert!(rig.adapter.stats().halts >= 1);
    }

    #[test]
    fn rejected_sdtr_falls_back_to_asynchronous() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.rejects_sdtr = true;
        rig.attach(4, disk);

        rig.adapter.submit(read_10(RequestId(1), 4, 0x8000, 512));
        rig.settle();

        assert!(rig.handler.take_completions()[0].status.is_good());
        rig.adapter.inspect(|e| {
            assert_eq!(e.negotiation().sdtr_able & tid_bit(4), 0);
            assert_eq!(e.port.read_byte(super::ascv::SDTR_DONE_BEG + 4), 0);
        });

        // No further negotiation is attempted.
        let halts = rig.adapter.stats().halts;
        rig.adapter.submit(read_10(RequestId(2), 4, 0x8000, 512));
        rig.settle();
        assert_eq!(rig.adapter.stats().halts, halts);
    }

    #[test]
    fn unsolicited_wdtr_is_answered_narrow() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.unsolicited_msg = Some(ExtMsg::wdtr(1).to_bytes());
        rig.attach(5, disk);

        // The first command negotiates SDTR, the target speaks up on the
        // second.
        for i in 0..2 {
            rig.adapter.submit(read_10(RequestId(i), 5, 0x8000, 512));
            rig.settle();
        }

        let done = rig.handler.take_completions();
        assert!(done.iter().all(|c| c.status.is_good()));
        rig.adapter.inspect(|e| {
            let out = ExtMsg::read(&e.port, super::ascv::MSGOUT_BEG);
            assert!(out.is_wdtr());
            assert_eq!(out.xfer_period(), 0);
        });
    }

    #[test]
    fn unknown_messages_are_rejected() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.rejects_sdtr = true;
        disk.unsolicited_msg = Some([0x01, 0x05, 0x04, 0, 0, 0, 0, 0]);
        rig.attach(5, disk);

        for i in 0..2 {
            rig.adapter.submit(read_10(RequestId(i), 5, 0x8000, 512));
            rig.settle();
        }

        assert_eq!(rig.handler.take_completions().len(), 2);
        rig.adapter.inspect(|e| {
            let out = ExtMsg::read(&e.port, super::ascv::MSGOUT_BEG);
            assert_eq!(out.msg_type(), crate::device::constants::msg::MESSAGE_REJECT);
        });
    }

    #[test]
    fn unknown_halt_code_is_recorded() {
        let rig = rig();
        rig.chip.lock().unwrap().inject_halt(0x1234);

        assert!(rig.adapter.service_interrupt());
        assert_eq!(rig.adapter.last_error(), Some(LibErrorCode::UnknownHalt));
        assert_eq!(rig.chip.lock().unwrap().read_lram_word(super::ascv::HALTCODE_W), 0);
    }

    #[test]
    fn asynchronous_fix_halts_are_acknowledged() {
        let rig = rig();
        rig.chip
            .lock()
            .unwrap()
            .inject_halt(halt::ENABLE_ASYN_USE_SYN_FIX);

        assert!(rig.adapter.service_interrupt());
        assert_eq!(rig.adapter.last_error(), None);
    }

    #[test]
    fn task_set_full_lowers_the_depth() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::QueueFull);
        rig.attach(1, disk);

        assert_eq!(
            rig.adapter.submit(inquiry_request(RequestId(100), 1, 0x8000)),
            SubmitStatus::Accepted
        );
        rig.settle();
        rig.handler.take_completions();

        for i in 0..10 {
            assert_eq!(
                rig.adapter.submit(read_10(RequestId(i), 1, 0x8000, 512)),
                SubmitStatus::Accepted
            );
        }
        rig.settle();

        let done = rig.handler.take_completions();
        assert_eq!(done.len(), 10);
        assert!(done.iter().all(|c| c.status.is_good()));
        assert_eq!(
            rig.handler.take_async_events(),
            vec![AsyncEvent::QueueDepthReduced { target: 1, depth: 9 }]
        );
        rig.adapter.inspect(|e| {
            assert_eq!(e.max_dvc_qng(1), 9);
            assert_eq!(e.queue_full_or_busy, 0);
        });
    }

    #[test]
    fn long_scatter_gather_lists_are_continued() {
        let rig = rig();
        rig.attach(0, SimTarget::disk());

        let segments: Vec<DmaSegment> = (0..300)
            .map(|i| DmaSegment::new(0x10000 + i * 0x10, 0x10))
            .collect();
        let request = ScsiRequest::new(RequestId(1), 0, 0, &[opcode::WRITE_10, 0, 0, 0, 0, 0, 0, 0, 10, 0])
            .with_data(DataDirection::Out, DataBuffer::ScatterGather(segments.clone()));

        assert_eq!(rig.adapter.submit(request), SubmitStatus::Accepted);
        rig.adapter.inspect(|e| assert_eq!(e.cur_total_qng(), 38));
        rig.settle();

        assert_eq!(
            rig.handler.take_completions()[0].status,
            CompletionStatus::Good { residual: 0 }
        );
        assert_eq!(rig.adapter.stats().sg_continuations, 1);
        assert_eq!(rig.executed().last().map(|c| c.segments.clone()), Some(segments));
        rig.adapter.inspect(|e| {
            assert_eq!(e.cur_total_qng(), 0);
            assert_eq!(e.free_queue_count(), Some(usize::from(e.max_total_qng())));
        });
    }
}
