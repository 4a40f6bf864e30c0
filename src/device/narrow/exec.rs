//! Request submission.
//!
//! A request occupies one head slot plus one scatter-gather queue per seven
//! list entries after the first. Slots are taken from the front of the free
//! chain and handed to the RISC by flipping the head slot's status to
//! ready, which is always the last write.

use tracing::{debug, trace};

use crate::device::{
    adapter::SubmitStatus,
    constants::{opcode, tag, MAX_NARROW_TID},
    error::RequestError,
    host_memory::DmaSegment,
    negotiation::tid_bit,
    scsi::{DataDirection, ScsiRequest},
};

use super::{
    constants::{
        ascv, qc, qcsg, qs, slot, MAX_HOST_SG_LIST, MAX_SG_LIST, MIN_FREE_Q, QLINK_END,
        SG_LIST_PER_Q,
    },
    engine::{NarrowEngine, Pending},
    lram::qaddr,
    queue::{ExtMsg, ReadyQueue, SgQueueHeader},
    sdtr::SdtrTable,
};

/// Slots needed for a request with `entries` data segments.
#[must_use]
pub fn queues_required(entries: usize) -> u8 {
    match entries.min(MAX_SG_LIST) {
        0 | 1 => 1,
        n => 1 + (n - 1).div_ceil(SG_LIST_PER_Q) as u8,
    }
}

impl NarrowEngine {
    pub(super) fn execute(&mut self, request: ScsiRequest) -> SubmitStatus {
        if self.offline {
            return SubmitStatus::Error(RequestError::Offline);
        }

        if let Err(e) = request.validate(MAX_NARROW_TID, MAX_HOST_SG_LIST) {
            return SubmitStatus::Error(e);
        }

        if self.handles.contains_key(&request.id) {
            return SubmitStatus::Error(RequestError::DuplicateId);
        }

        let tid = request.target;
        let ti = usize::from(tid);
        let segments = request.data.segments();
        let n_q = queues_required(segments.len());

        let usable = self.max_total_qng.saturating_sub(MIN_FREE_Q);
        if n_q > usable {
            return SubmitStatus::Error(RequestError::TooManyQueues {
                needed: n_q,
                max: usable,
            });
        }

        let mut head = ReadyQueue {
            cntl: match request.direction {
                DataDirection::None => 0,
                DataDirection::In => qc::DATA_IN,
                DataDirection::Out => qc::DATA_OUT,
            },
            target_id: 1 << tid,
            target_lun: request.lun,
            target_ix: tid | (request.lun << 3),
            cdb_len: request.cdb.len() as u8,
            tag_code: if self.cur_dvc_qng[ti] > 0 && self.req_count[ti] % 255 == 0 {
                tag::ORDERED
            } else {
                tag::SIMPLE
            },
            ..ReadyQueue::default()
        };

        if let Some(sense) = request.sense {
            head.sense_addr = sense.addr;
            head.sense_len = sense.len as u8;
        }

        if let Some(first) = segments.first() {
            head.data_addr = first.addr;
            head.data_cnt = first.len;

            if segments.len() > 1 {
                head.cntl |= qc::SG_HEAD;
            }
        }

        // Renegotiate before fetching sense, the target may have lost
        // its transfer agreement.
        if request.opcode() == opcode::REQUEST_SENSE
            && self.negotiation.sdtr_able & tid_bit(tid) != 0
        {
            self.negotiation.sdtr_done &= !tid_bit(tid);
            self.msg_out_init_sdtr(tid);
            head.cntl |= qc::MSG_OUT | qc::URGENT;
        }

        let urgent = head.cntl & qc::URGENT != 0;

        if !self.has_room(tid, n_q, urgent) {
            self.stats.busy += 1;
            return SubmitStatus::Busy;
        }

        let free_head = self.port.read_word(ascv::FREE_Q_HEAD_W) as u8;
        let Some(next) = self.alloc_free_queues(free_head, n_q) else {
            self.stats.busy += 1;
            return SubmitStatus::Busy;
        };

        if n_q > 1 {
            self.last_q_shortage = 0;
        }

        let handle = self.alloc_handle();
        head.srb_ptr = handle;
        head.sg_queue_cnt = n_q - 1;

        let copied = segments.len().min(MAX_SG_LIST);
        let remain = segments.len() - copied;
        let more = remain > 0;

        if n_q > 1 {
            self.write_sg_queues(free_head, &segments[1..copied], more);
        }

        self.put_ready_queue(free_head, head, &request.cdb);
        self.port.write_word(ascv::FREE_Q_HEAD_W, u16::from(next));

        self.cur_total_qng += n_q;
        self.cur_dvc_qng[ti] += 1;
        self.req_count[ti] = self.req_count[ti].wrapping_add(1);
        self.stats.submitted += 1;

        trace!(
            "request {} -> slot {free_head} ({n_q} queues, tag {:#04x})",
            request.id,
            head.tag_code
        );

        self.events.submitted(request.id);
        self.handles.insert(request.id, handle);
        self.pending.insert(
            handle,
            Pending {
                next_sg_index: copied,
                remain_sg: remain,
                request,
            },
        );

        SubmitStatus::Accepted
    }

    /// Whether `n_q` slots may be taken for target `tid`.
    ///
    /// Two slots always stay free. A single slot request also leaves room
    /// for the largest multi-slot request that was recently turned away, so
    /// that a stream of small requests cannot starve it. Urgent requests
    /// skip the per target gates.
    fn has_room(&mut self, tid: u8, n_q: u8, urgent: bool) -> bool {
        let bit = 1u8 << tid;

        if !urgent && (self.unit_not_ready | self.queue_full_or_busy) & bit != 0 {
            return false;
        }

        let mut used = u16::from(self.cur_total_qng) + u16::from(MIN_FREE_Q);
        if n_q == 1 {
            used += u16::from(self.last_q_shortage);
        }

        if used + u16::from(n_q) <= u16::from(self.max_total_qng) {
            let ti = usize::from(tid);
            return urgent || self.cur_dvc_qng[ti] < self.max_dvc_qng[ti];
        }

        if n_q > 1 && n_q > self.last_q_shortage {
            debug!("short of {n_q} queues, reserving them");
            self.last_q_shortage = n_q;
        }

        false
    }

    /// Walk `n_q` slots down the free chain starting at `head`. Returns the
    /// slot after them without changing anything.
    fn alloc_free_queues(&self, head: u8, n_q: u8) -> Option<u8> {
        let mut q = head;

        for _ in 0..n_q {
            let [status, _] = self.port.read_word(qaddr(q) + slot::STATUS).to_le_bytes();
            let fwd = self.port.read_byte(qaddr(q) + slot::FWD);

            if status & qs::READY != 0 || fwd == QLINK_END {
                return None;
            }
            q = fwd;
        }

        Some(q)
    }

    /// Fill the scatter-gather queues following `head_q` with `entries`.
    ///
    /// The microcode keeps entry counts one short. The last queue is marked
    /// `MORE` if the host still holds entries for a later pass.
    pub(super) fn write_sg_queues(&self, head_q: u8, entries: &[DmaSegment], more: bool) {
        let chunks: Vec<&[DmaSegment]> = entries.chunks(SG_LIST_PER_Q).collect();
        let mut prev = head_q;

        for (i, chunk) in chunks.iter().enumerate() {
            let q = self.port.read_byte(qaddr(prev) + slot::FWD);
            let stored = chunk.len() as u8 - 1;

            let cntl = qcsg::SG_XFER_LIST
                | match (i + 1 == chunks.len(), more) {
                    (false, _) => 0,
                    (true, false) => qcsg::SG_XFER_END,
                    (true, true) => qcsg::SG_XFER_MORE,
                };

            let pairs: Vec<(u32, u32)> = chunk.iter().map(|s| (s.addr, s.len)).collect();

            SgQueueHeader {
                seq_no: i as u8 + 1,
                q_no: q,
                cntl,
                sg_head_qp: head_q,
                sg_list_cnt: stored,
                sg_cur_list_cnt: stored,
            }
            .write(&self.port, q, &pairs);

            prev = q;
        }
    }

    /// Write the head slot and mark it ready.
    fn put_ready_queue(&mut self, q_no: u8, mut head: ReadyQueue, cdb: &[u8]) {
        let tid = head.target_ix & 7;
        let bit = tid_bit(tid);

        if self.negotiation.sdtr_able & bit != 0 && self.negotiation.sdtr_done & bit == 0 {
            self.msg_out_init_sdtr(tid);
            head.cntl |= qc::MSG_OUT | qc::URGENT;
        }

        if self.negotiation.tagqng_able & bit == 0 {
            head.tag_code &= !tag::SIMPLE;
        }

        let base = qaddr(q_no);

        let mut cdb = cdb.to_vec();
        if cdb.len() % 2 != 0 {
            cdb.push(0);
        }
        self.port.write_block(base + slot::CDB_BEG, &cdb);

        head.write(&self.port, q_no);
        self.port
            .write_word(base + slot::STATUS, (u16::from(q_no) << 8) | u16::from(qs::READY));
    }

    /// Put an SDTR with the target's initial transfer parameters into the
    /// message-out buffer.
    pub(super) fn msg_out_init_sdtr(&self, tid: u8) -> u8 {
        let data = self.port.read_byte(ascv::SDTR_DATA_BEG + u16::from(tid));

        self.msg_out_sdtr(self.sdtr.period_of(data), SdtrTable::offset_of(data))
    }

    /// Put an SDTR into the message-out buffer. Returns the SDTR data the
    /// message encodes, asynchronous if the period is too slow.
    pub(super) fn msg_out_sdtr(&self, period: u8, offset: u8) -> u8 {
        let (offset, data) = match self.sdtr.sdtr_data(period, offset) {
            Some(data) => (offset, data),
            None => (0, 0),
        };

        ExtMsg::sdtr(period, offset).write(&self.port, ascv::MSGOUT_BEG);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        adapter::HostAdapter,
        config::AdapterConfig,
        narrow::testutils::{inquiry_request, read_10, rig, rig_with, Rig},
        scsi::{DataBuffer, RequestId},
        sim_target::{Outcome, SimTarget},
    };
    use proptest::prelude::*;

    fn scattered_read(id: u64, tid: u8, entries: u32) -> ScsiRequest {
        let segments = (0..entries)
            .map(|i| DmaSegment::new(0x10000 + i * 0x200, 0x200))
            .collect();

        ScsiRequest::new(RequestId(id), tid, 0, &[opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, entries as u8, 0])
            .with_data(DataDirection::In, DataBuffer::ScatterGather(segments))
    }

    #[test]
    fn queue_counts() {
        assert_eq!(queues_required(0), 1);
        assert_eq!(queues_required(1), 1);
        assert_eq!(queues_required(2), 2);
        assert_eq!(queues_required(8), 2);
        assert_eq!(queues_required(9), 3);
        assert_eq!(queues_required(22), 4);
        assert_eq!(queues_required(255), 38);
        assert_eq!(queues_required(1024), 38);
    }

    #[test]
    fn malformed_requests_never_reach_the_chip() {
        let Rig { adapter, .. } = rig();

        assert_eq!(
            adapter.submit(read_10(RequestId(1), 8, 0x1000, 512)),
            SubmitStatus::Error(RequestError::InvalidTarget {
                target: 8,
                max: MAX_NARROW_TID
            })
        );
        assert_eq!(
            adapter.submit(
                ScsiRequest::new(RequestId(2), 0, 0, &[opcode::READ_10; 10])
                    .with_data(DataDirection::In, DataBuffer::ScatterGather(vec![
                        DmaSegment::new(0x1000, 512);
                        MAX_HOST_SG_LIST + 1
                    ]))
            ),
            SubmitStatus::Error(RequestError::ScatterGatherTooLong {
                len: MAX_HOST_SG_LIST + 1,
                max: MAX_HOST_SG_LIST
            })
        );
        assert_eq!(adapter.inspect(|e| e.cur_total_qng()), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let rig = rig();
        rig.attach(0, {
            let mut disk = SimTarget::disk();
            disk.push_outcome(Outcome::Hold);
            disk
        });

        assert_eq!(
            rig.adapter.submit(read_10(RequestId(7), 0, 0x2000, 512)),
            SubmitStatus::Accepted
        );
        assert_eq!(
            rig.adapter.submit(read_10(RequestId(7), 0, 0x2000, 512)),
            SubmitStatus::Error(RequestError::DuplicateId)
        );
    }

    #[test]
    fn untagged_targets_are_limited_to_their_depth() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        for _ in 0..8 {
            disk.push_outcome(Outcome::Hold);
        }
        rig.attach(1, disk);

        let depth = rig.adapter.inspect(|e| e.max_dvc_qng(1));
        for i in 0..u64::from(depth) {
            assert_eq!(
                rig.adapter.submit(read_10(RequestId(i), 1, 0x2000, 512)),
                SubmitStatus::Accepted
            );
        }

        assert_eq!(
            rig.adapter.submit(read_10(RequestId(99), 1, 0x2000, 512)),
            SubmitStatus::Busy
        );
        assert_eq!(rig.adapter.stats().busy, 1);
    }

    #[test]
    fn scatter_gather_lists_are_spread_over_queues() {
        let rig = rig();
        rig.attach(2, SimTarget::disk());

        let segments: Vec<DmaSegment> = (0..22)
            .map(|i| DmaSegment::new(0x10000 + i * 0x200, 0x200))
            .collect();

        let request = ScsiRequest::new(RequestId(1), 2, 0, &[opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 22, 0])
            .with_data(DataDirection::In, DataBuffer::ScatterGather(segments.clone()));

        assert_eq!(rig.adapter.submit(request), SubmitStatus::Accepted);
        assert_eq!(rig.adapter.inspect(|e| e.cur_total_qng()), 4);

        rig.settle();

        let completions = rig.handler.take_completions();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].status.is_good());

        let executed = rig.executed();
        assert_eq!(executed.last().map(|c| c.segments.clone()), Some(segments));
        assert_eq!(rig.adapter.inspect(|e| e.cur_total_qng()), 0);
    }

    #[test]
    fn requests_larger_than_the_slot_pool_are_refused() {
        let rig = rig_with(AdapterConfig {
            max_host_qng: 8,
            ..AdapterConfig::narrow()
        });
        rig.attach(0, SimTarget::disk());

        for _ in 0..3 {
            assert_eq!(
                rig.adapter.submit(scattered_read(1, 0, 50)),
                SubmitStatus::Error(RequestError::TooManyQueues { needed: 8, max: 6 })
            );
        }
        assert_eq!(rig.adapter.stats().busy, 0);
        assert_eq!(rig.adapter.outstanding(), 0);

        assert_eq!(rig.adapter.submit(scattered_read(2, 0, 36)), SubmitStatus::Accepted);
        assert_eq!(rig.adapter.inspect(|e| e.cur_total_qng()), 6);
        rig.settle();

        let done = rig.handler.take_completions();
        assert_eq!(done.len(), 1);
        assert!(done[0].status.is_good());
    }

    #[test]
    fn every_255th_request_to_a_busy_target_is_ordered() {
        let rig = rig();
        let mut disk = SimTarget::disk();
        disk.push_outcome(Outcome::Hold);
        rig.attach(0, disk);

        rig.adapter.submit(inquiry_request(RequestId(1), 0, 0x8000));
        rig.settle();
        assert!(rig.handler.take_completions()[0].status.is_good());

        assert_eq!(
            rig.adapter.submit(read_10(RequestId(2), 0, 0x9000, 512)),
            SubmitStatus::Accepted
        );
        rig.settle();
        assert_eq!(rig.adapter.inspect(|e| e.cur_dvc_qng(0)), 1);

        for id in 3..513 {
            assert_eq!(
                rig.adapter.submit(read_10(RequestId(id), 0, 0x9000, 512)),
                SubmitStatus::Accepted
            );
            rig.settle();
        }
        assert_eq!(rig.handler.take_completions().len(), 510);

        let executed = rig.executed();
        let tags: Vec<u8> = executed[executed.len() - 510..]
            .iter()
            .map(|c| c.tag_code)
            .collect();

        assert!(tags.iter().all(|&t| t == tag::SIMPLE || t == tag::ORDERED));
        for window in tags.chunks(255) {
            assert_eq!(window.iter().filter(|&&t| t == tag::ORDERED).count(), 1);
        }
        assert_eq!(tags[253], tag::ORDERED);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Submit { tid: u8, entries: u32, hold: bool },
        Release(u8),
        Abort(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (0..3u8, 1..60u32, any::<bool>())
                .prop_map(|(tid, entries, hold)| Step::Submit { tid, entries, hold }),
            1 => (0..3u8).prop_map(Step::Release),
            1 => any::<usize>().prop_map(Step::Abort),
        ]
    }

    proptest! {
        #[test]
        fn queues_hold_every_list_entry(entries in 1..=MAX_SG_LIST) {
            let n_q = usize::from(queues_required(entries));

            prop_assert_eq!(n_q, 1 + (entries - 1).div_ceil(SG_LIST_PER_Q));
            prop_assert!(1 + (n_q - 1) * SG_LIST_PER_Q >= entries);
            prop_assert!(n_q <= usize::from(queues_required(MAX_SG_LIST)));
        }

        #[test]
        fn slots_are_conserved(steps in prop::collection::vec(step(), 1..40)) {
            let rig = rig();
            for tid in 0..3 {
                rig.attach(tid, SimTarget::disk());
            }

            let mut accepted = Vec::new();

            for (n, step) in steps.into_iter().enumerate() {
                match step {
                    Step::Submit { tid, entries, hold } => {
                        if hold {
                            let mut chip = rig.chip.lock().unwrap();
                            chip.targets_mut().get_mut(tid).unwrap().push_outcome(Outcome::Hold);
                        }

                        let id = RequestId(n as u64);
                        if rig.adapter.submit(scattered_read(id.0, tid, entries)) == SubmitStatus::Accepted {
                            accepted.push(id);
                        }
                        rig.settle();
                    }
                    Step::Release(tid) => rig.release(tid),
                    Step::Abort(i) if !accepted.is_empty() => {
                        rig.adapter.abort(accepted[i % accepted.len()]);
                        rig.settle();
                    }
                    Step::Abort(_) => {}
                }

                let (free, cur, max) = rig.adapter.inspect(|e| {
                    (e.free_queue_count(), e.cur_total_qng(), e.max_total_qng())
                });
                prop_assert_eq!(free, Some(usize::from(max - cur)));
            }
        }
    }
}
