//! Request submission.
//!
//! A request gets a record from the request pool and, if its data is
//! scattered, a chain of SG blocks. The record is written completely before
//! its carrier is linked into the ICQ, and the RISC is only notified after
//! that link.

use tracing::trace;

use crate::device::{
    adapter::SubmitStatus,
    config::WideChip,
    constants::MAX_WIDE_TID,
    error::RequestError,
    scsi::{DataDirection, ScsiRequest},
};

use super::{
    constants::{qc, tickle, MAX_SG_LIST},
    engine::{Pending, WideEngine},
    request::AdvScsiReqQ,
};

impl WideEngine {
    pub(super) fn execute(&mut self, request: ScsiRequest) -> SubmitStatus {
        if self.offline {
            return SubmitStatus::Error(RequestError::Offline);
        }

        if let Err(e) = request.validate(MAX_WIDE_TID, MAX_SG_LIST) {
            return SubmitStatus::Error(e);
        }

        if self.handles.contains_key(&request.id) {
            return SubmitStatus::Error(RequestError::DuplicateId);
        }

        let Some(slot) = self.requests.alloc() else {
            self.stats.busy += 1;
            return SubmitStatus::Busy;
        };

        let segments = request.data.segments();
        let mut record = AdvScsiReqQ {
            cntl: match request.direction {
                DataDirection::None => 0,
                DataDirection::In => qc::DATA_CHECK,
                DataDirection::Out => qc::DATA_CHECK | qc::DATA_OUT,
            },
            target_id: request.target,
            target_lun: request.lun,
            cdb_len: request.cdb.len() as u8,
            scsiq_ptr: u32::from(slot.0),
            scsiq_rptr: self.requests.pa(slot),
            ..AdvScsiReqQ::default()
        };
        record.cdb[..request.cdb.len()].copy_from_slice(&request.cdb);

        if let Some(sense) = request.sense {
            record.sense_addr = sense.addr;
            record.sense_len = sense.len as u8;
        }

        let mut sg_blocks = Vec::new();

        match segments {
            [] => {}
            [only] => {
                record.data_addr = only.addr;
                record.data_cnt = only.len;
            }
            list => {
                let len = request.data.len();
                let Ok(data_cnt) = u32::try_from(len) else {
                    self.requests.release(slot);
                    return SubmitStatus::Error(RequestError::DataTooLong { len });
                };

                let Some(chain) = self.sg.alloc_chain(list) else {
                    self.requests.release(slot);
                    self.stats.busy += 1;
                    return SubmitStatus::Busy;
                };

                record.data_cnt = data_cnt;
                record.sg_real_addr = chain.head_pa;
                sg_blocks = chain.blocks;
            }
        }

        // The RISC reads the record through the carrier it finds the
        // request on, which is the current ICQ stopper.
        let (icq_sp, _) = self.carriers.stoppers();
        record.carr_pa = self.carriers.icq_stopper_pa();
        record.carr_va = u32::from(icq_sp.0);

        self.requests.write(slot, &record);

        let Some(enqueued) = self.carriers.enqueue(self.requests.pa(slot)) else {
            self.sg.free_chain(&sg_blocks);
            self.requests.release(slot);
            self.stats.busy += 1;
            return SubmitStatus::Busy;
        };

        self.notify_risc(enqueued.stopper_pa);

        trace!(
            "request {} -> record {} on carrier {} ({} SG blocks)",
            request.id,
            slot.0,
            enqueued.carrier.0,
            sg_blocks.len()
        );

        self.stats.submitted += 1;
        self.events.submitted(request.id);
        self.handles.insert(request.id, slot);
        self.pending.insert(slot, Pending { request, sg_blocks });

        SubmitStatus::Accepted
    }

    /// Tell the RISC there is a new ICQ entry.
    pub(super) fn notify_risc(&self, stopper_pa: u32) {
        match self.chip {
            WideChip::Asc38C1600 => self.port.set_comma(stopper_pa),
            WideChip::Asc38C0800 => self.port.tickle(tickle::A),
            // The 3550 ignores a tickle equal to the last one written.
            WideChip::Asc3550 => {
                self.port.tickle(tickle::A);
                self.port.tickle(tickle::NOP);
            }
        }
    }
}
