//! # Request Records
//!
//! Every request the wide RISC works on is a record in host memory. The
//! RISC reads the first [`req::MC_LEN`] bytes when it fetches the carrier
//! pointing at the record and writes the status bytes back unless the
//! request finished good.

use crate::device::{
    bus::{le, BusDeviceRef, Request, RequestSize},
    constants::MAX_CDB_LEN,
    host_memory::{DmaAllocator, DmaError},
};

use super::constants::req;

/// Alignment of records and scatter-gather blocks.
pub(super) const DMA_ALIGN: u32 = 32;

/// The RISC visible part of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvScsiReqQ {
    /// Queue control, `qc::*`.
    pub cntl: u8,
    /// Target mode command, unused by initiators.
    pub target_cmd: u8,
    /// Target id.
    pub target_id: u8,
    /// Logical unit.
    pub target_lun: u8,
    /// Data buffer of a single segment request. Zero with a
    /// scatter-gather list.
    pub data_addr: u32,
    /// Bytes to transfer. The RISC leaves the residual here.
    pub data_cnt: u32,
    /// Autosense buffer.
    pub sense_addr: u32,
    /// The carrier that transports the request.
    pub carr_pa: u32,
    /// Microcode flags.
    pub mflag: u8,
    /// Autosense buffer length. The RISC leaves the valid length here.
    pub sense_len: u8,
    /// CDB length.
    pub cdb_len: u8,
    /// SCSI control.
    pub scsi_cntl: u8,
    /// Done status, `qd::*`.
    pub done_status: u8,
    /// SAM status.
    pub scsi_status: u8,
    /// Host status, `qhsta::*`.
    pub host_status: u8,
    /// Microcode scatter-gather cursor.
    pub sg_working_ix: u8,
    /// The first 12 CDB bytes.
    pub cdb: [u8; MAX_CDB_LEN],
    /// First scatter-gather block, zero without a list.
    pub sg_real_addr: u32,
    /// Physical address of this record.
    pub scsiq_rptr: u32,
    /// CDB bytes 12 to 15.
    pub cdb16: [u8; 4],
    /// Host cookie: the record's slot.
    pub scsiq_ptr: u32,
    /// Host cookie: the carrier's index.
    pub carr_va: u32,
}

impl AdvScsiReqQ {
    /// Size of the image.
    pub const LEN: usize = req::MC_LEN;

    /// The little-endian image.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];

        b[req::CNTL] = self.cntl;
        b[req::TARGET_CMD] = self.target_cmd;
        b[req::TARGET_ID] = self.target_id;
        b[req::TARGET_LUN] = self.target_lun;
        le::put_u32(&mut b, req::DATA_ADDR, self.data_addr);
        le::put_u32(&mut b, req::DATA_CNT, self.data_cnt);
        le::put_u32(&mut b, req::SENSE_ADDR, self.sense_addr);
        le::put_u32(&mut b, req::CARR_PA, self.carr_pa);
        b[req::MFLAG] = self.mflag;
        b[req::SENSE_LEN] = self.sense_len;
        b[req::CDB_LEN] = self.cdb_len;
        b[req::SCSI_CNTL] = self.scsi_cntl;
        b[req::DONE_STATUS] = self.done_status;
        b[req::SCSI_STATUS] = self.scsi_status;
        b[req::HOST_STATUS] = self.host_status;
        b[req::SG_WORKING_IX] = self.sg_working_ix;
        b[req::CDB..req::CDB + MAX_CDB_LEN].copy_from_slice(&self.cdb);
        le::put_u32(&mut b, req::SG_REAL_ADDR, self.sg_real_addr);
        le::put_u32(&mut b, req::SCSIQ_RPTR, self.scsiq_rptr);
        b[req::CDB16..req::CDB16 + 4].copy_from_slice(&self.cdb16);
        le::put_u32(&mut b, req::SCSIQ_PTR, self.scsiq_ptr);
        le::put_u32(&mut b, req::CARR_VA, self.carr_va);

        b
    }

    /// Parse an image.
    #[must_use]
    pub fn from_bytes(b: &[u8; Self::LEN]) -> Self {
        let mut cdb = [0u8; MAX_CDB_LEN];
        let mut cdb16 = [0u8; 4];
        cdb.copy_from_slice(&b[req::CDB..req::CDB + MAX_CDB_LEN]);
        cdb16.copy_from_slice(&b[req::CDB16..req::CDB16 + 4]);

        Self {
            cntl: b[req::CNTL],
            target_cmd: b[req::TARGET_CMD],
            target_id: b[req::TARGET_ID],
            target_lun: b[req::TARGET_LUN],
            data_addr: le::u32_at(b, req::DATA_ADDR),
            data_cnt: le::u32_at(b, req::DATA_CNT),
            sense_addr: le::u32_at(b, req::SENSE_ADDR),
            carr_pa: le::u32_at(b, req::CARR_PA),
            mflag: b[req::MFLAG],
            sense_len: b[req::SENSE_LEN],
            cdb_len: b[req::CDB_LEN],
            scsi_cntl: b[req::SCSI_CNTL],
            done_status: b[req::DONE_STATUS],
            scsi_status: b[req::SCSI_STATUS],
            host_status: b[req::HOST_STATUS],
            sg_working_ix: b[req::SG_WORKING_IX],
            cdb,
            sg_real_addr: le::u32_at(b, req::SG_REAL_ADDR),
            scsiq_rptr: le::u32_at(b, req::SCSIQ_RPTR),
            cdb16,
            scsiq_ptr: le::u32_at(b, req::SCSIQ_PTR),
            carr_va: le::u32_at(b, req::CARR_VA),
        }
    }

    /// Read the record at `pa`.
    #[must_use]
    pub fn read(dma: &BusDeviceRef, pa: u32) -> Self {
        let mut b = [0u8; Self::LEN];
        dma.read_bulk(u64::from(pa), &mut b);
        Self::from_bytes(&b)
    }

    /// Write the record to `pa`.
    pub fn write(&self, dma: &BusDeviceRef, pa: u32) {
        dma.write_bulk(u64::from(pa), &self.to_bytes());
    }

    /// The CDB as the host submitted it.
    #[must_use]
    pub fn cdb(&self) -> &[u8] {
        &self.cdb[..usize::from(self.cdb_len).min(MAX_CDB_LEN)]
    }
}

/// Index of a record in the [`RequestPool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReqSlot(pub u8);

/// The request records of one adapter. A request holds its record from
/// submission until its completion was delivered.
#[derive(Debug)]
pub struct RequestPool {
    dma: BusDeviceRef,
    base: u32,
    count: u8,
    free: Vec<ReqSlot>,
}

impl RequestPool {
    /// Allocate `count` records.
    pub fn new(dma: BusDeviceRef, allocator: &mut DmaAllocator, count: u8) -> Result<Self, DmaError> {
        let region = allocator.alloc(u32::from(count) * req::SIZE, DMA_ALIGN)?;

        Ok(Self {
            dma,
            base: region.addr,
            count,
            free: (0..count).rev().map(ReqSlot).collect(),
        })
    }

    /// Take a free record.
    pub fn alloc(&mut self) -> Option<ReqSlot> {
        self.free.pop()
    }

    /// Give a record back.
    pub fn release(&mut self, slot: ReqSlot) {
        debug_assert!(!self.free.contains(&slot));
        self.free.push(slot);
    }

    /// Records not held by a request.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Physical address of record `slot`.
    #[must_use]
    pub const fn pa(&self, slot: ReqSlot) -> u32 {
        self.base + slot.0 as u32 * req::SIZE
    }

    /// The record at `pa`, if the address is one of the pool's.
    #[must_use]
    pub fn slot_of(&self, pa: u32) -> Option<ReqSlot> {
        let offset = pa.checked_sub(self.base)?;
        let index = offset / req::SIZE;

        (offset % req::SIZE == 0 && index < u32::from(self.count)).then(|| ReqSlot(index as u8))
    }

    /// Read record `slot`.
    #[must_use]
    pub fn read(&self, slot: ReqSlot) -> AdvScsiReqQ {
        AdvScsiReqQ::read(&self.dma, self.pa(slot))
    }

    /// Write record `slot`.
    pub fn write(&self, slot: ReqSlot, record: &AdvScsiReqQ) {
        record.write(&self.dma, self.pa(slot));
    }

    /// Clear the control byte of a finished record.
    pub fn clear_cntl(&self, slot: ReqSlot) {
        self.dma.write(
            Request::new(u64::from(self.pa(slot)) + req::CNTL as u64, RequestSize::Size1),
            0,
        );
    }
}
