//! # Queue Slot Records
//!
//! The RISC reads and writes queue slots at fixed byte offsets. The host
//! never maps a Rust struct onto LRAM; instead every record is serialized
//! into the exact byte image the microcode expects.

use crate::device::bus::le;

use super::{
    constants::slot,
    lram::{qaddr, AscPort},
};

pub(super) const CPY_LEN: usize = (slot::CPY_END - slot::CPY_BEG) as usize;

/// The host written part of a request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyQueue {
    /// Queue control, `qc::*`.
    pub cntl: u8,
    /// Number of scatter-gather queues following this slot.
    pub sg_queue_cnt: u8,
    /// Target id as bit mask.
    pub target_id: u8,
    /// Logical unit.
    pub target_lun: u8,
    /// First data segment.
    pub data_addr: u32,
    /// Length of the first data segment.
    pub data_cnt: u32,
    /// Autosense buffer.
    pub sense_addr: u32,
    /// Length of the autosense buffer.
    pub sense_len: u8,
    /// Bytes to add to the residual on completion.
    pub extra_bytes: u8,
    /// Host handle of the request. Zero marks an aborted request.
    pub srb_ptr: u32,
    /// `tid + 8 * lun`.
    pub target_ix: u8,
    /// Microcode flags.
    pub flag: u8,
    /// CDB length.
    pub cdb_len: u8,
    /// Tag message code.
    pub tag_code: u8,
    /// Unused by the host.
    pub vm_id: u16,
}

impl ReadyQueue {
    /// The byte image of slot offsets `CPY_BEG..CPY_END`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CPY_LEN] {
        let mut b = [0u8; CPY_LEN];
        let at = |o: u16| usize::from(o - slot::CPY_BEG);

        b[at(slot::CNTL)] = self.cntl;
        b[at(slot::SG_QUEUE_CNT)] = self.sg_queue_cnt;
        b[at(slot::TARGET_ID)] = self.target_id;
        b[at(slot::TARGET_LUN)] = self.target_lun;
        le::put_u32(&mut b, at(slot::DATA_ADDR), self.data_addr);
        le::put_u32(&mut b, at(slot::DATA_CNT), self.data_cnt);
        le::put_u32(&mut b, at(slot::SENSE_ADDR), self.sense_addr);
        b[at(slot::SENSE_LEN)] = self.sense_len;
        b[at(slot::EXTRA_BYTES)] = self.extra_bytes;
        le::put_u32(&mut b, at(slot::SRB_PTR), self.srb_ptr);
        b[at(slot::TARGET_IX)] = self.target_ix;
        b[at(slot::FLAG)] = self.flag;
        b[at(slot::CDB_LEN)] = self.cdb_len;
        b[at(slot::TAG_CODE)] = self.tag_code;
        le::put_u16(&mut b, at(slot::VM_ID), self.vm_id);

        b
    }

    /// Parse the byte image written by [`ReadyQueue::to_bytes`].
    #[must_use]
    pub fn from_bytes(b: &[u8; CPY_LEN]) -> Self {
        let at = |o: u16| usize::from(o - slot::CPY_BEG);

        Self {
            cntl: b[at(slot::CNTL)],
            sg_queue_cnt: b[at(slot::SG_QUEUE_CNT)],
            target_id: b[at(slot::TARGET_ID)],
            target_lun: b[at(slot::TARGET_LUN)],
            data_addr: le::u32_at(b, at(slot::DATA_ADDR)),
            data_cnt: le::u32_at(b, at(slot::DATA_CNT)),
            sense_addr: le::u32_at(b, at(slot::SENSE_ADDR)),
            sense_len: b[at(slot::SENSE_LEN)],
            extra_bytes: b[at(slot::EXTRA_BYTES)],
            srb_ptr: le::u32_at(b, at(slot::SRB_PTR)),
            target_ix: b[at(slot::TARGET_IX)],
            flag: b[at(slot::FLAG)],
            cdb_len: b[at(slot::CDB_LEN)],
            tag_code: b[at(slot::TAG_CODE)],
            vm_id: le::u16_at(b, at(slot::VM_ID)),
        }
    }

    /// Read the request fields of slot `q_no`.
    #[must_use]
    pub fn read(port: &AscPort, q_no: u8) -> Self {
        let mut b = [0u8; CPY_LEN];
        port.read_block(qaddr(q_no) + slot::CPY_BEG, &mut b);
        Self::from_bytes(&b)
    }

    /// Write the request fields of slot `q_no`.
    pub fn write(&self, port: &AscPort, q_no: u8) {
        port.write_block(qaddr(q_no) + slot::CPY_BEG, &self.to_bytes());
    }
}

/// What the host copies out of a slot the RISC put on the done list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoneInfo {
    /// Host handle, zero if aborted.
    pub srb_ptr: u32,
    /// `tid + 8 * lun`.
    pub target_ix: u8,
    /// Queue status.
    pub q_status: u8,
    /// Queue number.
    pub q_no: u8,
    /// Queue control.
    pub cntl: u8,
    /// Number of scatter-gather queues of the request.
    pub sg_queue_cnt: u8,
    /// Autosense length.
    pub sense_len: u8,
    /// Bytes to add to the residual.
    pub extra_bytes: u8,
    /// Done status.
    pub done_stat: u8,
    /// Host status.
    pub host_stat: u8,
    /// SAM status.
    pub scsi_stat: u8,
    /// Untransferred bytes.
    pub remain_bytes: u32,
}

impl DoneInfo {
    /// Copy the completion fields of slot `q_no`.
    #[must_use]
    pub fn read(port: &AscPort, q_no: u8) -> Self {
        let base = qaddr(q_no);

        let mut info = [0u8; (slot::DONE_INFO_END - slot::DONE_INFO_BEG) as usize];
        port.read_block(base + slot::DONE_INFO_BEG, &mut info);

        let [q_status, q_no] = port.read_word(base + slot::STATUS).to_le_bytes();
        let [cntl, sg_queue_cnt] = port.read_word(base + slot::CNTL).to_le_bytes();
        let [sense_len, extra_bytes] = port.read_word(base + slot::SENSE_LEN).to_le_bytes();
        let [done_stat, host_stat] = port.read_word(base + slot::DONE_STAT).to_le_bytes();
        let [scsi_stat, _scsi_msg] = port.read_word(base + slot::SCSI_STAT).to_le_bytes();

        Self {
            srb_ptr: le::u32_at(&info, 0),
            target_ix: info[usize::from(slot::TARGET_IX - slot::DONE_INFO_BEG)],
            q_status,
            q_no,
            cntl,
            sg_queue_cnt,
            sense_len,
            extra_bytes,
            done_stat,
            host_stat,
            scsi_stat,
            remain_bytes: port.read_dword(base + slot::REMAIN_XFER_CNT),
        }
    }
}

/// Header of a scatter-gather queue, stored from slot offset 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SgQueueHeader {
    /// Position in the request's chain of scatter-gather queues, from 1.
    pub seq_no: u8,
    /// This queue's number.
    pub q_no: u8,
    /// `qcsg::*`.
    pub cntl: u8,
    /// Queue number of the request's head slot.
    pub sg_head_qp: u8,
    /// Entry count as the microcode expects it.
    pub sg_list_cnt: u8,
    /// Entries not yet consumed, same encoding.
    pub sg_cur_list_cnt: u8,
}

impl SgQueueHeader {
    /// Byte image.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 6] {
        [
            self.seq_no,
            self.q_no,
            self.cntl,
            self.sg_head_qp,
            self.sg_list_cnt,
            self.sg_cur_list_cnt,
        ]
    }

    /// Parse a byte image.
    #[must_use]
    pub const fn from_bytes(b: &[u8; 6]) -> Self {
        Self {
            seq_no: b[0],
            q_no: b[1],
            cntl: b[2],
            sg_head_qp: b[3],
            sg_list_cnt: b[4],
            sg_cur_list_cnt: b[5],
        }
    }

    /// Write header and entries into slot `q_no`.
    pub fn write(&self, port: &AscPort, q_no: u8, entries: &[(u32, u32)]) {
        let base = qaddr(q_no);
        port.write_block(base + slot::SGHD_CPY_BEG, &self.to_bytes());

        let mut list = Vec::with_capacity(entries.len() * 8);
        for (addr, count) in entries {
            list.extend_from_slice(&addr.to_le_bytes());
            list.extend_from_slice(&count.to_le_bytes());
        }
        port.write_block(base + slot::SGQ_LIST_BEG, &list);
    }
}

/// An extended SCSI message as exchanged through the message buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtMsg {
    bytes: [u8; 8],
}

impl ExtMsg {
    /// Size of the message buffers.
    pub const LEN: usize = 8;

    /// Wrap a raw buffer.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self { bytes }
    }

    /// The raw buffer.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 8] {
        self.bytes
    }

    /// A synchronous data transfer request.
    #[must_use]
    pub const fn sdtr(period: u8, offset: u8) -> Self {
        use crate::device::constants::msg;

        Self::from_bytes([
            msg::EXTENDED_MESSAGE,
            msg::SDTR_LEN,
            msg::EXTENDED_SDTR,
            period,
            offset,
            0,
            0,
            0,
        ])
    }

    /// A wide data transfer request.
    #[must_use]
    pub const fn wdtr(width: u8) -> Self {
        use crate::device::constants::msg;

        Self::from_bytes([
            msg::EXTENDED_MESSAGE,
            msg::WDTR_LEN,
            msg::EXTENDED_WDTR,
            width,
            0,
            0,
            0,
            0,
        ])
    }

    /// Message type (byte 0).
    #[must_use]
    pub const fn msg_type(&self) -> u8 {
        self.bytes[0]
    }

    /// Replace the message type.
    pub fn set_msg_type(&mut self, msg_type: u8) {
        self.bytes[0] = msg_type;
    }

    /// Whether this is an SDTR.
    #[must_use]
    pub const fn is_sdtr(&self) -> bool {
        use crate::device::constants::msg;

        self.bytes[0] == msg::EXTENDED_MESSAGE
            && self.bytes[1] == msg::SDTR_LEN
            && self.bytes[2] == msg::EXTENDED_SDTR
    }

    /// Whether this is a WDTR.
    #[must_use]
    pub const fn is_wdtr(&self) -> bool {
        use crate::device::constants::msg;

        self.bytes[0] == msg::EXTENDED_MESSAGE
            && self.bytes[1] == msg::WDTR_LEN
            && self.bytes[2] == msg::EXTENDED_WDTR
    }

    /// SDTR transfer period factor.
    #[must_use]
    pub const fn xfer_period(&self) -> u8 {
        self.bytes[3]
    }

    /// SDTR REQ/ACK offset.
    #[must_use]
    pub const fn req_ack_offset(&self) -> u8 {
        self.bytes[4]
    }

    /// Replace the SDTR period.
    pub fn set_xfer_period(&mut self, period: u8) {
        self.bytes[3] = period;
    }

    /// Replace the SDTR offset.
    pub fn set_req_ack_offset(&mut self, offset: u8) {
        self.bytes[4] = offset;
    }

    /// Replace the WDTR width exponent.
    pub fn set_wdtr_width(&mut self, width: u8) {
        self.bytes[3] = width;
    }

    /// Read the message buffer at `addr`.
    #[must_use]
    pub fn read(port: &AscPort, addr: u16) -> Self {
        let mut bytes = [0u8; Self::LEN];
        port.read_block(addr, &mut bytes);
        Self::from_bytes(bytes)
    }

    /// Write the message buffer at `addr`.
    pub fn write(&self, port: &AscPort, addr: u16) {
        port.write_block(addr, &self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::constants::msg;
    use proptest::prelude::*;

    prop_compose! {
        fn ready_queue()(
            bytes in any::<[u8; 10]>(),
            data_addr in any::<u32>(), data_cnt in any::<u32>(),
            sense_addr in any::<u32>(), srb_ptr in any::<u32>(), vm_id in any::<u16>(),
        ) -> ReadyQueue {
            ReadyQueue {
                cntl: bytes[0],
                sg_queue_cnt: bytes[1],
                target_id: bytes[2],
                target_lun: bytes[3],
                data_addr,
                data_cnt,
                sense_addr,
                sense_len: bytes[4],
                extra_bytes: bytes[5],
                srb_ptr,
                target_ix: bytes[6],
                flag: bytes[7],
                cdb_len: bytes[8],
                tag_code: bytes[9],
                vm_id,
            }
        }
    }

    proptest! {
        #[test]
        fn ready_queue_image_round_trips(q in ready_queue()) {
            prop_assert_eq!(ReadyQueue::from_bytes(&q.to_bytes()), q);
        }

        #[test]
        fn sg_queue_header_image_round_trips(b in any::<[u8; 6]>()) {
            prop_assert_eq!(SgQueueHeader::from_bytes(&b).to_bytes(), b);
        }
    }

    #[test]
    fn ready_queue_fields_sit_at_microcode_offsets() {
        let q = ReadyQueue {
            cntl: 0xAA,
            data_addr: 0x1122_3344,
            srb_ptr: 0xCAFE_F00D,
            tag_code: 0x20,
            ..Default::default()
        };
        let b = q.to_bytes();

        assert_eq!(b[0], 0xAA);
        assert_eq!(b[4..8], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(b[18..22], [0x0D, 0xF0, 0xFE, 0xCA]);
        assert_eq!(b[25], 0x20);
    }

    #[test]
    fn extended_messages_are_recognized() {
        let sdtr = ExtMsg::sdtr(25, 15);
        assert!(sdtr.is_sdtr());
        assert!(!sdtr.is_wdtr());
        assert_eq!((sdtr.xfer_period(), sdtr.req_ack_offset()), (25, 15));

        let mut reject = ExtMsg::wdtr(1);
        assert!(reject.is_wdtr());
        reject.set_msg_type(msg::MESSAGE_REJECT);
        assert!(!reject.is_wdtr());
    }
}
