//! # Generic SCSI Requests
//!
//! The mid-layer view of a request and of its completion. Both engines
//! translate a [`ScsiRequest`] into their chip's native records and map the
//! chip's done/host/SCSI status bytes back into a [`CompletionStatus`].

use std::fmt::{self, Display, Formatter};

use super::{
    bus::BusDeviceRef,
    constants::{qd, qhsta, sam, MAX_CDB_LEN},
    error::RequestError,
    host_memory::DmaSegment,
};

/// Caller chosen handle of a request. Must be unique among outstanding
/// requests of one adapter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of the data phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataDirection {
    /// No data phase.
    None,
    /// Target to host.
    In,
    /// Host to target.
    Out,
}

/// Where the data of a request lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DataBuffer {
    /// No data buffer.
    #[default]
    None,
    /// One physically contiguous buffer.
    Contiguous(DmaSegment),
    /// A scatter-gather list.
    ScatterGather(Vec<DmaSegment>),
}

impl DataBuffer {
    /// Total transfer length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.segments().iter().map(|s| u64::from(s.len)).sum()
    }

    /// Whether there is nothing to transfer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffer as a list of segments.
    #[must_use]
    pub fn segments(&self) -> &[DmaSegment] {
        match self {
            Self::None => &[],
            Self::Contiguous(seg) => std::slice::from_ref(seg),
            Self::ScatterGather(list) => list,
        }
    }

    /// Copy up to `max` bytes from the start of the buffer out of DMA
    /// memory.
    #[must_use]
    pub fn read_prefix(&self, dma: &BusDeviceRef, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max);

        for seg in self.segments() {
            let take = (max - out.len()).min(seg.len as usize);
            let start = out.len();

            out.resize(start + take, 0);
            dma.read_bulk(u64::from(seg.addr), &mut out[start..]);

            if out.len() == max {
                break;
            }
        }

        out
    }
}

/// A request as handed over by the mid-layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScsiRequest {
    /// Handle used for completion and abort.
    pub id: RequestId,

    /// SCSI target id.
    pub target: u8,

    /// Logical unit.
    pub lun: u8,

    /// The command descriptor block.
    pub cdb: Vec<u8>,

    /// Direction of the data phase.
    pub direction: DataDirection,

    /// The data buffer.
    pub data: DataBuffer,

    /// Buffer receiving autosense data on CHECK CONDITION.
    pub sense: Option<DmaSegment>,
}

impl ScsiRequest {
    /// Create a request without data phase.
    #[must_use]
    pub fn new(id: RequestId, target: u8, lun: u8, cdb: &[u8]) -> Self {
        Self {
            id,
            target,
            lun,
            cdb: cdb.to_vec(),
            direction: DataDirection::None,
            data: DataBuffer::None,
            sense: None,
        }
    }

    /// Attach a data buffer.
    #[must_use]
    pub fn with_data(mut self, direction: DataDirection, data: DataBuffer) -> Self {
        self.direction = direction;
        self.data = data;
        self
    }

    /// Attach a sense buffer.
    #[must_use]
    pub const fn with_sense(mut self, sense: DmaSegment) -> Self {
        self.sense = Some(sense);
        self
    }

    /// The operation code.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.cdb.first().copied().unwrap_or_default()
    }

    /// Check the parts of the request shape that do not depend on the chip.
    pub fn validate(&self, max_target: u8, max_sg: usize) -> Result<(), RequestError> {
        if self.target > max_target {
            return Err(RequestError::InvalidTarget {
                target: self.target,
                max: max_target,
            });
        }

        if self.lun > super::constants::MAX_LUN {
            return Err(RequestError::InvalidLun { lun: self.lun });
        }

        if self.cdb.is_empty() || self.cdb.len() > MAX_CDB_LEN {
            return Err(RequestError::InvalidCdbLength {
                len: self.cdb.len(),
            });
        }

        match &self.data {
            DataBuffer::ScatterGather(list) if list.is_empty() => {
                return Err(RequestError::EmptyScatterGather)
            }
            DataBuffer::ScatterGather(list) if list.len() > max_sg => {
                return Err(RequestError::ScatterGatherTooLong {
                    len: list.len(),
                    max: max_sg,
                })
            }
            _ => {}
        }

        let len = self.data.len();
        if len > u64::from(u32::MAX) {
            return Err(RequestError::DataTooLong { len });
        }

        if self.direction != DataDirection::None && self.data.is_empty() {
            return Err(RequestError::MissingData);
        }

        if self.sense.is_some_and(|s| s.len > u32::from(u8::MAX)) {
            return Err(RequestError::SenseTooLong);
        }

        Ok(())
    }
}

/// Generic outcome of a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The command succeeded. `residual` bytes were not transferred.
    Good {
        /// Untransferred bytes of an underrun.
        residual: u32,
    },
    /// The target reported CHECK CONDITION; sense data was fetched.
    CheckCondition {
        /// Valid bytes in the sense buffer.
        sense_len: u8,
    },
    /// The target is busy or its task set is full. The caller retries.
    Busy {
        /// The SAM status byte.
        scsi_status: u8,
    },
    /// The request was cut short by a bus or device reset.
    Reset,
    /// The host aborted the request.
    Aborted,
    /// The target did not answer selection.
    SelectionTimeout,
    /// Anything else, with the raw status bytes.
    Error {
        /// Done status.
        done_status: u8,
        /// Host status.
        host_status: u8,
        /// SAM status.
        scsi_status: u8,
    },
}

impl CompletionStatus {
    /// Whether the command succeeded.
    #[must_use]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good { .. })
    }
}

/// Raw completion bytes as the RISC reports them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RawStatus {
    /// Done status.
    pub done: u8,
    /// Host status.
    pub host: u8,
    /// SAM status.
    pub scsi: u8,
    /// Untransferred bytes.
    pub residual: u32,
    /// Valid autosense bytes.
    pub sense_len: u8,
}

impl RawStatus {
    /// Map the chip's status bytes into the generic taxonomy.
    ///
    /// Underruns without error are good completions on both chips. The
    /// residual is kept only when it is plausible for a request of
    /// `data_len` bytes.
    #[must_use]
    pub fn classify(&self, data_len: u64) -> CompletionStatus {
        match (self.done, self.host) {
            (
                _,
                qhsta::M_SCSI_BUS_RESET
                | qhsta::M_SCSI_BUS_RESET_UNSOL
                | qhsta::M_BUS_DEVICE_RESET
                | qhsta::M_HUNG_REQ_SCSI_BUS_RESET,
            ) => CompletionStatus::Reset,
            (qd::ABORTED_BY_HOST, _) => CompletionStatus::Aborted,
            (qd::NO_ERROR, _) => CompletionStatus::Good {
                residual: if u64::from(self.residual) <= data_len {
                    self.residual
                } else {
                    0
                },
            },
            (qd::WITH_ERROR, qhsta::M_SEL_TIMEOUT) => CompletionStatus::SelectionTimeout,
            (qd::WITH_ERROR, qhsta::NO_ERROR) => match self.scsi {
                sam::CHECK_CONDITION => CompletionStatus::CheckCondition {
                    sense_len: self.sense_len,
                },
                sam::BUSY | sam::TASK_SET_FULL => CompletionStatus::Busy {
                    scsi_status: self.scsi,
                },
                _ => self.error(),
            },
            _ => self.error(),
        }
    }

    const fn error(&self) -> CompletionStatus {
        CompletionStatus::Error {
            done_status: self.done,
            host_status: self.host,
            scsi_status: self.scsi,
        }
    }
}

/// A finished request as reported to the [`CompletionHandler`].
///
/// [`CompletionHandler`]: super::adapter::CompletionHandler
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The handle the request was submitted with.
    pub id: RequestId,
    /// Target id.
    pub target: u8,
    /// Logical unit.
    pub lun: u8,
    /// Outcome.
    pub status: CompletionStatus,
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{bus::BusDevice, host_memory::HostMemory};
    use std::sync::Arc;

    fn raw(done: u8, host: u8, scsi: u8) -> RawStatus {
        RawStatus {
            done,
            host,
            scsi,
            ..Default::default()
        }
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(
            raw(qd::NO_ERROR, 0, 0).classify(512),
            CompletionStatus::Good { residual: 0 }
        );
        assert_eq!(
            raw(qd::ABORTED_BY_HOST, 0, 0).classify(0),
            CompletionStatus::Aborted
        );
        assert_eq!(
            raw(qd::ABORTED_BY_HOST, qhsta::M_BUS_DEVICE_RESET, 0).classify(0),
            CompletionStatus::Reset
        );
        assert_eq!(
            raw(qd::WITH_ERROR, qhsta::M_SCSI_BUS_RESET_UNSOL, 0).classify(0),
            CompletionStatus::Reset
        );
        assert_eq!(
            raw(qd::WITH_ERROR, qhsta::M_SEL_TIMEOUT, 0).classify(0),
            CompletionStatus::SelectionTimeout
        );
        assert_eq!(
            raw(qd::WITH_ERROR, 0, sam::TASK_SET_FULL).classify(0),
            CompletionStatus::Busy {
                scsi_status: sam::TASK_SET_FULL
            }
        );
        assert_eq!(
            raw(qd::WITH_ERROR, qhsta::M_DATA_OVER_RUN, 0).classify(0),
            CompletionStatus::Error {
                done_status: qd::WITH_ERROR,
                host_status: qhsta::M_DATA_OVER_RUN,
                scsi_status: 0
            }
        );
    }

    #[test]
    fn check_condition_reports_sense_length() {
        let status = RawStatus {
            sense_len: 18,
            ..raw(qd::WITH_ERROR, 0, sam::CHECK_CONDITION)
        };

        assert_eq!(
            status.classify(0),
            CompletionStatus::CheckCondition { sense_len: 18 }
        );
    }

    #[test]
    fn implausible_residual_is_dropped() {
        let underrun = RawStatus {
            residual: 100,
            ..raw(qd::NO_ERROR, 0, 0)
        };

        assert_eq!(
            underrun.classify(512),
            CompletionStatus::Good { residual: 100 }
        );
        assert_eq!(underrun.classify(64), CompletionStatus::Good { residual: 0 });
    }

    #[test]
    fn request_shape_is_validated() {
        let ok = ScsiRequest::new(RequestId(1), 3, 0, &[0x00; 6]);
        assert_eq!(ok.validate(7, 255), Ok(()));

        assert_eq!(
            ScsiRequest::new(RequestId(1), 8, 0, &[0; 6]).validate(7, 255),
            Err(RequestError::InvalidTarget { target: 8, max: 7 })
        );
        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 16]).validate(7, 255),
            Err(RequestError::InvalidCdbLength { len: 16 })
        );
        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 10])
                .with_data(DataDirection::In, DataBuffer::ScatterGather(vec![]))
                .validate(7, 255),
            Err(RequestError::EmptyScatterGather)
        );
        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 10])
                .with_data(
                    DataDirection::In,
                    DataBuffer::ScatterGather(vec![DmaSegment::new(0x1000, 512); 4])
                )
                .validate(7, 3),
            Err(RequestError::ScatterGatherTooLong { len: 4, max: 3 })
        );
        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 10])
                .with_data(DataDirection::Out, DataBuffer::None)
                .validate(7, 255),
            Err(RequestError::MissingData)
        );
    }

    #[test]
    fn data_beyond_a_32_bit_count_is_refused() {
        let huge = DataBuffer::ScatterGather(vec![DmaSegment::new(0x1000, u32::MAX); 2]);
        let fits = DataBuffer::ScatterGather(vec![
            DmaSegment::new(0x1000, u32::MAX - 512),
            DmaSegment::new(0x2000, 512),
        ]);

        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 10])
                .with_data(DataDirection::In, huge)
                .validate(15, 255),
            Err(RequestError::DataTooLong {
                len: 2 * u64::from(u32::MAX)
            })
        );
        assert_eq!(
            ScsiRequest::new(RequestId(1), 0, 0, &[0; 10])
                .with_data(DataDirection::In, fits)
                .validate(15, 255),
            Ok(())
        );
    }

    #[test]
    fn prefix_is_gathered_across_segments() {
        let mem = Arc::new(HostMemory::anonymous(0x3000).unwrap());
        mem.write_bulk(0x1000, &[1, 2, 3]);
        mem.write_bulk(0x2000, &[4, 5, 6, 7]);

        let dma: BusDeviceRef = mem;
        let data = DataBuffer::ScatterGather(vec![
            DmaSegment::new(0x1000, 3),
            DmaSegment::new(0x2000, 4),
        ]);

        assert_eq!(data.read_prefix(&dma, 5), vec![1, 2, 3, 4, 5]);
        assert_eq!(data.read_prefix(&dma, 64), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(data.len(), 7);
    }
}
