//! Queueing and completion engine for AdvanSys narrow (ASC) and wide
//! (ADV) SCSI host adapters, plus register-level simulators of both RISCs.

pub mod device;
