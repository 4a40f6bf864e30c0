//! # Narrow (ASC) Adapters
//!
//! The ASC chips keep their request queues in 32K of local RAM that the
//! host reaches through an address/data register pair. Up to eight targets,
//! up to 240 queue slots, and a RISC that halts whenever it needs the host
//! to decide something.

pub mod constants;
pub mod engine;
pub mod exec;
mod halt;
mod isr;
pub mod lram;
pub mod queue;
mod reset;
pub mod sdtr;
pub mod sim;

pub use engine::NarrowEngine;

#[cfg(test)]
pub(crate) mod testutils {
    use std::sync::{Arc, Mutex};

    use crate::device::{
        adapter::{Adapter, HostAdapter, RecordingHandler},
        bus::{BusDevice, BusDeviceRef},
        config::AdapterConfig,
        delay::NoDelay,
        firmware::Microcode,
        host_memory::{DmaAllocator, HostMemory},
        interrupt_line::LatchedInterruptLine,
        sim_target::{ExecutedCommand, SimTarget},
    };

    pub(crate) use crate::device::scsi::testutils::{inquiry_request, read_10};

    use super::{sim::SimAscChip, NarrowEngine};

    const MEMORY_SIZE: u64 = 0x2_0000;

    /// A narrow adapter wired to a simulated chip.
    pub(crate) struct Rig {
        pub(crate) chip: Arc<Mutex<SimAscChip>>,
        pub(crate) mem: Arc<HostMemory>,
        pub(crate) adapter: Adapter<NarrowEngine>,
        pub(crate) handler: Arc<RecordingHandler>,
        pub(crate) line: Arc<LatchedInterruptLine>,
    }

    pub(crate) fn rig() -> Rig {
        rig_with(AdapterConfig::narrow())
    }

    pub(crate) fn rig_with(config: AdapterConfig) -> Rig {
        let mem = Arc::new(HostMemory::anonymous(MEMORY_SIZE).unwrap());
        let line = Arc::new(LatchedInterruptLine::default());
        let chip = Arc::new(Mutex::new(SimAscChip::new(mem.clone(), line.clone())));
        let handler = Arc::new(RecordingHandler::default());

        let io: BusDeviceRef = chip.clone();
        let mut allocator = DmaAllocator::new(MEMORY_SIZE).unwrap();
        let engine = NarrowEngine::new(
            io,
            mem.clone(),
            &mut allocator,
            Arc::new(NoDelay {}),
            config,
            Microcode::generated_narrow(0x800, 1),
        )
        .unwrap();

        Rig {
            chip,
            mem,
            adapter: Adapter::new(engine, handler.clone()),
            handler,
            line,
        }
    }

    impl Rig {
        pub(crate) fn attach(&self, tid: u8, target: SimTarget) {
            self.chip.lock().unwrap().targets_mut().attach(tid, target);
        }

        /// Alternate between the RISC and the interrupt handler until
        /// neither has anything left to do.
        pub(crate) fn settle(&self) {
            for _ in 0..10_000 {
                let ran = self.chip.lock().unwrap().run();
                let _ = self.line.take();
                let served = self.adapter.service_interrupt();

                if !ran && !served {
                    return;
                }
            }

            panic!("narrow adapter did not settle");
        }

        /// Let the held commands of `tid` finish.
        pub(crate) fn release(&self, tid: u8) {
            self.chip.lock().unwrap().targets_mut().release_held(tid);
            self.settle();
        }

        pub(crate) fn executed(&self) -> Vec<ExecutedCommand> {
            self.chip.lock().unwrap().targets().executed().to_vec()
        }

        pub(crate) fn read_mem(&self, addr: u64, len: usize) -> Vec<u8> {
            let mut buf = vec![0; len];
            self.mem.read_bulk(addr, &mut buf);
            buf
        }
    }
}
