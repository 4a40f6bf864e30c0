//! # Wide (ADV) Adapters
//!
//! The 3550, 38C0800 and 38C1600 exchange requests with the host through
//! two carrier queues in host memory. The host links request records into
//! the initiator command queue (ICQ) and the RISC hands them back on the
//! initiator response queue (IRQ). Each queue always ends in a stopper
//! carrier owned by the side that appends to it. Everything else the RISC
//! needs lives in its local RAM and is reached through
//! [`port::AdvPort`].

pub mod carrier;
pub mod constants;
pub mod engine;
pub mod exec;
mod idle;
mod isr;
pub mod port;
pub mod request;
pub mod sg;
pub mod sim;

pub use engine::WideEngine;

#[cfg(test)]
pub(crate) mod testutils {
    use std::sync::{Arc, Mutex};

    use crate::device::{
        adapter::{Adapter, HostAdapter, RecordingHandler},
        bus::{BusDevice, BusDeviceRef},
        config::{AdapterConfig, WideChip},
        delay::NoDelay,
        error::InitError,
        firmware::Microcode,
        host_memory::{DmaAllocator, HostMemory},
        interrupt_line::LatchedInterruptLine,
        sim_target::{ExecutedCommand, SimTarget},
    };

    pub(crate) use crate::device::scsi::testutils::{inquiry_request, read_10};

    use super::{carrier::Carrier, sim::SimAdvChip, WideEngine};

    const MEMORY_SIZE: u64 = 0x4_0000;

    /// A wide adapter wired to a simulated chip.
    pub(crate) struct Rig {
        pub(crate) chip: Arc<Mutex<SimAdvChip>>,
        pub(crate) mem: Arc<HostMemory>,
        pub(crate) adapter: Adapter<WideEngine>,
        pub(crate) handler: Arc<RecordingHandler>,
        pub(crate) line: Arc<LatchedInterruptLine>,
    }

    pub(crate) fn rig(chip: WideChip) -> Rig {
        rig_with(AdapterConfig::wide(chip))
    }

    /// A 38C0800 with only `n` scatter-gather blocks.
    pub(crate) fn rig_with_blocks(n: u16) -> Rig {
        rig_with(AdapterConfig {
            sg_blocks: n,
            ..AdapterConfig::wide(WideChip::Asc38C0800)
        })
    }

    fn rig_with(config: AdapterConfig) -> Rig {
        let mem = Arc::new(HostMemory::anonymous(MEMORY_SIZE).unwrap());
        let line = Arc::new(LatchedInterruptLine::default());
        let chip = Arc::new(Mutex::new(SimAdvChip::new(
            config.wide_chip,
            mem.clone(),
            line.clone(),
        )));
        let handler = Arc::new(RecordingHandler::default());

        let io: BusDeviceRef = chip.clone();
        let mut allocator = DmaAllocator::new(MEMORY_SIZE).unwrap();
        let engine = WideEngine::new(
            io,
            mem.clone(),
            &mut allocator,
            Arc::new(NoDelay {}),
            config,
            Microcode::generated_wide(0x1000, 1),
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

    /// Bring up another engine on the rig's chip and memory.
    pub(crate) fn engine_on(
        rig: &Rig,
        config: AdapterConfig,
        microcode: Microcode,
    ) -> Result<WideEngine, InitError> {
        let io: BusDeviceRef = rig.chip.clone();
        let mut allocator = DmaAllocator::new(rig.mem.size()).unwrap();

        WideEngine::new(
            io,
            rig.mem.clone(),
            &mut allocator,
            Arc::new(NoDelay {}),
            config,
            microcode,
        )
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

            panic!("wide adapter did not settle");
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

        pub(crate) fn read_carrier_next(&self, pa: u32) -> u32 {
            let dma: BusDeviceRef = self.mem.clone();
            Carrier::read(&dma, pa).next_vpa
        }
    }
}
