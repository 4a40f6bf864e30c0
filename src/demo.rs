//! Simulated boards on a shared interrupt line.
//!
//! Every board owns its own host memory and chip simulator. The chips
//! raise one latched line, and the platform loop below alternates between
//! letting the RISCs run and servicing the line until nothing moves.

use std::sync::{Arc, Mutex};

use advansys::device::{
    adapter::{Adapter, AdapterEngine, AdapterStats, HostAdapter, RecordingHandler, SubmitStatus},
    bus::{BusDevice, BusDeviceRef},
    config::{AdapterConfig, WideChip},
    constants::{opcode, MAX_NARROW_TID},
    delay::{Delay, NoDelay, StdDelay},
    firmware::Microcode,
    host_memory::{DmaAllocator, DmaSegment, HostMemory},
    interrupt_line::LatchedInterruptLine,
    narrow::{sim::SimAscChip, NarrowEngine},
    negotiation::Inquiry,
    scsi::{CompletionStatus, DataBuffer, DataDirection, RequestId, ScsiRequest},
    shared_irq::SharedIrq,
    sim_target::SimTarget,
    wide::{sim::SimAdvChip, WideEngine},
};
use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::cli::Cli;

const MEMORY_SIZE: u64 = 0x40_0000;

/// Size of one scatter-gather element.
const SG_ELEMENT_LEN: u32 = 512;

/// Data buffers are carved out of this many bytes and reused.
const DATA_POOL_LEN: u32 = 0x10_0000;

const INQUIRY_LEN: u32 = 36;

/// Passes given to a busy board before the batch is abandoned.
const MAX_BUSY_ROUNDS: usize = 1000;

/// Something that makes progress when the platform loop lets it.
trait Risc: Send + Sync {
    fn run(&self) -> bool;
}

impl Risc for Mutex<SimAscChip> {
    fn run(&self) -> bool {
        self.lock().unwrap().run()
    }
}

impl Risc for Mutex<SimAdvChip> {
    fn run(&self) -> bool {
        self.lock().unwrap().run()
    }
}

/// The counters of an adapter, whatever its engine.
trait Counters {
    fn stats(&self) -> AdapterStats;
    fn outstanding(&self) -> usize;
}

impl<E: AdapterEngine> Counters for Adapter<E> {
    fn stats(&self) -> AdapterStats {
        Adapter::stats(self)
    }

    fn outstanding(&self) -> usize {
        Adapter::outstanding(self)
    }
}

/// One simulated board.
struct Board {
    name: String,
    mem: Arc<HostMemory>,
    chip: Arc<dyn Risc>,
    adapter: Arc<dyn HostAdapter>,
    counters: Arc<dyn Counters>,
    handler: Arc<RecordingHandler>,
    allocator: DmaAllocator,
    data: DmaSegment,
    targets: Vec<u8>,
}

impl Board {
    fn assemble<E: AdapterEngine + 'static>(
        name: String,
        mem: Arc<HostMemory>,
        chip: Arc<dyn Risc>,
        engine: E,
        mut allocator: DmaAllocator,
        targets: Vec<u8>,
    ) -> Result<Self> {
        let handler = Arc::new(RecordingHandler::default());
        let adapter = Arc::new(Adapter::new(engine, handler.clone()));
        let data = allocator
            .alloc(DATA_POOL_LEN, SG_ELEMENT_LEN)
            .context("Host memory too small for the data pool")?;

        Ok(Self {
            name,
            mem,
            chip,
            adapter: adapter.clone(),
            counters: adapter,
            handler,
            allocator,
            data,
            targets,
        })
    }

    fn narrow(args: &Cli, delay: Arc<dyn Delay>, line: &Arc<LatchedInterruptLine>) -> Result<Self> {
        let mem = Arc::new(HostMemory::anonymous(MEMORY_SIZE).context("Failed to map host memory")?);
        let chip = Arc::new(Mutex::new(SimAscChip::new(mem.clone(), line.clone())));

        let config = AdapterConfig {
            ultra: args.ultra,
            reset_bus_on_init: args.reset_bus,
            ..AdapterConfig::narrow()
        };
        let targets = target_ids(args.targets, config.chip_scsi_id, MAX_NARROW_TID);
        for &tid in &targets {
            chip.lock().unwrap().targets_mut().attach(tid, SimTarget::disk());
        }

        let mut allocator = DmaAllocator::new(MEMORY_SIZE)?;
        let io: BusDeviceRef = chip.clone();
        let engine = NarrowEngine::new(
            io,
            mem.clone(),
            &mut allocator,
            delay,
            config,
            Microcode::generated_narrow(0x800, 1),
        )
        .context("Failed to bring up the narrow board")?;

        Self::assemble("narrow".to_string(), mem, chip, engine, allocator, targets)
    }

    fn wide(
        args: &Cli,
        delay: Arc<dyn Delay>,
        line: &Arc<LatchedInterruptLine>,
    ) -> Result<Self> {
        let kind = WideChip::from(args.wide_chip);
        let mem = Arc::new(HostMemory::anonymous(MEMORY_SIZE).context("Failed to map host memory")?);
        let chip = Arc::new(Mutex::new(SimAdvChip::new(kind, mem.clone(), line.clone())));

        let config = AdapterConfig {
            reset_bus_on_init: args.reset_bus,
            ..AdapterConfig::wide(kind)
        };
        let targets = target_ids(args.targets, config.chip_scsi_id, 15);
        for &tid in &targets {
            chip.lock().unwrap().targets_mut().attach(tid, SimTarget::disk());
        }

        let mut allocator = DmaAllocator::new(MEMORY_SIZE)?;
        let io: BusDeviceRef = chip.clone();
        let engine = WideEngine::new(
            io,
            mem.clone(),
            &mut allocator,
            delay,
            config,
            Microcode::generated_wide(0x1000, 1),
        )
        .with_context(|| format!("Failed to bring up the {kind:?} board"))?;

        Self::assemble(format!("{kind:?}"), mem, chip, engine, allocator, targets)
    }

    /// The `n`-th data segment, wrapping around the data pool.
    fn segment(&self, n: u32) -> DmaSegment {
        let per_pool = self.data.len / SG_ELEMENT_LEN;
        DmaSegment::new(self.data.addr + (n % per_pool) * SG_ELEMENT_LEN, SG_ELEMENT_LEN)
    }
}

/// The first `count` ids up to `max`, leaving out the adapter's own.
fn target_ids(count: u8, own: u8, max: u8) -> Vec<u8> {
    (0..=max).filter(|&tid| tid != own).take(usize::from(count)).collect()
}

fn inquiry(id: RequestId, tid: u8, buf: DmaSegment) -> ScsiRequest {
    ScsiRequest::new(id, tid, 0, &[opcode::INQUIRY, 0, 0, 0, buf.len as u8, 0])
        .with_data(DataDirection::In, DataBuffer::Contiguous(buf))
}

fn read_10(id: RequestId, tid: u8, lba: u32, segments: Vec<DmaSegment>) -> ScsiRequest {
    let bytes: u32 = segments.iter().map(|s| s.len).sum();
    let blocks = (bytes / SG_ELEMENT_LEN) as u16;
    let [l0, l1, l2, l3] = lba.to_be_bytes();
    let [b0, b1] = blocks.to_be_bytes();

    let data = match segments.as_slice() {
        [only] => DataBuffer::Contiguous(*only),
        _ => DataBuffer::ScatterGather(segments),
    };

    ScsiRequest::new(id, tid, 0, &[opcode::READ_10, 0, l0, l1, l2, l3, 0, b0, b1, 0])
        .with_data(DataDirection::In, data)
}

/// The boards of one run and the line they share.
pub struct Demo {
    line: Arc<LatchedInterruptLine>,
    irq: SharedIrq,
    boards: Vec<Board>,
}

impl Demo {
    pub fn new(args: &Cli) -> Result<Self> {
        let delay: Arc<dyn Delay> = if args.real_delays {
            Arc::new(StdDelay {})
        } else {
            Arc::new(NoDelay {})
        };
        let line = Arc::new(LatchedInterruptLine::default());
        let irq = SharedIrq::new();

        let mut boards = Vec::new();
        if args.family.narrow() {
            boards.push(Board::narrow(args, delay.clone(), &line)?);
        }
        if args.family.wide() {
            boards.push(Board::wide(args, delay, &line)?);
        }

        for board in &boards {
            irq.register(board.adapter.clone());
            info!("{} board up with targets {:?}", board.name, board.targets);
        }

        Ok(Self { line, irq, boards })
    }

    /// Run the RISCs and service the line until nothing moves.
    fn settle(&self) {
        loop {
            let ran = self.boards.iter().fold(false, |any, b| any | b.chip.run());
            let _ = self.line.take();
            let served = self.irq.service();

            if !ran && !served {
                break;
            }
        }
    }

    /// INQUIRY every target so the boards learn what they may negotiate.
    fn probe(&mut self) -> Result<()> {
        let mut buffers = Vec::new();

        for board in &mut self.boards {
            let mut mine = Vec::new();

            for &tid in &board.targets {
                let buf = board.allocator.alloc(INQUIRY_LEN, 4)?;
                let id = RequestId(u64::from(tid) | 0x1_0000);

                if board.adapter.submit(inquiry(id, tid, buf)) != SubmitStatus::Accepted {
                    bail!("{}: INQUIRY for target {tid} was not accepted", board.name);
                }
                mine.push((tid, buf));
            }

            buffers.push(mine);
        }

        self.settle();

        for (board, mine) in self.boards.iter().zip(buffers) {
            for done in board.handler.take_completions() {
                if !done.status.is_good() {
                    warn!("{}: INQUIRY of target {} ended {:?}", board.name, done.target, done.status);
                }
            }

            for (tid, buf) in mine {
                let mut data = vec![0; buf.len as usize];
                board.mem.read_bulk(u64::from(buf.addr), &mut data);

                match Inquiry::parse(&data) {
                    Some(inq) => debug!(
                        "{}: target {tid} sync={} wide={} tagged={}",
                        board.name,
                        inq.sync(),
                        inq.wbus16(),
                        inq.cmd_que()
                    ),
                    None => warn!("{}: target {tid} sent no usable INQUIRY data", board.name),
                }
            }
        }

        Ok(())
    }

    /// Push `requests` scattered reads through every board.
    fn batch(&mut self, requests: u32, sg_elements: u16) -> Result<()> {
        for board in &self.boards {
            let mut next = 0u32;
            let mut rounds = 0;

            while next < requests {
                let tid = board.targets[next as usize % board.targets.len()];
                let segments = (0..u32::from(sg_elements))
                    .map(|i| board.segment(next * u32::from(sg_elements) + i))
                    .collect();
                let request = read_10(RequestId(u64::from(next)), tid, next * 8, segments);

                match board.adapter.submit(request) {
                    SubmitStatus::Accepted => next += 1,
                    SubmitStatus::Busy => {
                        rounds += 1;
                        if rounds > MAX_BUSY_ROUNDS {
                            bail!("{} stays busy after {next} requests", board.name);
                        }
                        self.settle();
                    }
                    SubmitStatus::Error(e) => {
                        return Err(e).with_context(|| format!("{}: request {next}", board.name));
                    }
                }
            }
        }

        self.settle();
        Ok(())
    }

    fn report(&self) {
        for board in &self.boards {
            let completions = board.handler.take_completions();
            let good = completions.iter().filter(|c| c.status.is_good()).count();

            for done in completions.iter().filter(|c| !c.status.is_good()) {
                warn!("{}: {} target {} ended {:?}", board.name, done.id, done.target, done.status);
            }

            let residual: u64 = completions
                .iter()
                .filter_map(|c| match c.status {
                    CompletionStatus::Good { residual } => Some(u64::from(residual)),
                    _ => None,
                })
                .sum();

            info!(
                "{}: {good}/{} good, {residual} bytes residual, outstanding {}",
                board.name,
                completions.len(),
                board.counters.outstanding()
            );

            for event in board.handler.take_async_events() {
                info!("{}: async {event:?}", board.name);
            }

            info!("{}: {:?}", board.name, board.counters.stats());
        }
    }

    pub fn run(mut self, args: &Cli) -> Result<()> {
        self.probe()?;
        self.batch(args.requests, args.sg_elements)?;
        self.report();

        Ok(())
    }
}
