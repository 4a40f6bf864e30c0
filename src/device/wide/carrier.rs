//! # Carrier Queues
//!
//! Requests travel between host and RISC on carriers, 16-byte nodes in
//! host memory linked by physical address. The host appends to the
//! initiator command queue (ICQ) and the RISC appends completed requests
//! to the initiator response queue (IRQ). Each queue always ends in a
//! stopper carrier whose `next_vpa` is [`CQ_STOPPER`]. A producer appends
//! by filling in the stopper and linking a fresh stopper behind it, so
//! neither side ever has to look at an empty queue.
//!
//! The carriers themselves are an arena indexed by [`CarrierId`]. The free
//! list is kept on the host side only and never seen by the RISC.

use tracing::trace;

use crate::device::{
    bus::{le, BusDeviceRef, Request, RequestSize},
    error::{InitError, LibErrorCode},
    host_memory::{DmaAllocator, DmaError},
};

use super::constants::carr::{self, CQ_STOPPER, NEXT_VPA_MASK, RQ_DONE, RQ_GOOD};

const CARR_VA: usize = 0;
const CARR_PA: usize = 4;
const AREQ_VPA: usize = 8;
const NEXT_VPA: usize = 12;

/// The byte image of a carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Carrier {
    /// Host cookie. Holds the carrier's index.
    pub carr_va: u32,
    /// Physical address of the carrier itself.
    pub carr_pa: u32,
    /// Physical address of the request this carrier transports.
    pub areq_vpa: u32,
    /// Physical address of the next carrier plus the done flags, or
    /// [`CQ_STOPPER`].
    pub next_vpa: u32,
}

impl Carrier {
    /// Size of the image.
    pub const LEN: usize = carr::SIZE as usize;

    /// The little-endian image.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];

        le::put_u32(&mut b, CARR_VA, self.carr_va);
        le::put_u32(&mut b, CARR_PA, self.carr_pa);
        le::put_u32(&mut b, AREQ_VPA, self.areq_vpa);
        le::put_u32(&mut b, NEXT_VPA, self.next_vpa);

        b
    }

    /// Parse an image.
    #[must_use]
    pub fn from_bytes(b: &[u8; Self::LEN]) -> Self {
        Self {
            carr_va: le::u32_at(b, CARR_VA),
            carr_pa: le::u32_at(b, CARR_PA),
            areq_vpa: le::u32_at(b, AREQ_VPA),
            next_vpa: le::u32_at(b, NEXT_VPA),
        }
    }

    /// Read the carrier at physical address `pa`.
    #[must_use]
    pub fn read(dma: &BusDeviceRef, pa: u32) -> Self {
        let mut b = [0u8; Self::LEN];
        dma.read_bulk(u64::from(pa), &mut b);
        Self::from_bytes(&b)
    }

    /// Write the whole carrier to its own address.
    pub fn write(&self, dma: &BusDeviceRef) {
        dma.write_bulk(u64::from(self.carr_pa), &self.to_bytes());
    }

    /// Whether this is the stopper of its queue.
    #[must_use]
    pub const fn is_stopper(&self) -> bool {
        self.next_vpa == CQ_STOPPER
    }

    /// Whether the RISC put a completed request on this carrier.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.next_vpa & RQ_DONE != 0
    }

    /// Physical address of the next carrier.
    #[must_use]
    pub const fn next_pa(&self) -> u32 {
        self.next_vpa & NEXT_VPA_MASK
    }
}

/// Index of a carrier in its [`CarrierPool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarrierId(pub u16);

/// A fixed set of carriers in one DMA region.
#[derive(Debug)]
pub struct CarrierPool {
    dma: BusDeviceRef,
    base: u32,
    next_free: Vec<Option<CarrierId>>,
    free_head: Option<CarrierId>,
    free_len: usize,
}

impl CarrierPool {
    /// Allocate `count` carriers. All of them start out free.
    pub fn new(
        dma: BusDeviceRef,
        allocator: &mut DmaAllocator,
        count: u16,
    ) -> Result<Self, DmaError> {
        let region = allocator.alloc(u32::from(count) * carr::SIZE, carr::SIZE)?;

        let mut pool = Self {
            dma,
            base: region.addr,
            next_free: vec![None; usize::from(count)],
            free_head: None,
            free_len: 0,
        };
        pool.reset();

        Ok(pool)
    }

    /// Put every carrier back on the free list and clear its image.
    pub fn reset(&mut self) {
        let count = self.next_free.len();

        for i in 0..count {
            let id = CarrierId(i as u16);

            self.next_free[i] = (i + 1 < count).then(|| CarrierId(i as u16 + 1));
            Carrier {
                carr_va: u32::from(id.0),
                carr_pa: self.pa(id),
                areq_vpa: 0,
                next_vpa: CQ_STOPPER,
            }
            .write(&self.dma);
        }

        self.free_head = (count > 0).then_some(CarrierId(0));
        self.free_len = count;
    }

    /// Take the head of the free list.
    pub fn pop(&mut self) -> Option<CarrierId> {
        let id = self.free_head?;

        self.free_head = self.next_free[usize::from(id.0)].take();
        self.free_len -= 1;

        Some(id)
    }

    /// Return a carrier to the head of the free list.
    pub fn push(&mut self, id: CarrierId) {
        self.next_free[usize::from(id.0)] = self.free_head;
        self.free_head = Some(id);
        self.free_len += 1;
    }

    /// Carriers on the free list.
    #[must_use]
    pub const fn free_len(&self) -> usize {
        self.free_len
    }

    /// Carriers in the pool.
    #[must_use]
    pub fn count(&self) -> usize {
        self.next_free.len()
    }

    /// Physical address of carrier `id`.
    #[must_use]
    pub const fn pa(&self, id: CarrierId) -> u32 {
        self.base + id.0 as u32 * carr::SIZE
    }

    /// The carrier at physical address `pa`, if it belongs to the pool.
    #[must_use]
    pub fn id_of(&self, pa: u32) -> Option<CarrierId> {
        let offset = pa.checked_sub(self.base)?;
        let index = usize::try_from(offset / carr::SIZE).ok()?;

        (offset % carr::SIZE == 0 && index < self.count()).then(|| CarrierId(index as u16))
    }

    /// Read carrier `id`.
    #[must_use]
    pub fn read(&self, id: CarrierId) -> Carrier {
        Carrier::read(&self.dma, self.pa(id))
    }

    fn write_field(&self, id: CarrierId, offset: usize, value: u32) {
        self.dma.write(
            Request::new(u64::from(self.pa(id)) + offset as u64, RequestSize::Size4),
            value.into(),
        );
    }

    /// Store `areq_vpa` of carrier `id` with one bus write.
    pub fn set_areq(&self, id: CarrierId, areq_vpa: u32) {
        self.write_field(id, AREQ_VPA, areq_vpa);
    }

    /// Store `next_vpa` of carrier `id` with one bus write.
    pub fn set_next(&self, id: CarrierId, next_vpa: u32) {
        self.write_field(id, NEXT_VPA, next_vpa);
    }
}

/// Where [`CarrierQueues::enqueue`] put a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Enqueued {
    /// The carrier transporting the request, the former stopper.
    pub carrier: CarrierId,
    /// Its physical address.
    pub carrier_pa: u32,
    /// Physical address of the new stopper.
    pub stopper_pa: u32,
}

/// A request the RISC handed back on the IRQ.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Harvested {
    /// Physical address of the request.
    pub areq_vpa: u32,
    /// The RISC did not write status; the request finished good.
    pub good: bool,
}

/// The command and response queues of one adapter.
#[derive(Debug)]
pub struct CarrierQueues {
    pool: CarrierPool,
    icq_sp: CarrierId,
    irq_sp: CarrierId,
    pending: usize,
}

impl CarrierQueues {
    /// Take both stoppers from a freshly reset pool.
    pub fn new(mut pool: CarrierPool) -> Result<Self, InitError> {
        let (icq_sp, irq_sp) = Self::take_stoppers(&mut pool)?;

        Ok(Self {
            pool,
            icq_sp,
            irq_sp,
            pending: 0,
        })
    }

    fn take_stoppers(pool: &mut CarrierPool) -> Result<(CarrierId, CarrierId), InitError> {
        let icq_sp = pool.pop().ok_or(InitError::NoCarrier)?;
        let irq_sp = pool.pop().ok_or(InitError::NoCarrier)?;

        pool.set_next(icq_sp, CQ_STOPPER);
        pool.set_next(irq_sp, CQ_STOPPER);

        Ok((icq_sp, irq_sp))
    }

    /// Forget both queues and start over with all carriers free. Used
    /// after the chip was reset.
    pub fn rebuild(&mut self) -> Result<(), InitError> {
        self.pool.reset();
        (self.icq_sp, self.irq_sp) = Self::take_stoppers(&mut self.pool)?;
        self.pending = 0;

        Ok(())
    }

    /// Physical address of the ICQ stopper.
    #[must_use]
    pub const fn icq_stopper_pa(&self) -> u32 {
        self.pool.pa(self.icq_sp)
    }

    /// Physical address of the IRQ stopper.
    #[must_use]
    pub const fn irq_stopper_pa(&self) -> u32 {
        self.pool.pa(self.irq_sp)
    }

    /// The ICQ and IRQ stoppers.
    #[must_use]
    pub const fn stoppers(&self) -> (CarrierId, CarrierId) {
        (self.icq_sp, self.irq_sp)
    }

    /// Requests on carriers that were not harvested yet.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// The carrier pool.
    #[must_use]
    pub const fn pool(&self) -> &CarrierPool {
        &self.pool
    }

    /// Take every free carrier out of circulation.
    #[cfg(test)]
    pub(crate) fn starve(&mut self) -> usize {
        std::iter::from_fn(|| self.pool.pop()).count()
    }

    /// Append the request at `req_pa` to the ICQ.
    ///
    /// Returns `None` without touching either queue if no carrier is free.
    pub fn enqueue(&mut self, req_pa: u32) -> Option<Enqueued> {
        let new = self.pool.pop()?;
        let old = self.icq_sp;

        // The RISC may take the old stopper the moment its link changes,
        // so the link is written last.
        self.pool.set_next(new, CQ_STOPPER);
        self.pool.set_areq(old, req_pa);
        self.pool.set_next(old, self.pool.pa(new));

        self.icq_sp = new;
        self.pending += 1;

        trace!("request {req_pa:#010x} on carrier {}", old.0);

        Some(Enqueued {
            carrier: old,
            carrier_pa: self.pool.pa(old),
            stopper_pa: self.pool.pa(new),
        })
    }

    /// Take the next completed request off the IRQ.
    ///
    /// The old stopper goes back to the free list and the carrier the
    /// RISC linked behind it becomes the new stopper.
    pub fn harvest(&mut self) -> Result<Option<Harvested>, LibErrorCode> {
        let stopper = self.pool.read(self.irq_sp);

        if !stopper.is_done() {
            return Ok(None);
        }

        let next = self
            .pool
            .id_of(stopper.next_pa())
            .ok_or(LibErrorCode::CarrierLinks)?;
        let done = self.irq_sp;

        self.irq_sp = next;
        self.pool.push(done);
        self.pending = self.pending.saturating_sub(1);

        Ok(Some(Harvested {
            areq_vpa: stopper.areq_vpa,
            good: stopper.next_vpa & RQ_GOOD != 0,
        }))
    }
}
