//! # Scatter-Gather Blocks
//!
//! Lists with more than one segment are handed to the wide RISC as a chain
//! of blocks in host memory, fifteen segments per block, linked by
//! physical address. The blocks come from a fixed pool; a request either
//! gets its whole chain or nothing.

use tracing::trace;

use crate::device::{
    bus::{le, BusDeviceRef},
    host_memory::{DmaAllocator, DmaError, DmaSegment},
};

use super::{constants::sg, request::DMA_ALIGN};

/// Index of a block in the [`SgPool`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SgBlockId(pub u16);

/// The byte image of a scatter-gather block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SgBlock {
    /// Physical address of the next block, zero in the last one.
    pub sg_ptr: u32,
    /// Up to [`sg::PER_BLOCK`] segments.
    pub entries: Vec<DmaSegment>,
}

impl SgBlock {
    /// Size of the image.
    pub const LEN: usize = sg::SIZE as usize;

    /// The little-endian image.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        let entries = &self.entries[..self.entries.len().min(sg::PER_BLOCK)];

        b[sg::SG_CNT] = entries.len() as u8;
        le::put_u32(&mut b, sg::SG_PTR, self.sg_ptr);

        for (i, seg) in entries.iter().enumerate() {
            let at = sg::LIST + 8 * i;

            le::put_u32(&mut b, at, seg.addr);
            le::put_u32(&mut b, at + 4, seg.len);
        }

        b
    }

    /// Parse an image.
    #[must_use]
    pub fn from_bytes(b: &[u8; Self::LEN]) -> Self {
        let count = usize::from(b[sg::SG_CNT]).min(sg::PER_BLOCK);

        Self {
            sg_ptr: le::u32_at(b, sg::SG_PTR),
            entries: (0..count)
                .map(|i| {
                    let at = sg::LIST + 8 * i;
                    DmaSegment::new(le::u32_at(b, at), le::u32_at(b, at + 4))
                })
                .collect(),
        }
    }

    /// Read the block at `pa`.
    #[must_use]
    pub fn read(dma: &BusDeviceRef, pa: u32) -> Self {
        let mut b = [0u8; Self::LEN];
        dma.read_bulk(u64::from(pa), &mut b);
        Self::from_bytes(&b)
    }

    /// Follow the chain starting at `pa` and collect every segment.
    /// Gives up after `limit` blocks.
    #[must_use]
    pub fn read_chain(dma: &BusDeviceRef, mut pa: u32, limit: usize) -> Vec<DmaSegment> {
        let mut segments = Vec::new();

        for _ in 0..limit {
            if pa == 0 {
                break;
            }

            let block = Self::read(dma, pa);
            segments.extend(block.entries);
            pa = block.sg_ptr;
        }

        segments
    }
}

/// Blocks needed for `entries` segments.
#[must_use]
pub const fn blocks_required(entries: usize) -> usize {
    entries.div_ceil(sg::PER_BLOCK)
}

/// The blocks a request holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgChain {
    /// The blocks in chain order.
    pub blocks: Vec<SgBlockId>,
    /// Physical address of the first block.
    pub head_pa: u32,
}

/// The scatter-gather blocks of one adapter.
#[derive(Debug)]
pub struct SgPool {
    dma: BusDeviceRef,
    base: u32,
    free: Vec<SgBlockId>,
}

impl SgPool {
    /// Allocate `count` blocks.
    pub fn new(dma: BusDeviceRef, allocator: &mut DmaAllocator, count: u16) -> Result<Self, DmaError> {
        let region = allocator.alloc(u32::from(count) * sg::SIZE, DMA_ALIGN)?;

        Ok(Self {
            dma,
            base: region.addr,
            free: (0..count).rev().map(SgBlockId).collect(),
        })
    }

    /// Blocks not held by a request.
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Physical address of block `id`.
    #[must_use]
    pub const fn pa(&self, id: SgBlockId) -> u32 {
        self.base + id.0 as u32 * sg::SIZE
    }

    /// Take enough blocks for `segments` and write the chain.
    ///
    /// If the pool runs dry half way, the blocks taken so far go back and
    /// the pool is exactly as before.
    pub fn alloc_chain(&mut self, segments: &[DmaSegment]) -> Option<SgChain> {
        let needed = blocks_required(segments.len());
        let mut blocks = Vec::with_capacity(needed);

        for _ in 0..needed {
            match self.free.pop() {
                Some(id) => blocks.push(id),
                None => {
                    trace!("SG pool exhausted after {} of {needed} blocks", blocks.len());
                    self.free_chain(&blocks);
                    return None;
                }
            }
        }

        for (i, chunk) in segments.chunks(sg::PER_BLOCK).enumerate() {
            let sg_ptr = blocks.get(i + 1).map_or(0, |&next| self.pa(next));

            let image = SgBlock {
                sg_ptr,
                entries: chunk.to_vec(),
            }
            .to_bytes();
            self.dma.write_bulk(u64::from(self.pa(blocks[i])), &image);
        }

        Some(SgChain {
            head_pa: blocks.first().map_or(0, |&first| self.pa(first)),
            blocks,
        })
    }

    /// Return `blocks` to the pool.
    pub fn free_chain(&mut self, blocks: &[SgBlockId]) {
        self.free.extend(blocks.iter().rev());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::bus::testutils::TestBusDevice;
    use proptest::prelude::*;

    fn pool(count: u16) -> (BusDeviceRef, SgPool) {
        let dma: BusDeviceRef = Arc::new(TestBusDevice::zeroed(0x1_0000));
        let mut allocator = DmaAllocator::new(0x1_0000).unwrap();
        let pool = SgPool::new(dma.clone(), &mut allocator, count).unwrap();

        (dma, pool)
    }

    fn segments(n: usize) -> Vec<DmaSegment> {
        (0..n as u32)
            .map(|i| DmaSegment::new(0x10_0000 + i * 0x1000, 0x200 + i))
            .collect()
    }

    #[test]
    fn block_counts() {
        assert_eq!(blocks_required(1), 1);
        assert_eq!(blocks_required(15), 1);
        assert_eq!(blocks_required(16), 2);
        assert_eq!(blocks_required(255), 17);
    }

    #[test]
    fn chain_is_linked_and_terminated() {
        let (dma, mut pool) = pool(8);
        let list = segments(40);

        let chain = pool.alloc_chain(&list).unwrap();
        assert_eq!(chain.blocks.len(), 3);

        let first = SgBlock::read(&dma, chain.head_pa);
        assert_eq!(first.entries.len(), 15);
        assert_eq!(first.sg_ptr, pool.pa(chain.blocks[1]));

        let last = SgBlock::read(&dma, pool.pa(chain.blocks[2]));
        assert_eq!(last.entries.len(), 10);
        assert_eq!(last.sg_ptr, 0);

        assert_eq!(SgBlock::read_chain(&dma, chain.head_pa, 17), list);
    }

    #[test]
    fn block_image_layout() {
        let block = SgBlock {
            sg_ptr: 0x1234_5678,
            entries: vec![DmaSegment::new(0xAABB_CCDD, 0x200)],
        };
        let b = block.to_bytes();

        assert_eq!(b[3], 1);
        assert_eq!(b[4..8], [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(b[8..12], [0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(SgBlock::from_bytes(&b), block);
    }

    #[test]
    fn freed_chain_is_reused() {
        let (_, mut pool) = pool(3);

        let chain = pool.alloc_chain(&segments(45)).unwrap();
        assert_eq!(pool.free_len(), 0);
        assert!(pool.alloc_chain(&segments(2)).is_none());

        pool.free_chain(&chain.blocks);
        assert_eq!(pool.free_len(), 3);
        assert_eq!(pool.alloc_chain(&segments(2)).unwrap().blocks, vec![chain.blocks[0]]);
    }

    proptest! {
        #[test]
        fn failed_allocation_leaves_the_pool_untouched(
            count in 1u16..12,
            held in 0usize..60,
            wanted in 2usize..255,
        ) {
            let (_, mut pool) = pool(count);
            let _held = pool.alloc_chain(&segments(held.max(1)));

            let before = pool.free.clone();
            let result = pool.alloc_chain(&segments(wanted));

            if let Some(chain) = result {
                prop_assert_eq!(chain.blocks.len(), blocks_required(wanted));
                prop_assert_eq!(pool.free_len() + chain.blocks.len(), before.len());
            } else {
                prop_assert!(blocks_required(wanted) > before.len());
                prop_assert_eq!(pool.free.clone(), before);
            }
        }
    }
}
