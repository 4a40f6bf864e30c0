//! # Host DMA Memory
//!
//! The RISC on both chip generations reads and writes host memory by
//! physical address. [`HostMemory`] is a [`BusDevice`] over an mmap'ed
//! region whose bus addresses double as physical addresses, and
//! [`DmaAllocator`] carves it into the buffers the engines hand to the chip.

use std::{
    fs::File,
    sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering},
};

use memmap2::{MmapMut, MmapOptions};
use tracing::trace;

use super::bus::{BusDevice, Request, RequestSize};

/// A physically contiguous piece of DMA memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DmaSegment {
    /// Physical (bus) address.
    pub addr: u32,

    /// Length in bytes.
    pub len: u32,
}

impl DmaSegment {
    /// Create a segment from address and length.
    #[must_use]
    pub const fn new(addr: u32, len: u32) -> Self {
        Self { addr, len }
    }

    /// The first address behind the segment.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.addr as u64 + self.len as u64
    }
}

/// Host memory that simulated and real chips reach by DMA.
#[derive(Debug)]
pub struct HostMemory {
    size: u64,
    mapping: MmapMut,
}

impl HostMemory {
    /// Create zeroed anonymous memory.
    pub fn anonymous(size: u64) -> Result<Self, std::io::Error> {
        let len = usize::try_from(size)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;

        Ok(Self {
            size,
            mapping: MmapOptions::new().len(len).map_anon()?,
        })
    }

    /// Map a piece of a file as host memory.
    ///
    /// The `File` object is only used for memory-mapping and will not
    /// be read or written to.
    pub fn from_file(fd: &File, file_offset: u64, size: u64) -> Result<Self, std::io::Error> {
        let len = usize::try_from(size)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;

        let mut mmap = MmapOptions::new();
        mmap.len(len);
        mmap.offset(file_offset);

        Ok(Self {
            size,
            // SAFETY: We only access mmap'ed memory via atomics, so the warnings
            // around UB in the MmapMut documentation do not apply.
            mapping: unsafe { mmap.map_mut(fd)? },
        })
    }

    fn ptr(&self, req: Request) -> *const u8 {
        assert!(
            req.addr
                .checked_add(req.size.into())
                .is_some_and(|end| end <= self.size),
            "DMA access {req} outside of host memory"
        );

        // SAFETY: We check whether the request fits into the memory region above.
        unsafe { self.mapping.as_ptr().add(req.addr as usize) }
    }
}

impl BusDevice for HostMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, req: Request) -> u64 {
        let ptr = self.ptr(req);

        match req.size {
            RequestSize::Size1 => {
                // SAFETY:
                //
                // All accesses to the memory happen via atomics, because
                // the pointer never escapes from HostMemory. `ptr` checks
                // that the pointer points to valid memory.
                let atomic = unsafe { &*(ptr as *const AtomicU8) };

                atomic.load(Ordering::Relaxed).into()
            }
            RequestSize::Size2 => {
                // SAFETY: See above.
                let atomic = unsafe { &*(ptr as *const AtomicU16) };

                atomic.load(Ordering::Relaxed).into()
            }
            RequestSize::Size4 => {
                // SAFETY: See above.
                let atomic = unsafe { &*(ptr as *const AtomicU32) };

                atomic.load(Ordering::Relaxed).into()
            }
            RequestSize::Size8 => {
                // SAFETY: See above.
                let atomic = unsafe { &*(ptr as *const AtomicU64) };

                atomic.load(Ordering::Relaxed)
            }
        }
    }

    fn write(&self, req: Request, value: u64) {
        let ptr = self.ptr(req);

        match req.size {
            RequestSize::Size1 => {
                // SAFETY: See read.
                let atomic = unsafe { &*(ptr as *const AtomicU8) };

                atomic.store(value as u8, Ordering::Relaxed);
            }
            RequestSize::Size2 => {
                // SAFETY: See read.
                let atomic = unsafe { &*(ptr as *const AtomicU16) };

                atomic.store(value as u16, Ordering::Relaxed);
            }
            RequestSize::Size4 => {
                // SAFETY: See read.
                let atomic = unsafe { &*(ptr as *const AtomicU32) };

                atomic.store(value as u32, Ordering::Relaxed);
            }
            RequestSize::Size8 => {
                // SAFETY: See read.
                let atomic = unsafe { &*(ptr as *const AtomicU64) };

                atomic.store(value, Ordering::Relaxed)
            }
        }
    }
}

/// Errors of the DMA allocator.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Not enough host memory left.
    #[error("out of DMA memory: requested {requested:#x} bytes, {available:#x} left")]
    OutOfMemory {
        /// Bytes that were requested.
        requested: u32,
        /// Bytes that are still free.
        available: u32,
    },

    /// Host memory above 4 GiB is not reachable by the chips.
    #[error("host memory of {size:#x} bytes exceeds the 32-bit DMA range")]
    NotAddressable {
        /// Size of the host memory.
        size: u64,
    },
}

/// A bump allocator handing out regions of [`HostMemory`].
///
/// Regions are never freed. The engines allocate their pools once at
/// init and keep them across chip resets.
#[derive(Debug)]
pub struct DmaAllocator {
    next: u32,
    end: u32,
}

impl DmaAllocator {
    /// The first page is never handed out so that no buffer has physical
    /// address zero, which both chips use as end-of-list.
    pub const RESERVED_LOW: u32 = 0x1000;

    /// Manage `size` bytes of memory starting at physical address zero.
    pub fn new(size: u64) -> Result<Self, DmaError> {
        let end = u32::try_from(size).map_err(|_| DmaError::NotAddressable { size })?;

        Ok(Self {
            next: Self::RESERVED_LOW.min(end),
            end,
        })
    }

    /// Allocate `len` bytes aligned to `align`, which must be a power of two.
    pub fn alloc(&mut self, len: u32, align: u32) -> Result<DmaSegment, DmaError> {
        debug_assert!(align.is_power_of_two());

        let start = self
            .next
            .checked_add(align - 1)
            .map(|a| a & !(align - 1))
            .filter(|start| start.checked_add(len).is_some_and(|e| e <= self.end))
            .ok_or(DmaError::OutOfMemory {
                requested: len,
                available: self.available(),
            })?;

        self.next = start + len;
        trace!("DMA alloc {len:#x} bytes at {start:#010x}");

        Ok(DmaSegment::new(start, len))
    }

    /// Bytes that can still be allocated, ignoring alignment.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.end - self.next
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::CString,
        io::{Read, Seek},
        os::fd::FromRawFd,
    };

    use super::*;

    fn create_memfd(size: u64) -> Result<File, std::io::Error> {
        let fd = unsafe { libc::memfd_create(CString::new("unittest").unwrap().as_ptr(), 0) };

        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        // SAFETY: fd is a valid file descriptor, because we created it above.
        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len(size)?;

        Ok(file)
    }

    #[test]
    fn can_read_write() -> Result<(), std::io::Error> {
        let mem = HostMemory::anonymous(0x1000)?;

        assert_eq!(mem.read(Request::new(0, RequestSize::Size8)), 0);

        mem.write(Request::new(0, RequestSize::Size8), 0xcafed00dfeedface);
        assert_eq!(mem.read(Request::new(0, RequestSize::Size8)), 0xcafed00dfeedface);
        assert_eq!(mem.read(Request::new(4, RequestSize::Size4)), 0xcafed00d);

        Ok(())
    }

    #[test]
    fn file_offset_is_respected() -> Result<(), std::io::Error> {
        let mut memfd = create_memfd(0x2000)?;
        let mem = HostMemory::from_file(&memfd, 0x1000, 0x1000)?;

        let data = 0xcafed00dfeedface_u64.to_le_bytes();
        mem.write_bulk(0x10, &data);

        let mut check_data = [0; 8];
        memfd.seek(std::io::SeekFrom::Start(0x1010))?;
        memfd.read_exact(&mut check_data)?;

        assert_eq!(check_data, data);

        Ok(())
    }

    #[test]
    #[should_panic(expected = "outside of host memory")]
    fn out_of_range_access_panics() {
        let mem = HostMemory::anonymous(0x1000).unwrap();

        mem.read(Request::new(0xffc, RequestSize::Size8));
    }

    #[test]
    fn allocator_skips_the_first_page_and_aligns() {
        let mut dma = DmaAllocator::new(0x4000).unwrap();

        let a = dma.alloc(0x10, 0x10).unwrap();
        let b = dma.alloc(0x3, 1).unwrap();
        let c = dma.alloc(0x40, 0x40).unwrap();

        assert_eq!(a, DmaSegment::new(0x1000, 0x10));
        assert_eq!(b, DmaSegment::new(0x1010, 0x3));
        assert_eq!(c.addr, 0x1040);
    }

    #[test]
    fn allocator_reports_exhaustion() {
        let mut dma = DmaAllocator::new(0x1100).unwrap();

        assert!(dma.alloc(0x100, 4).is_ok());
        assert_eq!(
            dma.alloc(1, 1),
            Err(DmaError::OutOfMemory {
                requested: 1,
                available: 0
            })
        );
    }
}
