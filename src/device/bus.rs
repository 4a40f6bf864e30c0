//! # Register and Memory Access
//!
//! Everything the adapter engines touch, the chip's I/O window as well as
//! host memory that the RISC reaches by DMA, is modelled as a [`BusDevice`].
//! A request carries an address and one of four access widths. Multi-byte
//! values are always little-endian, which is what both chip families expect
//! on the wire.

use std::{
    convert::{TryFrom, TryInto},
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

/// The width of a single bus access.
///
/// [`RequestSize`] exists so that illegal widths cannot be expressed. It
/// converts losslessly to the common integer types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RequestSize {
    Size1 = 1,
    Size2 = 2,
    Size4 = 4,
    Size8 = 8,
}

impl From<RequestSize> for u8 {
    fn from(r: RequestSize) -> Self {
        r as Self
    }
}

impl From<RequestSize> for u64 {
    fn from(r: RequestSize) -> Self {
        r as Self
    }
}

impl From<RequestSize> for usize {
    fn from(r: RequestSize) -> Self {
        r as Self
    }
}

impl Display for RequestSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A width that has no [`RequestSize`] representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal bus access width")]
pub struct IllegalRequestSize {}

impl TryFrom<u64> for RequestSize {
    type Error = IllegalRequestSize;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Size1),
            2 => Ok(Self::Size2),
            4 => Ok(Self::Size4),
            8 => Ok(Self::Size8),
            _ => Err(IllegalRequestSize {}),
        }
    }
}

impl TryFrom<usize> for RequestSize {
    type Error = IllegalRequestSize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map_err(|_| IllegalRequestSize {})?
            .try_into()
    }
}

impl RequestSize {
    /// Mask selecting the bits that a value of this width can hold.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Size8 => u64::MAX,
            other => (1u64 << (other as u32 * 8)) - 1,
        }
    }
}

/// Address and width of a [`BusDevice`] access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Request {
    /// Byte address relative to the start of the device.
    pub addr: u64,

    /// The access width.
    pub size: RequestSize,
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}+{}", self.addr, self.size)
    }
}

impl Request {
    /// Create a new request from address and size.
    #[must_use]
    pub const fn new(addr: u64, size: RequestSize) -> Self {
        Self { addr, size }
    }

    /// Split a request into individual byte requests.
    pub fn iter_bytes(&self) -> impl Iterator<Item = Self> {
        (self.addr..self.addr + u64::from(self.size))
            .map(|addr| Self::new(addr, RequestSize::Size1))
    }
}

/// A device that answers reads and writes.
///
/// Single accesses are atomic: a concurrent reader observes either the old
/// or the new value of a multi-byte write. Bulk accesses give no such
/// guarantee.
pub trait BusDevice: Debug {
    /// The number of addressable bytes. Requests cover `0..size`.
    fn size(&self) -> u64;

    /// Read a value of the requested width.
    fn read(&self, req: Request) -> u64;

    /// Write the low bytes of `value` according to the requested width.
    fn write(&self, req: Request, value: u64);

    /// Read a run of bytes.
    ///
    /// The default implementation issues one byte access per element,
    /// which is fine for the small records the engines move around.
    fn read_bulk(&self, offset: u64, data: &mut [u8]) {
        for (req, value) in Request::new(offset, RequestSize::Size1)
            .iter_run(data.len())
            .zip(data.iter_mut())
        {
            // Only the low byte of a single byte read carries data.
            *value = self.read(req) as u8;
        }
    }

    /// Write a run of bytes. See [`BusDevice::read_bulk`].
    fn write_bulk(&self, offset: u64, data: &[u8]) {
        for (req, &value) in Request::new(offset, RequestSize::Size1)
            .iter_run(data.len())
            .zip(data.iter())
        {
            self.write(req, value.into());
        }
    }
}

impl Request {
    /// Consecutive byte requests starting at this request's address.
    fn iter_run(self, len: usize) -> impl Iterator<Item = Self> {
        (0..len as u64).map(move |i| Self::new(self.addr.wrapping_add(i), RequestSize::Size1))
    }
}

/// A [`BusDevice`] that is not thread-safe by itself.
///
/// Implementors get wrapped into a [`std::sync::Mutex`], which turns them
/// into a normal [`BusDevice`].
pub trait SingleThreadedBusDevice {
    /// See [`BusDevice::size`].
    fn size(&self) -> u64;

    /// See [`BusDevice::read`].
    fn read(&mut self, req: Request) -> u64;

    /// See [`BusDevice::write`].
    fn write(&mut self, req: Request, value: u64);
}

impl<T: SingleThreadedBusDevice + Debug + Send> BusDevice for std::sync::Mutex<T> {
    fn size(&self) -> u64 {
        self.lock().unwrap().size()
    }

    fn write(&self, req: Request, value: u64) {
        self.lock().unwrap().write(req, value)
    }

    fn read(&self, req: Request) -> u64 {
        self.lock().unwrap().read(req)
    }
}

/// A reference-counted, thread-safe handle to a bus device.
pub type BusDeviceRef = Arc<dyn BusDevice + Send + Sync>;

/// Little-endian field helpers for byte images of firmware records.
pub mod le {
    /// Read a `u16` at `offset`.
    #[must_use]
    pub fn u16_at(buf: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([buf[offset], buf[offset + 1]])
    }

    /// Read a `u32` at `offset`.
    #[must_use]
    pub fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])
    }

    /// Store a `u16` at `offset`.
    pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Store a `u32` at `offset`.
    pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
pub(crate) mod testutils {
    use super::*;
    use std::sync::Mutex;

    /// Plain memory for record level tests.
    #[derive(Debug, Default)]
    pub(crate) struct TestBusDevice {
        data: Mutex<Vec<u8>>,
    }

    impl TestBusDevice {
        pub(crate) fn new(data: &[u8]) -> Self {
            Self {
                data: Mutex::new(data.to_vec()),
            }
        }

        pub(crate) fn zeroed(size: usize) -> Self {
            Self::new(&vec![0; size])
        }

        pub(crate) fn read_bulk(&self, offset: u64, data: &mut [u8]) {
            <Self as BusDevice>::read_bulk(self, offset, data)
        }

        pub(crate) fn write_bulk(&self, offset: u64, data: &[u8]) {
            <Self as BusDevice>::write_bulk(self, offset, data)
        }
    }

    impl BusDevice for TestBusDevice {
        fn size(&self) -> u64 {
            self.data.lock().unwrap().len().try_into().unwrap()
        }

        fn read(&self, req: Request) -> u64 {
            let mut bytes = [0u8; 8];
            let len = usize::from(req.size);
            self.read_bulk(req.addr, &mut bytes[..len]);
            u64::from_le_bytes(bytes)
        }

        fn write(&self, req: Request, value: u64) {
            let len = usize::from(req.size);
            self.write_bulk(req.addr, &value.to_le_bytes()[..len]);
        }

        fn read_bulk(&self, offset: u64, data: &mut [u8]) {
            let offset: usize = offset.try_into().unwrap();
            data.copy_from_slice(&self.data.lock().unwrap()[offset..(offset + data.len())])
        }

        fn write_bulk(&self, offset: u64, data: &[u8]) {
            let offset: usize = offset.try_into().unwrap();
            self.data.lock().unwrap()[offset..(offset + data.len())].copy_from_slice(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::TestBusDevice;
    use super::*;

    use proptest::prelude::*;

    impl Arbitrary for RequestSize {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                Just(RequestSize::Size1),
                Just(RequestSize::Size2),
                Just(RequestSize::Size4),
                Just(RequestSize::Size8),
            ]
            .boxed()
        }
    }

    #[test]
    fn invalid_sizes_are_not_converted_to_request_size() {
        for size in [0u64, 3, 5, 6, 7, 9, 16] {
            assert_eq!(RequestSize::try_from(size), Err(IllegalRequestSize {}));
        }
    }

    proptest! {
        #[test]
        fn request_sizes_to_integer_and_back_conversion_is_identity(rs: RequestSize) {
            prop_assert_eq!(RequestSize::try_from(u64::from(rs)), Ok(rs));
        }

        #[test]
        fn writes_are_truncated_to_the_access_width(rs: RequestSize, value: u64) {
            let mem = TestBusDevice::zeroed(16);

            mem.write(Request::new(4, rs), value);

            prop_assert_eq!(mem.read(Request::new(4, rs)), value & rs.mask());
            prop_assert_eq!(mem.read(Request::new(12, RequestSize::Size4)), 0);
        }
    }

    #[test]
    fn request_byte_iterator_works() {
        let bytes: Vec<Request> = Request::new(0x10, RequestSize::Size4).iter_bytes().collect();

        assert_eq!(
            bytes,
            (0x10..0x14)
                .map(|a| Request::new(a, RequestSize::Size1))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn little_endian_helpers_match_bus_layout() {
        let mem = TestBusDevice::zeroed(8);
        mem.write(Request::new(0, RequestSize::Size4), 0x1234_5678);

        let mut image = [0u8; 8];
        mem.read_bulk(0, &mut image);
        assert_eq!(le::u32_at(&image, 0), 0x1234_5678);
        assert_eq!(le::u16_at(&image, 2), 0x1234);

        le::put_u16(&mut image, 4, 0xbeef);
        assert_eq!(image[4..6], [0xef, 0xbe]);
    }
}
