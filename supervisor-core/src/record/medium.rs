//! Byte-addressable non-volatile medium behind the record store.
//!
//! Firmware backs this with an external I²C EEPROM; the emulator and tests use
//! [`RamMemory`], which can be cloned to model the image that survives a power
//! loss.

use core::fmt;

/// Value an erased EEPROM cell reads back as.
pub const ERASED_BYTE: u8 = 0xFF;

/// Byte-addressable storage with no partial-write atomicity beyond one call.
pub trait NvMemory {
    /// Transport or device error raised by the medium.
    type Error: fmt::Debug;

    /// Number of addressable bytes.
    fn capacity(&self) -> usize;

    /// Fills `buf` with the bytes starting at `addr`.
    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` starting at `addr`. The write is durable once this returns `Ok`.
    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T> NvMemory for &mut T
where
    T: NvMemory + ?Sized,
{
    type Error = T::Error;

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(addr, data)
    }
}

/// Access outside the bounds of a [`RamMemory`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutOfRange {
    pub addr: u16,
    pub len: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes at {:#06x} exceed the medium", self.len, self.addr)
    }
}

/// In-memory medium that starts out erased.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RamMemory<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> RamMemory<N> {
    /// Creates a medium where every byte reads as [`ERASED_BYTE`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [ERASED_BYTE; N],
        }
    }

    /// Wraps an existing image, e.g. one loaded from disk by the emulator.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    fn span(addr: u16, len: usize) -> Result<core::ops::Range<usize>, OutOfRange> {
        let start = usize::from(addr);
        match start.checked_add(len) {
            Some(end) if end <= N => Ok(start..end),
            _ => Err(OutOfRange { addr, len }),
        }
    }
}

impl<const N: usize> Default for RamMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvMemory for RamMemory<N> {
    type Error = OutOfRange;

    fn capacity(&self) -> usize {
        N
    }

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let span = Self::span(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[span]);
        Ok(())
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        let span = Self::span(addr, data.len())?;
        self.bytes[span].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_medium_reads_erased() {
        let mut medium = RamMemory::<16>::new();
        let mut buf = [0u8; 4];
        medium.read(12, &mut buf).expect("read within bounds");
        assert_eq!(buf, [ERASED_BYTE; 4]);
    }

    #[test]
    fn rejects_access_past_the_end() {
        let mut medium = RamMemory::<16>::new();
        let error = medium
            .write(14, &[1, 2, 3])
            .expect_err("write straddles the end of the medium");
        assert_eq!(error, OutOfRange { addr: 14, len: 3 });
    }

    #[test]
    fn borrowed_medium_writes_through() {
        fn poke<M: NvMemory>(mut medium: M) {
            medium.write(2, &[0xAB]).expect("write within bounds");
        }

        let mut medium = RamMemory::<8>::new();
        poke(&mut medium);
        assert_eq!(medium.as_bytes()[2], 0xAB);
    }
}
