#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Record medium backed by a 24LC64-class I²C EEPROM.
//!
//! Two-byte big-endian word addressing, 32-byte write pages. Writes are split
//! on page boundaries and each page is acknowledge-polled until the internal
//! write cycle finishes, so a returned `Ok` means the bytes are durable.

use core::fmt;

use embedded_hal::i2c::I2c;
use supervisor_core::record::NvMemory;

/// 7-bit bus address with A2..A0 strapped low.
pub const DEFAULT_ADDRESS: u8 = 0x50;
/// Size of the part in bytes.
pub const CAPACITY: usize = 8 * 1024;
/// Bytes per write page.
pub const PAGE_SIZE: usize = 32;
/// Acknowledge polls tolerated after a page write (~5 ms at 400 kHz).
pub const WRITE_POLL_ATTEMPTS: u16 = 200;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EepromError<E> {
    Bus(E),
    OutOfRange { addr: u16, len: usize },
    /// The part kept NACKing after a page write.
    WriteTimeout { addr: u16 },
}

impl<E: fmt::Debug> fmt::Display for EepromError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EepromError::Bus(err) => write!(f, "i2c: {err:?}"),
            EepromError::OutOfRange { addr, len } => {
                write!(f, "{len} bytes at {addr:#06x} exceed the eeprom")
            }
            EepromError::WriteTimeout { addr } => {
                write!(f, "write cycle at {addr:#06x} never completed")
            }
        }
    }
}

pub struct Eeprom<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Eeprom<I> {
    pub const fn new(i2c: I) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub const fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    fn check_range(addr: u16, len: usize) -> Result<(), EepromError<I::Error>> {
        if usize::from(addr) + len > CAPACITY {
            return Err(EepromError::OutOfRange { addr, len });
        }
        Ok(())
    }

    fn write_page(&mut self, addr: u16, chunk: &[u8]) -> Result<(), EepromError<I::Error>> {
        let mut frame = [0u8; PAGE_SIZE + 2];
        frame[..2].copy_from_slice(&addr.to_be_bytes());
        frame[2..2 + chunk.len()].copy_from_slice(chunk);
        self.i2c
            .write(self.address, &frame[..2 + chunk.len()])
            .map_err(EepromError::Bus)?;
        self.wait_for_write_cycle(addr)
    }

    /// The part NACKs its address until the write cycle is done.
    fn wait_for_write_cycle(&mut self, addr: u16) -> Result<(), EepromError<I::Error>> {
        let pointer = addr.to_be_bytes();
        for _ in 0..WRITE_POLL_ATTEMPTS {
            if self.i2c.write(self.address, &pointer).is_ok() {
                return Ok(());
            }
        }
        Err(EepromError::WriteTimeout { addr })
    }
}

impl<I: I2c> NvMemory for Eeprom<I> {
    type Error = EepromError<I::Error>;

    fn capacity(&self) -> usize {
        CAPACITY
    }

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_range(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c
            .write_read(self.address, &addr.to_be_bytes(), buf)
            .map_err(EepromError::Bus)
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error> {
        Self::check_range(addr, data.len())?;
        let mut cursor = addr;
        let mut remaining = data;
        while !remaining.is_empty() {
            let room = PAGE_SIZE - usize::from(cursor) % PAGE_SIZE;
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));
            self.write_page(cursor, chunk)?;
            // In range: checked against CAPACITY above.
            cursor = cursor.wrapping_add(u16::try_from(chunk.len()).unwrap_or(u16::MAX));
            remaining = rest;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
    use supervisor_core::record::{RECORD_SIZE, RecordStore};

    /// Bus model of the part: page-wrapping writes and a busy window after each.
    struct MockEeprom {
        cells: [u8; CAPACITY],
        pointer: usize,
        busy_polls: u16,
        busy_after_write: u16,
        page_writes: usize,
    }

    impl MockEeprom {
        fn new(busy_after_write: u16) -> Self {
            Self {
                cells: [0xFF; CAPACITY],
                pointer: 0,
                busy_polls: 0,
                busy_after_write,
                page_writes: 0,
            }
        }
    }

    impl ErrorType for MockEeprom {
        type Error = ErrorKind;
    }

    impl I2c for MockEeprom {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, DEFAULT_ADDRESS, "unexpected bus address");
            for operation in operations {
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                    return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
                }
                match operation {
                    Operation::Write(bytes) => {
                        let (pointer, data) = bytes.split_at(2);
                        self.pointer = usize::from(u16::from_be_bytes([pointer[0], pointer[1]]));
                        if data.is_empty() {
                            continue;
                        }
                        let page = self.pointer - self.pointer % PAGE_SIZE;
                        for (offset, byte) in data.iter().enumerate() {
                            let column = (self.pointer % PAGE_SIZE + offset) % PAGE_SIZE;
                            self.cells[page + column] = *byte;
                        }
                        self.page_writes += 1;
                        self.busy_polls = self.busy_after_write;
                    }
                    Operation::Read(buf) => {
                        for byte in buf.iter_mut() {
                            *byte = self.cells[self.pointer % CAPACITY];
                            self.pointer += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn writes_are_split_on_page_boundaries() {
        let mut eeprom = Eeprom::new(MockEeprom::new(3));
        let data: [u8; 40] = core::array::from_fn(|index| u8::try_from(index).expect("small"));

        eeprom.write(28, &data).expect("write across pages");
        let mut back = [0u8; 40];
        eeprom.read(28, &mut back).expect("read back");

        assert_eq!(back, data, "page wrapping must not scramble the data");
        assert_eq!(
            eeprom.release().page_writes,
            3,
            "4 + 32 + 4 bytes span three pages"
        );
    }

    #[test]
    fn a_part_that_never_finishes_times_out() {
        let mut eeprom = Eeprom::new(MockEeprom::new(u16::MAX));
        assert_eq!(
            eeprom.write(0, &[1, 2, 3]),
            Err(EepromError::WriteTimeout { addr: 0 })
        );
    }

    #[test]
    fn accesses_past_the_part_are_rejected() {
        let mut eeprom = Eeprom::new(MockEeprom::new(0));
        let mut buf = [0u8; 4];
        assert_eq!(
            eeprom.read(8190, &mut buf),
            Err(EepromError::OutOfRange { addr: 8190, len: 4 })
        );
    }

    #[test]
    fn backs_a_record_store() {
        let mut store =
            RecordStore::new(Eeprom::new(MockEeprom::new(2))).expect("eeprom holds a record");
        assert!(CAPACITY >= RECORD_SIZE);
        assert_eq!(store.init(), Ok(true), "a blank part is initialized");
        assert_eq!(store.init(), Ok(false), "the magic persists");
        assert_eq!(store.increment_boot_count(), Ok(1));
    }
}
