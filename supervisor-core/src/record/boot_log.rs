//! Per-device ring of boot timestamps kept inside the device slot.

use heapless::Vec;

use super::layout::{BOOT_LOG_CAPACITY, device as slot};
use super::{NvMemory, RecordStore, StoreError, StoreResult, UnixTime};

/// Number of timestamps a boot log retains, as a `usize` for buffer sizing.
pub const BOOT_LOG_LEN: usize = BOOT_LOG_CAPACITY as usize;

/// Boot timestamps in oldest-first order.
pub type BootHistory = Vec<UnixTime, BOOT_LOG_LEN>;

/// View over one device's boot log.
///
/// The ring is a `start` cursor, a `count` capped at [`BOOT_LOG_CAPACITY`],
/// and eight 32-bit slots. Once full, each new entry overwrites the oldest
/// one and advances `start`.
pub struct BootLog<'a, M> {
    store: &'a mut RecordStore<M>,
    base: u16,
}

impl<'a, M: NvMemory> BootLog<'a, M> {
    pub(crate) fn new(store: &'a mut RecordStore<M>, base: u16) -> Self {
        Self { store, base }
    }

    /// Empties the log. Slot contents are left as they were.
    pub fn init(&mut self) -> StoreResult<(), M> {
        self.store.write_u8(self.base + slot::BOOT_LOG_START.offset, 0)?;
        self.store.write_u8(self.base + slot::BOOT_LOG_COUNT.offset, 0)
    }

    #[must_use]
    pub const fn capacity(&self) -> u8 {
        BOOT_LOG_CAPACITY
    }

    pub fn count(&mut self) -> StoreResult<u8, M> {
        let addr = self.base + slot::BOOT_LOG_COUNT.offset;
        match self.store.read_u8(addr)? {
            count if count <= BOOT_LOG_CAPACITY => Ok(count),
            value => Err(StoreError::Corrupt { addr, value }),
        }
    }

    fn start(&mut self) -> StoreResult<u8, M> {
        let addr = self.base + slot::BOOT_LOG_START.offset;
        match self.store.read_u8(addr)? {
            start if start < BOOT_LOG_CAPACITY => Ok(start),
            value => Err(StoreError::Corrupt { addr, value }),
        }
    }

    fn slot_addr(&self, index: u8) -> u16 {
        self.base + slot::BOOT_LOG_SLOTS.offset + 4 * u16::from(index)
    }

    /// Appends `time`, evicting the oldest entry when the log is full.
    pub fn add_entry(&mut self, time: UnixTime) -> StoreResult<(), M> {
        let start = self.start()?;
        let count = self.count()?;

        if count < BOOT_LOG_CAPACITY {
            let addr = self.slot_addr((start + count) % BOOT_LOG_CAPACITY);
            self.store.write_u32(addr, time)?;
            self.store
                .write_u8(self.base + slot::BOOT_LOG_COUNT.offset, count + 1)
        } else {
            let addr = self.slot_addr(start);
            self.store.write_u32(addr, time)?;
            self.store.write_u8(
                self.base + slot::BOOT_LOG_START.offset,
                (start + 1) % BOOT_LOG_CAPACITY,
            )
        }
    }

    /// The `index`-th oldest entry, or `None` when `index >= count`.
    pub fn entry(&mut self, index: u8) -> StoreResult<Option<UnixTime>, M> {
        let count = self.count()?;
        if index >= count {
            return Ok(None);
        }
        let start = self.start()?;
        let addr = self.slot_addr((start + index) % BOOT_LOG_CAPACITY);
        self.store.read_u32(addr).map(Some)
    }

    /// All retained entries, oldest first.
    pub fn entries(&mut self) -> StoreResult<BootHistory, M> {
        let mut history = BootHistory::new();
        for index in 0..self.count()? {
            match self.entry(index)? {
                Some(time) if history.push(time).is_ok() => {}
                _ => break,
            }
        }
        Ok(history)
    }
}
