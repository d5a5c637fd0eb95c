//! Address map of the persistent record image.
//!
//! All offsets live in this one table so that adding a field cannot silently
//! collide with an existing one: the `const` block at the bottom of the file
//! fails compilation if any two fields in a region overlap or a region spills
//! into its neighbour. Multi-byte values are stored little-endian.

/// Value written last by a successful initialization.
pub const MAGIC: u32 = 0xADA1_ADA1;

/// Number of power-switchable ports with a device slot.
pub const DEVICE_COUNT: usize = 5;

/// Minimum medium size required by the layout.
pub const RECORD_SIZE: usize = 1024;

/// Number of boot timestamps retained per device.
pub const BOOT_LOG_CAPACITY: u8 = 8;

/// Contiguous run of bytes at a fixed offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub offset: u16,
    pub len: u16,
}

impl Field {
    #[must_use]
    pub const fn new(offset: u16, len: u16) -> Self {
        Self { offset, len }
    }

    #[must_use]
    pub const fn end(self) -> u16 {
        self.offset + self.len
    }

    const fn overlaps(self, other: Field) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Calibration block shared by every analog sensor: health byte plus signed range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorFields {
    pub health: Field,
    pub min: Field,
    pub max: Field,
}

impl SensorFields {
    const fn at(offset: u16) -> Self {
        Self {
            health: Field::new(offset, 1),
            min: Field::new(offset + 1, 2),
            max: Field::new(offset + 3, 2),
        }
    }
}

/// Controller-wide fields at absolute addresses.
pub mod global {
    use super::Field;

    pub const MAGIC: Field = Field::new(0, 4);
    pub const HARDWARE_VERSION: Field = Field::new(4, 2);
    pub const FIRMWARE_VERSION: Field = Field::new(6, 2);
    pub const BOOT_COUNT: Field = Field::new(8, 4);
    pub const LAST_BOOT_TIME: Field = Field::new(12, 4);

    pub const REGION_END: u16 = 128;

    pub(super) const FIELDS: [Field; 5] = [
        MAGIC,
        HARDWARE_VERSION,
        FIRMWARE_VERSION,
        BOOT_COUNT,
        LAST_BOOT_TIME,
    ];
}

/// Calibration for sensors mounted on the controller board, relative to [`shared::START`].
pub mod shared {
    use super::{Field, SensorFields};

    pub const START: u16 = 128;
    pub const SIZE: u16 = 128;

    // Bytes 0..4 are reserved.
    pub const HUMIDITY: SensorFields = SensorFields::at(4);
    pub const ANALOG_HUMIDITY: SensorFields = SensorFields::at(9);
    pub const SUPPLY_CURRENT: SensorFields = SensorFields::at(14);

    pub(super) const FIELDS: [Field; 9] = [
        HUMIDITY.health,
        HUMIDITY.min,
        HUMIDITY.max,
        ANALOG_HUMIDITY.health,
        ANALOG_HUMIDITY.min,
        ANALOG_HUMIDITY.max,
        SUPPLY_CURRENT.health,
        SUPPLY_CURRENT.min,
        SUPPLY_CURRENT.max,
    ];
}

/// Per-device slot fields, relative to the start of the slot.
pub mod device {
    use super::{BOOT_LOG_CAPACITY, Field, SensorFields};

    pub const START: u16 = 256;
    pub const SLOT_SIZE: u16 = 128;

    pub const ENABLED: Field = Field::new(0, 1);
    pub const MANAGED: Field = Field::new(1, 1);
    pub const BOOT_SELECT: Field = Field::new(2, 1);
    pub const LAST_BOOT_TIME: Field = Field::new(3, 4);
    // Counters are 16-bit with two bytes of headroom reserved after each.
    pub const BOOT_ATTEMPTS: Field = Field::new(7, 2);
    pub const BOOT_FAILURES: Field = Field::new(11, 2);
    pub const THERMAL: SensorFields = SensorFields::at(15);
    pub const CURRENT: SensorFields = SensorFields::at(20);
    pub const CURRENT_FAULT_LEVEL: Field = Field::new(25, 2);
    pub const CURRENT_FAULT_TIMEOUT: Field = Field::new(27, 4);
    pub const HEARTBEAT_TIMEOUT: Field = Field::new(31, 4);
    pub const RELAY_HEALTH: Field = Field::new(35, 1);
    pub const RELAY_JOURNAL: Field = Field::new(36, 1);

    pub const BOOT_LOG_SLOTS: Field = Field::new(64, 4 * BOOT_LOG_CAPACITY as u16);
    pub const BOOT_LOG_START: Field = Field::new(96, 1);
    pub const BOOT_LOG_COUNT: Field = Field::new(97, 1);

    pub(super) const FIELDS: [Field; 20] = [
        ENABLED,
        MANAGED,
        BOOT_SELECT,
        LAST_BOOT_TIME,
        // Counters claim their reserved headroom here.
        Field::new(BOOT_ATTEMPTS.offset, 4),
        Field::new(BOOT_FAILURES.offset, 4),
        THERMAL.health,
        THERMAL.min,
        THERMAL.max,
        CURRENT.health,
        CURRENT.min,
        CURRENT.max,
        CURRENT_FAULT_LEVEL,
        CURRENT_FAULT_TIMEOUT,
        HEARTBEAT_TIMEOUT,
        RELAY_HEALTH,
        RELAY_JOURNAL,
        BOOT_LOG_SLOTS,
        BOOT_LOG_START,
        BOOT_LOG_COUNT,
    ];
}

const fn disjoint_within(fields: &[Field], region_len: u16) -> bool {
    let mut i = 0;
    while i < fields.len() {
        if fields[i].end() > region_len {
            return false;
        }
        let mut j = i + 1;
        while j < fields.len() {
            if fields[i].overlaps(fields[j]) {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = {
    assert!(disjoint_within(&global::FIELDS, global::REGION_END));
    assert!(global::REGION_END <= shared::START);
    assert!(disjoint_within(&shared::FIELDS, shared::SIZE));
    assert!(shared::START + shared::SIZE <= device::START);
    assert!(disjoint_within(&device::FIELDS, device::SLOT_SIZE));
    assert!(device::START as usize + DEVICE_COUNT * device::SLOT_SIZE as usize <= RECORD_SIZE);
};
