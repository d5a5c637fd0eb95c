//! Persistent record store shared by every device supervisor.
//!
//! The store is a thin typed view over a byte-addressable [`NvMemory`]: each
//! accessor maps straight onto a field of the fixed layout in [`layout`] and
//! performs exactly one read or write. Nothing is cached, so a value observed
//! here is the value that will be observed after a reset. Multi-byte writes
//! are not atomic; a crash in the middle of a counter update can tear it and
//! that risk is accepted rather than masked.
//!
//! Enumerated bytes read back from the medium are decoded into closed enums.
//! A byte outside the enum's domain surfaces as [`StoreError::Corrupt`] so
//! callers can decide how to recover instead of acting on garbage.

use core::fmt;
use core::time::Duration;

pub mod boot_log;
pub mod layout;
pub mod medium;

pub use boot_log::BootLog;
pub use layout::{BOOT_LOG_CAPACITY, DEVICE_COUNT, MAGIC, RECORD_SIZE};
pub use medium::{NvMemory, RamMemory};

use crate::platform::PortTopology;
use crate::timer::duration_to_millis;
use layout::{Field, SensorFields, device as slot, global, shared};

/// Wall-clock seconds since the Unix epoch, as kept by the controller RTC.
pub type UnixTime = u32;

pub const DEFAULT_HARDWARE_VERSION: Version = Version::new(3, 1);
pub const DEFAULT_FIRMWARE_VERSION: Version = Version::new(1, 0);
pub const DEFAULT_FAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_UNMANAGED_CHANGE_TIME: Duration = Duration::from_secs(8 * 60 * 60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default over-current threshold for a port, in raw current-sense units.
#[must_use]
pub const fn default_fault_current(device: DeviceId) -> i16 {
    match device.get() {
        0 | 1 => 120,
        2 => 110,
        _ => 10_000,
    }
}

/// Index of a device slot. Only ids below [`DEVICE_COUNT`] can be constructed,
/// so the store never computes an address outside the device regions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceId(u8);

impl DeviceId {
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < DEVICE_COUNT {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Const-context constructor for static device tables.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a `const`) if `raw` has no slot.
    #[must_use]
    pub const fn port(raw: u8) -> Self {
        assert!((raw as usize) < DEVICE_COUNT, "port has no device slot");
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Every slot id in ascending order.
    pub fn all() -> impl Iterator<Item = DeviceId> {
        (0u8..).take(DEVICE_COUNT).map(DeviceId)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base address of a device slot.
#[must_use]
pub fn device_region(device: DeviceId) -> u16 {
    slot::START + u16::from(device.get()) * slot::SLOT_SIZE
}

fn device_addr(device: DeviceId, field: Field) -> u16 {
    device_region(device) + field.offset
}

/// Major/minor version pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Inclusive calibration range in raw sensor units.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Range {
    pub min: i16,
    pub max: i16,
}

impl Range {
    #[must_use]
    pub const fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }
}

/// Health byte recorded for sensors and relays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Health {
    Unknown,
    Ok,
    Failed,
}

impl Health {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            Health::Unknown => 0,
            Health::Ok => 1,
            Health::Failed => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Health::Unknown),
            1 => Some(Health::Ok),
            2 => Some(Health::Failed),
            _ => None,
        }
    }
}

/// Health and calibration range of one analog sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorStatus {
    pub health: Health,
    pub range: Range,
}

impl SensorStatus {
    /// Sensor that has never been calibrated; its range admits every reading.
    pub const UNCALIBRATED: Self = Self {
        health: Health::Unknown,
        range: Range::new(i16::MIN, i16::MAX),
    };

    #[must_use]
    pub const fn new(health: Health, range: Range) -> Self {
        Self { health, range }
    }
}

/// Sensors mounted on the controller board itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SharedSensor {
    Humidity,
    AnalogHumidity,
    SupplyCurrent,
}

impl SharedSensor {
    pub const ALL: [SharedSensor; 3] = [
        SharedSensor::Humidity,
        SharedSensor::AnalogHumidity,
        SharedSensor::SupplyCurrent,
    ];

    const fn fields(self) -> SensorFields {
        match self {
            SharedSensor::Humidity => shared::HUMIDITY,
            SharedSensor::AnalogHumidity => shared::ANALOG_HUMIDITY,
            SharedSensor::SupplyCurrent => shared::SUPPLY_CURRENT,
        }
    }
}

/// Sensors attached to each device port.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceSensor {
    Thermal,
    Current,
}

impl DeviceSensor {
    const fn fields(self) -> SensorFields {
        match self {
            DeviceSensor::Thermal => slot::THERMAL,
            DeviceSensor::Current => slot::CURRENT,
        }
    }
}

/// Write-ahead marker bracketing every relay toggle.
///
/// `Attempt` is written before the relay command is issued and `Success` only
/// after it returns, so finding `Attempt` at startup proves the previous
/// session reset while the relay was being switched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayJournal {
    Success,
    Attempt,
}

impl RelayJournal {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RelayJournal::Success => 0,
            RelayJournal::Attempt => 1,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RelayJournal::Success),
            1 => Some(RelayJournal::Attempt),
            _ => None,
        }
    }
}

/// Which of a device's two boot media the next start should use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootSelect {
    Primary,
    Secondary,
}

impl BootSelect {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            BootSelect::Primary => 0,
            BootSelect::Secondary => 1,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BootSelect::Primary),
            1 => Some(BootSelect::Secondary),
            _ => None,
        }
    }

    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            BootSelect::Primary => BootSelect::Secondary,
            BootSelect::Secondary => BootSelect::Primary,
        }
    }
}

/// Devices that are powered regardless of their stored enabled flag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EnablePolicy {
    always_enabled: &'static [u8],
}

impl EnablePolicy {
    /// Node controller, first guest node, and the sensor board are critical
    /// infrastructure and can never be disabled from storage.
    pub const DEFAULT: Self = Self::new(&[0, 1, 2]);

    #[must_use]
    pub const fn new(always_enabled: &'static [u8]) -> Self {
        Self { always_enabled }
    }

    #[must_use]
    pub fn is_always_enabled(&self, device: DeviceId) -> bool {
        self.always_enabled.contains(&device.get())
    }
}

impl Default for EnablePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors surfaced by the record store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreError<E> {
    /// The underlying medium failed the read or write.
    Medium(E),
    /// A stored enumerated byte decoded to no known value.
    Corrupt { addr: u16, value: u8 },
    /// The medium cannot hold the record layout.
    MediumTooSmall { capacity: usize },
}

impl<E: fmt::Debug> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Medium(err) => write!(f, "medium error: {err:?}"),
            StoreError::Corrupt { addr, value } => {
                write!(f, "corrupt record byte {value:#04x} at {addr:#06x}")
            }
            StoreError::MediumTooSmall { capacity } => {
                write!(f, "medium holds {capacity} bytes, layout needs {RECORD_SIZE}")
            }
        }
    }
}

/// Result alias for store operations over medium `M`.
pub type StoreResult<T, M> = Result<T, StoreError<<M as NvMemory>::Error>>;

/// Typed accessors over the persistent record image.
pub struct RecordStore<M> {
    medium: M,
    policy: EnablePolicy,
}

impl<M: NvMemory> RecordStore<M> {
    /// Wraps `medium` using the default always-enabled policy.
    pub fn new(medium: M) -> StoreResult<Self, M> {
        Self::with_policy(medium, EnablePolicy::DEFAULT)
    }

    pub fn with_policy(medium: M, policy: EnablePolicy) -> StoreResult<Self, M> {
        let capacity = medium.capacity();
        if capacity < RECORD_SIZE {
            return Err(StoreError::MediumTooSmall { capacity });
        }
        Ok(Self { medium, policy })
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn into_medium(self) -> M {
        self.medium
    }

    pub fn enable_policy(&self) -> EnablePolicy {
        self.policy
    }

    // -- initialization ---------------------------------------------------

    /// Returns `true` when the magic value is present.
    pub fn initialized(&mut self) -> StoreResult<bool, M> {
        Ok(self.read_u32(global::MAGIC.offset)? == MAGIC)
    }

    /// Resets every region to defaults unless the magic value is already present.
    ///
    /// The magic value is written last, so an interrupted initialization is
    /// simply repeated on the next boot. Returns `true` when a reset happened.
    pub fn init(&mut self) -> StoreResult<bool, M> {
        if self.initialized()? {
            return Ok(false);
        }

        self.set_boot_count(0)?;
        self.set_last_boot_time(0)?;
        self.set_hardware_version(DEFAULT_HARDWARE_VERSION)?;
        self.set_firmware_version(DEFAULT_FIRMWARE_VERSION)?;

        for sensor in SharedSensor::ALL {
            self.set_sensor_status(sensor, SensorStatus::UNCALIBRATED)?;
        }

        for device in DeviceId::all() {
            self.reset_device(device)?;
        }

        // Default deployment: node controller plus a single guest node.
        self.set_device_enabled(DeviceId::port(0), true)?;
        self.set_device_enabled(DeviceId::port(1), true)?;

        self.write_u32(global::MAGIC.offset, MAGIC)?;
        Ok(true)
    }

    /// Invalidates the magic value so the next [`RecordStore::init`] resets everything.
    pub fn clear_magic(&mut self) -> StoreResult<(), M> {
        self.write_u32(global::MAGIC.offset, 0)
    }

    fn reset_device(&mut self, device: DeviceId) -> StoreResult<(), M> {
        let fault_current = default_fault_current(device);

        self.set_device_enabled(device, false)?;
        self.set_managed(device, true)?;
        self.set_boot_select(device, BootSelect::Primary)?;
        self.set_device_boot_time(device, 0)?;
        self.set_boot_attempts(device, 0)?;
        self.set_boot_failures(device, 0)?;
        self.set_device_sensor_status(device, DeviceSensor::Thermal, SensorStatus::UNCALIBRATED)?;
        self.set_device_sensor_status(
            device,
            DeviceSensor::Current,
            SensorStatus::new(Health::Unknown, Range::new(0, fault_current)),
        )?;
        self.set_fault_current(device, fault_current)?;
        self.set_fault_timeout(device, DEFAULT_FAULT_TIMEOUT)?;
        self.set_heartbeat_timeout(device, DEFAULT_HEARTBEAT_TIMEOUT)?;
        self.set_relay_health(device, Health::Ok)?;
        self.set_relay_end(device)?;
        self.boot_log(device).init()
    }

    // -- global region ----------------------------------------------------

    pub fn hardware_version(&mut self) -> StoreResult<Version, M> {
        self.read_version(global::HARDWARE_VERSION.offset)
    }

    pub fn set_hardware_version(&mut self, version: Version) -> StoreResult<(), M> {
        self.write_bytes(
            global::HARDWARE_VERSION.offset,
            &[version.major, version.minor],
        )
    }

    pub fn firmware_version(&mut self) -> StoreResult<Version, M> {
        self.read_version(global::FIRMWARE_VERSION.offset)
    }

    pub fn set_firmware_version(&mut self, version: Version) -> StoreResult<(), M> {
        self.write_bytes(
            global::FIRMWARE_VERSION.offset,
            &[version.major, version.minor],
        )
    }

    pub fn boot_count(&mut self) -> StoreResult<u32, M> {
        self.read_u32(global::BOOT_COUNT.offset)
    }

    pub fn set_boot_count(&mut self, count: u32) -> StoreResult<(), M> {
        self.write_u32(global::BOOT_COUNT.offset, count)
    }

    /// Read-modify-write; not atomic with respect to power loss.
    pub fn increment_boot_count(&mut self) -> StoreResult<u32, M> {
        let count = self.boot_count()?.wrapping_add(1);
        self.set_boot_count(count)?;
        Ok(count)
    }

    pub fn last_boot_time(&mut self) -> StoreResult<UnixTime, M> {
        self.read_u32(global::LAST_BOOT_TIME.offset)
    }

    pub fn set_last_boot_time(&mut self, time: UnixTime) -> StoreResult<(), M> {
        self.write_u32(global::LAST_BOOT_TIME.offset, time)
    }

    pub fn sensor_status(&mut self, sensor: SharedSensor) -> StoreResult<SensorStatus, M> {
        self.read_sensor(shared::START, sensor.fields())
    }

    pub fn set_sensor_status(
        &mut self,
        sensor: SharedSensor,
        status: SensorStatus,
    ) -> StoreResult<(), M> {
        self.write_sensor(shared::START, sensor.fields(), status)
    }

    // -- device slots -----------------------------------------------------

    /// Whether `device` may be powered.
    ///
    /// Ids in the always-enabled policy ignore storage. Other ids are enabled
    /// only when the topology reports a valid port and the stored flag is set.
    pub fn device_enabled<T>(&mut self, device: DeviceId, topology: &T) -> StoreResult<bool, M>
    where
        T: PortTopology + ?Sized,
    {
        if self.policy.is_always_enabled(device) {
            return Ok(true);
        }
        if !topology.is_valid_port(device) {
            return Ok(false);
        }
        self.read_bool(device_addr(device, slot::ENABLED))
    }

    pub fn set_device_enabled(&mut self, device: DeviceId, enabled: bool) -> StoreResult<(), M> {
        self.write_u8(device_addr(device, slot::ENABLED), u8::from(enabled))
    }

    pub fn managed(&mut self, device: DeviceId) -> StoreResult<bool, M> {
        self.read_bool(device_addr(device, slot::MANAGED))
    }

    pub fn set_managed(&mut self, device: DeviceId, managed: bool) -> StoreResult<(), M> {
        self.write_u8(device_addr(device, slot::MANAGED), u8::from(managed))
    }

    pub fn boot_select(&mut self, device: DeviceId) -> StoreResult<BootSelect, M> {
        let addr = device_addr(device, slot::BOOT_SELECT);
        let raw = self.read_u8(addr)?;
        BootSelect::from_raw(raw).ok_or(StoreError::Corrupt { addr, value: raw })
    }

    pub fn set_boot_select(&mut self, device: DeviceId, select: BootSelect) -> StoreResult<(), M> {
        self.write_u8(device_addr(device, slot::BOOT_SELECT), select.to_raw())
    }

    pub fn device_boot_time(&mut self, device: DeviceId) -> StoreResult<UnixTime, M> {
        self.read_u32(device_addr(device, slot::LAST_BOOT_TIME))
    }

    pub fn set_device_boot_time(&mut self, device: DeviceId, time: UnixTime) -> StoreResult<(), M> {
        self.write_u32(device_addr(device, slot::LAST_BOOT_TIME), time)
    }

    /// Records `time` as the device's last boot and appends it to the boot log.
    pub fn log_device_boot_time(&mut self, device: DeviceId, time: UnixTime) -> StoreResult<(), M> {
        self.set_device_boot_time(device, time)?;
        self.boot_log(device).add_entry(time)
    }

    pub fn boot_attempts(&mut self, device: DeviceId) -> StoreResult<u16, M> {
        self.read_u16(device_addr(device, slot::BOOT_ATTEMPTS))
    }

    pub fn set_boot_attempts(&mut self, device: DeviceId, attempts: u16) -> StoreResult<(), M> {
        self.write_u16(device_addr(device, slot::BOOT_ATTEMPTS), attempts)
    }

    pub fn increment_boot_attempts(&mut self, device: DeviceId) -> StoreResult<u16, M> {
        let attempts = self.boot_attempts(device)?.wrapping_add(1);
        self.set_boot_attempts(device, attempts)?;
        Ok(attempts)
    }

    pub fn boot_failures(&mut self, device: DeviceId) -> StoreResult<u16, M> {
        self.read_u16(device_addr(device, slot::BOOT_FAILURES))
    }

    pub fn set_boot_failures(&mut self, device: DeviceId, failures: u16) -> StoreResult<(), M> {
        self.write_u16(device_addr(device, slot::BOOT_FAILURES), failures)
    }

    pub fn increment_boot_failures(&mut self, device: DeviceId) -> StoreResult<u16, M> {
        let failures = self.boot_failures(device)?.wrapping_add(1);
        self.set_boot_failures(device, failures)?;
        Ok(failures)
    }

    pub fn device_sensor_status(
        &mut self,
        device: DeviceId,
        sensor: DeviceSensor,
    ) -> StoreResult<SensorStatus, M> {
        self.read_sensor(device_region(device), sensor.fields())
    }

    pub fn set_device_sensor_status(
        &mut self,
        device: DeviceId,
        sensor: DeviceSensor,
        status: SensorStatus,
    ) -> StoreResult<(), M> {
        self.write_sensor(device_region(device), sensor.fields(), status)
    }

    /// Current draw above which the device is classified as over-current.
    pub fn fault_current(&mut self, device: DeviceId) -> StoreResult<i16, M> {
        let stored = self.read_i16(device_addr(device, slot::CURRENT_FAULT_LEVEL))?;
        Ok(if stored > 0 {
            stored
        } else {
            default_fault_current(device)
        })
    }

    pub fn set_fault_current(&mut self, device: DeviceId, current: i16) -> StoreResult<(), M> {
        self.write_i16(device_addr(device, slot::CURRENT_FAULT_LEVEL), current)
    }

    /// How long a high or low current level may persist before the device is restarted.
    pub fn fault_timeout(&mut self, device: DeviceId) -> StoreResult<Duration, M> {
        self.read_timeout(
            device_addr(device, slot::CURRENT_FAULT_TIMEOUT),
            DEFAULT_FAULT_TIMEOUT,
        )
    }

    pub fn set_fault_timeout(&mut self, device: DeviceId, timeout: Duration) -> StoreResult<(), M> {
        self.write_u32(
            device_addr(device, slot::CURRENT_FAULT_TIMEOUT),
            duration_to_millis(timeout),
        )
    }

    /// How long a managed device may go without a heartbeat.
    pub fn heartbeat_timeout(&mut self, device: DeviceId) -> StoreResult<Duration, M> {
        self.read_timeout(
            device_addr(device, slot::HEARTBEAT_TIMEOUT),
            DEFAULT_HEARTBEAT_TIMEOUT,
        )
    }

    pub fn set_heartbeat_timeout(
        &mut self,
        device: DeviceId,
        timeout: Duration,
    ) -> StoreResult<(), M> {
        self.write_u32(
            device_addr(device, slot::HEARTBEAT_TIMEOUT),
            duration_to_millis(timeout),
        )
    }

    /// Idle window after which an unmanaged device is reconsidered.
    ///
    /// Not yet a stored tunable; routed through the store so callers do not
    /// change when it becomes one.
    pub fn unmanaged_change_time(&mut self, _device: DeviceId) -> StoreResult<Duration, M> {
        Ok(DEFAULT_UNMANAGED_CHANGE_TIME)
    }

    /// Grace period between a stop request and a forced kill.
    pub fn stop_timeout(&mut self, _device: DeviceId) -> StoreResult<Duration, M> {
        Ok(DEFAULT_STOP_TIMEOUT)
    }

    pub fn relay_health(&mut self, device: DeviceId) -> StoreResult<Health, M> {
        let addr = device_addr(device, slot::RELAY_HEALTH);
        let raw = self.read_u8(addr)?;
        Health::from_raw(raw).ok_or(StoreError::Corrupt { addr, value: raw })
    }

    pub fn set_relay_health(&mut self, device: DeviceId, health: Health) -> StoreResult<(), M> {
        self.write_u8(device_addr(device, slot::RELAY_HEALTH), health.to_raw())
    }

    pub fn relay_journal(&mut self, device: DeviceId) -> StoreResult<RelayJournal, M> {
        let addr = device_addr(device, slot::RELAY_JOURNAL);
        let raw = self.read_u8(addr)?;
        RelayJournal::from_raw(raw).ok_or(StoreError::Corrupt { addr, value: raw })
    }

    /// Marks a relay command as in flight. Must complete before the relay is driven.
    pub fn set_relay_begin(&mut self, device: DeviceId) -> StoreResult<(), M> {
        self.write_u8(
            device_addr(device, slot::RELAY_JOURNAL),
            RelayJournal::Attempt.to_raw(),
        )
    }

    /// Marks the in-flight relay command as completed.
    pub fn set_relay_end(&mut self, device: DeviceId) -> StoreResult<(), M> {
        self.write_u8(
            device_addr(device, slot::RELAY_JOURNAL),
            RelayJournal::Success.to_raw(),
        )
    }

    /// `true` when the last relay command for `device` never confirmed completion.
    pub fn relay_failed(&mut self, device: DeviceId) -> StoreResult<bool, M> {
        Ok(self.relay_journal(device)? == RelayJournal::Attempt)
    }

    /// Boot history ring stored inside the device slot.
    pub fn boot_log(&mut self, device: DeviceId) -> BootLog<'_, M> {
        BootLog::new(self, device_region(device))
    }

    // -- raw access -------------------------------------------------------

    fn read_array<const N: usize>(&mut self, addr: u16) -> StoreResult<[u8; N], M> {
        let mut buf = [0u8; N];
        self.medium
            .read(addr, &mut buf)
            .map_err(StoreError::Medium)?;
        Ok(buf)
    }

    fn write_bytes(&mut self, addr: u16, bytes: &[u8]) -> StoreResult<(), M> {
        self.medium.write(addr, bytes).map_err(StoreError::Medium)
    }

    pub(crate) fn read_u8(&mut self, addr: u16) -> StoreResult<u8, M> {
        let [value] = self.read_array::<1>(addr)?;
        Ok(value)
    }

    pub(crate) fn write_u8(&mut self, addr: u16, value: u8) -> StoreResult<(), M> {
        self.write_bytes(addr, &[value])
    }

    fn read_bool(&mut self, addr: u16) -> StoreResult<bool, M> {
        match self.read_u8(addr)? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(StoreError::Corrupt { addr, value }),
        }
    }

    fn read_u16(&mut self, addr: u16) -> StoreResult<u16, M> {
        Ok(u16::from_le_bytes(self.read_array(addr)?))
    }

    fn write_u16(&mut self, addr: u16, value: u16) -> StoreResult<(), M> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn read_i16(&mut self, addr: u16) -> StoreResult<i16, M> {
        Ok(i16::from_le_bytes(self.read_array(addr)?))
    }

    fn write_i16(&mut self, addr: u16, value: i16) -> StoreResult<(), M> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub(crate) fn read_u32(&mut self, addr: u16) -> StoreResult<u32, M> {
        Ok(u32::from_le_bytes(self.read_array(addr)?))
    }

    pub(crate) fn write_u32(&mut self, addr: u16, value: u32) -> StoreResult<(), M> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn read_version(&mut self, addr: u16) -> StoreResult<Version, M> {
        let [major, minor] = self.read_array::<2>(addr)?;
        Ok(Version::new(major, minor))
    }

    fn read_timeout(&mut self, addr: u16, fallback: Duration) -> StoreResult<Duration, M> {
        // Zero and all-ones both mean "never written".
        Ok(match self.read_u32(addr)? {
            0 | u32::MAX => fallback,
            millis => Duration::from_millis(u64::from(millis)),
        })
    }

    fn read_sensor(&mut self, base: u16, fields: SensorFields) -> StoreResult<SensorStatus, M> {
        let addr = base + fields.health.offset;
        let raw = self.read_u8(addr)?;
        let health = Health::from_raw(raw).ok_or(StoreError::Corrupt { addr, value: raw })?;
        let min = self.read_i16(base + fields.min.offset)?;
        let max = self.read_i16(base + fields.max.offset)?;
        Ok(SensorStatus::new(health, Range::new(min, max)))
    }

    fn write_sensor(
        &mut self,
        base: u16,
        fields: SensorFields,
        status: SensorStatus,
    ) -> StoreResult<(), M> {
        self.write_u8(base + fields.health.offset, status.health.to_raw())?;
        self.write_i16(base + fields.min.offset, status.range.min)?;
        self.write_i16(base + fields.max.offset, status.range.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NoopPlatform;

    type TestStore = RecordStore<RamMemory<RECORD_SIZE>>;

    struct OnlyPorts(&'static [u8]);

    impl PortTopology for OnlyPorts {
        fn is_valid_port(&self, port: DeviceId) -> bool {
            self.0.contains(&port.get())
        }
    }

    fn fresh_store() -> TestStore {
        let mut store = RecordStore::new(RamMemory::new()).expect("medium is large enough");
        assert!(store.init().expect("init should succeed"));
        store
    }

    fn id(raw: u8) -> DeviceId {
        DeviceId::new(raw).expect("valid device id")
    }

    #[test]
    fn device_ids_stop_at_device_count() {
        assert!(DeviceId::new(4).is_some());
        assert!(DeviceId::new(5).is_none());
        assert_eq!(DeviceId::all().count(), DEVICE_COUNT);
    }

    #[test]
    fn device_regions_are_fixed_stride() {
        assert_eq!(device_region(id(0)), 256);
        assert_eq!(device_region(id(1)), 384);
        assert_eq!(device_region(id(4)), 768);
    }

    #[test]
    fn rejects_undersized_medium() {
        let result = RecordStore::new(RamMemory::<512>::new());
        assert!(matches!(
            result,
            Err(StoreError::MediumTooSmall { capacity: 512 })
        ));
    }

    #[test]
    fn init_writes_defaults_and_magic() {
        let mut store = fresh_store();

        assert!(store.initialized().expect("read magic"));
        assert_eq!(store.boot_count().expect("boot count"), 0);
        assert_eq!(
            store.hardware_version().expect("hardware version"),
            DEFAULT_HARDWARE_VERSION
        );
        assert_eq!(
            store.firmware_version().expect("firmware version"),
            DEFAULT_FIRMWARE_VERSION
        );

        for device in DeviceId::all() {
            assert_eq!(store.boot_attempts(device).expect("attempts"), 0);
            assert_eq!(store.boot_failures(device).expect("failures"), 0);
            assert!(!store.relay_failed(device).expect("journal"));
            assert!(store.managed(device).expect("managed"));
            assert_eq!(
                store.boot_select(device).expect("boot select"),
                BootSelect::Primary
            );
            assert_eq!(store.boot_log(device).count().expect("log count"), 0);
        }

        let stored = |store: &mut TestStore, raw| {
            store
                .read_u8(device_addr(id(raw), slot::ENABLED))
                .expect("enabled flag")
        };
        assert_eq!(stored(&mut store, 0), 1);
        assert_eq!(stored(&mut store, 1), 1);
        assert_eq!(stored(&mut store, 2), 0);
        assert_eq!(stored(&mut store, 3), 0);
    }

    #[test]
    fn second_init_leaves_the_image_untouched() {
        let mut store = fresh_store();
        store.set_boot_count(41).expect("set boot count");
        store.set_device_enabled(id(4), true).expect("enable port 4");
        let before = *store.medium().as_bytes();

        assert!(!store.init().expect("second init"));
        assert_eq!(*store.medium().as_bytes(), before);
    }

    #[test]
    fn cleared_magic_forces_reinitialization() {
        let mut store = fresh_store();
        store.set_boot_count(9).expect("set boot count");
        store.clear_magic().expect("clear magic");

        assert!(store.init().expect("init after clear"));
        assert_eq!(store.boot_count().expect("boot count"), 0);
    }

    #[test]
    fn interrupted_init_is_not_mistaken_for_initialized() {
        let mut store = RecordStore::new(RamMemory::<RECORD_SIZE>::new()).expect("store");
        // Defaults written, magic never reached.
        store.set_boot_count(0).expect("partial init");
        assert!(!store.initialized().expect("read magic"));
    }

    #[test]
    fn fields_round_trip() {
        let mut store = fresh_store();
        let device = id(3);

        store.set_hardware_version(Version::new(4, 2)).expect("hw");
        store.set_firmware_version(Version::new(1, 7)).expect("fw");
        store.set_last_boot_time(1_700_000_000).expect("last boot");
        store.set_boot_count(123_456).expect("boot count");
        store.set_managed(device, false).expect("managed");
        store
            .set_boot_select(device, BootSelect::Secondary)
            .expect("boot select");
        store.set_device_boot_time(device, 1_700_000_100).expect("boot time");
        store.set_boot_attempts(device, 513).expect("attempts");
        store.set_boot_failures(device, 17).expect("failures");
        store.set_fault_current(device, 250).expect("fault current");
        store
            .set_fault_timeout(device, Duration::from_secs(20))
            .expect("fault timeout");
        store
            .set_heartbeat_timeout(device, Duration::from_secs(90))
            .expect("heartbeat timeout");
        store.set_relay_health(device, Health::Failed).expect("relay health");
        let thermal = SensorStatus::new(Health::Ok, Range::new(-40, 85));
        store
            .set_device_sensor_status(device, DeviceSensor::Thermal, thermal)
            .expect("thermal");
        let humidity = SensorStatus::new(Health::Ok, Range::new(5, 95));
        store
            .set_sensor_status(SharedSensor::Humidity, humidity)
            .expect("humidity");

        assert_eq!(store.hardware_version().expect("hw"), Version::new(4, 2));
        assert_eq!(store.firmware_version().expect("fw"), Version::new(1, 7));
        assert_eq!(store.last_boot_time().expect("last boot"), 1_700_000_000);
        assert_eq!(store.boot_count().expect("boot count"), 123_456);
        assert!(!store.managed(device).expect("managed"));
        assert_eq!(
            store.boot_select(device).expect("boot select"),
            BootSelect::Secondary
        );
        assert_eq!(store.device_boot_time(device).expect("boot time"), 1_700_000_100);
        assert_eq!(store.boot_attempts(device).expect("attempts"), 513);
        assert_eq!(store.boot_failures(device).expect("failures"), 17);
        assert_eq!(store.fault_current(device).expect("fault current"), 250);
        assert_eq!(
            store.fault_timeout(device).expect("fault timeout"),
            Duration::from_secs(20)
        );
        assert_eq!(
            store.heartbeat_timeout(device).expect("heartbeat timeout"),
            Duration::from_secs(90)
        );
        assert_eq!(store.relay_health(device).expect("relay health"), Health::Failed);
        assert_eq!(
            store
                .device_sensor_status(device, DeviceSensor::Thermal)
                .expect("thermal"),
            thermal
        );
        assert_eq!(
            store.sensor_status(SharedSensor::Humidity).expect("humidity"),
            humidity
        );

        // Neighbouring slots are untouched.
        assert_eq!(store.boot_attempts(id(2)).expect("attempts"), 0);
        assert_eq!(store.boot_attempts(id(4)).expect("attempts"), 0);
    }

    #[test]
    fn counters_increment_in_place() {
        let mut store = fresh_store();
        let device = id(1);

        assert_eq!(store.increment_boot_count().expect("boot count"), 1);
        assert_eq!(store.increment_boot_count().expect("boot count"), 2);
        assert_eq!(store.increment_boot_attempts(device).expect("attempts"), 1);
        assert_eq!(store.increment_boot_failures(device).expect("failures"), 1);
        assert_eq!(store.increment_boot_failures(device).expect("failures"), 2);
        assert_eq!(store.boot_failures(device).expect("failures"), 2);
    }

    #[test]
    fn critical_devices_are_always_enabled() {
        let mut store = fresh_store();
        let topology = NoopPlatform::new();

        for raw in 0..3 {
            store.set_device_enabled(id(raw), false).expect("disable");
            assert!(store.device_enabled(id(raw), &topology).expect("enabled"));
        }
    }

    #[test]
    fn other_devices_follow_the_stored_flag() {
        let mut store = fresh_store();
        let topology = NoopPlatform::new();
        let device = id(4);

        assert!(!store.device_enabled(device, &topology).expect("enabled"));
        store.set_device_enabled(device, true).expect("enable");
        assert!(store.device_enabled(device, &topology).expect("enabled"));
    }

    #[test]
    fn invalid_ports_are_never_enabled() {
        let mut store = fresh_store();
        let device = id(3);
        store.set_device_enabled(device, true).expect("enable");

        let topology = OnlyPorts(&[0, 1, 2, 4]);
        assert!(!store.device_enabled(device, &topology).expect("enabled"));
    }

    #[test]
    fn enable_policy_is_overridable() {
        let mut store = RecordStore::with_policy(RamMemory::<RECORD_SIZE>::new(), EnablePolicy::new(&[0]))
            .expect("store");
        store.init().expect("init");
        let topology = NoopPlatform::new();

        assert!(store.device_enabled(id(0), &topology).expect("enabled"));
        assert!(!store.device_enabled(id(2), &topology).expect("enabled"));
    }

    #[test]
    fn relay_journal_brackets_commands() {
        let mut store = fresh_store();
        let device = id(2);

        store.set_relay_begin(device).expect("begin");
        assert!(store.relay_failed(device).expect("journal"));
        assert_eq!(
            store.relay_journal(device).expect("journal"),
            RelayJournal::Attempt
        );

        store.set_relay_end(device).expect("end");
        assert!(!store.relay_failed(device).expect("journal"));
    }

    #[test]
    fn corrupt_journal_byte_is_reported() {
        let mut store = fresh_store();
        let device = id(1);
        let addr = device_addr(device, slot::RELAY_JOURNAL);
        store.write_u8(addr, 0x5A).expect("scribble");

        assert_eq!(
            store.relay_failed(device),
            Err(StoreError::Corrupt { addr, value: 0x5A })
        );
    }

    #[test]
    fn erased_timeouts_fall_back_to_defaults() {
        let mut store = fresh_store();
        let device = id(3);
        store
            .write_u32(device_addr(device, slot::HEARTBEAT_TIMEOUT), u32::MAX)
            .expect("erase");
        store
            .write_u32(device_addr(device, slot::CURRENT_FAULT_TIMEOUT), 0)
            .expect("zero");

        assert_eq!(
            store.heartbeat_timeout(device).expect("heartbeat"),
            DEFAULT_HEARTBEAT_TIMEOUT
        );
        assert_eq!(
            store.fault_timeout(device).expect("fault"),
            DEFAULT_FAULT_TIMEOUT
        );
        assert_eq!(
            store.unmanaged_change_time(device).expect("unmanaged"),
            Duration::from_secs(28_800)
        );
        assert_eq!(store.stop_timeout(device).expect("stop"), Duration::from_secs(60));
    }

    #[test]
    fn fault_current_defaults_per_port() {
        let mut store = fresh_store();
        assert_eq!(store.fault_current(id(0)).expect("fault current"), 120);
        assert_eq!(store.fault_current(id(2)).expect("fault current"), 110);
        assert_eq!(store.fault_current(id(4)).expect("fault current"), 10_000);
    }
}
