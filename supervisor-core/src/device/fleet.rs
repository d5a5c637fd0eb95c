//! Registry of device supervisors driven from one tick loop.

use core::fmt;

use heapless::Vec;

use super::{Device, DeviceConfig, SupervisorIo, SupervisorPolicy, switch_relay};
use crate::platform::Platform;
use crate::record::{DEVICE_COUNT, DeviceId, NvMemory, StoreError, StoreResult};
use crate::telemetry::EventKind;

/// Registration failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FleetError {
    Full,
    DuplicatePort(DeviceId),
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetError::Full => write!(f, "fleet already holds {DEVICE_COUNT} devices"),
            FleetError::DuplicatePort(port) => write!(f, "port {port} is already supervised"),
        }
    }
}

/// Summary of the startup pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootReport {
    /// The record image was missing or invalid and was reset to defaults.
    pub store_reset: bool,
    pub boot_count: u32,
    /// Ports whose relay was forced off after an interrupted toggle.
    pub recovered: u8,
}

/// Every supervised device, updated in registration order.
#[derive(Clone, Debug)]
pub struct Fleet {
    devices: Vec<Device, DEVICE_COUNT>,
    policy: SupervisorPolicy,
}

impl Fleet {
    #[must_use]
    pub const fn new(policy: SupervisorPolicy) -> Self {
        Self {
            devices: Vec::new(),
            policy,
        }
    }

    pub fn from_configs(configs: &[DeviceConfig], policy: SupervisorPolicy) -> Result<Self, FleetError> {
        let mut fleet = Self::new(policy);
        for config in configs {
            fleet.add(*config)?;
        }
        Ok(fleet)
    }

    pub fn add(&mut self, config: DeviceConfig) -> Result<(), FleetError> {
        if self.device(config.port).is_some() {
            return Err(FleetError::DuplicatePort(config.port));
        }
        self.devices
            .push(Device::new(config, self.policy))
            .map_err(|_| FleetError::Full)
    }

    /// Startup pass, run once before the first tick.
    ///
    /// Validates the record image, bumps the controller boot counter, forces
    /// any relay with an interrupted journal entry to off, and loads each
    /// device's stored tunables.
    pub fn boot<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<BootReport, M>
    where
        M: NvMemory,
        P: Platform,
    {
        let store_reset = io.store.init()?;
        if store_reset {
            io.events.record(io.now, None, EventKind::StoreReset);
        }

        let boot_count = io.store.increment_boot_count()?;
        let wall_clock = io.platform.unix_time();
        io.store.set_last_boot_time(wall_clock)?;

        let recovered = self.recover_interrupted_relays(io);

        for device in &mut self.devices {
            if device.sync(io.store).is_err() {
                io.events.record(io.now, Some(device.port()), EventKind::StoreFault);
            }
        }

        Ok(BootReport {
            store_reset,
            boot_count,
            recovered,
        })
    }

    /// [`Self::boot`] followed by [`Self::start_all`]. Nothing is started
    /// when the startup pass fails, so every relay stays as boot left it.
    pub fn power_on<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<BootReport, M>
    where
        M: NvMemory,
        P: Platform,
    {
        let report = self.boot(io)?;
        self.start_all(io);
        Ok(report)
    }

    /// Drives every port whose journal reads `Attempt` (or is unreadable
    /// garbage) to off. Ports without a registered device are still switched
    /// off. Returns the number of ports recovered.
    pub fn recover_interrupted_relays<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> u8
    where
        M: NvMemory,
        P: Platform,
    {
        let mut recovered = 0;
        for port in DeviceId::all() {
            let interrupted = match io.store.relay_failed(port) {
                Ok(failed) => failed,
                Err(StoreError::Corrupt { .. }) => true,
                Err(_) => {
                    io.events.record(io.now, Some(port), EventKind::StoreFault);
                    continue;
                }
            };
            if !interrupted {
                continue;
            }

            let outcome = match self.devices.iter_mut().find(|device| device.port() == port) {
                Some(device) => device.recover_relay(io),
                None => switch_relay(io, port, false).map(|()| {
                    io.events.record(io.now, Some(port), EventKind::RelayRecovered);
                }),
            };
            match outcome {
                Ok(()) => recovered += 1,
                Err(_) => {
                    io.events.record(io.now, Some(port), EventKind::StoreFault);
                }
            }
        }
        recovered
    }

    /// Ticks every device. A store failure is recorded against that device
    /// and the sweep continues.
    pub fn update_all<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>)
    where
        M: NvMemory,
        P: Platform,
    {
        for device in &mut self.devices {
            if device.update(io).is_err() {
                io.events.record(io.now, Some(device.port()), EventKind::StoreFault);
            }
        }
    }

    /// Requests a start on every device. Disabled devices record a rejection.
    pub fn start_all<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>)
    where
        M: NvMemory,
        P: Platform,
    {
        for device in &mut self.devices {
            if device.start(io).is_err() {
                io.events.record(io.now, Some(device.port()), EventKind::StoreFault);
            }
        }
    }

    pub fn device(&self, port: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|device| device.port() == port)
    }

    pub fn device_mut(&mut self, port: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.port() == port)
    }

    pub fn find(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.name() == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn policy(&self) -> SupervisorPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DEFAULT_FLEET;
    use crate::platform::NoopPlatform;
    use crate::record::{RECORD_SIZE, RamMemory, RecordStore};
    use crate::telemetry::EventRecorder;
    use crate::timer::Millis;

    #[test]
    fn rejects_duplicate_ports() {
        let mut fleet = Fleet::new(SupervisorPolicy::DEFAULT);
        fleet
            .add(DeviceConfig::new("a", DeviceId::port(0)))
            .expect("first registration");

        assert_eq!(
            fleet.add(DeviceConfig::new("b", DeviceId::port(0))),
            Err(FleetError::DuplicatePort(DeviceId::port(0)))
        );
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn default_fleet_fills_every_slot() {
        let mut fleet =
            Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT).expect("default fleet");
        assert_eq!(fleet.len(), DEVICE_COUNT);
        assert_eq!(
            fleet.add(DeviceConfig::new("extra", DeviceId::port(4))),
            Err(FleetError::DuplicatePort(DeviceId::port(4)))
        );
        assert_eq!(fleet.find("cs").map(Device::port), Some(DeviceId::port(2)));
        assert!(fleet.find("missing").is_none());
    }

    #[test]
    fn boot_counts_controller_starts() {
        let mut store = RecordStore::new(RamMemory::<RECORD_SIZE>::new()).expect("store");
        let mut platform = NoopPlatform::new();
        let mut events = EventRecorder::new();
        let mut fleet =
            Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT).expect("default fleet");

        let first = fleet
            .boot(&mut SupervisorIo::new(&mut store, &mut platform, &mut events, Millis(0)))
            .expect("first boot");
        assert!(first.store_reset);
        assert_eq!(first.boot_count, 1);
        assert_eq!(first.recovered, 0);

        let second = fleet
            .boot(&mut SupervisorIo::new(&mut store, &mut platform, &mut events, Millis(0)))
            .expect("second boot");
        assert!(!second.store_reset);
        assert_eq!(second.boot_count, 2);
        assert_eq!(events.count(None, EventKind::StoreReset), 1);
    }

    #[test]
    fn start_all_rejects_disabled_ports() {
        let mut store = RecordStore::new(RamMemory::<RECORD_SIZE>::new()).expect("store");
        let mut platform = NoopPlatform::new();
        let mut events = EventRecorder::new();
        let mut fleet =
            Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT).expect("default fleet");
        let mut io = SupervisorIo::new(&mut store, &mut platform, &mut events, Millis(0));

        fleet.boot(&mut io).expect("boot");
        fleet.start_all(&mut io);

        assert!(fleet.device(DeviceId::port(0)).is_some_and(Device::started));
        assert!(fleet.device(DeviceId::port(1)).is_some_and(Device::pending_start));
        assert_eq!(
            io.events.count(Some(DeviceId::port(3)), EventKind::StartRejected),
            1
        );
    }
}
