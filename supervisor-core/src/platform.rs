//! Hardware and board collaborators consumed by the supervisor.
//!
//! Each concern is its own small trait so the firmware can back them with
//! different peripherals and tests can record exactly the calls they care
//! about. [`Platform`] bundles them for the common case where one object
//! provides everything.

use crate::record::{DeviceId, UnixTime};

/// Boot medium a device can be pointed at before it is powered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootMedia {
    Sd,
    Emmc,
}

impl BootMedia {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            BootMedia::Sd => "sd",
            BootMedia::Emmc => "emmc",
        }
    }
}

/// Answers which ports are physically wired on this board.
pub trait PortTopology {
    fn is_valid_port(&self, port: DeviceId) -> bool;
}

/// Switches the power relay feeding a port.
pub trait RelayDriver {
    /// Drives the relay. Returns once the command has been issued to hardware.
    fn set_relay(&mut self, port: DeviceId, on: bool);
}

/// Routes a device's boot-select line to one of its media.
pub trait BootMediaSelect {
    fn select_boot_media(&mut self, selector: u8, media: BootMedia);
}

/// Device-facing request asking a running device to shut itself down.
pub trait StopSignal {
    fn request_stop(&mut self, port: DeviceId);
}

/// Wall-clock time used for boot records.
pub trait WallClock {
    fn unix_time(&self) -> UnixTime;
}

/// Everything a device supervisor needs from the board.
pub trait Platform: PortTopology + RelayDriver + BootMediaSelect + StopSignal + WallClock {}

impl<T> Platform for T where T: PortTopology + RelayDriver + BootMediaSelect + StopSignal + WallClock {}

/// Platform that reports every port as valid and performs no hardware interaction.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopPlatform;

impl NoopPlatform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PortTopology for NoopPlatform {
    fn is_valid_port(&self, _: DeviceId) -> bool {
        true
    }
}

impl RelayDriver for NoopPlatform {
    fn set_relay(&mut self, _: DeviceId, _: bool) {}
}

impl BootMediaSelect for NoopPlatform {
    fn select_boot_media(&mut self, _: u8, _: BootMedia) {}
}

impl StopSignal for NoopPlatform {
    fn request_stop(&mut self, _: DeviceId) {}
}

impl WallClock for NoopPlatform {
    fn unix_time(&self) -> UnixTime {
        0
    }
}
