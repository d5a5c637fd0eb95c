//! Board wiring for the fleet supervisor.
//!
//! [`BoardPlatform`] backs the core's platform traits with GPIO: one relay
//! driver and one stop-request line per port, plus the boot-select lines for
//! the devices that have one.

use embassy_stm32::gpio::{Level, Output};
use embassy_time::Instant;
use supervisor_core::platform::{
    BootMedia, BootMediaSelect, PortTopology, RelayDriver, StopSignal, WallClock,
};
use supervisor_core::record::{DEVICE_COUNT, DeviceId, UnixTime};

use crate::status;

pub mod current;

/// Boot-select lines fitted on this board.
pub const BOOT_SELECTORS: usize = 2;

pub struct BoardPlatform<'d> {
    relays: [Output<'d>; DEVICE_COUNT],
    stop_lines: [Output<'d>; DEVICE_COUNT],
    boot_select: [Output<'d>; BOOT_SELECTORS],
}

impl<'d> BoardPlatform<'d> {
    pub fn new(
        relays: [Output<'d>; DEVICE_COUNT],
        stop_lines: [Output<'d>; DEVICE_COUNT],
        boot_select: [Output<'d>; BOOT_SELECTORS],
    ) -> Self {
        Self {
            relays,
            stop_lines,
            boot_select,
        }
    }

    fn release_stop_line(&mut self, port: DeviceId) {
        self.stop_lines[port.index()].set_low();
        status::record_stop_request(port, false);
    }
}

impl PortTopology for BoardPlatform<'_> {
    fn is_valid_port(&self, port: DeviceId) -> bool {
        port.index() < self.relays.len()
    }
}

impl RelayDriver for BoardPlatform<'_> {
    fn set_relay(&mut self, port: DeviceId, on: bool) {
        // A fresh power cycle starts with the stop request released.
        self.release_stop_line(port);
        self.relays[port.index()].set_level(if on { Level::High } else { Level::Low });
        status::record_relay(port, on);
    }
}

impl BootMediaSelect for BoardPlatform<'_> {
    fn select_boot_media(&mut self, selector: u8, media: BootMedia) {
        let Some(line) = self.boot_select.get_mut(usize::from(selector)) else {
            defmt::warn!("boot select {} is not fitted", selector);
            return;
        };
        line.set_level(match media {
            BootMedia::Emmc => Level::Low,
            BootMedia::Sd => Level::High,
        });
    }
}

impl StopSignal for BoardPlatform<'_> {
    fn request_stop(&mut self, port: DeviceId) {
        self.stop_lines[port.index()].set_high();
        status::record_stop_request(port, true);
    }
}

/// No RTC is fitted; boot records carry seconds since power-up.
impl WallClock for BoardPlatform<'_> {
    fn unix_time(&self) -> UnixTime {
        u32::try_from(Instant::now().as_secs()).unwrap_or(u32::MAX)
    }
}
