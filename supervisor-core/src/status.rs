//! Reporting surface shared by the firmware log and the emulator.
//!
//! [`DeviceStatus`] captures the runtime state of a device together with its
//! persistent counters; [`StatusFormatter`] keeps the textual rendering the
//! same across front-ends.

use core::fmt;
use core::time::Duration;

use crate::device::{CurrentLevel, Device, DeviceState};
use crate::platform::BootMedia;
use crate::record::{DeviceId, NvMemory, RecordStore, StoreResult, UnixTime};
use crate::timer::Millis;

/// Point-in-time view of one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceStatus {
    pub name: &'static str,
    pub port: DeviceId,
    pub state: DeviceState,
    pub current_level: CurrentLevel,
    pub latest_current: Option<i16>,
    pub warning: bool,
    pub managed: bool,
    pub pending_start: bool,
    pub repeated_resets: u8,
    pub boot_attempts: u16,
    pub boot_failures: u16,
    pub last_boot: UnixTime,
    pub boot_media: BootMedia,
    /// `None` while the device is not running.
    pub since_heartbeat: Option<Duration>,
}

impl DeviceStatus {
    pub fn capture<M: NvMemory>(
        device: &Device,
        store: &mut RecordStore<M>,
        now: Millis,
    ) -> StoreResult<Self, M> {
        let port = device.port();
        Ok(Self {
            name: device.name(),
            port,
            state: device.state(),
            current_level: device.current_level(),
            latest_current: device.latest_current(),
            warning: device.warning(),
            managed: device.managed(),
            pending_start: device.pending_start(),
            repeated_resets: device.repeated_reset_count(),
            boot_attempts: store.boot_attempts(port)?,
            boot_failures: store.boot_failures(port)?,
            last_boot: store.device_boot_time(port)?,
            boot_media: device.boot_media(store)?,
            since_heartbeat: (device.state() != DeviceState::Stopped)
                .then(|| device.time_since_heartbeat(now)),
        })
    }
}

/// Renders a [`DeviceStatus`] into a single line.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    status: &'a DeviceStatus,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(status: &'a DeviceStatus) -> Self {
        Self { status }
    }

    /// Writes e.g. `nc port=0 state=started current=normal(42) warn=no resets=0 boots=3 failures=1 media=emmc heartbeat=+12.3s`.
    pub fn write_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let status = self.status;
        write!(writer, "{} port={} state=", status.name, status.port)?;
        writer.write_str(status.state.label())?;
        if status.pending_start {
            writer.write_str("(pending)")?;
        }

        write!(writer, " current={}", status.current_level)?;
        if let Some(reading) = status.latest_current {
            write!(writer, "({reading})")?;
        }

        writer.write_str(" warn=")?;
        writer.write_str(if status.warning { "yes" } else { "no" })?;
        if !status.managed {
            writer.write_str(" unmanaged")?;
        }

        write!(
            writer,
            " resets={} boots={} failures={} media={}",
            status.repeated_resets,
            status.boot_attempts,
            status.boot_failures,
            status.boot_media.label()
        )?;

        writer.write_str(" heartbeat=")?;
        write_duration(writer, status.since_heartbeat)
    }

    /// Renders the line into an owned string.
    #[cfg(feature = "alloc")]
    #[must_use]
    pub fn render_line(&self) -> alloc::string::String {
        let mut line = alloc::string::String::new();
        // Writing into a String cannot fail.
        let _ = self.write_line(&mut line);
        line
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StatusFormatter::new(self).write_line(f)
    }
}

fn write_duration<W: fmt::Write>(writer: &mut W, duration: Option<Duration>) -> fmt::Result {
    match duration {
        None => writer.write_str("n/a"),
        Some(value) if value >= Duration::from_secs(1) => {
            let seconds = value.as_secs();
            let tenths = value.subsec_millis() / 100;
            write!(writer, "+{seconds}.{tenths}s")
        }
        Some(value) => write!(writer, "+{}ms", value.as_millis()),
    }
}
