use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use supervisor_core::device::{
    DEFAULT_FLEET, Device, Fleet, KillReason, StartStatus, StopStatus, SupervisorIo,
    SupervisorPolicy,
};
use supervisor_core::platform::{
    BootMedia, BootMediaSelect, PortTopology, RelayDriver, StopSignal, WallClock,
};
use supervisor_core::record::{
    DEVICE_COUNT, DeviceId, NvMemory, RECORD_SIZE, RamMemory, RecordStore, StoreError, UnixTime,
};
use supervisor_core::status::{DeviceStatus, StatusFormatter};
use supervisor_core::telemetry::{EventId, EventRecorder};
use supervisor_core::timer::Millis;

use crate::command::{self, Command, CommandError, Target};

/// Simulated tick period used when advancing time.
pub const TICK: Duration = Duration::from_secs(1);

/// Wall-clock epoch the simulated RTC starts from.
const SIM_EPOCH: UnixTime = 1_700_000_000;

pub type Image = RamMemory<RECORD_SIZE>;

type SessionStoreError = StoreError<<Image as NvMemory>::Error>;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("tick", "tick <duration>               - advance simulated time in 1s ticks (250ms, 16s, 2m, 8h)"),
    ("current", "current <dev> <reading>       - hold a current reading for the device"),
    ("heartbeat", "heartbeat <dev> [on|off]      - send one heartbeat, or toggle automatic heartbeats"),
    ("start", "start <dev>                   - request a start"),
    ("stop", "stop <dev>                    - request a graceful stop"),
    ("kill", "kill <dev>                    - drop the relay immediately"),
    ("restart", "restart <dev>                 - kill and start"),
    ("confirm", "confirm <dev>                 - acknowledge a pending stop request"),
    ("clear", "clear <dev>                   - clear the restart count (lifts a lock-out)"),
    ("enable", "enable <dev> on|off           - set the stored enabled flag"),
    ("manage", "manage <dev> on|off           - set the stored managed flag"),
    ("status", "status [dev]                  - show device status"),
    ("boots", "boots <dev>                   - show the boot log"),
    ("events", "events                        - show retained supervisor events"),
    ("powerloss", "powerloss                     - reset the controller, keeping the record image"),
    ("crash-relay", "crash-relay <dev>             - reset the controller mid relay toggle"),
    ("help", "help [topic]                  - show help for a command"),
];

/// Command-line options for a session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Record image persisted between runs.
    pub image: Option<PathBuf>,
    /// Transcript log written alongside the console.
    pub transcript: Option<PathBuf>,
}

/// Board model: relay states, boot-select lines, and stop requests.
#[derive(Debug)]
struct SimPlatform {
    relays: [bool; DEVICE_COUNT],
    boot_lines: [Option<BootMedia>; 4],
    stop_requests: usize,
    clock_base: UnixTime,
    now: Millis,
}

impl SimPlatform {
    fn new(clock_base: UnixTime) -> Self {
        Self {
            relays: [false; DEVICE_COUNT],
            boot_lines: [None; 4],
            stop_requests: 0,
            clock_base,
            now: Millis::ZERO,
        }
    }
}

impl PortTopology for SimPlatform {
    fn is_valid_port(&self, _: DeviceId) -> bool {
        true
    }
}

impl RelayDriver for SimPlatform {
    fn set_relay(&mut self, port: DeviceId, on: bool) {
        self.relays[port.index()] = on;
    }
}

impl BootMediaSelect for SimPlatform {
    fn select_boot_media(&mut self, selector: u8, media: BootMedia) {
        if let Some(line) = self.boot_lines.get_mut(usize::from(selector)) {
            *line = Some(media);
        }
    }
}

impl StopSignal for SimPlatform {
    fn request_stop(&mut self, _: DeviceId) {
        self.stop_requests += 1;
    }
}

impl WallClock for SimPlatform {
    fn unix_time(&self) -> UnixTime {
        self.clock_base + self.now.as_millis() / 1_000
    }
}

pub struct Session {
    store: RecordStore<Image>,
    platform: SimPlatform,
    events: EventRecorder,
    fleet: Fleet,
    now: Millis,
    drained: EventId,
    held_current: [Option<i16>; DEVICE_COUNT],
    auto_heartbeat: [bool; DEVICE_COUNT],
    image_path: Option<PathBuf>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let image = match &options.image {
            Some(path) => load_image(path)?,
            None => Image::new(),
        };
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let mut session = Self {
            store: RecordStore::new(image).map_err(store_error)?,
            platform: SimPlatform::new(SIM_EPOCH),
            events: EventRecorder::new(),
            fleet: default_fleet()?,
            now: Millis::ZERO,
            drained: 0,
            held_current: [None; DEVICE_COUNT],
            auto_heartbeat: [false; DEVICE_COUNT],
            image_path: options.image,
            transcript,
            started_at: HostInstant::now(),
        };
        session.boot()?;
        Ok(session)
    }

    /// Lines produced by the startup pass (store reset, relay recovery, starts).
    pub fn boot_banner(&mut self) -> io::Result<Vec<String>> {
        let lines = self.drain_events();
        self.record_output(self.started_at.elapsed(), &lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut lines = match command::parse(trimmed) {
            Ok(command) => self.execute(command)?,
            Err(CommandError::Unknown(verb)) => {
                vec![format!("ERR unknown `{verb}`; try `help`")]
            }
            Err(err @ CommandError::Syntax { .. }) => vec![format!("ERR syntax {err}")],
        };
        lines.extend(self.drain_events());

        self.save_image()?;
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command) -> io::Result<Vec<String>> {
        let lines = match command {
            Command::Help(topic) => help_lines(topic.as_deref()),
            Command::Tick(duration) => self.advance(duration),
            Command::Current { target, reading } => self.with_port(&target, |session, port| {
                session.held_current[port.index()] = Some(reading);
                Ok(vec![format!("{target} current held at {reading}")])
            })?,
            Command::Heartbeat { target, auto } => self.with_port(&target, |session, port| {
                Ok(match auto {
                    Some(enabled) => {
                        session.auto_heartbeat[port.index()] = enabled;
                        vec![format!(
                            "{target} automatic heartbeats {}",
                            if enabled { "on" } else { "off" }
                        )]
                    }
                    None => {
                        let now = session.now;
                        session.device_mut(port)?.send_external_heartbeat(now);
                        vec![format!("{target} heartbeat")]
                    }
                })
            })?,
            Command::Start(target) => self.with_port(&target, |session, port| {
                let status = session.run(port, |device, io| device.start(io))?;
                Ok(vec![format!("{target} start: {}", describe_start(status))])
            })?,
            Command::Stop(target) => self.with_port(&target, |session, port| {
                let status = session.run(port, |device, io| Ok(device.stop(io)))?;
                Ok(vec![format!("{target} stop: {}", describe_stop(status))])
            })?,
            Command::Kill(target) => self.with_port(&target, |session, port| {
                session.run(port, |device, io| device.kill(io, KillReason::Requested))?;
                Ok(Vec::new())
            })?,
            Command::Restart(target) => self.with_port(&target, |session, port| {
                let status =
                    session.run(port, |device, io| device.restart(io, KillReason::Requested))?;
                Ok(vec![format!("{target} restart: {}", describe_start(status))])
            })?,
            Command::Confirm(target) => self.with_port(&target, |session, port| {
                let confirmed = session.device_mut(port)?.confirm_shutdown();
                Ok(vec![if confirmed {
                    format!("{target} shutdown confirmed")
                } else {
                    format!("{target} has no pending stop")
                }])
            })?,
            Command::Clear(target) => self.with_port(&target, |session, port| {
                session.device_mut(port)?.clear_reset_count();
                Ok(vec![format!("{target} restart count cleared")])
            })?,
            Command::Enable { target, enabled } => self.with_port(&target, |session, port| {
                session
                    .store
                    .set_device_enabled(port, enabled)
                    .map_err(store_error)?;
                Ok(vec![format!("{target} enabled flag = {enabled}")])
            })?,
            Command::Manage { target, managed } => self.with_port(&target, |session, port| {
                session
                    .store
                    .set_managed(port, managed)
                    .map_err(store_error)?;
                Ok(vec![format!(
                    "{target} managed flag = {managed} (applies on next start)"
                )])
            })?,
            Command::Status(None) => {
                let ports: Vec<DeviceId> = self.fleet.iter().map(Device::port).collect();
                let mut lines = Vec::with_capacity(ports.len());
                for port in ports {
                    lines.push(self.status_line(port)?);
                }
                lines
            }
            Command::Status(Some(target)) => self.with_port(&target, |session, port| {
                Ok(vec![session.status_line(port)?])
            })?,
            Command::Boots(target) => self.with_port(&target, |session, port| {
                let history = session
                    .store
                    .boot_log(port)
                    .entries()
                    .map_err(store_error)?;
                let mut lines = vec![format!("{target} boots ({} retained)", history.len())];
                lines.extend(
                    history
                        .iter()
                        .enumerate()
                        .map(|(index, time)| format!("  {index}. t={time}")),
                );
                Ok(lines)
            })?,
            Command::Events => self
                .events
                .oldest_first()
                .map(ToString::to_string)
                .collect(),
            Command::PowerLoss => self.power_cycle()?,
            Command::CrashRelay(target) => self.with_port(&target, |session, port| {
                session.store.set_relay_begin(port).map_err(store_error)?;
                let mut lines = vec![format!("{target} relay toggle interrupted")];
                lines.extend(session.power_cycle()?);
                Ok(lines)
            })?,
        };
        Ok(lines)
    }

    /// Advances simulated time in [`TICK`] steps, feeding held inputs each tick.
    fn advance(&mut self, duration: Duration) -> Vec<String> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let step = remaining.min(TICK);
            remaining -= step;
            self.now += step;
            self.tick();
        }
        vec![format!("t={}ms", self.now.as_millis())]
    }

    fn tick(&mut self) {
        let now = self.now;
        for port in DeviceId::all() {
            let held = self.held_current[port.index()];
            let auto = self.auto_heartbeat[port.index()];
            if let Some(device) = self.fleet.device_mut(port) {
                if let Some(reading) = held {
                    device.push_current(reading);
                }
                if auto && device.started() {
                    device.send_external_heartbeat(now);
                }
            }
        }

        self.platform.now = now;
        let mut io = SupervisorIo::new(&mut self.store, &mut self.platform, &mut self.events, now);
        self.fleet.update_all(&mut io);
    }

    /// Drops all runtime state and reboots from the record image.
    fn power_cycle(&mut self) -> io::Result<Vec<String>> {
        let clock_base = self.platform.unix_time();
        self.platform = SimPlatform::new(clock_base);
        self.fleet = default_fleet()?;
        self.now = Millis::ZERO;
        self.held_current = [None; DEVICE_COUNT];
        self.auto_heartbeat = [false; DEVICE_COUNT];
        self.boot()?;
        Ok(vec!["controller reset".to_string()])
    }

    fn boot(&mut self) -> io::Result<()> {
        let mut io = SupervisorIo::new(
            &mut self.store,
            &mut self.platform,
            &mut self.events,
            self.now,
        );
        self.fleet.power_on(&mut io).map_err(store_error)?;
        Ok(())
    }

    fn run<T>(
        &mut self,
        port: DeviceId,
        operation: impl FnOnce(
            &mut Device,
            &mut SupervisorIo<'_, Image, SimPlatform>,
        ) -> Result<T, SessionStoreError>,
    ) -> io::Result<T> {
        let now = self.now;
        let device = self
            .fleet
            .device_mut(port)
            .ok_or_else(|| missing_device(port))?;
        let mut io = SupervisorIo::new(&mut self.store, &mut self.platform, &mut self.events, now);
        operation(device, &mut io).map_err(store_error)
    }

    fn with_port(
        &mut self,
        target: &Target,
        action: impl FnOnce(&mut Self, DeviceId) -> io::Result<Vec<String>>,
    ) -> io::Result<Vec<String>> {
        match self.resolve(target) {
            Some(port) => action(self, port),
            None => Ok(vec![format!("ERR no device {target}")]),
        }
    }

    fn resolve(&self, target: &Target) -> Option<DeviceId> {
        match target {
            Target::Port(raw) => DeviceId::new(*raw).filter(|port| self.fleet.device(*port).is_some()),
            Target::Name(name) => self.fleet.find(name).map(Device::port),
        }
    }

    fn device_mut(&mut self, port: DeviceId) -> io::Result<&mut Device> {
        self.fleet
            .device_mut(port)
            .ok_or_else(|| missing_device(port))
    }

    fn status_line(&mut self, port: DeviceId) -> io::Result<String> {
        let device = self.fleet.device(port).ok_or_else(|| missing_device(port))?;
        let status =
            DeviceStatus::capture(device, &mut self.store, self.now).map_err(store_error)?;
        let relay = if self.platform.relays[port.index()] {
            "on"
        } else {
            "off"
        };
        Ok(format!(
            "{} relay={relay}",
            StatusFormatter::new(&status).render_line()
        ))
    }

    fn drain_events(&mut self) -> Vec<String> {
        let lines = self
            .events
            .since(self.drained)
            .map(|event| format!("event {event}"))
            .collect();
        self.drained = self.events.next_id();
        lines
    }

    fn save_image(&self) -> io::Result<()> {
        match &self.image_path {
            Some(path) => fs::write(path, self.store.medium().as_bytes()),
            None => Ok(()),
        }
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn default_fleet() -> io::Result<Fleet> {
    Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))
}

fn load_image(path: &Path) -> io::Result<Image> {
    match fs::read(path) {
        Ok(bytes) => {
            let bytes: [u8; RECORD_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{} holds {} bytes, expected {RECORD_SIZE}",
                        path.display(),
                        bytes.len()
                    ),
                )
            })?;
            Ok(Image::from_bytes(bytes))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Image::new()),
        Err(err) => Err(err),
    }
}

fn store_error(err: SessionStoreError) -> io::Error {
    io::Error::other(format!("record store: {err}"))
}

fn missing_device(port: DeviceId) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no device on port {port}"))
}

fn describe_start(status: StartStatus) -> &'static str {
    match status {
        StartStatus::Started => "started",
        StartStatus::AlreadyStarted => "already started",
        StartStatus::NotEnabled => "not enabled",
    }
}

fn describe_stop(status: StopStatus) -> &'static str {
    match status {
        StopStatus::Stopping => "stopping",
        StopStatus::AlreadyStopped => "already stopped",
        StopStatus::AlreadyStopping => "already stopping",
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) if !target.is_empty() => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        _ => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Devices are named (nc, gn, cs, x1, x2) or numbered 0-4.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(path)?;
        Ok(logger)
    }

    fn write_header(&mut self, path: &Path) -> io::Result<()> {
        let name = path
            .file_stem()
            .map_or_else(|| "session".into(), |stem| stem.to_string_lossy());
        writeln!(self.writer, "# Fleet emulator transcript: {name}")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionOptions::default()).expect("in-memory session")
    }

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("command should not fail")
    }

    #[test]
    fn fresh_image_is_initialized_on_boot() {
        let mut session = session();
        let banner = session.boot_banner().expect("banner");
        assert!(
            banner.iter().any(|line| line.contains("store-reset")),
            "a blank image must be reset: {banner:?}"
        );
        assert!(banner.iter().any(|line| line.contains("port 0: started")));
    }

    #[test]
    fn sustained_over_current_restarts_the_device() {
        let mut session = session();
        run(&mut session, "heartbeat nc on");
        run(&mut session, "current nc 500");
        let output = run(&mut session, "tick 16s");

        assert!(
            output
                .iter()
                .any(|line| line.contains("port 0: restarted current-fault")),
            "expected a current-fault restart: {output:?}"
        );
    }

    #[test]
    fn crash_relay_is_recovered_on_reboot() {
        let mut session = session();
        let output = run(&mut session, "crash-relay gn");

        assert!(output.iter().any(|line| line.contains("controller reset")));
        assert!(
            output
                .iter()
                .any(|line| line.contains("port 1: relay-recovered")),
            "interrupted relay must be recovered: {output:?}"
        );
    }

    #[test]
    fn unknown_devices_are_reported() {
        let mut session = session();
        let output = run(&mut session, "start zz");
        assert_eq!(output, vec!["ERR no device zz".to_string()]);
    }

    #[test]
    fn status_lists_every_device() {
        let mut session = session();
        let output = run(&mut session, "status");
        assert_eq!(output.len(), DEVICE_COUNT);
        assert!(output[0].starts_with("nc port=0 state=started"));
    }
}
