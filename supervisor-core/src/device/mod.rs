//! Per-port supervisory state machine.
//!
//! A [`Device`] owns one power-switchable port. It is polled once per tick via
//! [`Device::update`] and never blocks: every wait (start delay, stop grace
//! period, fault windows) is a [`Timer`] re-checked on the next tick. All
//! persistent effects go through the [`RecordStore`]; every relay command is
//! bracketed by the relay journal so an interrupted toggle can be detected
//! after a reset.

use core::fmt;
use core::time::Duration;

pub mod fleet;
pub mod policy;

pub use fleet::{BootReport, Fleet, FleetError};
pub use policy::{SupervisorPolicy, classify_current, classify_current_with_hysteresis};

use crate::platform::{BootMedia, Platform};
use crate::record::{
    BootSelect, DEFAULT_FAULT_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_STOP_TIMEOUT,
    DEFAULT_UNMANAGED_CHANGE_TIME, DeviceId, DeviceSensor, NvMemory, Range, RecordStore,
    StoreResult, default_fault_current,
};
use crate::telemetry::{EventKind, EventRecorder};
use crate::timer::{Millis, Timer};

/// Static identity of a supervised device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    pub name: &'static str,
    pub port: DeviceId,
    /// Boot-select line driven before power-up, if the device has one.
    pub boot_selector: Option<u8>,
    pub primary_media: BootMedia,
    pub secondary_media: BootMedia,
    /// Overrides the stored boot selection on every start.
    pub force_boot_media: Option<BootMedia>,
    pub watch_heartbeat: bool,
    pub watch_current: bool,
    /// Delay between a start request and the relay closing.
    pub start_delay: Duration,
}

impl DeviceConfig {
    #[must_use]
    pub const fn new(name: &'static str, port: DeviceId) -> Self {
        Self {
            name,
            port,
            boot_selector: None,
            primary_media: BootMedia::Emmc,
            secondary_media: BootMedia::Sd,
            force_boot_media: None,
            watch_heartbeat: false,
            watch_current: false,
            start_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn with_boot_selector(mut self, selector: u8) -> Self {
        self.boot_selector = Some(selector);
        self
    }

    #[must_use]
    pub const fn with_media(mut self, primary: BootMedia, secondary: BootMedia) -> Self {
        self.primary_media = primary;
        self.secondary_media = secondary;
        self
    }

    #[must_use]
    pub const fn with_forced_media(mut self, media: BootMedia) -> Self {
        self.force_boot_media = Some(media);
        self
    }

    #[must_use]
    pub const fn watching(mut self, heartbeat: bool, current: bool) -> Self {
        self.watch_heartbeat = heartbeat;
        self.watch_current = current;
        self
    }

    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }
}

/// Standard five-port deployment: node controller, guest node, coresense
/// board, and two auxiliary ports. Starts are staggered to spread inrush.
pub const DEFAULT_FLEET: [DeviceConfig; 5] = [
    DeviceConfig::new("nc", DeviceId::port(0))
        .with_boot_selector(0)
        .watching(true, true),
    DeviceConfig::new("gn", DeviceId::port(1))
        .with_boot_selector(1)
        .watching(true, true)
        .with_start_delay(Duration::from_secs(5)),
    DeviceConfig::new("cs", DeviceId::port(2))
        .watching(true, true)
        .with_start_delay(Duration::from_secs(10)),
    DeviceConfig::new("x1", DeviceId::port(3))
        .watching(false, true)
        .with_start_delay(Duration::from_secs(15)),
    DeviceConfig::new("x2", DeviceId::port(4))
        .watching(false, true)
        .with_start_delay(Duration::from_secs(15)),
];

/// Lifecycle state. The device cycles between these for the life of the process.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DeviceState {
    #[default]
    Stopped,
    Started,
    Stopping,
}

impl DeviceState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            DeviceState::Stopped => "stopped",
            DeviceState::Started => "started",
            DeviceState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classification of the latest current reading.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CurrentLevel {
    #[default]
    Normal,
    Stressed,
    Low,
    High,
}

impl CurrentLevel {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            CurrentLevel::Normal => 0,
            CurrentLevel::Stressed => 1,
            CurrentLevel::Low => 2,
            CurrentLevel::High => 3,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(CurrentLevel::Normal),
            1 => Some(CurrentLevel::Stressed),
            2 => Some(CurrentLevel::Low),
            3 => Some(CurrentLevel::High),
            _ => None,
        }
    }

    /// Levels that count toward a current fault when sustained.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, CurrentLevel::Low | CurrentLevel::High)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            CurrentLevel::Normal => "normal",
            CurrentLevel::Stressed => "stressed",
            CurrentLevel::Low => "low",
            CurrentLevel::High => "high",
        }
    }
}

impl fmt::Display for CurrentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of [`Device::start`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartStatus {
    Started,
    AlreadyStarted,
    NotEnabled,
}

impl StartStatus {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            StartStatus::Started => 0,
            StartStatus::AlreadyStarted => 1,
            StartStatus::NotEnabled => 2,
        }
    }
}

/// Outcome of [`Device::stop`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopStatus {
    Stopping,
    AlreadyStopped,
    AlreadyStopping,
}

/// Why the relay was dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KillReason {
    /// Operator or caller asked for it.
    Requested,
    /// The device did not confirm a graceful stop in time.
    StopTimeout,
    CurrentFault,
    HeartbeatTimeout,
    /// Relay state was unknown after an interrupted toggle.
    RelayRecovery,
}

impl KillReason {
    /// Kills triggered by fault detection; these count as boot failures.
    #[must_use]
    pub const fn is_involuntary(self) -> bool {
        matches!(self, KillReason::CurrentFault | KillReason::HeartbeatTimeout)
    }

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            KillReason::Requested => 0,
            KillReason::StopTimeout => 1,
            KillReason::CurrentFault => 2,
            KillReason::HeartbeatTimeout => 3,
            KillReason::RelayRecovery => 4,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(KillReason::Requested),
            1 => Some(KillReason::StopTimeout),
            2 => Some(KillReason::CurrentFault),
            3 => Some(KillReason::HeartbeatTimeout),
            4 => Some(KillReason::RelayRecovery),
            _ => None,
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KillReason::Requested => "requested",
            KillReason::StopTimeout => "stop-timeout",
            KillReason::CurrentFault => "current-fault",
            KillReason::HeartbeatTimeout => "heartbeat-timeout",
            KillReason::RelayRecovery => "relay-recovery",
        })
    }
}

/// Everything a device touches during one operation, sampled at `now`.
pub struct SupervisorIo<'a, M, P> {
    pub store: &'a mut RecordStore<M>,
    pub platform: &'a mut P,
    pub events: &'a mut EventRecorder,
    pub now: Millis,
}

impl<'a, M, P> SupervisorIo<'a, M, P>
where
    M: NvMemory,
    P: Platform,
{
    pub fn new(
        store: &'a mut RecordStore<M>,
        platform: &'a mut P,
        events: &'a mut EventRecorder,
        now: Millis,
    ) -> Self {
        Self {
            store,
            platform,
            events,
            now,
        }
    }

    fn record(&mut self, port: DeviceId, kind: EventKind) {
        self.events.record(self.now, Some(port), kind);
    }
}

/// Drives `port`'s relay inside the journal bracket.
///
/// A failed `Attempt` write aborts before the relay is touched.
pub(crate) fn switch_relay<M, P>(
    io: &mut SupervisorIo<'_, M, P>,
    port: DeviceId,
    on: bool,
) -> StoreResult<(), M>
where
    M: NvMemory,
    P: Platform,
{
    io.store.set_relay_begin(port)?;
    io.platform.set_relay(port, on);
    io.store.set_relay_end(port)
}

/// Store-backed tunables, captured when the device starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Limits {
    current_range: Range,
    fault_current: i16,
    fault_timeout: Duration,
    heartbeat_timeout: Duration,
    unmanaged_change_time: Duration,
    stop_timeout: Duration,
}

impl Limits {
    fn defaults(port: DeviceId) -> Self {
        let fault_current = default_fault_current(port);
        Self {
            current_range: Range::new(0, fault_current),
            fault_current,
            fault_timeout: DEFAULT_FAULT_TIMEOUT,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            unmanaged_change_time: DEFAULT_UNMANAGED_CHANGE_TIME,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Supervisor for one port.
#[derive(Clone, Debug)]
pub struct Device {
    config: DeviceConfig,
    policy: SupervisorPolicy,
    state: DeviceState,
    current_level: CurrentLevel,
    managed: bool,
    repeated_reset_count: u8,
    should_restart: bool,
    pending_start: bool,
    shutdown_confirmed: bool,
    latest_current: Option<i16>,
    limits: Limits,
    current_level_timer: Timer,
    state_timer: Timer,
    stop_message_timer: Timer,
    heartbeat_timer: Timer,
}

impl Device {
    #[must_use]
    pub fn new(config: DeviceConfig, policy: SupervisorPolicy) -> Self {
        Self {
            config,
            policy,
            state: DeviceState::Stopped,
            current_level: CurrentLevel::Normal,
            managed: true,
            repeated_reset_count: 0,
            should_restart: false,
            pending_start: false,
            shutdown_confirmed: false,
            latest_current: None,
            limits: Limits::defaults(config.port),
            current_level_timer: Timer::default(),
            state_timer: Timer::default(),
            stop_message_timer: Timer::default(),
            heartbeat_timer: Timer::default(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn name(&self) -> &'static str {
        self.config.name
    }

    pub fn port(&self) -> DeviceId {
        self.config.port
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn started(&self) -> bool {
        self.state == DeviceState::Started
    }

    pub fn stopped(&self) -> bool {
        self.state == DeviceState::Stopped
    }

    pub fn current_level(&self) -> CurrentLevel {
        self.current_level
    }

    pub fn latest_current(&self) -> Option<i16> {
        self.latest_current
    }

    pub fn managed(&self) -> bool {
        self.managed
    }

    pub fn repeated_reset_count(&self) -> u8 {
        self.repeated_reset_count
    }

    /// `true` while a delayed start is waiting for its delay to elapse.
    pub fn pending_start(&self) -> bool {
        self.pending_start
    }

    pub fn should_restart(&self) -> bool {
        self.should_restart
    }

    /// Non-fatal advisory: current out of range or repeated restarts.
    pub fn warning(&self) -> bool {
        self.current_level.is_fault()
            || self.repeated_reset_count >= self.policy.warning_reset_count
    }

    /// `true` once the restart count has reached the boot-loop threshold.
    pub fn locked_out(&self) -> bool {
        self.repeated_reset_count >= self.policy.boot_loop_threshold
    }

    /// Re-reads the store-backed tunables without starting the device.
    pub fn sync<M: NvMemory>(&mut self, store: &mut RecordStore<M>) -> StoreResult<(), M> {
        let port = self.config.port;
        self.managed = store.managed(port)?;
        self.limits = Limits {
            current_range: store.device_sensor_status(port, DeviceSensor::Current)?.range,
            fault_current: store.fault_current(port)?,
            fault_timeout: store.fault_timeout(port)?,
            heartbeat_timeout: store.heartbeat_timeout(port)?,
            unmanaged_change_time: store.unmanaged_change_time(port)?,
            stop_timeout: store.stop_timeout(port)?,
        };
        Ok(())
    }

    /// Medium the next start boots from: the forced override if configured,
    /// otherwise the one named by the stored boot selection.
    pub fn boot_media<M: NvMemory>(&self, store: &mut RecordStore<M>) -> StoreResult<BootMedia, M> {
        if let Some(media) = self.config.force_boot_media {
            return Ok(media);
        }
        Ok(match store.boot_select(self.config.port)? {
            BootSelect::Primary => self.config.primary_media,
            BootSelect::Secondary => self.config.secondary_media,
        })
    }

    /// Enabled in the store, and any forced medium is one the device actually has.
    pub fn can_start<M, P>(&self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<bool, M>
    where
        M: NvMemory,
        P: Platform,
    {
        if let Some(forced) = self.config.force_boot_media
            && forced != self.config.primary_media
            && forced != self.config.secondary_media
        {
            return Ok(false);
        }
        io.store.device_enabled(self.config.port, &*io.platform)
    }

    pub fn start<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<StartStatus, M>
    where
        M: NvMemory,
        P: Platform,
    {
        let port = self.config.port;
        if self.state != DeviceState::Stopped || self.pending_start {
            return Ok(StartStatus::AlreadyStarted);
        }
        if !self.can_start(io)? {
            io.record(port, EventKind::StartRejected);
            return Ok(StartStatus::NotEnabled);
        }

        if self.config.start_delay > Duration::ZERO {
            self.pending_start = true;
            self.state_timer.reset(io.now);
            io.record(port, EventKind::StartDeferred);
        } else {
            self.energize(io)?;
        }
        Ok(StartStatus::Started)
    }

    fn energize<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        let port = self.config.port;
        self.pending_start = false;
        self.sync(io.store)?;

        if let Some(selector) = self.config.boot_selector {
            let media = self.boot_media(io.store)?;
            io.platform.select_boot_media(selector, media);
        }

        io.store.increment_boot_attempts(port)?;
        let boot_time = io.platform.unix_time();
        io.store.log_device_boot_time(port, boot_time)?;

        switch_relay(io, port, true)?;

        self.current_level = CurrentLevel::Normal;
        self.latest_current = None;
        self.shutdown_confirmed = false;
        self.current_level_timer.reset(io.now);
        self.heartbeat_timer.reset(io.now);
        self.change_state(DeviceState::Started, io.now);
        io.record(port, EventKind::Started);
        Ok(())
    }

    /// Asks a running device to shut down gracefully.
    pub fn stop<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StopStatus
    where
        M: NvMemory,
        P: Platform,
    {
        self.should_restart = false;
        match self.state {
            DeviceState::Stopped => {
                self.pending_start = false;
                StopStatus::AlreadyStopped
            }
            DeviceState::Stopping => StopStatus::AlreadyStopping,
            DeviceState::Started => {
                self.shutdown_confirmed = false;
                self.change_state(DeviceState::Stopping, io.now);
                io.record(self.config.port, EventKind::StopRequested);
                self.send_stop_signal(io);
                StopStatus::Stopping
            }
        }
    }

    fn send_stop_signal<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>)
    where
        M: NvMemory,
        P: Platform,
    {
        io.platform.request_stop(self.config.port);
        self.stop_message_timer.reset(io.now);
        io.record(self.config.port, EventKind::StopSignalSent);
    }

    /// Drops the relay immediately, whatever the current state.
    pub fn kill<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>, reason: KillReason) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        let port = self.config.port;
        self.pending_start = false;
        switch_relay(io, port, false)?;
        if reason.is_involuntary() {
            io.store.increment_boot_failures(port)?;
        }

        self.current_level = CurrentLevel::Normal;
        self.latest_current = None;
        self.change_state(DeviceState::Stopped, io.now);
        io.record(port, EventKind::Killed(reason));
        Ok(())
    }

    /// Kill followed by start. Fault restarts flip the stored boot selection
    /// so the next attempt uses the other medium.
    pub fn restart<M, P>(
        &mut self,
        io: &mut SupervisorIo<'_, M, P>,
        reason: KillReason,
    ) -> StoreResult<StartStatus, M>
    where
        M: NvMemory,
        P: Platform,
    {
        let port = self.config.port;
        self.kill(io, reason)?;
        self.repeated_reset_count = self.repeated_reset_count.saturating_add(1);

        if reason.is_involuntary()
            && self.config.boot_selector.is_some()
            && self.config.force_boot_media.is_none()
        {
            let select = io.store.boot_select(port)?;
            io.store.set_boot_select(port, select.toggled())?;
        }

        io.record(port, EventKind::Restarted(reason));
        self.start(io)
    }

    /// Advances the state machine by one tick.
    pub fn update<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        match self.state {
            DeviceState::Stopped => self.update_stopped(io),
            DeviceState::Started => self.update_started(io),
            DeviceState::Stopping => self.update_stopping(io),
        }
    }

    fn update_stopped<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        if self.pending_start {
            if self.state_timer.exceeds(io.now, self.config.start_delay) {
                self.energize(io)?;
            }
            return Ok(());
        }

        if self.should_restart {
            self.should_restart = false;
            self.start(io)?;
        }
        Ok(())
    }

    fn update_started<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        if self.should_restart {
            self.should_restart = false;
            return self.restart(io, KillReason::Requested).map(|_| ());
        }

        if self.config.watch_current {
            if let Some(reading) = self.latest_current {
                let level = classify_current_with_hysteresis(
                    self.current_level,
                    reading,
                    self.limits.current_range,
                    self.limits.fault_current,
                    self.policy.current_hysteresis,
                );
                if level != self.current_level {
                    self.current_level = level;
                    self.current_level_timer.reset(io.now);
                    io.record(self.config.port, EventKind::CurrentLevelChanged(level));
                }
            }

            // Unmanaged devices only report current faults.
            if self.managed
                && self.current_level.is_fault()
                && self
                    .current_level_timer
                    .exceeds(io.now, self.limits.fault_timeout)
            {
                return self.handle_fault(io, KillReason::CurrentFault);
            }
        }

        if self.config.watch_heartbeat {
            let window = if self.managed {
                self.limits.heartbeat_timeout
            } else {
                self.limits.unmanaged_change_time
            };
            if self.heartbeat_timer.exceeds(io.now, window) {
                return self.handle_fault(io, KillReason::HeartbeatTimeout);
            }
        }

        Ok(())
    }

    fn update_stopping<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        let port = self.config.port;
        if self.shutdown_confirmed {
            self.shutdown_confirmed = false;
            switch_relay(io, port, false)?;
            self.change_state(DeviceState::Stopped, io.now);
            io.record(port, EventKind::Stopped);
            return Ok(());
        }

        if self.state_timer.exceeds(io.now, self.limits.stop_timeout) {
            return self.kill(io, KillReason::StopTimeout);
        }

        if self
            .stop_message_timer
            .exceeds(io.now, self.policy.stop_message_interval)
        {
            self.send_stop_signal(io);
        }
        Ok(())
    }

    fn handle_fault<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>, reason: KillReason) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        if self.locked_out() {
            self.kill(io, reason)?;
            io.record(self.config.port, EventKind::BootLoopLockout);
            return Ok(());
        }
        self.restart(io, reason).map(|_| ())
    }

    /// Forces the relay off after an interrupted toggle and leaves the device stopped.
    pub fn recover_relay<M, P>(&mut self, io: &mut SupervisorIo<'_, M, P>) -> StoreResult<(), M>
    where
        M: NvMemory,
        P: Platform,
    {
        self.kill(io, KillReason::RelayRecovery)?;
        io.record(self.config.port, EventKind::RelayRecovered);
        Ok(())
    }

    /// Liveness report from the device; the only input that holds off a heartbeat restart.
    pub fn send_external_heartbeat(&mut self, now: Millis) {
        self.heartbeat_timer.reset(now);
    }

    pub fn last_heartbeat_time(&self) -> Millis {
        self.heartbeat_timer.started_at()
    }

    pub fn time_since_heartbeat(&self, now: Millis) -> Duration {
        self.heartbeat_timer.elapsed(now)
    }

    /// Latest raw current reading; classified on the next update.
    pub fn push_current(&mut self, reading: i16) {
        self.latest_current = Some(reading);
    }

    /// The device acknowledged a stop request. Returns `false` if none was pending.
    pub fn confirm_shutdown(&mut self) -> bool {
        if self.state == DeviceState::Stopping {
            self.shutdown_confirmed = true;
        }
        self.shutdown_confirmed
    }

    /// Schedules a start (when stopped) or restart (when started) for the next update.
    pub fn request_restart(&mut self) {
        self.should_restart = true;
    }

    /// Lifts a boot-loop lock-out and clears the warning it raised.
    pub fn clear_reset_count(&mut self) {
        self.repeated_reset_count = 0;
    }

    pub fn time_in_state(&self, now: Millis) -> Duration {
        self.state_timer.elapsed(now)
    }

    fn change_state(&mut self, state: DeviceState, now: Millis) {
        self.state = state;
        self.state_timer.reset(now);
    }
}
