//! Supervisor event catalog and the ring buffer that records it.
//!
//! Every externally visible decision a device supervisor makes (a start, a
//! kill and its reason, a lock-out, a recovered relay) is recorded here as a
//! [`SupervisorEvent`]. The firmware drains new events each tick into its
//! logger and the emulator prints them; the core itself never logs. Event
//! kinds encode to compact `u16` codes so they can cross a diagnostics link
//! without a serializer.

use core::fmt;

use heapless::HistoryBuf;

use crate::device::{CurrentLevel, KillReason};
use crate::record::DeviceId;
use crate::timer::Millis;

/// Monotonically increasing identifier assigned to each recorded event.
pub type EventId = u32;

/// Number of events retained before the oldest are overwritten.
pub const EVENT_RING_CAPACITY: usize = 64;

/// What happened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    Started,
    StartDeferred,
    StartRejected,
    StopRequested,
    StopSignalSent,
    Stopped,
    Killed(KillReason),
    Restarted(KillReason),
    CurrentLevelChanged(CurrentLevel),
    BootLoopLockout,
    RelayRecovered,
    StoreReset,
    StoreFault,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Started => f.write_str("started"),
            EventKind::StartDeferred => f.write_str("start-deferred"),
            EventKind::StartRejected => f.write_str("start-rejected"),
            EventKind::StopRequested => f.write_str("stop-requested"),
            EventKind::StopSignalSent => f.write_str("stop-signal-sent"),
            EventKind::Stopped => f.write_str("stopped"),
            EventKind::Killed(reason) => write!(f, "killed {reason}"),
            EventKind::Restarted(reason) => write!(f, "restarted {reason}"),
            EventKind::CurrentLevelChanged(level) => write!(f, "current {level}"),
            EventKind::BootLoopLockout => f.write_str("boot-loop-lockout"),
            EventKind::RelayRecovered => f.write_str("relay-recovered"),
            EventKind::StoreReset => f.write_str("store-reset"),
            EventKind::StoreFault => f.write_str("store-fault"),
        }
    }
}

impl EventKind {
    const STARTED_CODE: u16 = 0x0000;
    const START_DEFERRED_CODE: u16 = 0x0001;
    const START_REJECTED_CODE: u16 = 0x0002;
    const STOP_REQUESTED_CODE: u16 = 0x0003;
    const STOP_SIGNAL_SENT_CODE: u16 = 0x0004;
    const STOPPED_CODE: u16 = 0x0005;
    const BOOT_LOOP_LOCKOUT_CODE: u16 = 0x0006;
    const RELAY_RECOVERED_CODE: u16 = 0x0007;
    const STORE_RESET_CODE: u16 = 0x0008;
    const STORE_FAULT_CODE: u16 = 0x0009;
    const KILLED_BASE: u16 = 0x0010;
    const RESTARTED_BASE: u16 = 0x0018;
    const CURRENT_LEVEL_BASE: u16 = 0x0020;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            EventKind::Started => Self::STARTED_CODE,
            EventKind::StartDeferred => Self::START_DEFERRED_CODE,
            EventKind::StartRejected => Self::START_REJECTED_CODE,
            EventKind::StopRequested => Self::STOP_REQUESTED_CODE,
            EventKind::StopSignalSent => Self::STOP_SIGNAL_SENT_CODE,
            EventKind::Stopped => Self::STOPPED_CODE,
            EventKind::Killed(reason) => Self::KILLED_BASE + reason.to_raw() as u16,
            EventKind::Restarted(reason) => Self::RESTARTED_BASE + reason.to_raw() as u16,
            EventKind::CurrentLevelChanged(level) => {
                Self::CURRENT_LEVEL_BASE + level.to_raw() as u16
            }
            EventKind::BootLoopLockout => Self::BOOT_LOOP_LOCKOUT_CODE,
            EventKind::RelayRecovered => Self::RELAY_RECOVERED_CODE,
            EventKind::StoreReset => Self::STORE_RESET_CODE,
            EventKind::StoreFault => Self::STORE_FAULT_CODE,
        }
    }

    /// Decodes a raw discriminant, returning `None` for unassigned codes.
    #[must_use]
    pub fn from_raw(code: u16) -> Option<Self> {
        let kind = match code {
            Self::STARTED_CODE => EventKind::Started,
            Self::START_DEFERRED_CODE => EventKind::StartDeferred,
            Self::START_REJECTED_CODE => EventKind::StartRejected,
            Self::STOP_REQUESTED_CODE => EventKind::StopRequested,
            Self::STOP_SIGNAL_SENT_CODE => EventKind::StopSignalSent,
            Self::STOPPED_CODE => EventKind::Stopped,
            Self::BOOT_LOOP_LOCKOUT_CODE => EventKind::BootLoopLockout,
            Self::RELAY_RECOVERED_CODE => EventKind::RelayRecovered,
            Self::STORE_RESET_CODE => EventKind::StoreReset,
            Self::STORE_FAULT_CODE => EventKind::StoreFault,
            value if (Self::KILLED_BASE..Self::RESTARTED_BASE).contains(&value) => {
                EventKind::Killed(KillReason::from_raw(low_byte(value - Self::KILLED_BASE))?)
            }
            value if (Self::RESTARTED_BASE..Self::CURRENT_LEVEL_BASE).contains(&value) => {
                EventKind::Restarted(KillReason::from_raw(low_byte(
                    value - Self::RESTARTED_BASE,
                ))?)
            }
            value if value >= Self::CURRENT_LEVEL_BASE => EventKind::CurrentLevelChanged(
                CurrentLevel::from_raw(low_byte(value - Self::CURRENT_LEVEL_BASE))?,
            ),
            _ => return None,
        };
        Some(kind)
    }

    /// `true` for events an operator should look at.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        match self {
            EventKind::Killed(reason) | EventKind::Restarted(reason) => reason.is_involuntary(),
            EventKind::BootLoopLockout | EventKind::RelayRecovered | EventKind::StoreFault => true,
            _ => false,
        }
    }
}

fn low_byte(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// One recorded supervisor decision.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupervisorEvent {
    pub id: EventId,
    pub at: Millis,
    /// `None` for controller-wide events such as a store reset.
    pub device: Option<DeviceId>,
    pub kind: EventKind,
}

impl fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{}ms ", self.id, self.at.as_millis())?;
        match self.device {
            Some(device) => write!(f, "port {device}: {}", self.kind),
            None => write!(f, "controller: {}", self.kind),
        }
    }
}

/// Records supervisor events into a fixed-size ring buffer.
pub struct EventRecorder<const CAPACITY: usize = EVENT_RING_CAPACITY> {
    ring: HistoryBuf<SupervisorEvent, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> EventRecorder<CAPACITY> {
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Appends an event and returns its id.
    pub fn record(&mut self, at: Millis, device: Option<DeviceId>, kind: EventKind) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(SupervisorEvent {
            id,
            at,
            device,
            kind,
        });

        id
    }

    /// Iterates over the retained events in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &SupervisorEvent> + '_ {
        self.ring.oldest_ordered()
    }

    /// Retained events whose id is `first` or later, oldest first.
    ///
    /// Pass the previous [`EventRecorder::next_id`] to drain only new events.
    pub fn since(&self, first: EventId) -> impl Iterator<Item = &SupervisorEvent> + '_ {
        self.oldest_first()
            .filter(move |event| event.id.wrapping_sub(first) < EventId::MAX / 2)
    }

    /// Id that the next recorded event will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    pub fn latest(&self) -> Option<&SupervisorEvent> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of retained events of the given kind, optionally for one device.
    pub fn count(&self, device: Option<DeviceId>, kind: EventKind) -> usize {
        self.ring
            .oldest_ordered()
            .filter(|event| event.kind == kind && (device.is_none() || event.device == device))
            .count()
    }
}

impl<const CAPACITY: usize> Default for EventRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_decode_to_the_same_kind() {
        let fixtures = [
            (EventKind::Started, 0x0000),
            (EventKind::StoreFault, 0x0009),
            (EventKind::Killed(KillReason::Requested), 0x0010),
            (EventKind::Killed(KillReason::RelayRecovery), 0x0014),
            (EventKind::Restarted(KillReason::CurrentFault), 0x001A),
            (EventKind::CurrentLevelChanged(CurrentLevel::High), 0x0023),
        ];

        for (kind, code) in fixtures {
            assert_eq!(kind.to_raw(), code, "encoding for {kind}");
            assert_eq!(EventKind::from_raw(code), Some(kind), "decoding {code:#06x}");
        }
    }

    #[test]
    fn unassigned_codes_are_rejected() {
        assert_eq!(EventKind::from_raw(0x000F), None);
        assert_eq!(EventKind::from_raw(0x0017), None);
        assert_eq!(EventKind::from_raw(0x0024), None);
    }

    #[test]
    fn ids_increase_and_ring_keeps_the_newest() {
        let mut recorder = EventRecorder::<4>::new();
        let port = DeviceId::new(1);

        for tick in 0..6u32 {
            let id = recorder.record(Millis(tick * 10), port, EventKind::Started);
            assert_eq!(id, tick);
        }

        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> = recorder.oldest_first().map(|event| event.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(recorder.latest().map(|event| event.at), Some(Millis(50)));
    }

    #[test]
    fn since_returns_only_new_events() {
        let mut recorder = EventRecorder::<8>::new();
        recorder.record(Millis(0), None, EventKind::StoreReset);
        let cursor = recorder.next_id();
        recorder.record(Millis(5), DeviceId::new(0), EventKind::Started);
        recorder.record(Millis(6), DeviceId::new(1), EventKind::StartRejected);

        let kinds: heapless::Vec<EventKind, 8> =
            recorder.since(cursor).map(|event| event.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[EventKind::Started, EventKind::StartRejected]
        );
        assert_eq!(recorder.since(recorder.next_id()).count(), 0);
    }

    #[test]
    fn counts_by_device_and_kind() {
        let mut recorder = EventRecorder::<8>::new();
        let nc = DeviceId::new(0);
        let gn = DeviceId::new(1);
        recorder.record(Millis(0), nc, EventKind::Restarted(KillReason::HeartbeatTimeout));
        recorder.record(Millis(1), gn, EventKind::Restarted(KillReason::HeartbeatTimeout));
        recorder.record(Millis(2), nc, EventKind::Started);

        let restarted = EventKind::Restarted(KillReason::HeartbeatTimeout);
        assert_eq!(recorder.count(nc, restarted), 1);
        assert_eq!(recorder.count(None, restarted), 2);
    }

    #[test]
    fn involuntary_kills_are_faults() {
        assert!(EventKind::Killed(KillReason::CurrentFault).is_fault());
        assert!(!EventKind::Killed(KillReason::Requested).is_fault());
        assert!(EventKind::BootLoopLockout.is_fault());
        assert!(!EventKind::Started.is_fault());
    }
}
