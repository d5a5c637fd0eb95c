#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Mirrors supervisor events to the debug log.
//!
//! The core only records events; this drains whatever is new after each tick
//! and emits it through defmt on the target or stdout on the host.

use supervisor_core::telemetry::{EventId, EventKind, EventRecorder, SupervisorEvent};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Severity {
    Info,
    Warn,
    Error,
}

const fn severity(kind: EventKind) -> Severity {
    match kind {
        EventKind::StoreFault | EventKind::BootLoopLockout => Severity::Error,
        kind if kind.is_fault() => Severity::Warn,
        _ => Severity::Info,
    }
}

/// Tracks how far the debug log has caught up with the recorder.
pub struct EventLog {
    cursor: EventId,
}

impl EventLog {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Emits every event recorded since the previous drain. Returns how many were logged.
    pub fn drain<const CAPACITY: usize>(&mut self, events: &EventRecorder<CAPACITY>) -> usize {
        let mut emitted = 0;
        for event in events.since(self.cursor) {
            emit(event, severity(event.kind));
            emitted += 1;
        }
        self.cursor = events.next_id();
        emitted
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
fn emit(event: &SupervisorEvent, severity: Severity) {
    let event = defmt::Display2Format(event);
    match severity {
        Severity::Info => defmt::info!("supervisor {}", event),
        Severity::Warn => defmt::warn!("supervisor {}", event),
        Severity::Error => defmt::error!("supervisor {}", event),
    }
}

#[cfg(not(target_os = "none"))]
fn emit(event: &SupervisorEvent, severity: Severity) {
    match severity {
        Severity::Info => println!("supervisor {event}"),
        Severity::Warn | Severity::Error => eprintln!("supervisor {event}"),
    }
}
