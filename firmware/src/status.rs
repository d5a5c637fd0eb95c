#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Lightweight atomics mirror the relay outputs and each port's supervisor
//! state so the heartbeat task and the debug log can read them without
//! borrowing the fleet.

use portable_atomic::{AtomicU8, AtomicU32, Ordering};
use supervisor_core::device::{Device, DeviceState};
use supervisor_core::record::{DEVICE_COUNT, DeviceId};

/// Bitmask of energized relays (1 == on).
static RELAY_MASK: AtomicU8 = AtomicU8::new(0);
/// Bitmask of ports raising a warning.
static WARNING_MASK: AtomicU8 = AtomicU8::new(0);
/// Bitmask of ports with an outstanding stop request line asserted.
static STOP_MASK: AtomicU8 = AtomicU8::new(0);
static STATES: [AtomicU8; DEVICE_COUNT] = [const { AtomicU8::new(0) }; DEVICE_COUNT];
static CONTROLLER_BOOTS: AtomicU32 = AtomicU32::new(0);

fn bit_for(port: DeviceId) -> u8 {
    1 << port.get()
}

fn update_mask(mask: &AtomicU8, port: DeviceId, set: bool) {
    let bit = bit_for(port);
    if set {
        mask.fetch_or(bit, Ordering::Relaxed);
    } else {
        mask.fetch_and(!bit, Ordering::Relaxed);
    }
}

const fn encode_state(state: DeviceState) -> u8 {
    match state {
        DeviceState::Stopped => 0,
        DeviceState::Started => 1,
        DeviceState::Stopping => 2,
    }
}

const fn decode_state(raw: u8) -> DeviceState {
    match raw {
        1 => DeviceState::Started,
        2 => DeviceState::Stopping,
        _ => DeviceState::Stopped,
    }
}

pub fn record_relay(port: DeviceId, on: bool) {
    update_mask(&RELAY_MASK, port, on);
}

pub fn relay_energized(port: DeviceId) -> bool {
    RELAY_MASK.load(Ordering::Relaxed) & bit_for(port) != 0
}

pub fn record_stop_request(port: DeviceId, asserted: bool) {
    update_mask(&STOP_MASK, port, asserted);
}

pub fn stop_requested(port: DeviceId) -> bool {
    STOP_MASK.load(Ordering::Relaxed) & bit_for(port) != 0
}

pub fn record_boot_count(count: u32) {
    CONTROLLER_BOOTS.store(count, Ordering::Relaxed);
}

/// Mirrors the supervisor's view of one device.
pub fn publish(device: &Device) {
    let port = device.port();
    STATES[port.index()].store(encode_state(device.state()), Ordering::Relaxed);
    update_mask(&WARNING_MASK, port, device.warning());
}

pub fn device_state(port: DeviceId) -> DeviceState {
    decode_state(STATES[port.index()].load(Ordering::Relaxed))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub relays: u8,
    pub warnings: u8,
    pub stop_requests: u8,
    pub controller_boots: u32,
}

pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        relays: RELAY_MASK.load(Ordering::Relaxed),
        warnings: WARNING_MASK.load(Ordering::Relaxed),
        stop_requests: STOP_MASK.load(Ordering::Relaxed),
        controller_boots: CONTROLLER_BOOTS.load(Ordering::Relaxed),
    }
}
