#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared supervision logic for the fleet power controller.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware access (relays, boot-select lines, stop
// requests, the non-volatile medium) is reached only through the traits in
// `platform` and `record::medium`, which the firmware and emulator implement.

pub mod device;
pub mod platform;
pub mod record;
pub mod status;
pub mod telemetry;
pub mod timer;
