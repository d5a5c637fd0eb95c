//! Per-port current sensing on ADC1.
//!
//! Each relay output feeds a hall-effect sensor wired to PA0..PA4. Readings
//! are reported in the same 10-bit sensor units the stored calibration ranges
//! and fault currents use, so the 12-bit conversion is shifted down.

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;
use supervisor_core::record::{DEVICE_COUNT, DeviceId};

/// 12-bit conversion to 10-bit sensor units.
const SENSOR_UNIT_SHIFT: u32 = 2;

pub struct CurrentSense<'d> {
    adc: Adc<'d, ADC1>,
    channels: [AnyAdcChannel<ADC1>; DEVICE_COUNT],
    discard_next: bool,
}

impl<'d> CurrentSense<'d> {
    pub fn new(mut adc: Adc<'d, ADC1>, channels: [AnyAdcChannel<ADC1>; DEVICE_COUNT]) -> Self {
        adc.set_sample_time(SampleTime::CYCLES79_5);
        Self {
            adc,
            channels,
            discard_next: true,
        }
    }

    /// Samples one port.
    pub fn read(&mut self, port: DeviceId) -> i16 {
        let channel = &mut self.channels[port.index()];
        if self.discard_next {
            // First conversion after calibration is unreliable.
            let _ = self.adc.blocking_read(channel);
            self.discard_next = false;
        }
        let counts = self.adc.blocking_read(channel) >> SENSOR_UNIT_SHIFT;
        i16::try_from(counts).unwrap_or(i16::MAX)
    }
}
