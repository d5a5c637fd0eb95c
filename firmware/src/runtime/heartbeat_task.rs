use embassy_futures::select::select_array;
use embassy_stm32::exti::ExtiInput;
use supervisor_core::record::{DEVICE_COUNT, DeviceId};

use super::HEARTBEATS;

/// Forwards rising edges on each port's heartbeat input to the supervisor.
#[embassy_executor::task]
pub async fn run(mut lines: [ExtiInput<'static>; DEVICE_COUNT]) -> ! {
    loop {
        let ((), index) =
            select_array(lines.each_mut().map(ExtiInput::wait_for_rising_edge)).await;
        let Some(port) = u8::try_from(index).ok().and_then(DeviceId::new) else {
            continue;
        };
        // A full queue already holds a heartbeat for this tick.
        if HEARTBEATS.try_send(port).is_err() {
            defmt::trace!("heartbeat queue full, dropping port {}", port.get());
        }
    }
}
