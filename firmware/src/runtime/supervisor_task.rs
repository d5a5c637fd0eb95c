use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Blocking;
use embassy_time::{Duration, Instant, Ticker};
use supervisor_core::device::{Fleet, SupervisorIo};
use supervisor_core::record::{DeviceId, RecordStore};
use supervisor_core::telemetry::EventRecorder;
use supervisor_core::timer::Millis;

use super::HEARTBEATS;
use crate::eeprom::Eeprom;
use crate::hw::BoardPlatform;
use crate::hw::current::CurrentSense;
use crate::status;
use crate::telemetry::EventLog;

/// Supervisor tick period.
pub const TICK: Duration = Duration::from_secs(1);

/// Everything the supervisor loop owns.
pub struct Supervisor {
    pub store: RecordStore<Eeprom<I2c<'static, Blocking>>>,
    pub platform: BoardPlatform<'static>,
    pub current: CurrentSense<'static>,
    pub events: EventRecorder,
    pub fleet: Fleet,
}

impl Supervisor {
    fn boot(&mut self, now: Millis) {
        let mut io = SupervisorIo::new(&mut self.store, &mut self.platform, &mut self.events, now);
        match self.fleet.power_on(&mut io) {
            Ok(report) => {
                status::record_boot_count(report.boot_count);
                defmt::info!(
                    "controller boot #{} store_reset={} relays_recovered={}",
                    report.boot_count,
                    report.store_reset,
                    report.recovered
                );
            }
            Err(err) => defmt::error!(
                "record store unavailable, devices left off: {}",
                defmt::Display2Format(&err)
            ),
        }
        self.publish();
    }

    fn step(&mut self, now: Millis) {
        for port in DeviceId::all() {
            if let Some(device) = self.fleet.device_mut(port)
                && device.config().watch_current
            {
                device.push_current(self.current.read(port));
            }
        }

        while let Ok(port) = HEARTBEATS.try_receive() {
            if let Some(device) = self.fleet.device_mut(port) {
                device.send_external_heartbeat(now);
            }
        }

        let mut io = SupervisorIo::new(&mut self.store, &mut self.platform, &mut self.events, now);
        self.fleet.update_all(&mut io);
        self.publish();
    }

    fn publish(&self) {
        for device in self.fleet.iter() {
            status::publish(device);
        }
    }
}

fn now_millis() -> Millis {
    let wrapped = Instant::now().as_millis() % (u64::from(u32::MAX) + 1);
    Millis(u32::try_from(wrapped).unwrap_or(u32::MAX))
}

#[embassy_executor::task]
pub async fn run(supervisor: &'static mut Supervisor) -> ! {
    let mut log = EventLog::new();
    supervisor.boot(now_millis());
    log.drain(&supervisor.events);

    let mut ticker = Ticker::every(TICK);
    loop {
        ticker.next().await;
        supervisor.step(now_millis());
        log.drain(&supervisor.events);
    }
}
