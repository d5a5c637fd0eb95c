use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::Peri;
use embassy_stm32::gpio::{Level, Output, Pin, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use static_cell::StaticCell;
use supervisor_core::device::{DEFAULT_FLEET, Fleet, SupervisorPolicy};
use supervisor_core::record::{DeviceId, RecordStore};
use supervisor_core::telemetry::EventRecorder;

use crate::eeprom::Eeprom;
use crate::hw::BoardPlatform;
use crate::hw::current::CurrentSense;

mod heartbeat_task;
mod supervisor_task;

use supervisor_task::Supervisor;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Heartbeat edges waiting for the next supervisor tick.
pub const HEARTBEAT_QUEUE_DEPTH: usize = 8;

static HEARTBEATS: Channel<CriticalSectionRawMutex, DeviceId, HEARTBEAT_QUEUE_DEPTH> =
    Channel::new();
static SUPERVISOR: StaticCell<Supervisor> = StaticCell::new();

/// Push-pull output that powers up de-asserted.
fn output<'d>(pin: Peri<'d, impl Pin>) -> Output<'d> {
    Output::new(pin, Level::Low, Speed::Low)
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        I2C1,
        EXTI3,
        EXTI4,
        EXTI5,
        EXTI6,
        EXTI7,
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PA7,
        PA8,
        PA9,
        PA10,
        PA11,
        PA12,
        PA15,
        PB2,
        PB3,
        PB4,
        PB5,
        PB6,
        PB7,
        PB8,
        PB9,
        PC14,
        PC15,
        ..
    } = hal::init(config);

    let platform = BoardPlatform::new(
        [output(PA5), output(PA6), output(PA7), output(PA8), output(PA9)],
        [output(PA10), output(PA11), output(PA12), output(PA15), output(PB2)],
        [output(PC14), output(PC15)],
    );

    let current = CurrentSense::new(
        Adc::new(ADC1),
        [
            PA0.degrade_adc(),
            PA1.degrade_adc(),
            PA2.degrade_adc(),
            PA3.degrade_adc(),
            PA4.degrade_adc(),
        ],
    );

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz::khz(400);
    let eeprom = Eeprom::new(I2c::new_blocking(I2C1, PB8, PB9, i2c_config));
    let store = RecordStore::new(eeprom).expect("eeprom smaller than the record layout");

    let fleet = Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT)
        .expect("default fleet fits the port table");

    let supervisor = SUPERVISOR.init(Supervisor {
        store,
        platform,
        current,
        events: EventRecorder::new(),
        fleet,
    });

    let heartbeat_lines = [
        ExtiInput::new(PB3, EXTI3, Pull::Down),
        ExtiInput::new(PB4, EXTI4, Pull::Down),
        ExtiInput::new(PB5, EXTI5, Pull::Down),
        ExtiInput::new(PB6, EXTI6, Pull::Down),
        ExtiInput::new(PB7, EXTI7, Pull::Down),
    ];

    spawner
        .spawn(supervisor_task::run(supervisor))
        .expect("failed to spawn supervisor task");
    spawner
        .spawn(heartbeat_task::run(heartbeat_lines))
        .expect("failed to spawn heartbeat task");

    core::future::pending::<()>().await;
}
