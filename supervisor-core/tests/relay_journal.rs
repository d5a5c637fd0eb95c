use heapless::Vec as HeaplessVec;
use supervisor_core::device::{DEFAULT_FLEET, Fleet, KillReason, SupervisorIo, SupervisorPolicy};
use supervisor_core::platform::{
    BootMedia, BootMediaSelect, PortTopology, RelayDriver, StopSignal, WallClock,
};
use supervisor_core::record::{
    DeviceId, NvMemory, RECORD_SIZE, RamMemory, RecordStore, RelayJournal, UnixTime,
    device_region, layout,
};
use supervisor_core::telemetry::{EventKind, EventRecorder};
use supervisor_core::timer::Millis;

type Image = RamMemory<RECORD_SIZE>;

#[derive(Default)]
struct RelayLog {
    commands: HeaplessVec<(DeviceId, bool), 16>,
}

impl PortTopology for RelayLog {
    fn is_valid_port(&self, _: DeviceId) -> bool {
        true
    }
}

impl RelayDriver for RelayLog {
    fn set_relay(&mut self, port: DeviceId, on: bool) {
        self.commands.push((port, on)).expect("relay log capacity");
    }
}

impl BootMediaSelect for RelayLog {
    fn select_boot_media(&mut self, _: u8, _: BootMedia) {}
}

impl StopSignal for RelayLog {
    fn request_stop(&mut self, _: DeviceId) {}
}

impl WallClock for RelayLog {
    fn unix_time(&self) -> UnixTime {
        1_700_000_000
    }
}

fn port(raw: u8) -> DeviceId {
    DeviceId::new(raw).expect("valid port")
}

fn initialized_image() -> Image {
    let mut store = RecordStore::new(Image::new()).expect("medium is large enough");
    store.init().expect("store init");
    store.into_medium()
}

/// Models a reset: only what reached the medium survives.
fn power_cycle(store: RecordStore<Image>) -> RecordStore<Image> {
    RecordStore::new(store.into_medium()).expect("medium is large enough")
}

#[test]
fn begin_without_end_survives_a_reset_as_failed() {
    let mut store = RecordStore::new(initialized_image()).expect("store");
    store.set_relay_begin(port(2)).expect("begin");

    let mut store = power_cycle(store);
    assert_eq!(
        store.relay_failed(port(2)),
        Ok(true),
        "an unfinished relay command must be visible after a reset"
    );
    assert_eq!(store.relay_failed(port(1)), Ok(false));
}

#[test]
fn completed_bracket_is_not_failed() {
    let mut store = RecordStore::new(initialized_image()).expect("store");
    store.set_relay_begin(port(3)).expect("begin");
    store.set_relay_end(port(3)).expect("end");

    let mut store = power_cycle(store);
    assert_eq!(store.relay_failed(port(3)), Ok(false));
    assert_eq!(store.relay_journal(port(3)), Ok(RelayJournal::Success));
}

#[test]
fn boot_forces_interrupted_relays_off() {
    let mut store = RecordStore::new(initialized_image()).expect("store");
    store.set_relay_begin(port(1)).expect("begin");
    let mut store = power_cycle(store);

    let mut platform = RelayLog::default();
    let mut events = EventRecorder::new();
    let mut fleet =
        Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT).expect("default fleet");
    let report = fleet
        .boot(&mut SupervisorIo::new(&mut store, &mut platform, &mut events, Millis::ZERO))
        .expect("boot");

    assert!(!report.store_reset);
    assert_eq!(report.recovered, 1);
    assert_eq!(
        platform.commands.as_slice(),
        &[(port(1), false)],
        "only the interrupted port is touched"
    );
    assert_eq!(store.relay_failed(port(1)), Ok(false));
    assert_eq!(
        events.count(Some(port(1)), EventKind::Killed(KillReason::RelayRecovery)),
        1
    );
    assert_eq!(events.count(Some(port(1)), EventKind::RelayRecovered), 1);
    assert!(fleet.device(port(1)).is_some_and(|device| device.stopped()));
    assert_eq!(store.boot_failures(port(1)), Ok(0));
}

#[test]
fn unreadable_journal_is_treated_as_interrupted() {
    let mut image = initialized_image();
    let journal = device_region(port(4)) + layout::device::RELAY_JOURNAL.offset;
    image.write(journal, &[0x77]).expect("scribble journal");
    let mut store = RecordStore::new(image).expect("store");

    let mut platform = RelayLog::default();
    let mut events = EventRecorder::new();
    let mut fleet = Fleet::new(SupervisorPolicy::DEFAULT);
    let report = fleet
        .boot(&mut SupervisorIo::new(&mut store, &mut platform, &mut events, Millis::ZERO))
        .expect("boot");

    assert_eq!(report.recovered, 1);
    assert_eq!(platform.commands.as_slice(), &[(port(4), false)]);
    assert_eq!(store.relay_journal(port(4)), Ok(RelayJournal::Success));
}

#[test]
fn started_device_leaves_a_clean_journal() {
    let mut store = RecordStore::new(initialized_image()).expect("store");
    let mut platform = RelayLog::default();
    let mut events = EventRecorder::new();
    let mut fleet =
        Fleet::from_configs(&DEFAULT_FLEET, SupervisorPolicy::DEFAULT).expect("default fleet");
    let mut io = SupervisorIo::new(&mut store, &mut platform, &mut events, Millis::ZERO);
    fleet.boot(&mut io).expect("boot");
    fleet.start_all(&mut io);

    let mut store = power_cycle(store);
    for raw in 0..5 {
        assert_eq!(store.relay_failed(port(raw)), Ok(false), "port {raw}");
    }
}
