//! Input pollers end to end: mock bus → expander adapter → poller → publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use iobridge::adapters::hardware::ExpanderPins;
use iobridge::addressing::Channel;
use iobridge::app::poller::InputPoller;
use iobridge::app::ports::PinPort;
use iobridge::error::HardwareError;

use crate::mock_hw::{CapturePublisher, DEVICE_ID, MockBus, registry};

fn poller(bus_addr: u8, pins: Arc<dyn PinPort>) -> (InputPoller, Arc<CapturePublisher>, Arc<AtomicBool>) {
    let publisher = Arc::new(CapturePublisher::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let p = InputPoller::new(
        bus_addr,
        DEVICE_ID,
        registry(),
        pins,
        publisher.clone(),
        shutdown.clone(),
    )
    .unwrap();
    (p, publisher, shutdown)
}

fn expanders(bus: &MockBus) -> Arc<dyn PinPort> {
    Arc::new(ExpanderPins::new(bus.clone(), &registry()).unwrap())
}

#[test]
fn asserted_input_publishes_on_its_topic() {
    let bus = MockBus::default();
    bus.pull_low(37, 1);
    let (p, publisher, _) = poller(37, expanders(&bus));

    assert_eq!(p.poll_once(), 8);
    let msgs = publisher.messages();
    assert_eq!(msgs.len(), 8);
    assert_eq!(
        msgs[1],
        (
            "Site_1/Site/1001/door".to_string(),
            "1001 3 3701 1".to_string()
        )
    );
    assert_eq!(
        msgs[0],
        (
            "Site_1/Site/1001/in37".to_string(),
            "1001 3 3700 0".to_string()
        )
    );
}

#[test]
fn every_cycle_publishes_even_without_change() {
    let bus = MockBus::default();
    let (p, publisher, _) = poller(38, expanders(&bus));
    p.poll_once();
    p.poll_once();
    let msgs = publisher.messages();
    assert_eq!(msgs.len(), 16);
    assert_eq!(msgs[..8], msgs[8..]);
    // Periodic state is republished, never left retained on the broker.
    assert!(publisher.all_transient());
    let ids: Vec<&str> = msgs[..8]
        .iter()
        .map(|(_, payload)| payload.split(' ').nth(2).unwrap())
        .collect();
    assert_eq!(
        ids,
        ["3800", "3801", "3802", "3803", "3804", "3805", "3806", "3807"]
    );
}

#[test]
fn failed_reads_skip_only_that_channel() {
    struct Flaky;
    impl PinPort for Flaky {
        fn read(&self, channel: Channel) -> Result<bool, HardwareError> {
            if channel.pin == 3 {
                Err(HardwareError::Timeout)
            } else {
                Ok(false)
            }
        }
        fn write(&self, _: Channel, _: bool) -> Result<(), HardwareError> {
            Ok(())
        }
    }
    let (p, publisher, _) = poller(38, Arc::new(Flaky));
    assert_eq!(p.poll_once(), 7);
    assert!(
        !publisher
            .messages()
            .iter()
            .any(|(_, payload)| payload.ends_with("3803 0"))
    );
}

#[test]
fn output_bus_cannot_be_polled() {
    let publisher = Arc::new(CapturePublisher::default());
    let bus = MockBus::default();
    assert!(
        InputPoller::new(
            32,
            DEVICE_ID,
            registry(),
            expanders(&bus),
            publisher,
            Arc::default()
        )
        .is_err()
    );
}

#[test]
fn run_stops_on_shutdown() {
    let bus = MockBus::default();
    let (p, publisher, shutdown) = poller(38, expanders(&bus));
    let worker = std::thread::spawn(move || p.run());
    assert!(publisher.wait_for(8, Duration::from_secs(2)));
    shutdown.store(true, Ordering::Release);
    worker.join().unwrap();
}

#[test]
fn buses_poll_independently() {
    let bus = MockBus::default();
    bus.pull_low(38, 7);
    let pins = expanders(&bus);
    let (a, pub_a, stop_a) = poller(37, pins.clone());
    let (b, pub_b, stop_b) = poller(38, pins);
    let ta = std::thread::spawn(move || a.run());
    let tb = std::thread::spawn(move || b.run());

    assert!(pub_a.wait_for(8, Duration::from_secs(2)));
    assert!(pub_b.wait_for(8, Duration::from_secs(2)));
    assert!(
        pub_b
            .messages()
            .contains(&("Site_1/Site/1001/in38".to_string(), "1001 3 3807 1".to_string()))
    );

    stop_a.store(true, Ordering::Release);
    stop_b.store(true, Ordering::Release);
    ta.join().unwrap();
    tb.join().unwrap();
}
