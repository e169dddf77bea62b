//! Output handling through the guarded expander stack.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use iobridge::adapters::hardware::ExpanderPins;
use iobridge::adapters::hw_guard::GuardedPins;
use iobridge::addressing::Channel;
use iobridge::app::output::{OutputHandler, SetOutcome};
use iobridge::app::ports::PinPort;
use iobridge::error::{Error, VerificationMismatch};

use crate::mock_hw::{MockBus, registry};

const PULSE: Duration = Duration::from_millis(60);

fn handler(bus: &MockBus) -> Arc<OutputHandler> {
    let registry = registry();
    let expanders = Arc::new(ExpanderPins::new(bus.clone(), &registry).unwrap());
    let pins: Arc<dyn PinPort> =
        Arc::new(GuardedPins::spawn(expanders, Duration::from_millis(500)).unwrap());
    Arc::new(OutputHandler::new(registry, pins))
}

#[test]
fn startup_drives_outputs_to_rest_and_releases_inputs() {
    let bus = MockBus::default();
    let _h = handler(&bus);
    assert_eq!(bus.latch(32), Some(0xFF));
    assert_eq!(bus.latch(33), Some(0xFF));
    assert_eq!(bus.latch(37), Some(0xFF));
    assert_eq!(bus.latch(38), Some(0xFF));
}

#[test]
fn pulse_confirms_then_reverts_after_delay() {
    let bus = MockBus::default();
    let h = handler(&bus);
    let ch = Channel { bus: 32, pin: 6 };

    let started = Instant::now();
    let mut seen = Vec::new();
    let outcome = h
        .set(ch, true, |v| seen.push((v, bus.latch(32), started.elapsed())))
        .unwrap();

    assert_eq!(outcome, SetOutcome::Confirmed(true));
    assert_eq!(seen.len(), 1);
    let (value, latch_at_confirm, confirmed_after) = seen[0];
    assert!(value);
    assert_eq!(latch_at_confirm, Some(0b1011_1111));
    assert!(confirmed_after < PULSE);
    assert!(started.elapsed() >= PULSE);
    assert_eq!(bus.latch(32), Some(0xFF));
}

#[test]
fn dead_driver_reports_mismatch() {
    let bus = MockBus::default();
    bus.stick_high(33, 0);
    let h = handler(&bus);
    let err = h.set(Channel { bus: 33, pin: 0 }, true, |_| {}).unwrap_err();
    assert_eq!(
        err,
        Error::Verification(VerificationMismatch {
            bus: 33,
            pin: 0,
            written: true,
            read: false
        })
    );
}

#[test]
fn same_channel_commands_are_serialized() {
    let bus = MockBus::default();
    let h = handler(&bus);
    let ch = Channel { bus: 32, pin: 0 };

    let started = Instant::now();
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let h = h.clone();
            std::thread::spawn(move || h.set(ch, true, |_| {}).unwrap())
        })
        .collect();
    for w in workers {
        assert_eq!(w.join().unwrap(), SetOutcome::Confirmed(true));
    }
    assert!(started.elapsed() >= PULSE * 2);
}

#[test]
fn different_channels_do_not_wait_for_each_other() {
    let bus = MockBus::default();
    let h = handler(&bus);
    let confirmed: Arc<Mutex<Vec<(u8, Instant)>>> = Arc::default();

    let workers: Vec<_> = [0u8, 1]
        .into_iter()
        .map(|pin| {
            let h = h.clone();
            let confirmed = confirmed.clone();
            std::thread::spawn(move || {
                h.set(Channel { bus: 32, pin }, true, |_| {
                    confirmed.lock().unwrap().push((pin, Instant::now()));
                })
                .unwrap();
                Instant::now()
            })
        })
        .collect();
    let finished: Vec<Instant> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    // Both confirmations land before either pulse has finished.
    let confirmed = confirmed.lock().unwrap();
    assert_eq!(confirmed.len(), 2);
    let first_finish = finished.iter().min().copied().unwrap();
    assert!(confirmed.iter().all(|&(_, at)| at < first_finish));
}
