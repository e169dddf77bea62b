//! Connection manager lifecycle against a scripted transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use iobridge::app::ports::{MessageHandler, QoS, StatusPublisher, TransportEvent};
use iobridge::connection::{ConnectionManager, ConnectionSettings, SessionState};

use crate::mock_hw::{Op, OpLog, RecordingHandler, Script, ScriptedTransport, wait_until};

const VALUE_TOPIC: &str = "Site_1/Set/1001/value";
const POLL_TOPIC: &str = "Site_1/Set/1001/poll";

fn settings(reconnect_ms: u64) -> ConnectionSettings {
    ConnectionSettings {
        topics: vec![VALUE_TOPIC.into(), POLL_TOPIC.into()],
        qos: QoS::AtLeastOnce,
        reconnect_delay: Duration::from_millis(reconnect_ms),
        retry_delay: Duration::from_millis(5),
    }
}

fn message(topic: &str) -> TransportEvent {
    TransportEvent::Message {
        topic: topic.into(),
        payload: b"{}".to_vec(),
    }
}

fn start(
    script: Vec<Script>,
    reconnect_ms: u64,
) -> (
    Arc<ConnectionManager>,
    Arc<ScriptedTransport>,
    OpLog,
    std::thread::JoinHandle<()>,
) {
    let log: OpLog = Arc::default();
    let transport = Arc::new(ScriptedTransport::new(log.clone(), script));
    let mgr = Arc::new(ConnectionManager::new(
        transport.clone(),
        settings(reconnect_ms),
        Arc::default(),
    ));
    let runner = {
        let mgr = mgr.clone();
        let handler = RecordingHandler { log: log.clone() };
        std::thread::spawn(move || mgr.run(&handler))
    };
    (mgr, transport, log, runner)
}

fn dispatches(log: &OpLog) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|op| matches!(op, Op::Dispatch(_)))
        .count()
}

#[test]
fn resubscribes_before_routing_after_reconnect() {
    let (mgr, _transport, log, runner) = start(
        vec![
            Script::Refuse,
            Script::Accept(vec![message(VALUE_TOPIC), TransportEvent::Disconnected]),
            Script::Accept(vec![message(POLL_TOPIC)]),
        ],
        10,
    );

    wait_until(|| dispatches(&log) == 2);
    mgr.stop();
    runner.join().unwrap();

    let ops = log.lock().unwrap().clone();
    let sub = |t: &str| Op::Subscribe(t.to_string());
    assert_eq!(
        ops,
        vec![
            Op::Refused,
            Op::Connect,
            sub(VALUE_TOPIC),
            sub(POLL_TOPIC),
            Op::Dispatch(VALUE_TOPIC.into()),
            Op::Disconnect,
            Op::Connect,
            sub(VALUE_TOPIC),
            sub(POLL_TOPIC),
            Op::Dispatch(POLL_TOPIC.into()),
            Op::Disconnect,
        ]
    );
    assert_eq!(mgr.state(), SessionState::Stopped);
}

#[test]
fn refusal_waits_reconnect_delay() {
    let started = Instant::now();
    let (mgr, transport, _log, runner) = start(vec![Script::Refuse], 150);

    wait_until(|| mgr.state() == SessionState::Connected);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(transport.connects(), 2);

    mgr.stop();
    runner.join().unwrap();
}

#[test]
fn stop_interrupts_backoff() {
    let (mgr, _transport, _log, runner) = start(vec![Script::Refuse], 60_000);
    std::thread::sleep(Duration::from_millis(50));

    let stopping = Instant::now();
    mgr.stop_handle().stop();
    runner.join().unwrap();
    assert!(stopping.elapsed() < Duration::from_secs(2));
    assert_eq!(mgr.state(), SessionState::Stopped);
}

#[test]
fn session_publishes_only_while_connected() {
    let (mgr, _transport, log, runner) = start(vec![], 10);
    let session = mgr.session();

    wait_until(|| session.is_connected());
    session.publish("Site_1/Site/1001/in37", "1001 3 3701 1", QoS::AtMostOnce, false);

    mgr.stop();
    runner.join().unwrap();
    session.publish("Site_1/Site/1001/in37", "1001 3 3701 0", QoS::AtMostOnce, false);

    let published: Vec<Op> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|op| matches!(op, Op::Publish(..)))
        .cloned()
        .collect();
    assert_eq!(
        published,
        vec![Op::Publish(
            "Site_1/Site/1001/in37".into(),
            "1001 3 3701 1".into()
        )]
    );
}

#[test]
fn unwinding_handler_still_disconnects() {
    struct Explodes;
    impl MessageHandler for Explodes {
        fn on_message(&self, _: &str, _: &[u8]) {
            panic!("handler failure");
        }
    }

    let log: OpLog = Arc::default();
    let transport = Arc::new(ScriptedTransport::new(
        log.clone(),
        vec![Script::Accept(vec![message(VALUE_TOPIC)])],
    ));
    let mgr = Arc::new(ConnectionManager::new(
        transport,
        settings(10),
        Arc::default(),
    ));
    let runner = {
        let mgr = mgr.clone();
        std::thread::spawn(move || mgr.run(&Explodes))
    };
    assert!(runner.join().is_err());
    assert_eq!(log.lock().unwrap().last(), Some(&Op::Disconnect));
    assert_ne!(mgr.state(), SessionState::Connected);
}

#[test]
fn all_topics_subscribed_once_per_session() {
    let (mgr, _transport, log, runner) = start(vec![], 10);
    wait_until(|| mgr.state() == SessionState::Connected);
    mgr.stop();
    runner.join().unwrap();

    let subs = log
        .lock()
        .unwrap()
        .iter()
        .filter(|op| matches!(op, Op::Subscribe(_)))
        .count();
    assert_eq!(subs, 2);
}
