//! E2E tests for transmit loops: periods, failure isolation, cancellation.

mod helpers;

use std::time::Duration;

use cn_runner::{
    LoopId, Phase, RunnerConfig, RunnerError, RunnerState, SignalSnapshot, TransportError, shared,
};

use helpers::{CRASH, SENSORS, STATUS, TestHarness, wait_until};

/// Each message is transmitted on its own period with the current values.
#[tokio::test]
async fn e2e_periodic_transmission_uses_current_values() {
    let mut h = TestHarness::engine();
    let sensors = shared(SignalSnapshot::new().with("X", 5.0).with("Y", -12.0));
    let status = shared(SignalSnapshot::new().with("B", 60.0));
    h.runner.schedule(SENSORS, sensors.clone()).unwrap();
    h.runner.schedule(STATUS, status).unwrap();
    h.runner.start().unwrap();

    h.clock.advance(Duration::from_millis(10));
    wait_until(|| h.bus.sent_with_id(SENSORS).len() == 1).await;
    assert!(h.bus.sent_with_id(STATUS).is_empty());
    assert_eq!(
        h.bus.sent_with_id(SENSORS)[0].data,
        vec![0x05, 0x88, 0xFF, 0, 0, 0, 0, 0]
    );

    sensors.write().await.set("X", 6.0);
    h.clock.advance(Duration::from_millis(10));
    wait_until(|| {
        h.bus.sent_with_id(SENSORS).len() == 2 && h.bus.sent_with_id(STATUS).len() == 1
    })
    .await;
    assert_eq!(h.bus.sent_with_id(SENSORS)[1].data[0], 6);
    assert_eq!(h.bus.sent_with_id(STATUS)[0].data[0], 0x3C);

    h.runner.stop().await.unwrap();
}

/// A fatal transport error on one message leaves the others untouched.
#[tokio::test]
async fn e2e_failing_message_does_not_affect_others() {
    let mut h = TestHarness::engine();
    h.bus
        .fail_transmit(SENSORS, TransportError::Fatal("no buffer space".into()));
    let mut events = h.runner.events();

    h.runner
        .schedule(SENSORS, shared(SignalSnapshot::new().with("X", 1.0).with("Y", 0.0)))
        .unwrap();
    h.runner
        .schedule(STATUS, shared(SignalSnapshot::new().with("B", 1.0)))
        .unwrap();
    h.runner.start().unwrap();

    h.advance(10, 2).await;
    wait_until(|| h.bus.sent_with_id(STATUS).len() == 1 && h.bus.attempts(SENSORS) == 1).await;
    h.advance(10, 2).await;
    wait_until(|| h.bus.sent_with_id(STATUS).len() == 2).await;

    // The failing loop made exactly one attempt, then ended.
    assert_eq!(h.bus.attempts(SENSORS), 1);
    let event = events.recv().await.unwrap();
    assert_eq!(event.message_id, Some(SENSORS));
    assert_eq!(event.phase, Phase::Transmit);
    assert!(event.error.is_fatal());

    let health = h.runner.health();
    assert_eq!(health.state, RunnerState::Running);
    assert_eq!(health.failed_loops, vec![LoopId::Transmit(SENSORS)]);

    h.runner.stop().await.unwrap();
}

/// Transient errors are reported and the loop keeps transmitting.
#[tokio::test]
async fn e2e_transient_errors_are_survived() {
    let mut h = TestHarness::engine();
    h.bus
        .fail_transmit(STATUS, TransportError::Transient("bus busy".into()));
    let mut events = h.runner.events();

    h.runner
        .schedule(STATUS, shared(SignalSnapshot::new().with("B", 9.0)))
        .unwrap();
    h.runner.start().unwrap();

    for n in 1..=3 {
        h.advance(20, 1).await;
        wait_until(|| h.bus.attempts(STATUS) == n).await;
    }
    assert!(matches!(
        events.recv().await.unwrap().error,
        RunnerError::TransportTransient(_)
    ));

    h.bus.heal_transmit(STATUS);
    h.advance(20, 1).await;
    wait_until(|| h.bus.sent_with_id(STATUS).len() == 1).await;
    assert!(!h.runner.health().is_degraded());

    h.runner.stop().await.unwrap();
}

/// A message whose every send fails transiently keeps retrying on its own
/// period while two other messages keep exact period counts.
#[tokio::test]
async fn e2e_always_failing_message_leaves_periods_intact() {
    let mut h = TestHarness::engine();
    h.bus
        .fail_transmit(SENSORS, TransportError::Transient("bus busy".into()));

    h.runner
        .schedule(SENSORS, shared(SignalSnapshot::new().with("X", 1.0).with("Y", 0.0)))
        .unwrap();
    h.runner
        .schedule(STATUS, shared(SignalSnapshot::new().with("B", 1.0)))
        .unwrap();
    h.runner
        .schedule_with_period(
            CRASH,
            Duration::from_millis(30),
            shared(SignalSnapshot::new().with("Deployed", 0.0)),
        )
        .unwrap();
    h.runner.start().unwrap();

    for step in 1..=12usize {
        h.advance(10, 1).await;
        wait_until(|| {
            h.bus.attempts(SENSORS) == step
                && h.bus.sent_with_id(STATUS).len() == step / 2
                && h.bus.sent_with_id(CRASH).len() == step / 3
        })
        .await;
    }

    assert_eq!(h.bus.attempts(SENSORS), 12);
    assert!(h.bus.sent_with_id(SENSORS).is_empty());
    assert_eq!(h.bus.sent_with_id(STATUS).len(), 6);
    assert_eq!(h.bus.sent_with_id(CRASH).len(), 4);
    assert!(!h.runner.health().is_degraded());

    tokio::time::timeout(Duration::from_millis(500), h.runner.stop())
        .await
        .expect("stop must complete promptly")
        .unwrap();
}

/// An encode failure (missing value) is reported per tick, never fatal.
#[tokio::test]
async fn e2e_encode_errors_are_reported() {
    let mut h = TestHarness::engine();
    let values = shared(SignalSnapshot::new().with("X", 1.0));
    let mut events = h.runner.events();
    h.runner.schedule(SENSORS, values.clone()).unwrap();
    h.runner.start().unwrap();

    h.advance(10, 1).await;
    let event = events.recv().await.unwrap();
    assert_eq!(event.phase, Phase::Encode);
    assert!(!event.error.is_fatal());

    values.write().await.set("Y", 1.5);
    h.advance(10, 1).await;
    wait_until(|| h.bus.sent_with_id(SENSORS).len() == 1).await;

    h.runner.stop().await.unwrap();
}

/// Clamp policy from config applies to every transmit loop.
#[tokio::test]
async fn e2e_clamp_policy_from_config() {
    let config: RunnerConfig = serde_json::from_str(r#"{ "range_policy": "clamp" }"#).unwrap();
    let mut h = TestHarness::node("Engine", config);
    h.runner
        .schedule(STATUS, shared(SignalSnapshot::new().with("B", 255.0)))
        .unwrap();
    h.runner.start().unwrap();

    h.advance(20, 1).await;
    wait_until(|| h.bus.sent_with_id(STATUS).len() == 1).await;
    assert_eq!(h.bus.sent_with_id(STATUS)[0].data[0], 200);

    h.runner.stop().await.unwrap();
}

/// Event messages go out only when triggered.
#[tokio::test]
async fn e2e_event_message_on_trigger() {
    let mut h = TestHarness::engine();
    h.runner
        .schedule(CRASH, shared(SignalSnapshot::new().with("Deployed", 1.0)))
        .unwrap();
    h.runner.start().unwrap();

    h.advance(100, 5).await;
    assert!(h.bus.sent_with_id(CRASH).is_empty());

    h.runner.trigger(CRASH).unwrap();
    wait_until(|| h.bus.sent_with_id(CRASH).len() == 1).await;
    assert_eq!(h.bus.sent_with_id(CRASH)[0].data, vec![0x01]);

    h.runner.stop().await.unwrap();
}

/// Stop returns promptly and no frame is sent afterwards.
#[tokio::test]
async fn e2e_cancellation_stops_all_loops() {
    let mut h = TestHarness::engine();
    h.runner
        .schedule(SENSORS, shared(SignalSnapshot::new().with("X", 1.0).with("Y", 0.0)))
        .unwrap();
    h.runner
        .schedule(STATUS, shared(SignalSnapshot::new().with("B", 1.0)))
        .unwrap();
    h.runner.start().unwrap();

    h.advance(10, 2).await;
    wait_until(|| h.bus.sent_with_id(STATUS).len() == 1).await;

    tokio::time::timeout(Duration::from_millis(500), h.runner.stop())
        .await
        .expect("stop must complete promptly")
        .unwrap();
    assert_eq!(h.runner.state(), RunnerState::Stopped);

    let sent = h.bus.sent_frames().len();
    h.advance(10, 10).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.bus.sent_frames().len(), sent);
}

/// Lifecycle misuse yields errors, never panics.
#[tokio::test]
async fn e2e_lifecycle_misuse() {
    let mut h = TestHarness::engine();
    assert_eq!(h.runner.stop().await, Ok(()));
    assert_eq!(h.runner.stop().await, Err(RunnerError::AlreadyStopped));
    assert_eq!(h.runner.start(), Err(RunnerError::AlreadyStopped));

    let mut h = TestHarness::engine();
    h.runner.start().unwrap();
    assert_eq!(h.runner.start(), Err(RunnerError::AlreadyRunning));
    h.runner.stop().await.unwrap();
}
