//! Transport failures and the fixed-delay reconnect loop.

use anyhow::anyhow;
use tokio::time::{self, Duration};

use labstream_lib::models::ExperimentKind;
use labstream_lib::session::{SessionState, RECONNECTING_MESSAGE};
use labstream_lib::stream::RECONNECT_DELAY;

use crate::mock_bridge::{count_sample, messages, ready_controller, settle, MockBridge};

fn assert_about(gap: Duration, expected: Duration) {
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(5),
        "expected ~{expected:?} between connection attempts, got {gap:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn transport_error_reconnects_after_fixed_delay() {
    let bridge = MockBridge::new(ExperimentKind::Kinematics);
    let controller = ready_controller(&bridge, 120).await;
    let first = bridge.script_feed();
    controller.start().await.unwrap();
    settle().await;

    let mut events = controller.subscribe();
    first.send(Err(anyhow!("connection reset by peer"))).unwrap();
    settle().await;

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.error.as_deref(), Some(RECONNECTING_MESSAGE));
    assert!(messages(&mut events).contains(&RECONNECTING_MESSAGE.to_string()));
    assert_eq!(bridge.opens().len(), 1);

    let second = bridge.script_feed();
    time::sleep(RECONNECT_DELAY - Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(bridge.opens().len(), 1, "reconnected too early");

    time::sleep(Duration::from_millis(1)).await;
    settle().await;
    let opens = bridge.opens();
    assert_eq!(opens.len(), 2);
    assert_about(opens[1] - opens[0], RECONNECT_DELAY);

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.error, None);
    assert!(messages(&mut events).contains(&"Data stream connected".to_string()));

    second.send(count_sample(1.0, 1)).unwrap();
    settle().await;
    assert_eq!(controller.snapshot().await.sample_count, 1);
}

#[tokio::test(start_paused = true)]
async fn bridge_hanging_up_counts_as_a_failure() {
    let bridge = MockBridge::new(ExperimentKind::Oscillation);
    let controller = ready_controller(&bridge, 120).await;
    let first = bridge.script_feed();
    controller.start().await.unwrap();
    settle().await;

    drop(first);
    settle().await;
    assert_eq!(
        controller.snapshot().await.error.as_deref(),
        Some(RECONNECTING_MESSAGE)
    );

    time::sleep(RECONNECT_DELAY).await;
    settle().await;
    assert_eq!(bridge.opens().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn refused_connections_retry_without_cap_or_backoff() {
    let bridge = MockBridge::new(ExperimentKind::Oscillation);
    let controller = ready_controller(&bridge, 300).await;
    for _ in 0..5 {
        bridge.script_refusal("503 Service Unavailable");
    }
    let _feed = bridge.script_feed();

    controller.start().await.unwrap();
    settle().await;
    assert_eq!(controller.snapshot().await.state, SessionState::Connecting);

    for _ in 0..5 {
        time::sleep(RECONNECT_DELAY).await;
        settle().await;
    }

    let opens = bridge.opens();
    assert_eq!(opens.len(), 6);
    for pair in opens.windows(2) {
        assert_about(pair[1] - pair[0], RECONNECT_DELAY);
    }
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.error, None);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_a_pending_reconnect() {
    let bridge = MockBridge::new(ExperimentKind::Oscillation);
    let controller = ready_controller(&bridge, 120).await;
    let first = bridge.script_feed();
    controller.start().await.unwrap();
    settle().await;

    first.send(Err(anyhow!("socket closed"))).unwrap();
    settle().await;
    controller.stop().await.unwrap();
    assert!(!controller.is_stream_open().await);

    time::sleep(RECONNECT_DELAY * 4).await;
    settle().await;
    assert_eq!(bridge.opens().len(), 1);
    assert_eq!(controller.snapshot().await.state, SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn pause_cancels_a_pending_reconnect() {
    let bridge = MockBridge::new(ExperimentKind::Kinematics);
    let controller = ready_controller(&bridge, 120).await;
    let first = bridge.script_feed();
    controller.start().await.unwrap();
    settle().await;

    first.send(Err(anyhow!("socket closed"))).unwrap();
    settle().await;
    controller.pause().await.unwrap();

    time::sleep(RECONNECT_DELAY * 2).await;
    settle().await;
    assert_eq!(bridge.opens().len(), 1);
    assert_eq!(controller.snapshot().await.state, SessionState::Paused);
}
