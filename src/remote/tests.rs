use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::timeout;

use super::protocol::Frame;
use super::testing::{dead_endpoint, fast_settings as settings, listener, Controller, WAIT};
use super::*;
use crate::shutdown::ShutdownSignal;
use crate::status::ActivityDirection;
use crate::tally::WireSnapshot;

async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    pred: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    *timeout(WAIT, rx.wait_for(pred)).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_inbound_frames_delivered_and_stale_discarded() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, mut inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());

    let mut controller = Controller::accept(&listener, true).await;
    controller.send_state(5, WireSnapshot::full(0b0000_0001)).await;

    let update = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(update.seq, 5);
    assert_eq!(update.endpoint.index, 0);
    assert_eq!(update.snapshot, WireSnapshot::full(0b0000_0001));

    controller.send_state(3, WireSnapshot::full(0xFF)).await;
    controller.send_state(5, WireSnapshot::full(0xFF)).await;
    controller.send_state(6, WireSnapshot::new(0b10, 0b10)).await;

    let update = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(update.seq, 6, "stale and duplicate frames must be dropped");
    assert_eq!(update.snapshot.get(1), Some(true));

    let mut state = pool.state_receiver(0).unwrap();
    assert_eq!(*state.borrow_and_update(), SessionState::Streaming);

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_auth_reject_backs_off_then_retries() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let backoff = Duration::from_millis(300);
    let (pool, mut inbound) = SessionPool::start(vec![endpoint], settings(backoff), shutdown.clone());
    let mut state = pool.state_receiver(0).unwrap();

    let _rejected = Controller::accept(&listener, false).await;
    let seen = wait_for_state(&mut state, |s| matches!(s, SessionState::Backoff(_))).await;
    assert_eq!(seen, SessionState::Backoff(backoff));

    // Retried after the delay
    let _second = Controller::accept(&listener, true).await;
    wait_for_state(&mut state, |s| *s == SessionState::Streaming).await;
    assert!(inbound.try_recv().is_err(), "nothing may leak from a rejected session");

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_streaming_session_gets_latest_image_not_backlog() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());

    pool.broadcast(WireSnapshot::full(0b0001));
    pool.broadcast(WireSnapshot::full(0b0011));

    let mut controller = Controller::accept(&listener, true).await;
    assert_eq!(controller.recv_state().await, (1, WireSnapshot::full(0b0011)));

    pool.broadcast(WireSnapshot::full(0b0111));
    assert_eq!(controller.recv_state().await, (2, WireSnapshot::full(0b0111)));

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_unreachable_endpoint_does_not_block_others() {
    let (listener, good) = listener().await;
    let dead = dead_endpoint().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![dead, good], settings(Duration::from_millis(50)), shutdown.clone());
    assert_eq!(pool.len(), 2);

    let mut controller = Controller::accept(&listener, true).await;
    let mut good_state = pool.state_receiver(1).unwrap();
    wait_for_state(&mut good_state, |s| *s == SessionState::Streaming).await;

    pool.broadcast(WireSnapshot::full(0b1000_0000));
    assert_eq!(controller.recv_state().await.1, WireSnapshot::full(0b1000_0000));

    let states = pool.session_states();
    assert_eq!(states[0].0.index, 0);
    assert_ne!(states[0].1, SessionState::Streaming);
    assert_eq!(states[1].1, SessionState::Streaming);

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_heartbeats_flow_both_ways() {
    let (listener, endpoint) = listener().await;
    let label = endpoint.label();
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());
    let mut controller = Controller::accept(&listener, true).await;

    assert_eq!(controller.recv().await, Frame::Heartbeat);

    // Keep talking for well past the idle timeout
    for _ in 0..8 {
        controller.send(Frame::Heartbeat).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    let mut state = pool.state_receiver(0).unwrap();
    assert_eq!(*state.borrow_and_update(), SessionState::Streaming);
    assert!(pool.activity().is_active(&label, ActivityDirection::Inbound));

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_silent_controller_triggers_reconnect() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());

    // Keep the socket open but never send anything
    let _silent = Controller::accept(&listener, true).await;
    let _second = Controller::accept(&listener, true).await;

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_malformed_frame_reconnects_with_fresh_sequence() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());
    pool.broadcast(WireSnapshot::full(0b0101));

    let mut first = Controller::accept(&listener, true).await;
    assert_eq!(first.recv_state().await.0, 1);
    pool.broadcast(WireSnapshot::full(0b0100));
    assert_eq!(first.recv_state().await.0, 2);

    first.writer.write_all(&[0x7F, 0x00, 0x00]).await.unwrap();

    let mut second = Controller::accept(&listener, true).await;
    assert_eq!(second.recv_state().await, (1, WireSnapshot::full(0b0100)));

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_shutdown_during_backoff_stops_reconnects() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(400)), shutdown.clone());
    let mut state = pool.state_receiver(0).unwrap();

    let _rejected = Controller::accept(&listener, false).await;
    wait_for_state(&mut state, |s| matches!(s, SessionState::Backoff(_))).await;

    shutdown.trigger();
    let started = std::time::Instant::now();
    pool.shutdown(WAIT).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(*state.borrow(), SessionState::Disconnected);

    // Well past the backoff delay: the listener must stay quiet
    let reconnect = timeout(Duration::from_secs(1), listener.accept()).await;
    assert!(reconnect.is_err(), "session connected again after shutdown");
}

#[tokio::test]
async fn test_broadcast_waits_for_auth_accept() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let (pool, _inbound) =
        SessionPool::start(vec![endpoint], settings(Duration::from_millis(50)), shutdown.clone());
    let mut state = pool.state_receiver(0).unwrap();

    let mut controller = Controller::accept_unanswered(&listener).await;
    wait_for_state(&mut state, |s| *s == SessionState::Authenticating).await;

    pool.broadcast(WireSnapshot::full(0b0110));
    assert_eq!(controller.try_recv(Duration::from_millis(300)).await, None);
    assert_eq!(*state.borrow(), SessionState::Authenticating);

    controller.answer(true).await;
    wait_for_state(&mut state, |s| *s == SessionState::Streaming).await;
    assert_eq!(controller.recv_state().await, (1, WireSnapshot::full(0b0110)));

    shutdown.trigger();
    pool.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_shutdown_interrupts_handshake() {
    let (listener, endpoint) = listener().await;
    let shutdown = ShutdownSignal::new();
    let mut slow = settings(Duration::from_millis(50));
    slow.handshake_timeout = Duration::from_secs(30);
    let (pool, _inbound) = SessionPool::start(vec![endpoint], slow, shutdown.clone());
    let mut state = pool.state_receiver(0).unwrap();

    // Accept but never answer the auth frame
    let (_stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    wait_for_state(&mut state, |s| *s == SessionState::Authenticating).await;

    shutdown.trigger();
    let started = std::time::Instant::now();
    pool.shutdown(WAIT).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}
