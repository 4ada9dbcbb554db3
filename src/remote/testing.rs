//! Fake remote controller for tests

use std::time::Duration;

use bytes::BytesMut;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::protocol::{read_frame, write_frame, Frame};
use super::{credential, BackoffPolicy, RemoteEndpoint, SessionSettings};
use crate::tally::WireSnapshot;

pub const SECRET: &str = "studio-secret";
pub const WAIT: Duration = Duration::from_secs(5);

/// Short timers so reconnect paths run in milliseconds
pub fn fast_settings(backoff_min: Duration) -> SessionSettings {
    SessionSettings {
        connect_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        idle_multiplier: 3,
        backoff: BackoffPolicy::new(backoff_min, backoff_min * 8),
    }
}

pub async fn listener() -> (TcpListener, RemoteEndpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, RemoteEndpoint::new("127.0.0.1", port.to_string(), SECRET))
}

/// An endpoint nobody listens on
pub async fn dead_endpoint() -> RemoteEndpoint {
    let (listener, endpoint) = listener().await;
    drop(listener);
    endpoint
}

/// Controller side of one connection
pub struct Controller {
    pub reader: OwnedReadHalf,
    pub writer: OwnedWriteHalf,
    buf: BytesMut,
}

impl Controller {
    /// Accept a session and answer its auth frame
    pub async fn accept(listener: &TcpListener, accept: bool) -> Self {
        let mut controller = Self::accept_unanswered(listener).await;
        controller.answer(accept).await;
        controller
    }

    /// Accept a session and read its auth frame without replying
    pub async fn accept_unanswered(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let (reader, writer) = stream.into_split();
        let mut controller = Self {
            reader,
            writer,
            buf: BytesMut::new(),
        };
        match controller.recv().await {
            Frame::Auth { credential } => assert!(credential::verify(SECRET, &credential)),
            other => panic!("expected auth, got {:?}", other),
        }
        controller
    }

    pub async fn answer(&mut self, accept: bool) {
        let reply = if accept {
            Frame::AuthAccept
        } else {
            Frame::AuthReject
        };
        self.send(reply).await;
    }

    /// Next frame if one arrives within `within`
    pub async fn try_recv(&mut self, within: Duration) -> Option<Frame> {
        timeout(within, read_frame(&mut self.reader, &mut self.buf))
            .await
            .ok()
            .map(|frame| frame.unwrap())
    }

    pub async fn recv(&mut self) -> Frame {
        timeout(WAIT, read_frame(&mut self.reader, &mut self.buf))
            .await
            .unwrap()
            .unwrap()
    }

    /// Next state frame, skipping heartbeats
    pub async fn recv_state(&mut self) -> (u64, WireSnapshot) {
        loop {
            match self.recv().await {
                Frame::State { seq, snapshot } => return (seq, snapshot),
                Frame::Heartbeat => continue,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        write_frame(&mut self.writer, &frame).await.unwrap();
    }

    pub async fn send_state(&mut self, seq: u64, snapshot: WireSnapshot) {
        self.send(Frame::State { seq, snapshot }).await;
    }
}
