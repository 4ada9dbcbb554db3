//! One connection to one remote controller
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Streaming
//!       ^              |              |              |
//!       +---- Backoff <+--------------+--------------+
//! ```
//!
//! Every wait (connect, handshake, read, backoff sleep) races the shutdown
//! signal, so stopping never waits on the network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::protocol::{read_frame, write_frame, Frame};
use super::{credential, Backoff, EndpointId, InboundUpdate, RemoteEndpoint, SessionSettings};
use crate::error::{Result, TallyError};
use crate::shutdown::ShutdownSignal;
use crate::status::{ActivityDirection, LinkActivity};
use crate::tally::WireSnapshot;

/// Lifecycle of a session, published on a watch channel for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Streaming,
    /// Waiting this long before the next attempt
    Backoff(Duration),
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Backoff(d) => write!(f, "backoff {}ms", d.as_millis()),
        }
    }
}

/// How one connection attempt ended
struct AttemptEnd {
    /// Set when the session reached Streaming
    streamed: Option<Duration>,
    error: TallyError,
}

pub struct RemoteSession {
    id: EndpointId,
    endpoint: RemoteEndpoint,
    settings: SessionSettings,
    backoff: Backoff,
    state_tx: watch::Sender<SessionState>,
    outbound: watch::Receiver<Option<WireSnapshot>>,
    inbound_tx: mpsc::Sender<InboundUpdate>,
    activity: Arc<LinkActivity>,
    shutdown: ShutdownSignal,
}

impl RemoteSession {
    pub fn new(
        id: EndpointId,
        endpoint: RemoteEndpoint,
        settings: SessionSettings,
        outbound: watch::Receiver<Option<WireSnapshot>>,
        inbound_tx: mpsc::Sender<InboundUpdate>,
        activity: Arc<LinkActivity>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            id,
            backoff: Backoff::new(settings.backoff),
            endpoint,
            settings,
            state_tx,
            outbound,
            inbound_tx,
            activity,
            shutdown,
        }
    }

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Subscribe to state changes
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Connect, stream and reconnect until shutdown
    pub async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        info!(
            endpoint = %self.id,
            secret = %credential::fingerprint(&self.endpoint.secret),
            "Remote session started"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }
            if self.outbound.has_changed().is_err() {
                debug!(endpoint = %self.id, "Session pool dropped, stopping");
                break;
            }

            let end = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                end = self.attempt() => end,
            };

            self.set_state(SessionState::Disconnected);
            match &end.error {
                TallyError::Auth { .. } => {
                    warn!(endpoint = %self.id, "Credential rejected, check the shared secret")
                }
                TallyError::Protocol(msg) => {
                    warn!(endpoint = %self.id, "Protocol error: {}", msg)
                }
                e if end.streamed.is_some() => {
                    warn!(endpoint = %self.id, "Connection lost: {}", e)
                }
                e => debug!(endpoint = %self.id, "Connect attempt failed: {}", e),
            }

            if let Some(streamed) = end.streamed {
                if self.backoff.record_streaming(streamed) {
                    debug!(endpoint = %self.id, "Healthy connection, backoff reset");
                }
            }

            let delay = self.backoff.next_delay();
            self.set_state(SessionState::Backoff(delay));
            debug!(
                endpoint = %self.id,
                attempt = self.backoff.attempts(),
                "Reconnecting in {}ms",
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SessionState::Disconnected);
        info!(endpoint = %self.id, "Remote session stopped");
    }

    fn set_state(&self, state: SessionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            trace!(endpoint = %self.id, from = %prev, to = %state, "Session state");
        }
    }

    async fn attempt(&mut self) -> AttemptEnd {
        self.set_state(SessionState::Connecting);
        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(error) => return AttemptEnd { streamed: None, error },
        };

        self.set_state(SessionState::Authenticating);
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(256);
        if let Err(error) = self.authenticate(&mut reader, &mut writer, &mut buf).await {
            return AttemptEnd { streamed: None, error };
        }

        self.set_state(SessionState::Streaming);
        info!(endpoint = %self.id, "Streaming tally state");
        let started = Instant::now();
        let error = self.stream(&mut reader, &mut writer, &mut buf).await;
        AttemptEnd {
            streamed: Some(started.elapsed()),
            error,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addrs = resolve(&self.endpoint).await?;
        let mut last_err = TallyError::network(format!("{} resolved to no addresses", self.id));

        for addr in addrs {
            debug!(endpoint = %self.id, %addr, "Connecting");
            match timeout(self.settings.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed: {}", e);
                    }
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = TallyError::network(format!("connect {}: {}", addr, e)),
                Err(_) => last_err = TallyError::timed_out("connect", self.settings.connect_timeout),
            }
        }
        Err(last_err)
    }

    async fn authenticate(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
    ) -> Result<()> {
        let auth = Frame::Auth {
            credential: credential::derive(&self.endpoint.secret, credential::fresh_nonce()?)?,
        };
        write_frame(writer, &auth).await?;
        self.activity.record(&self.id.label, ActivityDirection::Outbound);

        let reply = timeout(self.settings.handshake_timeout, read_frame(reader, buf))
            .await
            .map_err(|_| TallyError::timed_out("handshake", self.settings.handshake_timeout))??;
        self.activity.record(&self.id.label, ActivityDirection::Inbound);

        match reply {
            Frame::AuthAccept => Ok(()),
            Frame::AuthReject => Err(TallyError::Auth {
                endpoint: self.id.label.to_string(),
            }),
            other => Err(TallyError::protocol(format!(
                "expected auth reply, got {} frame",
                other.name()
            ))),
        }
    }

    /// Exchange frames until something breaks; returns the reason
    async fn stream(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        buf: &mut BytesMut,
    ) -> TallyError {
        let heartbeat_every = self.settings.heartbeat_interval;
        let idle_timeout = self.settings.idle_timeout();

        // Sequence numbers are scoped to this connection
        let mut next_seq: u64 = 1;
        let mut last_inbound_seq: Option<u64> = None;
        let mut last_rx = Instant::now();
        let mut last_tx = Instant::now();

        let mut ticker = tokio::time::interval_at(
            Instant::now() + heartbeat_every / 2,
            (heartbeat_every / 2).max(Duration::from_millis(1)),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Catch the controller up on whatever changed while we were away
        let latest = *self.outbound.borrow_and_update();
        if let Some(snapshot) = latest {
            if let Err(e) = self.send_state(writer, &mut next_seq, snapshot).await {
                return e;
            }
            last_tx = Instant::now();
        }

        loop {
            tokio::select! {
                changed = self.outbound.changed() => {
                    if changed.is_err() {
                        return TallyError::network("session pool closed");
                    }
                    let latest = *self.outbound.borrow_and_update();
                    if let Some(snapshot) = latest {
                        if let Err(e) = self.send_state(writer, &mut next_seq, snapshot).await {
                            return e;
                        }
                        last_tx = Instant::now();
                    }
                }

                _ = ticker.tick() => {
                    if last_tx.elapsed() >= heartbeat_every {
                        if let Err(e) = write_frame(writer, &Frame::Heartbeat).await {
                            return e;
                        }
                        self.activity.record(&self.id.label, ActivityDirection::Outbound);
                        last_tx = Instant::now();
                        trace!(endpoint = %self.id, "Heartbeat sent");
                    }
                }

                frame = read_frame(reader, buf) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => return e,
                    };
                    last_rx = Instant::now();
                    self.activity.record(&self.id.label, ActivityDirection::Inbound);

                    match frame {
                        Frame::State { seq, snapshot } => {
                            if last_inbound_seq.is_some_and(|last| seq <= last) {
                                debug!(
                                    endpoint = %self.id,
                                    seq,
                                    last = last_inbound_seq,
                                    "Discarding stale tally frame"
                                );
                                continue;
                            }
                            last_inbound_seq = Some(seq);
                            let update = InboundUpdate {
                                endpoint: self.id.clone(),
                                seq,
                                snapshot,
                            };
                            if self.inbound_tx.send(update).await.is_err() {
                                return TallyError::network("mediator stopped");
                            }
                        }
                        Frame::Heartbeat => trace!(endpoint = %self.id, "Heartbeat received"),
                        other => {
                            return TallyError::protocol(format!(
                                "unexpected {} frame while streaming",
                                other.name()
                            ));
                        }
                    }
                }

                _ = tokio::time::sleep_until(last_rx + idle_timeout) => {
                    return TallyError::network(format!(
                        "no frames for {}ms",
                        idle_timeout.as_millis()
                    ));
                }
            }
        }
    }

    async fn send_state(
        &self,
        writer: &mut OwnedWriteHalf,
        next_seq: &mut u64,
        snapshot: WireSnapshot,
    ) -> Result<()> {
        let frame = Frame::State {
            seq: *next_seq,
            snapshot,
        };
        write_frame(writer, &frame).await?;
        self.activity.record(&self.id.label, ActivityDirection::Outbound);
        debug!(endpoint = %self.id, seq = *next_seq, %snapshot, "Tally state sent");
        *next_seq += 1;
        Ok(())
    }
}

/// Resolve host plus port number or service name
async fn resolve(endpoint: &RemoteEndpoint) -> Result<Vec<SocketAddr>> {
    let port = match endpoint.service.parse::<u16>() {
        Ok(port) => port,
        Err(_) => lookup_service_port(&endpoint.service).await.ok_or_else(|| {
            TallyError::network(format!("unknown service '{}'", endpoint.service))
        })?,
    };
    let addrs = tokio::net::lookup_host((endpoint.host.as_str(), port))
        .await
        .map_err(|e| TallyError::network(format!("resolve {}: {}", endpoint.host, e)))?;
    Ok(addrs.collect())
}

/// Find a TCP service name in /etc/services
async fn lookup_service_port(name: &str) -> Option<u16> {
    let table = tokio::fs::read_to_string("/etc/services").await.ok()?;
    parse_services(&table, name)
}

fn parse_services(table: &str, name: &str) -> Option<u16> {
    table.lines().find_map(|line| {
        let line = line.split('#').next()?;
        let mut fields = line.split_whitespace();
        let service = fields.next()?;
        let (port, proto) = fields.next()?.split_once('/')?;
        if proto != "tcp" {
            return None;
        }
        let mut names = std::iter::once(service).chain(fields);
        if names.any(|n| n == name) {
            port.parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let table = "\
# comment line
ssh             22/tcp
tally           6254/udp
tally           6254/tcp        tallyd  # studio tally
http            80/tcp          www
";
        assert_eq!(parse_services(table, "ssh"), Some(22));
        assert_eq!(parse_services(table, "tally"), Some(6254));
        assert_eq!(parse_services(table, "tallyd"), Some(6254));
        assert_eq!(parse_services(table, "www"), Some(80));
        assert_eq!(parse_services(table, "gopher"), None);
    }

    #[tokio::test]
    async fn test_numeric_service_resolves() {
        let endpoint = RemoteEndpoint::new("127.0.0.1", "6254", "s");
        let addrs = resolve(&endpoint).await.unwrap();
        assert!(addrs.iter().any(|a| a.port() == 6254));
    }

    #[tokio::test]
    async fn test_unknown_service_is_network_error() {
        let endpoint = RemoteEndpoint::new("127.0.0.1", "no-such-tally-service", "s");
        assert!(matches!(resolve(&endpoint).await, Err(TallyError::Network(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(
            SessionState::Backoff(Duration::from_millis(500)).to_string(),
            "backoff 500ms"
        );
    }
}
