//! Remote tally controllers
//!
//! One [`RemoteSession`] per configured controller, each with its own socket,
//! framing and backoff timer, all owned by a [`SessionPool`].

mod backoff;
pub mod credential;
pub mod protocol;
mod pool;
mod session;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use crate::tally::WireSnapshot;

pub use backoff::{Backoff, BackoffPolicy};
pub use pool::{Broadcaster, SessionPool};
pub use session::{RemoteSession, SessionState};

/// Legacy default tally service port
pub const DEFAULT_SERVICE: &str = "6254";

/// One remote tally controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    /// Port number or service name
    pub service: String,
    pub secret: String,
}

impl RemoteEndpoint {
    pub fn new(
        host: impl Into<String>,
        service: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            secret: secret.into(),
        }
    }

    /// `host:service`, used in logs and for activity keys
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.service)
    }
}

/// Identity of an endpoint inside the pool (diagnostics only)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub index: usize,
    pub label: Arc<str>,
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.index, self.label)
    }
}

/// Timers shared by every session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Silent heartbeat intervals tolerated before reconnecting
    pub idle_multiplier: u32,
    pub backoff: BackoffPolicy,
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval * self.idle_multiplier
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(2),
            idle_multiplier: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A tally frame accepted from a remote controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub endpoint: EndpointId,
    pub seq: u64,
    pub snapshot: WireSnapshot,
}
