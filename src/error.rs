//! Error taxonomy for the tally subsystem
//!
//! Only `Config` is fatal to the subsystem. Hardware errors disable the GPIO
//! side, and every other variant stays local to the session that raised it.

use std::time::Duration;

/// Errors raised inside the tally core
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    /// Bad pull string, bad mode combination, missing remotes, ...
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O bank unavailable or faulting
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Credential rejected by the remote controller
    #[error("authentication rejected by {endpoint}")]
    Auth { endpoint: String },

    /// Malformed frame or unexpected message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connect refused, timeout, socket reset
    #[error("network error: {0}")]
    Network(String),
}

impl TallyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Timeout while waiting on the peer
    pub fn timed_out(what: &str, after: Duration) -> Self {
        Self::Network(format!("{} timed out after {}ms", what, after.as_millis()))
    }

    /// True for errors that only concern one remote session
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            TallyError::Auth { .. } | TallyError::Protocol(_) | TallyError::Network(_)
        )
    }
}

impl From<std::io::Error> for TallyError {
    fn from(err: std::io::Error) -> Self {
        TallyError::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_local_classification() {
        assert!(TallyError::Auth { endpoint: "a".into() }.is_session_local());
        assert!(TallyError::protocol("bad kind").is_session_local());
        assert!(TallyError::network("reset").is_session_local());
        assert!(!TallyError::config("bad pulls").is_session_local());
        assert!(!TallyError::hardware("no bus").is_session_local());
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(TallyError::from(io), TallyError::Network(_)));
    }
}
