//! Error types for numpool sessions.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing or running a session.
///
/// Primary-channel errors are fatal to the whole session. The same errors
/// raised inside a worker only end that worker.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The peer never connected within the configured retries
    #[error("peer did not connect to port {port} after {attempts} attempts")]
    RendezvousTimeout { port: u16, attempts: u32 },

    /// Every port in the search range is taken
    #[error("no free port in range [{min}, {max})")]
    NoPortAvailable { min: u16, max: u16 },

    /// Client host could not be resolved to an address
    #[error("could not resolve host: {0}")]
    UnresolvableHost(String),

    /// Peer sent something the protocol does not allow
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No message arrived within the idle timeout
    #[error("no message within {0:?}")]
    IdleTimeout(Duration),

    /// Socket I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error can only happen before the session is established
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            SessionError::RendezvousTimeout { .. }
                | SessionError::NoPortAvailable { .. }
                | SessionError::UnresolvableHost(_)
        )
    }

    /// Process exit code for a session that ended with this error
    pub fn exit_code(&self) -> u8 {
        if self.is_startup_failure() {
            2
        } else if matches!(self, SessionError::ProtocolViolation(_)) {
            3
        } else {
            1
        }
    }
}
