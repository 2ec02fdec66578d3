//! Client error types.

use pupperlink_protocol::{Command, Firmware, ProtocolError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("request timeout")]
    Timeout,

    #[error("transport closed")]
    TransportClosed,

    #[error("not connected")]
    NotConnected,

    #[error("command {command} is not supported by {revision} firmware")]
    UnsupportedCommand { command: Command, revision: Firmware },

    #[error("invalid ack: expected {expected:02x?}, got {actual:02x?}")]
    InvalidAck { expected: [u8; 2], actual: Vec<u8> },

    #[error("poller stopped")]
    PollerStopped,
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// Retrying after `TransportClosed` means reconnecting first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::TransportClosed
        )
    }
}
