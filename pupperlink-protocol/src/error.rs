//! Protocol error types.

use thiserror::Error;

/// Errors raised while compiling, parsing or interpreting frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("corrupt frame: {0}")]
    CorruptFrame(&'static str),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("malformed payload for code {code:#04x}: {reason}")]
    MalformedPayload { code: u8, reason: String },

    #[error("invalid command byte: {0:#04x}")]
    InvalidCommand(u8),
}

impl ProtocolError {
    pub(crate) fn malformed(code: u8, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedPayload {
            code,
            reason: reason.into(),
        }
    }

    /// Returns whether the error only affects a single frame.
    ///
    /// Frame-local errors leave the parser usable; the next sync byte starts over.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            ProtocolError::CorruptFrame(_)
                | ProtocolError::ChecksumMismatch { .. }
                | ProtocolError::MalformedPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::PayloadTooLarge { size: 300, max: 253 };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("253"));

        let err = ProtocolError::ChecksumMismatch {
            expected: 0xAB,
            actual: 0x01,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xab"));
        assert!(msg.contains("0x01"));

        let err = ProtocolError::malformed(0x26, "invalid UTF-8");
        assert!(err.to_string().contains("0x26"));
        assert!(err.to_string().contains("UTF-8"));

        let err = ProtocolError::CorruptFrame("zero byte in tail");
        assert!(err.to_string().contains("zero byte"));
    }

    #[test]
    fn test_frame_local_errors() {
        assert!(ProtocolError::CorruptFrame("x").is_frame_local());
        assert!(ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_frame_local());
        assert!(!ProtocolError::PayloadTooLarge { size: 1, max: 0 }.is_frame_local());
        assert!(!ProtocolError::InvalidCommand(0x80).is_frame_local());
    }
}
