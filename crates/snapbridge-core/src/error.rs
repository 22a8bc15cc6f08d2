//! Error handling for the bridge core.
//!
//! Errors are layered the way the wire stack is:
//! - Protocol errors (framing, checksums) raised by the SACP codec
//! - Session errors (transport, timeouts, command failures) raised by the
//!   printer session and packet router
//!
//! All error types use `thiserror`. Display strings are stable because the
//! Moonraker layer forwards them verbatim to frontends.

use thiserror::Error;

/// SACP framing error.
///
/// Raised by the wire codec when a byte sequence cannot be decoded as a
/// packet. The packet router logs and drops these; only transport errors
/// tear a connection down.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Magic bytes missing - the data is not a SACP packet.
    #[error("data doesn't look like a SACP packet")]
    InvalidPacket,

    /// Declared length does not match the observed frame.
    #[error("SACP packet length mismatch")]
    InvalidSize,

    /// Protocol version byte is not 1.
    #[error("SACP version mismatch")]
    InvalidVersion,

    /// Header CRC or payload checksum does not match the data.
    #[error("SACP checksum doesn't match data")]
    InvalidChecksum,
}

/// Printer session error.
///
/// Represents failures of a live printer connection: requests against a
/// closed session, response timeouts, non-zero acknowledgement codes, and
/// the upload/reconnect paths.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No active connection to the printer.
    #[error("not connected")]
    NotConnected,

    /// No response arrived for the given sequence within the deadline.
    #[error("timeout waiting for response seq={seq}")]
    ResponseTimeout {
        /// The sequence number the caller was waiting on.
        seq: u16,
    },

    /// The printer acknowledged the command with a non-zero result code.
    #[error("command 0x{command_set:02x}/0x{command_id:02x} failed: code {code}")]
    CommandFailed {
        /// Command set of the failed request.
        command_set: u8,
        /// Command id of the failed request.
        command_id: u8,
        /// The result code reported by the printer.
        code: u8,
    },

    /// The connection closed while a caller was waiting for a response.
    #[error("connection closed while waiting for response")]
    ConnectionClosed,

    /// The file transfer state machine failed mid-upload.
    #[error("upload failed: {reason}")]
    UploadFailed {
        /// A description of what went wrong.
        reason: String,
    },

    /// The post-upload reconnect gave up after the configured attempts.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted {
        /// How many connection attempts were made.
        attempts: u32,
    },
}

/// Unified error type for the bridge core.
#[derive(Error, Debug)]
pub enum Error {
    /// SACP framing error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Printer session error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Standard I/O error (TCP reads/writes, file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check whether this error is a read deadline expiring.
    ///
    /// The router uses this to tell an idle socket apart from a broken one.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Session(SessionError::ResponseTimeout { .. }) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// Result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_display_matches_wire_format() {
        let err = SessionError::CommandFailed {
            command_set: 0x10,
            command_id: 0x02,
            code: 4,
        };
        assert_eq!(err.to_string(), "command 0x10/0x02 failed: code 4");

        assert_eq!(SessionError::NotConnected.to_string(), "not connected");
        assert_eq!(
            SessionError::ResponseTimeout { seq: 17 }.to_string(),
            "timeout waiting for response seq=17"
        );
    }

    #[test]
    fn io_timeout_is_timeout() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline"));
        assert!(err.is_timeout());
        assert!(!Error::Protocol(ProtocolError::InvalidPacket).is_timeout());
    }
}
