//! Server error types.

use std::fmt;

/// Errors that can occur in the broker server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unreadable TLS files).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (connection failure, stream reset).
    ///
    /// Affects one connection or stream; the server keeps serving others.
    Transport(String),

    /// Response could not be encoded.
    ///
    /// Indicates a bug; the request stream is dropped.
    Protocol(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<aqm_proto::ProtocolError> for ServerError {
    fn from(err: aqm_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
