//! Close codes and verifier errors.

use std::fmt;

/// Wire-level close reasons. Sent as the WebSocket close frame's reason
/// string, not as a JSON message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    AuthFail,
    Superseded,
    IdleTimeout,
    BackpressureExceeded,
    Shutdown,
    ProtocolError,
}

impl CloseCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFail => "auth_fail",
            Self::Superseded => "superseded",
            Self::IdleTimeout => "idle_timeout",
            Self::BackpressureExceeded => "backpressure_exceeded",
            Self::Shutdown => "shutdown",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure modes of the Token Verifier.
#[derive(Debug)]
pub enum AuthError {
    /// The verifier rejected the token outright (4xx, or a 2xx body missing
    /// the user identifier field).
    Invalid,
    /// The verifier couldn't be reached or returned something unparseable.
    Unavailable(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid token"),
            Self::Unavailable(e) => write!(f, "auth verifier unavailable: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}
