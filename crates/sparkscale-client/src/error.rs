//! Client error types.

use std::time::Duration;

use sparkscale_types::SignalError;
use thiserror::Error;

/// Failures below the HTTP status line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid base url: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Errors returned by the typed upstream clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("malformed request: {0}")]
    Encode(String),
}

impl ClientError {
    /// Whether repeating the same request may succeed.
    ///
    /// Network failures and 5xx are transient; 4xx, bad configuration and
    /// encode/decode failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(TransportError::InvalidUrl(_) | TransportError::InvalidRequest(_)) => false,
            ClientError::Transport(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode(_) | ClientError::Encode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ClientError> for SignalError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Transport(TransportError::Timeout(d)) => SignalError::Timeout(d),
            ClientError::Decode(msg) => SignalError::PolicyViolation(format!("malformed response: {msg}")),
            other => SignalError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ClientError::Transport(TransportError::Connect("refused".into())).is_transient());
        assert!(ClientError::Transport(TransportError::Timeout(Duration::from_secs(1))).is_transient());
        assert!(ClientError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!ClientError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!ClientError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!ClientError::Encode("bad".into()).is_transient());
        assert!(!ClientError::Transport(TransportError::InvalidUrl("x".into())).is_transient());
        assert!(!ClientError::Transport(TransportError::InvalidRequest("bad header".into())).is_transient());
    }

    #[test]
    fn maps_into_signal_errors() {
        let timeout: SignalError =
            ClientError::Transport(TransportError::Timeout(Duration::from_secs(2))).into();
        assert_eq!(timeout, SignalError::Timeout(Duration::from_secs(2)));

        let decode: SignalError = ClientError::Decode("eof".into()).into();
        assert!(matches!(decode, SignalError::PolicyViolation(_)));

        let status: SignalError = ClientError::Status { status: 502, body: "bad gateway".into() }.into();
        assert!(matches!(status, SignalError::Unavailable(msg) if msg.contains("502")));
    }
}
