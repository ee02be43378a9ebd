use thiserror::Error;

use crate::RemoteError;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply arrived before the request's deadline
    #[error("request timed out")]
    Timeout,

    /// The remote handler failed; carries its structured error
    #[error("remote handler failed: {0}")]
    Remote(RemoteError),

    /// Publish, subscribe or connection failure on the bus
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound message could not be decoded
    #[error("malformed message: {0}")]
    Decode(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A name pattern failed to compile
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Required configuration missing
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// No destination channel configured for a request name
    #[error("no route for request: {0}")]
    NoRoute(String),

    /// A request with the same id is still pending on this requester
    #[error("request already pending: {0}")]
    DuplicateRequest(String),

    /// The requester was terminated before a reply arrived
    #[error("requester terminated")]
    Terminated,
}

impl RpcError {
    /// Reduce a local failure to the structured error forwarded over the bus.
    ///
    /// Remote errors pass through untouched so that chained hops preserve
    /// the original handler's error.
    pub fn into_remote(self) -> RemoteError {
        // ---
        match self {
            RpcError::Remote(err) => err,
            RpcError::Timeout => RemoteError::timeout(),
            other => {
                let name = match other {
                    RpcError::Transport(_) => "TransportError",
                    RpcError::Decode(_) | RpcError::Serialization(_) => "DecodeError",
                    RpcError::NoRoute(_) => "HandlerNotFound",
                    RpcError::Terminated => "TerminatedError",
                    _ => "Error",
                };
                RemoteError::new(name, other.to_string())
            }
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_timeout_into_remote() {
        // ---
        let err = RpcError::Timeout.into_remote();
        assert_eq!(err.name(), "TimeoutError");
        assert_eq!(err.message(), "request timed out");
    }

    #[test]
    fn test_remote_passes_through() {
        // ---
        let original = RemoteError::new("ValidationError", "bad input");
        let err = RpcError::Remote(original.clone()).into_remote();
        assert_eq!(err, original);
    }

    #[test]
    fn test_no_route_into_remote() {
        // ---
        let err = RpcError::NoRoute("users.get".into()).into_remote();
        assert_eq!(err.name(), "HandlerNotFound");
        assert_eq!(err.message(), "no route for request: users.get");
    }
}
