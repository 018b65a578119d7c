//! Client error types.

use rasmux_protocol::{EndpointException, EndpointFailure};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rasmux_protocol::ProtocolError),

    #[error("pool is closed")]
    Closed,

    #[error("timed out waiting for a free connection")]
    PoolTimeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unknown packet type {packet_type} on endpoint {endpoint_id} ({service_id})")]
    UnknownMessage {
        packet_type: u8,
        endpoint_id: u64,
        service_id: String,
    },

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error(transparent)]
    Remote(#[from] EndpointFailure),

    #[error(transparent)]
    RemoteException(#[from] EndpointException),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ClientError {
    /// Returns whether the connection that produced this error must be
    /// discarded rather than returned to the pool.
    ///
    /// Remote failures and exceptions are complete, well-framed replies, so
    /// the connection stays usable after them.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            ClientError::Remote(_) | ClientError::RemoteException(_)
        )
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::PoolTimeout => true,
            ClientError::Dial(_) => true,
            _ => false,
        }
    }
}
