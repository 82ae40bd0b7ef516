//! Server error types.

use thiserror::Error;

/// Errors terminating a single connection or the server itself. Nothing in
/// here crosses from one connection to another; the accept loop only logs.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ussdgw_protocol::ProtocolError),

    #[error("server shutting down")]
    ShuttingDown,
}
