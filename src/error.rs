//! Server error types

use std::io;

use thiserror::Error;

/// Errors surfaced by the server.
///
/// Per-connection failures never reach this type; they are handled by
/// closing the connection in question. What remains is startup failure,
/// submission to a stopped pool, and invalid configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket, demultiplexer, or wakeup-channel I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A task was submitted after the pool stopped accepting work.
    #[error("enqueue on stopped thread pool")]
    PoolStopped,

    /// The configured port could not be parsed.
    #[error("invalid port: {0}")]
    InvalidPort(String),
}
