use std::io;

use thiserror::Error;

/// Result type for controller-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the codec, the flow assembler and the correlation layer.
///
/// A barrier that runs out of time is not an error: it is reported as an
/// uncommitted (`false`) outcome.
#[derive(Debug, Error)]
pub enum Error {
    /// Truncated or invalid bytes on the wire.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Contradictory or unparseable caller data, rejected before transmission.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No live connection for this datapath id.
    #[error("switch {0:016x} not found")]
    SwitchNotFound(u64),

    /// Transport write failed.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A message type reached a path that never expects it.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The switch's inbound correlation queue is at capacity.
    #[error("reply queue for switch {0:016x} is full")]
    QueueFull(u64),

    #[error("configuration error: {0}")]
    Config(String),

    /// The controller was shut down and takes no new sessions.
    #[error("controller is shut down")]
    ShutDown,
}

impl Error {
    pub fn malformed<S: Into<String>>(msg: S) -> Error {
        Error::MalformedMessage(msg.into())
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidArgument(msg.into())
    }
}

/// Adapter for `map_err` on reads from a bounded message buffer: running out
/// of bytes means a length field lied.
pub fn truncated(what: &'static str) -> impl Fn(io::Error) -> Error {
    move |e| Error::MalformedMessage(format!("truncated {}: {}", what, e))
}
