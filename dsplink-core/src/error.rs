//! Domain-specific error types for the dsplink host layer.
//!
//! All fallible operations return `Result<T, LinkError>`.
//! Nothing a device sends can make this crate panic.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::file::FileStatus;

/// The canonical error type for the link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the `DSPL` magic sequence.
    #[error("invalid magic bytes: expected DSPL")]
    InvalidMagic,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A frame or command sequence violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Frame Errors ─────────────────────────────────────────────
    /// The payload exceeds the maximum frame payload.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Link Errors ──────────────────────────────────────────────
    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A command was not accepted into the dispatcher queue.
    #[error("command rejected: {0}")]
    Queue(#[from] QueueError),

    /// A gate wait elapsed without a correlated response.
    #[error("no response after {0:?}")]
    ResponseTimeout(Duration),

    /// The link went down while the caller was waiting.
    #[error("link disconnected")]
    Disconnected,

    /// The link hit a fatal transport error and must be disconnected
    /// before it can be connected again.
    #[error("link faulted; disconnect before reconnecting")]
    Faulted,

    /// `connect()` was called before any port was selected.
    #[error("no port selected")]
    NoPortSelected,

    /// The device answered a storage operation with a failure code.
    #[error("{path}: {status}")]
    FileOperation { path: String, status: FileStatus },

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── QueueError ───────────────────────────────────────────────────

/// Why the dispatcher did not accept a command.
///
/// `Ok(())` from an enqueue means accepted and queued; every variant is a
/// rejection, and a rejected command never reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue stayed full for the whole enqueue timeout.
    #[error("command queue is full")]
    QueueFull,

    /// There is no running connection to queue onto.
    #[error("link is not connected")]
    NotConnected,

    /// The command's payload does not fit in one frame.
    #[error("command payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The command could not be encoded for another reason.
    #[error("command cannot be encoded")]
    Unencodable,
}

// ── TransportError ───────────────────────────────────────────────

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be opened.
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Read or write on an open endpoint failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the endpoint.
    #[error("transport closed by peer")]
    Closed,

    /// The operation needs an open endpoint.
    #[error("transport is not open")]
    NotOpen,

    /// The serial driver reported an error outside of plain I/O.
    #[error("serial error: {0}")]
    Serial(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Transport(TransportError::Io(e))
    }
}

impl From<Box<bincode::ErrorKind>> for LinkError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LinkError::Encoding(e.to_string())
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(kind) => {
                TransportError::Io(std::io::Error::new(kind, e.description))
            }
            _ => TransportError::Serial(e.description),
        }
    }
}
