//! Error taxonomy for the framework.
//!
//! Per-connection errors (`ConnectionClosed`, `Send`, `Encoding`,
//! `FrameTooLarge`, `UnknownCommand`) are contained to the serving task that
//! raised them; startup errors (`Bind`, `Connect`) are surfaced to the caller.

use thiserror::Error;

/// Errors produced by the framing, connection, and dispatch layers.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// An outbound connection could not be established.
    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The peer closed the stream, or the connection is already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O fault occurred while writing a frame.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// The payload cannot be framed: it embeds the delimiter byte,
    /// exceeds the frame limit on encode, or is not valid UTF-8 on decode.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The receive buffer exceeded the configured maximum without a
    /// delimiter appearing.
    #[error("frame exceeds maximum length of {max} bytes")]
    FrameTooLarge { max: usize },

    /// No handler is registered for the message's command token.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// A bounded wait elapsed before a response arrived.
    #[error("timed out waiting for response")]
    Timeout,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
