use thiserror::Error;

/// Result type for MK3 operations
pub type Result<T> = std::result::Result<T, Mk3Error>;

/// Errors that can occur when talking to an MK3 amplifier
#[derive(Error, Debug)]
pub enum Mk3Error {
    /// TCP connection could not be established (refused, unreachable)
    #[error("connection failed: {detail}")]
    ConnectionFailed {
        /// Reason reported by the OS or the connect path
        detail: String,
    },

    /// Connect or read deadline expired
    #[error("timeout")]
    Timeout,

    /// The connection was dropped by the device mid-session
    #[error("connection lost")]
    ConnectionLost,

    /// A command was sent on a session that is not connected
    #[error("not connected")]
    NotConnected,

    /// Group, channel, or source index outside the valid range, rejected
    /// before any I/O
    #[error("invalid {kind} index: {value:#04X}")]
    InvalidIndex {
        /// "group", "channel", or "source"
        kind: &'static str,
        /// The rejected index value
        value: u8,
    },

    /// The firmware does not implement an optional query
    #[error("query not supported: {0}")]
    QueryUnsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
