use thiserror::Error;

/// Error types for wireperf operations.
///
/// Covers every failure class a test can hit, from socket I/O to control
/// protocol violations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network operations.
    ///
    /// Wraps `std::io::Error` for connect, read, and write failures on any
    /// transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error.
    ///
    /// Occurs when encoding or decoding a control-plane payload or the
    /// final report.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A framed message announced a length over the 1 MiB cap.
    ///
    /// Raised before the body is read or allocated.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Control protocol violation.
    ///
    /// Unexpected message type, unknown type code, malformed payload, or an
    /// unsupported protocol string in the handshake.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unusable configuration, detected before any socket is opened.
    #[error("configuration error: {0}")]
    Config(String),

    /// A peer did not respond within the allotted window.
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Result type alias for wireperf operations.
pub type Result<T> = std::result::Result<T, Error>;
