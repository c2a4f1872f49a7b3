use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default control and data port, shared with iperf3.
pub const DEFAULT_PORT: u16 = 5201;

/// Default buffer length for stream tests (128 KiB).
pub const DEFAULT_STREAM_LEN: usize = 128 * 1024;

/// Default datagram payload length in bytes.
pub const DEFAULT_DATAGRAM_LEN: usize = 1470;

/// Default datagram target rate in bits per second (1 Mbps).
pub const DEFAULT_DATAGRAM_BANDWIDTH: u64 = 1_000_000;

/// Transport protocol type.
///
/// SCTP is carried here as a first-class selection but is treated exactly
/// like TCP at the data-plane level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Wire name used in the JSON test configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    /// Parses the wire name. An empty string selects TCP, matching the
    /// handshake default.
    pub fn from_wire(name: &str) -> Result<Self> {
        match name {
            "" | "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(Error::Protocol(format!("unknown protocol: {}", other))),
        }
    }

    /// True for the byte-stream transports (TCP and SCTP).
    pub fn is_stream(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }
}

/// Test mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Server,
    Client,
}

/// Configuration for one wireperf process.
///
/// Mirrors the CLI surface one-to-one. Client and server share the struct;
/// fields that only apply to one role are ignored by the other.
///
/// # Examples
///
/// ```
/// use wireperf::{Config, Protocol};
/// use std::time::Duration;
///
/// let config = Config::client("10.0.0.2".to_string(), 5201)
///     .with_protocol(Protocol::Udp)
///     .with_duration(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode.
    pub mode: Mode,

    /// Protocol to use.
    pub protocol: Protocol,

    /// Port number to use.
    pub port: u16,

    /// Server address (client mode).
    pub server_addr: Option<String>,

    /// Bind address (server mode).
    pub bind_addr: Option<IpAddr>,

    /// Test duration.
    pub duration: Duration,

    /// Target bandwidth in bits per second. Zero means unlimited for
    /// stream tests; datagram tests fall back to 1 Mbps.
    pub bandwidth: u64,

    /// Buffer / payload length in bytes. `None` selects the per-protocol
    /// default.
    pub length: Option<usize>,

    /// Socket buffer size in bytes. `None` leaves the OS default.
    pub window: Option<usize>,

    /// Number of parallel streams. Accepted for compatibility; only one
    /// stream is run.
    pub parallel: usize,

    /// Reverse mode flag. Accepted for compatibility and announced as a
    /// no-op at startup.
    pub reverse: bool,

    /// Output the final report as pretty-printed JSON.
    pub json: bool,

    /// Server handles one session and exits.
    pub one_off: bool,

    /// Per-event diagnostics.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            protocol: Protocol::Tcp,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            duration: Duration::from_secs(10),
            bandwidth: 0,
            length: None,
            window: None,
            parallel: 1,
            reverse: false,
            json: false,
            one_off: false,
            verbose: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    pub fn client(server_addr: String, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_one_off(mut self, one_off: bool) -> Self {
        self.one_off = one_off;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Effective buffer / payload length for the selected protocol.
    pub fn payload_len(&self) -> usize {
        self.length.unwrap_or(match self.protocol {
            Protocol::Udp => DEFAULT_DATAGRAM_LEN,
            _ => DEFAULT_STREAM_LEN,
        })
    }

    /// Checks the configuration before any socket is opened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a missing client target, a zero
    /// duration, a zero stream count, or a zero-length buffer.
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Client && self.server_addr.is_none() {
            return Err(Error::Config("client mode requires a server address".into()));
        }
        if self.duration.is_zero() {
            return Err(Error::Config("test duration must be positive".into()));
        }
        if self.parallel == 0 {
            return Err(Error::Config("parallel stream count must be at least 1".into()));
        }
        if self.length == Some(0) {
            return Err(Error::Config("buffer length must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.duration, Duration::from_secs(10));
        assert_eq!(config.parallel, 1);
        assert_eq!(config.bandwidth, 0);
        assert!(!config.one_off);
    }

    #[test]
    fn test_builder() {
        let config = Config::client("192.168.1.100".to_string(), 5202)
            .with_protocol(Protocol::Sctp)
            .with_duration(Duration::from_secs(30))
            .with_bandwidth(100_000_000)
            .with_length(1024)
            .with_window(65536)
            .with_json(true);

        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.port, 5202);
        assert_eq!(config.protocol, Protocol::Sctp);
        assert_eq!(config.duration, Duration::from_secs(30));
        assert_eq!(config.bandwidth, 100_000_000);
        assert_eq!(config.length, Some(1024));
        assert_eq!(config.window, Some(65536));
        assert!(config.json);
    }

    #[test]
    fn test_payload_len_defaults() {
        let tcp = Config::client("h".to_string(), 5201);
        assert_eq!(tcp.payload_len(), DEFAULT_STREAM_LEN);

        let udp = Config::client("h".to_string(), 5201).with_protocol(Protocol::Udp);
        assert_eq!(udp.payload_len(), DEFAULT_DATAGRAM_LEN);

        let explicit = Config::client("h".to_string(), 5201).with_length(9000);
        assert_eq!(explicit.payload_len(), 9000);
    }

    #[test]
    fn test_validate_rejects_missing_target() {
        let mut config = Config::new();
        config.mode = Mode::Client;
        config.server_addr = None;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_duration() {
        let config =
            Config::client("h".to_string(), 5201).with_duration(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_parallel() {
        let config = Config::client("h".to_string(), 5201).with_parallel(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_protocol_wire_names() {
        assert_eq!(Protocol::from_wire("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_wire("").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_wire("udp").unwrap(), Protocol::Udp);
        assert_eq!(Protocol::from_wire("sctp").unwrap(), Protocol::Sctp);
        assert!(Protocol::from_wire("quic").is_err());
        assert!(Protocol::Sctp.is_stream());
        assert!(!Protocol::Udp.is_stream());
    }
}
