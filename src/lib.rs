//! wireperf - network throughput measurement over TCP, UDP, and SCTP
//!
//! A client opens a connection to a server, the two exchange a framed
//! control handshake describing the test, one side streams bulk synthetic
//! data for a bounded duration, and both sides emit per-second interval
//! rows and an end-of-test summary. The control protocol is the
//! iperf3-style two-word framing with JSON payloads.
//!
//! # Features
//!
//! - Stream (TCP, SCTP-as-TCP) and datagram (UDP) data planes
//! - Datagram loss, out-of-order, and RFC 1889 jitter accounting
//! - Rate pacing for datagram tests and token-bucket caps for streams
//! - Text table or JSON report output
//! - Asynchronous I/O using tokio

pub mod client;
pub mod config;
pub mod error;
pub mod measurements;
pub mod protocol;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod server;
pub mod token_bucket;
pub mod transport;
pub mod udp_packet;

pub use client::Client;
pub use config::{Config, Mode, Protocol};
pub use error::{Error, Result};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
