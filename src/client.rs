//! Client-side session orchestrator.
//!
//! One test runs through the states connect, send start, await ack, run,
//! done. The run state differs per transport: stream tests pump bytes on
//! the write half while draining the peer's INTERVAL and TEST_END frames
//! from the read half; datagram tests pace stamped packets and treat the
//! server's per-packet echo as advisory.

use crate::config::{Config, Mode, Protocol};
use crate::error::{Error, Result};
use crate::measurements::ByteCounters;
use crate::protocol::{
    encode_message, read_message, write_message, MessageType, TestConfig,
};
use crate::receiver::RECEIVER_GRACE;
use crate::report::{
    print_interval_row, print_summary, session_cookie, system_info, version_string,
    ConnectingTo, Connection, CpuUtilization, Interval, StreamResult, TestEnd, TestResults,
    TestStart, Timestamp,
};
use crate::sender::{run_datagram_sender, run_stream_sender};
use crate::transport;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Socket identifier stamped on client-side report rows.
const CLIENT_SOCKET_ID: i32 = 4;

/// Network throughput test client.
///
/// # Examples
///
/// ```no_run
/// use wireperf::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".to_string(), 5201)
///     .with_duration(Duration::from_secs(10));
/// let client = Client::new(config)?;
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
}

impl Client {
    /// Creates a client after validating the configuration.
    pub fn new(config: Config) -> Result<Self> {
        if config.mode != Mode::Client {
            return Err(Error::Config("client requires client-mode configuration".into()));
        }
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs one test end to end and prints the local summary.
    ///
    /// Returns the assembled results so embedders can consume them
    /// directly.
    pub async fn run(&self) -> Result<TestResults> {
        if self.config.reverse {
            warn!("reverse mode is not implemented; running a forward test");
        }
        if self.config.parallel > 1 {
            warn!(
                "parallel streams are not implemented; running 1 stream instead of {}",
                self.config.parallel
            );
        }

        let results = match self.config.protocol {
            Protocol::Udp => self.run_datagram().await?,
            _ => self.run_stream().await?,
        };

        print_summary(&results, self.config.json)?;
        Ok(results)
    }

    /// Wire configuration announced in TEST_START.
    fn wire_config(&self) -> TestConfig {
        TestConfig {
            protocol: Some(self.config.protocol.as_str().to_string()),
            time: Some(self.config.duration.as_secs()),
            parallel: Some(self.config.parallel as u32),
            reverse: self.config.reverse,
            window: self.config.window,
            length: Some(self.config.payload_len()),
            bandwidth: (self.config.bandwidth > 0).then_some(self.config.bandwidth),
            ..Default::default()
        }
    }

    fn print_banner(&self, local: &std::net::SocketAddr, remote: &std::net::SocketAddr) {
        if self.config.json {
            return;
        }
        let host = self.config.server_addr.as_deref().unwrap_or_default();
        println!("Connecting to host {}, port {}", host, self.config.port);
        println!(
            "[{:3}] local {} port {} connected to {} port {}",
            CLIENT_SOCKET_ID,
            local.ip(),
            local.port(),
            remote.ip(),
            remote.port()
        );
        if self.config.protocol == Protocol::Udp {
            println!("[ ID] Interval           Transfer     Bitrate         Jitter    Lost/Total Datagrams");
        } else {
            println!("[ ID] Interval           Transfer     Bitrate");
        }
    }

    async fn run_stream(&self) -> Result<TestResults> {
        let mut stream = transport::dial_stream(&self.config).await?;
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;

        write_message(
            &mut stream,
            MessageType::TestStart,
            &serde_json::to_vec(&self.wire_config())?,
        )
        .await?;

        let ack = read_message(&mut stream).await?;
        match ack.msg_type {
            MessageType::TestStartAck => {}
            MessageType::Error => {
                return Err(Error::Protocol(format!(
                    "server rejected the test: {}",
                    String::from_utf8_lossy(&ack.data)
                )))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected TEST_START_ACK, got {:?}",
                    other
                )))
            }
        }
        info!("test started");
        self.print_banner(&local, &remote);

        let duration = self.config.duration;
        let counters = Arc::new(ByteCounters::new());
        let cancel = CancellationToken::new();
        let (reader, writer) = stream.into_split();

        let sender = tokio::spawn(run_stream_sender(
            writer,
            duration,
            self.config.payload_len(),
            self.config.bandwidth,
            Arc::clone(&counters),
            cancel.child_token(),
        ));
        let drain = tokio::spawn(drain_control(reader, cancel.child_token()));

        let start = Instant::now();
        let mut ticker =
            time::interval_at(start + Duration::from_secs(1), Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let elapsed = start.elapsed().as_secs_f64();
            let bytes = counters.take_interval();
            if !self.config.json {
                print_interval_row(
                    CLIENT_SOCKET_ID,
                    elapsed - 1.0,
                    elapsed,
                    bytes,
                    bytes as f64 * 8.0,
                    None,
                );
            }
            if elapsed >= duration.as_secs_f64() {
                break;
            }
        }

        let _ = sender.await;
        // Give the peer a moment to flush its end-of-test block.
        let peer_end = match time::timeout(RECEIVER_GRACE, drain).await {
            Ok(Ok(end)) => end,
            _ => None,
        };
        cancel.cancel();

        let elapsed = start.elapsed().as_secs_f64();
        let total = counters.total();
        Ok(self.assemble_results(local, remote, elapsed, total, None, peer_end))
    }

    async fn run_datagram(&self) -> Result<TestResults> {
        let socket = transport::dial_datagram(&self.config).await?;
        let local = socket.local_addr()?;
        let remote = socket.peer_addr()?;

        // The handshake is one framed datagram; the first reply of any
        // shape acknowledges it, the echo channel being advisory.
        let frame = encode_message(
            MessageType::TestStart,
            &serde_json::to_vec(&self.wire_config())?,
        )?;
        socket.send(&frame).await?;

        let mut ack_buf = vec![0u8; 2048];
        let n = time::timeout(RECEIVER_GRACE, socket.recv(&mut ack_buf))
            .await
            .map_err(|_| Error::Timeout("no acknowledgement from server".into()))??;
        if n == 0 {
            return Err(Error::Protocol("empty acknowledgement from server".into()));
        }
        if is_framed_ack(&ack_buf[..n]) {
            debug!("server sent a framed acknowledgement");
        } else {
            debug!(
                "server acknowledged: {}",
                String::from_utf8_lossy(&ack_buf[..n])
            );
        }
        info!("test started");
        self.print_banner(&local, &remote);

        let duration = self.config.duration;
        let length = self.config.payload_len();
        let socket = Arc::new(socket);
        let counters = Arc::new(ByteCounters::new());
        let cancel = CancellationToken::new();

        let sender = tokio::spawn(run_datagram_sender(
            Arc::clone(&socket),
            duration,
            length,
            self.config.bandwidth,
            Arc::clone(&counters),
            cancel.child_token(),
        ));

        let echo_socket = Arc::clone(&socket);
        let echo_cancel = cancel.child_token();
        let echo = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                tokio::select! {
                    _ = echo_cancel.cancelled() => break,
                    result = echo_socket.recv(&mut buf) => match result {
                        Ok(n) => debug!(
                            "server echo: {}",
                            String::from_utf8_lossy(&buf[..n])
                        ),
                        Err(e) => {
                            debug!("echo drain ended: {}", e);
                            break;
                        }
                    },
                }
            }
        });

        let start = Instant::now();
        let mut ticker =
            time::interval_at(start + Duration::from_secs(1), Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let elapsed = start.elapsed().as_secs_f64();
            let bytes = counters.take_interval();
            if !self.config.json {
                print_interval_row(
                    CLIENT_SOCKET_ID,
                    elapsed - 1.0,
                    elapsed,
                    bytes,
                    bytes as f64 * 8.0,
                    Some(bytes / length as u64),
                );
            }
            if elapsed >= duration.as_secs_f64() {
                break;
            }
        }

        let packets = sender.await.unwrap_or(0);
        cancel.cancel();
        let _ = echo.await;

        let elapsed = start.elapsed().as_secs_f64();
        let total = counters.total();
        Ok(self.assemble_results(local, remote, elapsed, total, Some(packets), None))
    }

    /// Builds the client-side view of the results.
    ///
    /// The receiver row prefers the peer's end block when one was drained;
    /// otherwise it mirrors the local totals. The datagram sender cannot
    /// observe loss or jitter, so its rows carry zeros for them.
    fn assemble_results(
        &self,
        local: std::net::SocketAddr,
        remote: std::net::SocketAddr,
        elapsed: f64,
        total_bytes: u64,
        packets: Option<u64>,
        peer_end: Option<TestEnd>,
    ) -> TestResults {
        let mut stream_row =
            StreamResult::over(Some(CLIENT_SOCKET_ID), elapsed, total_bytes, true);
        let mut sum_sent = StreamResult::over(None, elapsed, total_bytes, true);
        let mut sum_received = peer_end
            .map(|end| end.sum_received)
            .unwrap_or_else(|| StreamResult::over(None, elapsed, total_bytes, false));

        if let Some(packets) = packets {
            for row in [&mut stream_row, &mut sum_sent, &mut sum_received] {
                row.packets = Some(packets);
                row.lost_packets = Some(0);
                row.lost_percent = Some(0.0);
                row.jitter_ms = Some(0.0);
                row.out_of_order = Some(0);
            }
        }

        TestResults {
            start: TestStart {
                connected: vec![Connection {
                    socket: CLIENT_SOCKET_ID,
                    local_host: local.ip().to_string(),
                    local_port: local.port(),
                    remote_host: remote.ip().to_string(),
                    remote_port: remote.port(),
                }],
                version: version_string(),
                system_info: system_info(),
                timestamp: Timestamp::now(),
                connecting_to: ConnectingTo {
                    host: self.config.server_addr.clone().unwrap_or_default(),
                    port: self.config.port,
                },
                cookie: session_cookie(),
            },
            end: TestEnd {
                streams: vec![stream_row],
                sum_sent,
                sum_received,
                cpu_utilization_percent: CpuUtilization::default(),
            },
        }
    }
}

/// Drains the peer's control frames during the run state.
///
/// Returns the peer's end block when one arrives before cancellation.
async fn drain_control(
    mut reader: OwnedReadHalf,
    cancel: CancellationToken,
) -> Option<TestEnd> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            msg = read_message(&mut reader) => match msg {
                Ok(msg) => match msg.msg_type {
                    MessageType::Interval => {
                        if let Ok(interval) = serde_json::from_slice::<Interval>(&msg.data) {
                            debug!(
                                "peer interval {:.1}-{:.1}s: {} bytes",
                                interval.start, interval.end, interval.bytes
                            );
                        }
                    }
                    MessageType::TestEnd => {
                        return serde_json::from_slice(&msg.data).ok();
                    }
                    MessageType::Error => {
                        warn!(
                            "peer reported an error: {}",
                            String::from_utf8_lossy(&msg.data)
                        );
                        return None;
                    }
                    _ => {}
                },
                Err(e) => {
                    debug!("control drain ended: {}", e);
                    return None;
                }
            },
        }
    }
}

/// True when a datagram carries a framed TEST_START_ACK.
fn is_framed_ack(buf: &[u8]) -> bool {
    if buf.len() < 8 {
        return false;
    }
    let total_length = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let code = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    total_length == buf.len() - 4 && code == MessageType::TestStartAck as u32
}
