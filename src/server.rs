//! Server-side session orchestrator.
//!
//! Stream transports run the full control handshake per accepted
//! connection, each in its own task: read TEST_START, acknowledge, run
//! the receiver engine, emit TEST_END. The datagram transport multiplexes
//! one bound socket across peers, feeding every packet to the flow
//! registry and answering with the advisory echo; it never frames
//! INTERVAL or TEST_END, the sending side keeps its own accounting.

use crate::config::{Config, Mode, Protocol};
use crate::error::{Error, Result};
use crate::measurements::{FlowRegistry, FlowStats};
use crate::protocol::{read_message, write_message, MessageType, TestConfig};
use crate::receiver::{run_stream_receiver, ReceiveSummary, RECEIVER_GRACE, STREAM_SOCKET_ID};
use crate::report::{
    session_cookie, system_info, version_string, ConnectingTo, Connection, TestResults,
    TestStart, Timestamp,
};
use crate::transport;
use crate::udp_packet::wall_clock_ns;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time;

/// One accepted test session, tracked from accept to TEST_END.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub peer: String,
    pub started_unix: i64,
    pub config: Option<TestConfig>,
    pub results: Option<TestResults>,
}

impl Session {
    fn new(peer: String) -> Self {
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            id: session_cookie(),
            peer,
            started_unix,
            config: None,
            results: None,
        }
    }
}

/// Network throughput test server.
///
/// # Examples
///
/// ```no_run
/// use wireperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(5201));
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    flows: Arc<FlowRegistry>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            flows: Arc::new(FlowRegistry::new()),
        }
    }

    /// Binds per the configured protocol and serves sessions.
    ///
    /// Runs until a bind error, or until the first session completes in
    /// one-off mode.
    pub async fn run(&self) -> Result<()> {
        if self.config.mode != Mode::Server {
            return Err(Error::Config("server requires server-mode configuration".into()));
        }
        self.config.validate()?;

        match self.config.protocol {
            Protocol::Udp => {
                let socket = transport::bind_datagram(&self.config).await?;
                info!("datagram server listening on {}", transport::bind_addr(&self.config));
                self.serve_datagram(socket).await
            }
            _ => {
                let listener = transport::listen_stream(&self.config).await?;
                info!("stream server listening on {}", transport::bind_addr(&self.config));
                self.serve_stream(listener).await
            }
        }
    }

    /// Accept loop over an already-bound stream listener.
    pub async fn serve_stream(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept failed: {}", e);
                    continue;
                }
            };
            info!("connection from {}", peer);

            if let Err(e) = transport::configure_accepted(&stream, &self.config) {
                warn!("socket tuning failed for {}: {}", peer, e);
            }

            let session = Session::new(peer.to_string());
            let id = session.id.clone();
            self.sessions.write().insert(id.clone(), session);

            if self.config.one_off {
                let result =
                    handle_stream_session(stream, peer, &id, &self.sessions).await;
                self.sessions.write().remove(&id);
                if let Err(e) = result {
                    error!("session {} failed: {}", id, e);
                }
                info!("one-off session complete, exiting");
                return Ok(());
            }

            let sessions = Arc::clone(&self.sessions);
            tokio::spawn(async move {
                let result = handle_stream_session(stream, peer, &id, &sessions).await;
                sessions.write().remove(&id);
                if let Err(e) = result {
                    error!("session {} failed: {}", id, e);
                }
            });
        }
    }

    /// Receive loop over an already-bound datagram socket.
    ///
    /// In one-off mode the first flow plus the receiver grace period of
    /// silence completes the session and the loop returns.
    pub async fn serve_datagram(&self, socket: UdpSocket) -> Result<()> {
        let mut buf = vec![0u8; 65536];
        let mut seen_traffic = false;

        loop {
            let received = if self.config.one_off && seen_traffic {
                match time::timeout(RECEIVER_GRACE, socket.recv_from(&mut buf)).await {
                    Ok(received) => received,
                    Err(_) => {
                        info!("one-off datagram session idle, exiting");
                        return Ok(());
                    }
                }
            } else {
                socket.recv_from(&mut buf).await
            };

            let (n, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("datagram receive failed: {}", e);
                    continue;
                }
            };
            seen_traffic = true;

            let reply = self.flows.record(&peer.to_string(), &buf[..n], wall_clock_ns());
            if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                warn!("echo to {} failed: {}", peer, e);
            }

            if self.config.verbose {
                if let Some(stats) = self.flows.snapshot(&peer.to_string()) {
                    debug!(
                        "flow {}: packets={} bytes={} loss={:.2}% jitter={:.3}ms ooo={}",
                        peer,
                        stats.total_packets,
                        stats.total_bytes,
                        stats.loss_percent(),
                        stats.jitter_ms(),
                        stats.out_of_order
                    );
                }
            }
        }
    }

    /// Number of sessions currently between accept and close.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of one datagram peer's flow statistics.
    pub fn flow_snapshot(&self, peer: &str) -> Option<FlowStats> {
        self.flows.snapshot(peer)
    }

    /// Number of datagram peers with stamped traffic on record.
    pub fn flow_count(&self) -> usize {
        self.flows.flow_count()
    }
}

/// Runs the handshake and receiver engine for one accepted connection.
async fn handle_stream_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    session_id: &str,
    sessions: &RwLock<HashMap<String, Session>>,
) -> Result<()> {
    let msg = read_message(&mut stream).await?;
    if msg.msg_type != MessageType::TestStart {
        return Err(Error::Protocol(format!(
            "expected TEST_START, got {:?}",
            msg.msg_type
        )));
    }

    let test_config: TestConfig = serde_json::from_slice(&msg.data)
        .map_err(|e| Error::Protocol(format!("malformed test configuration: {}", e)))?;
    let negotiated = test_config.protocol()?;
    let duration = Duration::from_secs(test_config.duration_secs());
    debug!(
        "session {} from {}: protocol={} duration={}s",
        session_id,
        peer,
        negotiated.as_str(),
        duration.as_secs()
    );

    if let Some(session) = sessions.write().get_mut(session_id) {
        session.config = Some(test_config);
    }

    if !negotiated.is_stream() {
        let payload =
            serde_json::json!({ "error": "datagram tests run over the datagram listener" });
        write_message(&mut stream, MessageType::Error, payload.to_string().as_bytes())
            .await?;
        return Err(Error::Protocol(
            "datagram test requested on a stream connection".into(),
        ));
    }

    write_message(&mut stream, MessageType::TestStartAck, b"{}").await?;

    let local = stream.local_addr()?;
    let start_block = TestStart {
        connected: vec![Connection {
            socket: STREAM_SOCKET_ID,
            local_host: local.ip().to_string(),
            local_port: local.port(),
            remote_host: peer.ip().to_string(),
            remote_port: peer.port(),
        }],
        version: version_string(),
        system_info: system_info(),
        timestamp: Timestamp::now(),
        connecting_to: ConnectingTo {
            host: peer.ip().to_string(),
            port: peer.port(),
        },
        cookie: session_id.to_string(),
    };

    let (summary, end) = run_stream_receiver(stream, duration).await?;
    if let Some(session) = sessions.write().get_mut(session_id) {
        session.results = Some(TestResults {
            start: start_block,
            end,
        });
    }
    log_session_summary(session_id, peer, &summary);
    Ok(())
}

fn log_session_summary(session_id: &str, peer: SocketAddr, summary: &ReceiveSummary) {
    let bits_per_second = if summary.elapsed > 0.0 {
        summary.total_bytes as f64 * 8.0 / summary.elapsed
    } else {
        0.0
    };
    info!(
        "session {} from {} complete: {} bytes in {:.2}s ({:.2} Mbits/sec{})",
        session_id,
        peer,
        summary.total_bytes,
        summary.elapsed,
        bits_per_second / 1_000_000.0,
        if summary.timed_out { ", timed out" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_message, read_message};
    use tokio::io::AsyncWriteExt;

    async fn accept_one(config: Config) -> (Server, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(config);

        let client = tokio::spawn(TcpStream::connect(addr));
        let (stream, peer) = listener.accept().await.unwrap();

        let session = Session::new(peer.to_string());
        let id = session.id.clone();
        server.sessions.write().insert(id.clone(), session);
        let sessions = Arc::clone(&server.sessions);
        tokio::spawn(async move {
            let result = handle_stream_session(stream, peer, &id, &sessions).await;
            sessions.write().remove(&id);
            result
        });

        (server, client.await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_unexpected_first_message_is_rejected() {
        let (server, mut client) = accept_one(Config::server(0)).await;

        // An INTERVAL before TEST_START violates the handshake.
        let frame = encode_message(MessageType::Interval, b"{}").unwrap();
        client.write_all(&frame).await.unwrap();

        // The server closes without acknowledging.
        assert!(read_message(&mut client).await.is_err());

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_config_is_rejected() {
        let (server, mut client) = accept_one(Config::server(0)).await;

        let frame = encode_message(MessageType::TestStart, b"{not json").unwrap();
        client.write_all(&frame).await.unwrap();

        assert!(read_message(&mut client).await.is_err());
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_datagram_request_on_stream_gets_error_frame() {
        let (_server, mut client) = accept_one(Config::server(0)).await;

        let frame =
            encode_message(MessageType::TestStart, br#"{"protocol":"udp"}"#).unwrap();
        client.write_all(&frame).await.unwrap();

        let msg = read_message(&mut client).await.unwrap();
        assert_eq!(msg.msg_type, MessageType::Error);
        let body: serde_json::Value = serde_json::from_slice(&msg.data).unwrap();
        assert!(body["error"].as_str().unwrap().contains("datagram"));
    }

    #[tokio::test]
    async fn test_handshake_acknowledges_stream_config() {
        let (_server, mut client) = accept_one(Config::server(0)).await;

        let frame = encode_message(
            MessageType::TestStart,
            br#"{"protocol":"tcp","time":1,"len":8192}"#,
        )
        .unwrap();
        client.write_all(&frame).await.unwrap();

        let msg = read_message(&mut client).await.unwrap();
        assert_eq!(msg.msg_type, MessageType::TestStartAck);
    }

    #[tokio::test]
    async fn test_datagram_loop_echoes_and_accounts() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let mut config = Config::server(0).with_protocol(Protocol::Udp);
        config.one_off = true;
        let server = Arc::new(Server::new(config));
        let serve = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve_datagram(socket).await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();
        let peer_key = client.local_addr().unwrap().to_string();

        let mut packet = crate::sender::fill_pattern(64);
        for seq in 0u32..3 {
            crate::udp_packet::stamp(&mut packet, seq, wall_clock_ns());
            client.send(&packet).await.unwrap();

            let mut reply = [0u8; 256];
            let n = client.recv(&mut reply).await.unwrap();
            assert!(n > 0);
        }

        let stats = server.flow_snapshot(&peer_key).unwrap();
        assert_eq!(stats.total_packets, 3);
        assert_eq!(stats.lost_packets, 0);

        // One-off: the grace period of silence ends the loop.
        let result = time::timeout(RECEIVER_GRACE + Duration::from_secs(1), serve)
            .await
            .expect("one-off datagram server should exit after idle grace")
            .unwrap();
        assert!(result.is_ok());
    }
}
