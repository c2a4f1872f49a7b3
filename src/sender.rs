//! Sender engine: bounded-duration bulk writer for streams and the
//! rate-paced, stamped packetizer for datagrams.
//!
//! Both loops share the same contract: run until the wall clock says the
//! test is over, count every byte actually handed to the transport, and
//! treat a write error as end-of-test rather than a failure.

use crate::measurements::ByteCounters;
use crate::token_bucket::TokenBucket;
use crate::udp_packet::{self, PacketHeader};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DATAGRAM_BANDWIDTH, DEFAULT_DATAGRAM_LEN};

/// Fills the reusable send buffer with the `i mod 256` test pattern.
pub fn fill_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Pacing gap between datagrams for a payload length and target rate.
pub fn packet_interval(length: usize, bandwidth: u64) -> Duration {
    Duration::from_secs_f64(length as f64 * 8.0 / bandwidth as f64)
}

/// Streams the pattern buffer as fast as the transport accepts, for
/// `duration`, counting every byte written.
///
/// A nonzero `bandwidth` caps the rate with a token bucket. Write errors
/// end the loop quietly; the peer tearing the connection down at test end
/// is an expected exit path. The write half is shut down on the way out.
pub async fn run_stream_sender<W>(
    mut writer: W,
    duration: Duration,
    length: usize,
    bandwidth: u64,
    counters: Arc<ByteCounters>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let buffer = fill_pattern(length);
    let mut bucket = (bandwidth > 0).then(|| TokenBucket::new(bandwidth / 8));
    let start = Instant::now();

    while start.elapsed() < duration {
        if let Some(bucket) = bucket.as_mut() {
            bucket.consume(buffer.len()).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = writer.write_all(&buffer) => match result {
                Ok(()) => counters.add(buffer.len() as u64),
                Err(e) => {
                    debug!("stream send ended: {}", e);
                    break;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
}

/// Sends stamped datagrams at the paced rate for `duration`.
///
/// Each tick stamps the header (sequence, wall-clock nanoseconds, magic)
/// into the reusable buffer and sends once; there are no retries, a send
/// error terminates the loop. Payloads shorter than the header go out raw
/// in legacy mode. Returns the number of datagrams sent.
pub async fn run_datagram_sender(
    socket: Arc<UdpSocket>,
    duration: Duration,
    length: usize,
    bandwidth: u64,
    counters: Arc<ByteCounters>,
    cancel: CancellationToken,
) -> u64 {
    let length = if length == 0 { DEFAULT_DATAGRAM_LEN } else { length };
    let bandwidth = if bandwidth == 0 {
        DEFAULT_DATAGRAM_BANDWIDTH
    } else {
        bandwidth
    };

    let mut buffer = fill_pattern(length);
    let stamped = length >= PacketHeader::SIZE;
    let mut ticker = time::interval(packet_interval(length, bandwidth));
    let start = Instant::now();
    let mut sequence: u32 = 0;
    let mut packets: u64 = 0;

    while start.elapsed() < duration {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if stamped {
                    udp_packet::stamp(&mut buffer, sequence, udp_packet::wall_clock_ns());
                }
                match socket.send(&buffer).await {
                    Ok(n) => {
                        counters.add(n as u64);
                        packets += 1;
                        sequence = sequence.wrapping_add(1);
                    }
                    Err(e) => {
                        debug!("datagram send ended: {}", e);
                        break;
                    }
                }
            }
        }
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_fill() {
        let buffer = fill_pattern(520);
        assert_eq!(buffer.len(), 520);
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[255], 255);
        assert_eq!(buffer[256], 0);
        assert_eq!(buffer[519], (519 % 256) as u8);
    }

    #[test]
    fn test_packet_interval_defaults() {
        // 1470 bytes at 1 Mbps is 11.76 ms per packet.
        let interval = packet_interval(1470, 1_000_000);
        assert!((interval.as_secs_f64() - 0.01176).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stream_sender_counts_bytes() {
        let (client, mut server) = tokio::io::duplex(1024 * 1024);
        let counters = Arc::new(ByteCounters::new());
        let cancel = CancellationToken::new();

        let sender = tokio::spawn(run_stream_sender(
            client,
            Duration::from_millis(200),
            4096,
            0,
            Arc::clone(&counters),
            cancel,
        ));

        // Drain the other end so the sender never stalls on a full pipe.
        let drain = tokio::spawn(async move {
            let mut sink = vec![0u8; 64 * 1024];
            let mut received = 0u64;
            loop {
                match tokio::io::AsyncReadExt::read(&mut server, &mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received += n as u64,
                }
            }
            received
        });

        sender.await.unwrap();
        let received = drain.await.unwrap();
        assert!(counters.total() > 0);
        assert_eq!(counters.total() % 4096, 0);
        assert_eq!(received, counters.total());
    }

    #[tokio::test]
    async fn test_stream_sender_stops_on_cancel() {
        let (client, _server) = tokio::io::duplex(64);
        let counters = Arc::new(ByteCounters::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The pipe is tiny and nothing drains it; only cancellation lets
        // this return promptly.
        let done = time::timeout(
            Duration::from_secs(2),
            run_stream_sender(
                client,
                Duration::from_secs(30),
                4096,
                0,
                counters,
                cancel,
            ),
        )
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_datagram_sender_stamps_sequences() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();

        let counters = Arc::new(ByteCounters::new());
        // 200 bytes at 800 kbps is one packet every 2 ms.
        let sender = tokio::spawn(run_datagram_sender(
            Arc::new(socket),
            Duration::from_millis(100),
            200,
            800_000,
            Arc::clone(&counters),
            CancellationToken::new(),
        ));

        let mut buf = [0u8; 2048];
        let mut sequences = Vec::new();
        while sequences.len() < 5 {
            let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, 200);
            let header = PacketHeader::from_bytes(&buf[..n]).expect("stamped packet");
            assert!(header.timestamp_ns > 0);
            sequences.push(header.sequence);
        }

        let packets = sender.await.unwrap();
        assert!(packets >= 5);
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(counters.total(), packets * 200);
    }

    #[tokio::test]
    async fn test_datagram_sender_legacy_below_header_size() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();

        let sender = tokio::spawn(run_datagram_sender(
            Arc::new(socket),
            Duration::from_millis(40),
            12,
            1_000_000,
            Arc::new(ByteCounters::new()),
            CancellationToken::new(),
        ));

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 12);
        // Raw pattern bytes, no header.
        assert!(PacketHeader::from_bytes(&buf[..n]).is_none());
        assert_eq!(&buf[..4], &[0, 1, 2, 3]);

        sender.await.unwrap();
    }
}
