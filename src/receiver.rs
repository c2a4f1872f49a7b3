//! Receiver engine: byte pump, interval windowing, and end-of-test
//! emission for stream tests.
//!
//! The pump task reads bulk bytes and only increments the shared
//! counters. The ticker in the main select closes a window every second,
//! frames an INTERVAL message with the consumed count, and hands the
//! accumulated totals to the TEST_END block when the duration (or the
//! hard timeout two seconds past it) expires.

use crate::error::Result;
use crate::measurements::ByteCounters;
use crate::protocol::{write_message, MessageType};
use crate::report::{CpuUtilization, Interval, StreamResult, TestEnd};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Socket identifier stamped on receiver-side report rows.
pub(crate) const STREAM_SOCKET_ID: i32 = 1;

/// Read buffer for the byte pump (128 KiB).
const PUMP_BUFFER_LEN: usize = 128 * 1024;

/// Grace past the test duration before the receiver gives up on a quiet
/// peer.
pub const RECEIVER_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one receiving session.
#[derive(Debug, Clone)]
pub struct ReceiveSummary {
    pub total_bytes: u64,
    pub elapsed: f64,
    pub intervals_sent: u32,
    pub timed_out: bool,
}

/// Runs the receiving side of a stream test on an accepted connection.
///
/// Emits one INTERVAL frame per elapsed second and a final TEST_END frame
/// carrying the aggregate block, then returns the summary alongside the
/// emitted end block. Hitting the hard timeout is not an error; the block
/// reports whatever arrived.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] when a control frame cannot be written;
/// the session must be closed in that case.
pub async fn run_stream_receiver(
    stream: TcpStream,
    duration: Duration,
) -> Result<(ReceiveSummary, TestEnd)> {
    let (mut reader, mut writer) = stream.into_split();
    let counters = Arc::new(ByteCounters::new());
    let cancel = CancellationToken::new();

    let pump_counters = Arc::clone(&counters);
    let pump_cancel = cancel.clone();
    let pump = tokio::spawn(async move {
        let mut buffer = vec![0u8; PUMP_BUFFER_LEN];
        loop {
            tokio::select! {
                _ = pump_cancel.cancelled() => break,
                result = reader.read(&mut buffer) => match result {
                    Ok(0) => break,
                    Ok(n) => pump_counters.add(n as u64),
                    Err(e) => {
                        debug!("byte pump ended: {}", e);
                        break;
                    }
                },
            }
        }
    });

    let start = Instant::now();
    let mut ticker = time::interval_at(start + Duration::from_secs(1), Duration::from_secs(1));
    let deadline = time::sleep_until(start + duration + RECEIVER_GRACE);
    tokio::pin!(deadline);

    let mut intervals_sent = 0u32;
    let mut timed_out = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed = start.elapsed().as_secs_f64();
                let bytes = counters.take_interval();
                let interval = Interval {
                    socket: STREAM_SOCKET_ID,
                    start: elapsed - 1.0,
                    end: elapsed,
                    seconds: 1.0,
                    bytes,
                    bits_per_second: bytes as f64 * 8.0,
                    omitted: false,
                };
                write_message(
                    &mut writer,
                    MessageType::Interval,
                    &serde_json::to_vec(&interval)?,
                )
                .await?;
                intervals_sent += 1;

                if elapsed >= duration.as_secs_f64() {
                    break;
                }
            }
            _ = &mut deadline => {
                debug!("receiver hit the {}s grace timeout", RECEIVER_GRACE.as_secs());
                timed_out = true;
                break;
            }
        }
    }

    cancel.cancel();
    let _ = pump.await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_bytes = counters.total();

    let end = TestEnd {
        streams: vec![StreamResult::over(
            Some(STREAM_SOCKET_ID),
            elapsed,
            total_bytes,
            false,
        )],
        sum_sent: StreamResult::over(None, elapsed, total_bytes, true),
        sum_received: StreamResult::over(None, elapsed, total_bytes, false),
        cpu_utilization_percent: CpuUtilization::default(),
    };
    write_message(&mut writer, MessageType::TestEnd, &serde_json::to_vec(&end)?).await?;

    Ok((
        ReceiveSummary {
            total_bytes,
            elapsed,
            intervals_sent,
            timed_out,
        },
        end,
    ))
}
