//! Test report schema and rendering.
//!
//! The JSON shapes here are the on-wire payloads of INTERVAL and TEST_END
//! as well as the `-J` output, so field names are part of the protocol
//! contract and match iperf3's report vocabulary.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One interval measurement, the INTERVAL payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interval {
    pub socket: i32,
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
    pub omitted: bool,
}

/// Per-stream totals inside the end-of-test block.
///
/// The datagram-only fields stay absent for stream tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<i32>,
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
    pub sender: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_packets: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_of_order: Option<u64>,
}

impl StreamResult {
    /// Totals over `[0, seconds]` with the rate derived from the byte count.
    pub fn over(socket: Option<i32>, seconds: f64, bytes: u64, sender: bool) -> Self {
        let bits_per_second = if seconds > 0.0 {
            bytes as f64 * 8.0 / seconds
        } else {
            0.0
        };
        Self {
            socket,
            start: 0.0,
            end: seconds,
            seconds,
            bytes,
            bits_per_second,
            sender,
            ..Default::default()
        }
    }
}

/// CPU utilization block. The fields exist for schema compatibility and
/// are always emitted as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuUtilization {
    pub host_total: f64,
    pub host_user: f64,
    pub host_system: f64,
    pub remote_total: f64,
    pub remote_user: f64,
    pub remote_system: f64,
}

/// End-of-test block, the TEST_END payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEnd {
    pub streams: Vec<StreamResult>,
    pub sum_sent: StreamResult,
    pub sum_received: StreamResult,
    pub cpu_utilization_percent: CpuUtilization,
}

/// Connection descriptor in the start block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub socket: i32,
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamp {
    pub time: i64,
    pub timesecs: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            time: secs,
            timesecs: secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectingTo {
    pub host: String,
    pub port: u16,
}

/// Start block of the report: connection descriptor, version, timestamp,
/// and the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStart {
    pub connected: Vec<Connection>,
    pub version: String,
    pub system_info: String,
    pub timestamp: Timestamp,
    pub connecting_to: ConnectingTo,
    pub cookie: String,
}

/// Complete test results, start and end blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub start: TestStart,
    pub end: TestEnd,
}

/// Version string carried in the report start block.
pub fn version_string() -> String {
    format!("wireperf {}", crate::VERSION)
}

/// Session identifier carried as the report cookie.
///
/// Built from the wall clock in nanoseconds, so identifiers from one host
/// sort in creation order.
pub fn session_cookie() -> String {
    format!("wireperf-{}", crate::udp_packet::wall_clock_ns())
}

/// Host platform descriptor for the report start block.
pub fn system_info() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Scales a byte count the way the tables print it.
pub fn format_transfer(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:6.2} GBytes", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:6.2} MBytes", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:6.2} KBytes", bytes as f64 / 1_000.0)
    }
}

/// Scales a bit rate the way the tables print it.
pub fn format_bitrate(bits_per_second: f64) -> String {
    if bits_per_second >= 1_000_000_000.0 {
        format!("{:6.2} Gbits/sec", bits_per_second / 1_000_000_000.0)
    } else {
        format!("{:6.2} Mbits/sec", bits_per_second / 1_000_000.0)
    }
}

/// Prints one per-second row of the live table.
pub fn print_interval_row(
    socket: i32,
    start: f64,
    end: f64,
    bytes: u64,
    bits_per_second: f64,
    packets: Option<u64>,
) {
    match packets {
        Some(count) => println!(
            "[{:3}] {:5.2}-{:5.2} sec  {}  {}   0.000 ms  0/{} (0%)",
            socket,
            start,
            end,
            format_transfer(bytes),
            format_bitrate(bits_per_second),
            count
        ),
        None => println!(
            "[{:3}] {:5.2}-{:5.2} sec  {}  {}",
            socket,
            start,
            end,
            format_transfer(bytes),
            format_bitrate(bits_per_second)
        ),
    }
}

fn print_summary_row(socket: i32, result: &StreamResult, role: &str) {
    match result.packets {
        Some(count) => println!(
            "[{:3}] {:5.2}-{:5.2} sec  {}  {}  {:6.3} ms  {}/{} ({:.0}%)  {}",
            socket,
            result.start,
            result.end,
            format_transfer(result.bytes),
            format_bitrate(result.bits_per_second),
            result.jitter_ms.unwrap_or(0.0),
            result.lost_packets.unwrap_or(0),
            count,
            result.lost_percent.unwrap_or(0.0),
            role
        ),
        None => println!(
            "[{:3}] {:5.2}-{:5.2} sec  {}  {}                  {}",
            socket,
            result.start,
            result.end,
            format_transfer(result.bytes),
            format_bitrate(result.bits_per_second),
            role
        ),
    }
}

/// Prints the end-of-test summary, as a text table or pretty JSON.
pub fn print_summary(results: &TestResults, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    let socket = results
        .end
        .sum_sent
        .socket
        .or_else(|| results.end.streams.first().and_then(|s| s.socket))
        .unwrap_or(0);

    println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
    if results.end.sum_sent.packets.is_some() {
        println!("[ ID] Interval           Transfer     Bitrate         Jitter    Lost/Total Datagrams");
    } else {
        println!("[ ID] Interval           Transfer     Bitrate");
    }
    print_summary_row(socket, &results.end.sum_sent, "sender");
    print_summary_row(socket, &results.end.sum_received, "receiver");
    println!();
    println!("wireperf done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_result_over() {
        let result = StreamResult::over(Some(4), 10.0, 1_250_000, true);
        assert_eq!(result.start, 0.0);
        assert_eq!(result.end, 10.0);
        assert_eq!(result.bytes, 1_250_000);
        assert_eq!(result.bits_per_second, 1_000_000.0);
        assert!(result.sender);
        assert!(result.packets.is_none());
    }

    #[test]
    fn test_stream_result_zero_seconds() {
        let result = StreamResult::over(None, 0.0, 1000, false);
        assert_eq!(result.bits_per_second, 0.0);
    }

    #[test]
    fn test_end_block_field_names() {
        let sum_sent = StreamResult::over(None, 1.0, 8, true);
        let sum_received = StreamResult::over(None, 1.0, 8, false);
        let end = TestEnd {
            streams: vec![StreamResult::over(Some(1), 1.0, 8, false)],
            sum_sent,
            sum_received,
            cpu_utilization_percent: CpuUtilization::default(),
        };

        let value = serde_json::to_value(&end).unwrap();
        assert!(value.get("streams").is_some());
        assert!(value.get("sum_sent").is_some());
        assert!(value.get("sum_received").is_some());
        assert_eq!(value["sum_sent"]["sender"], true);
        assert_eq!(value["sum_received"]["sender"], false);
        assert_eq!(value["streams"][0]["socket"], 1);
        assert_eq!(value["streams"][0]["bits_per_second"], 64.0);

        let cpu = &value["cpu_utilization_percent"];
        for field in [
            "host_total",
            "host_user",
            "host_system",
            "remote_total",
            "remote_user",
            "remote_system",
        ] {
            assert_eq!(cpu[field], 0.0);
        }
    }

    #[test]
    fn test_datagram_fields_absent_for_streams() {
        let value = serde_json::to_value(StreamResult::over(Some(4), 2.0, 16, true)).unwrap();
        assert!(value.get("packets").is_none());
        assert!(value.get("jitter_ms").is_none());
        assert!(value.get("lost_packets").is_none());
        assert!(value.get("out_of_order").is_none());
    }

    #[test]
    fn test_datagram_fields_present_when_set() {
        let mut result = StreamResult::over(Some(4), 2.0, 16, true);
        result.packets = Some(100);
        result.lost_packets = Some(3);
        result.lost_percent = Some(2.91);
        result.jitter_ms = Some(0.25);
        result.out_of_order = Some(1);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["packets"], 100);
        assert_eq!(value["lost_packets"], 3);
        assert_eq!(value["out_of_order"], 1);
    }

    #[test]
    fn test_interval_roundtrip() {
        let interval = Interval {
            socket: 1,
            start: 3.0,
            end: 4.0,
            seconds: 1.0,
            bytes: 1024,
            bits_per_second: 8192.0,
            omitted: false,
        };
        let json = serde_json::to_vec(&interval).unwrap();
        let back: Interval = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.start, 3.0);
        assert_eq!(back.end, 4.0);
        assert_eq!(back.bytes, 1024);
        assert!(!back.omitted);
    }

    #[test]
    fn test_format_scaling() {
        assert!(format_transfer(12_000).contains("KBytes"));
        assert!(format_transfer(12_000_000).contains("MBytes"));
        assert!(format_transfer(12_000_000_000).contains("GBytes"));
        assert!(format_bitrate(900_000_000.0).contains("Mbits/sec"));
        assert!(format_bitrate(2_400_000_000.0).contains("Gbits/sec"));
    }
}
