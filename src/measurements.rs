//! Shared byte counters and the datagram statistics engine.
//!
//! Two kinds of measurement state live here. [`ByteCounters`] is the
//! atomic total/interval pair shared between a byte pump and the interval
//! ticker on the same side. [`FlowRegistry`] is the per-peer sequence,
//! loss, out-of-order, and jitter accounting for datagram tests, keyed by
//! the remote `host:port` string.

use crate::udp_packet::PacketHeader;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed acknowledgement for datagrams without a valid stamped header.
pub const LEGACY_REPLY: &str = "datagram received (legacy mode)";

/// Shared byte accounting between a byte pump and an interval ticker.
///
/// The pump only adds; the ticker consumes the interval counter once per
/// second and reads the running total. Relaxed ordering is sufficient:
/// the ticker tolerates a view that lags by one update.
///
/// # Examples
///
/// ```
/// use wireperf::measurements::ByteCounters;
///
/// let counters = ByteCounters::new();
/// counters.add(1500);
/// counters.add(1500);
/// assert_eq!(counters.take_interval(), 3000);
/// assert_eq!(counters.take_interval(), 0);
/// assert_eq!(counters.total(), 3000);
/// ```
#[derive(Debug, Default)]
pub struct ByteCounters {
    total: AtomicU64,
    interval: AtomicU64,
}

impl ByteCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records bytes moved, updating both counters.
    pub fn add(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
        self.interval.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Running total since the counters were created.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Consumes and resets the current interval window.
    pub fn take_interval(&self) -> u64 {
        self.interval.swap(0, Ordering::Relaxed)
    }
}

/// Per-flow datagram statistics.
///
/// `last_sequence` is kept as `i64` seeded with `first_seq - 1` so the
/// very first packet compares as in-order without wraparound tricks.
/// The jitter estimator is the RFC 1889 smoothed mean of absolute
/// transit-time differences; `jitter_count == 0` exactly when no
/// inter-arrival sample has been taken.
#[derive(Debug, Clone, Default)]
pub struct FlowStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub lost_packets: u64,
    pub out_of_order: u64,
    pub last_sequence: i64,
    last_arrival_ns: u64,
    last_transit_ms: f64,
    jitter: f64,
    pub jitter_count: u64,
}

impl FlowStats {
    fn new(first_sequence: u32) -> Self {
        Self {
            last_sequence: i64::from(first_sequence) - 1,
            ..Default::default()
        }
    }

    fn record(&mut self, sequence: u32, transit_ms: f64, arrival_ns: u64, bytes: u64) {
        self.total_packets += 1;
        self.total_bytes += bytes;

        let sequence = i64::from(sequence);
        let expected = self.last_sequence + 1;
        if sequence > expected {
            self.lost_packets += (sequence - expected) as u64;
        } else if sequence < expected {
            // A late packet never adjusts the loss count.
            self.out_of_order += 1;
        }
        if sequence >= self.last_sequence {
            self.last_sequence = sequence;
        }

        if self.last_arrival_ns > 0 {
            let delta = (transit_ms - self.last_transit_ms).abs();
            if self.jitter_count == 0 {
                self.jitter = delta;
            } else {
                self.jitter += (delta - self.jitter) / 16.0;
            }
            self.jitter_count += 1;
        }
        self.last_arrival_ns = arrival_ns;
        self.last_transit_ms = transit_ms;
    }

    /// Smoothed jitter estimate in milliseconds, zero before the first
    /// inter-arrival sample.
    pub fn jitter_ms(&self) -> f64 {
        if self.jitter_count == 0 {
            0.0
        } else {
            self.jitter
        }
    }

    /// Loss percentage over packets received plus packets lost.
    pub fn loss_percent(&self) -> f64 {
        let denominator = self.total_packets + self.lost_packets;
        if denominator == 0 {
            0.0
        } else {
            self.lost_packets as f64 * 100.0 / denominator as f64
        }
    }
}

/// Peer-keyed registry of datagram flows.
///
/// Mutated on every packet arrival and snapshotted by reporters, under a
/// readers-writer lock held only for the arithmetic, never across I/O.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: RwLock<HashMap<String, FlowStats>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts one received datagram and produces the reply text.
    ///
    /// A stamped datagram (at least 16 bytes, valid magic) updates the
    /// peer's flow statistics. Anything else gets the fixed legacy
    /// acknowledgement and leaves the registry untouched.
    pub fn record(&self, peer: &str, payload: &[u8], arrival_ns: u64) -> String {
        let header = match PacketHeader::from_bytes(payload) {
            Some(header) => header,
            None => return LEGACY_REPLY.to_string(),
        };

        let transit_ms = (arrival_ns as i64 - header.timestamp_ns as i64) as f64 / 1_000_000.0;

        let mut flows = self.flows.write();
        let stats = flows
            .entry(peer.to_string())
            .or_insert_with(|| FlowStats::new(header.sequence));
        stats.record(header.sequence, transit_ms, arrival_ns, payload.len() as u64);

        format!(
            "datagram received: seq={}, total={}, lost={}, ooo={}",
            header.sequence, stats.total_packets, stats.lost_packets, stats.out_of_order
        )
    }

    /// Snapshot of one peer's flow, if any stamped traffic was seen.
    pub fn snapshot(&self, peer: &str) -> Option<FlowStats> {
        self.flows.read().get(peer).cloned()
    }

    /// Number of distinct peers with stamped traffic.
    pub fn flow_count(&self) -> usize {
        self.flows.read().len()
    }

    /// Drops one peer's accounting once its session is over.
    pub fn remove(&self, peer: &str) {
        self.flows.write().remove(peer);
    }
}
