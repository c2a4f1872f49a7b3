//! Datagram header with sequence number and send timestamp.
//!
//! Every stamped datagram starts with a 16-byte big-endian header:
//!
//! ```text
//! | Sequence (4 bytes) | Timestamp ns (8 bytes) | Magic (4 bytes) | Payload |
//! ```
//!
//! The magic constant distinguishes stamped packets from legacy traffic;
//! a datagram shorter than the header, or one with the wrong magic, is
//! handled in legacy mode and excluded from statistics.

use std::time::{SystemTime, UNIX_EPOCH};

/// Magic marker identifying stamped datagrams.
pub const PACKET_MAGIC: u32 = 0x12345678;

/// Header for a stamped datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number, starting at 0 and incremented per packet sent.
    pub sequence: u32,
    /// Sender wall clock at send time, nanoseconds since the UNIX epoch.
    pub timestamp_ns: u64,
}

impl PacketHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Serializes the header (big-endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        bytes[4..12].copy_from_slice(&self.timestamp_ns.to_be_bytes());
        bytes[12..16].copy_from_slice(&PACKET_MAGIC.to_be_bytes());
        bytes
    }

    /// Parses a header from the front of a datagram.
    ///
    /// Returns `None` when the slice is shorter than the header or the
    /// magic does not match; such datagrams are legacy traffic.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let magic = u32::from_be_bytes(bytes[12..16].try_into().ok()?);
        if magic != PACKET_MAGIC {
            return None;
        }
        Some(Self {
            sequence: u32::from_be_bytes(bytes[0..4].try_into().ok()?),
            timestamp_ns: u64::from_be_bytes(bytes[4..12].try_into().ok()?),
        })
    }
}

/// Stamps a header into the first 16 bytes of a reusable send buffer.
///
/// The buffer must be at least [`PacketHeader::SIZE`] bytes.
pub fn stamp(buf: &mut [u8], sequence: u32, timestamp_ns: u64) {
    let header = PacketHeader {
        sequence,
        timestamp_ns,
    };
    buf[..PacketHeader::SIZE].copy_from_slice(&header.to_bytes());
}

/// Current wall clock in nanoseconds since the UNIX epoch.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            sequence: 42,
            timestamp_ns: 1_234_567_890,
        };
        let bytes = header.to_bytes();
        let parsed = PacketHeader::from_bytes(&bytes).expect("valid header");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_layout() {
        let header = PacketHeader {
            sequence: 0x0102_0304,
            timestamp_ns: 0x1112_1314_1516_1718,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            &bytes[4..12],
            &[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]
        );
        assert_eq!(&bytes[12..16], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_wrong_magic_is_legacy() {
        let mut bytes = PacketHeader {
            sequence: 7,
            timestamp_ns: 1,
        }
        .to_bytes();
        bytes[12] ^= 0xff;
        assert!(PacketHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_short_datagram_is_legacy() {
        assert!(PacketHeader::from_bytes(&[0u8; 15]).is_none());
        assert!(PacketHeader::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_stamp_in_place() {
        let mut buf = vec![0xaa; 64];
        stamp(&mut buf, 9, 5_000);
        let parsed = PacketHeader::from_bytes(&buf).expect("stamped header");
        assert_eq!(parsed.sequence, 9);
        assert_eq!(parsed.timestamp_ns, 5_000);
        // Payload beyond the header is untouched.
        assert!(buf[PacketHeader::SIZE..].iter().all(|b| *b == 0xaa));
    }
}
