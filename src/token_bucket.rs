//! Token bucket rate limiter for capped stream tests.
//!
//! Tokens are bytes. They accrue at the target rate up to a burst
//! capacity of 0.1 seconds worth of data, and a send consumes its byte
//! count, sleeping first when the bucket runs dry.

use std::time::{Duration, Instant};
use tokio::time;

/// Byte-granularity rate limiter.
///
/// # Examples
///
/// ```
/// use wireperf::token_bucket::TokenBucket;
///
/// # async fn example() {
/// // 100 Mbps target: 12_500_000 bytes per second.
/// let mut bucket = TokenBucket::new(12_500_000);
/// bucket.consume(1500).await;
/// # }
/// ```
pub struct TokenBucket {
    bytes_per_sec: u64,
    tokens: i64,
    capacity: i64,
    last_refill: Instant,
    nanos_per_byte: u64,
}

impl TokenBucket {
    /// Creates a bucket for the given rate in bytes per second.
    pub fn new(bytes_per_sec: u64) -> Self {
        let capacity = (bytes_per_sec / 10).max(8192) as i64;
        let nanos_per_byte = if bytes_per_sec > 0 {
            1_000_000_000 / bytes_per_sec
        } else {
            0
        };

        Self {
            bytes_per_sec,
            tokens: capacity,
            capacity,
            last_refill: Instant::now(),
            nanos_per_byte,
        }
    }

    /// Consumes tokens for one send, sleeping when the budget is spent.
    ///
    /// Sleeps shorter than 10 microseconds are skipped; the deficit is
    /// carried as negative tokens and repaid on the next call.
    pub async fn consume(&mut self, bytes: usize) {
        let bytes = bytes as i64;
        self.refill();

        if self.tokens < bytes {
            let deficit = bytes - self.tokens;
            let sleep_nanos = deficit as u64 * self.nanos_per_byte;
            if sleep_nanos > 10_000 {
                time::sleep(Duration::from_nanos(sleep_nanos)).await;
                self.refill();
            }
        }

        self.tokens -= bytes;
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_micros = now.duration_since(self.last_refill).as_micros() as u64;
        let tokens_to_add = (elapsed_micros * self.bytes_per_sec) / 1_000_000;
        if tokens_to_add > 0 {
            self.tokens = (self.tokens + tokens_to_add as i64).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_tenth_of_rate() {
        let bucket = TokenBucket::new(10_000_000);
        assert_eq!(bucket.capacity, 1_000_000);
        assert_eq!(bucket.tokens, bucket.capacity);

        // Floor on tiny rates.
        let bucket = TokenBucket::new(1000);
        assert_eq!(bucket.capacity, 8192);
    }

    #[test]
    fn test_nanos_per_byte() {
        assert_eq!(TokenBucket::new(1_000_000).nanos_per_byte, 1000);
        assert_eq!(TokenBucket::new(10_000_000).nanos_per_byte, 100);
    }

    #[tokio::test]
    async fn test_consume_within_budget() {
        let mut bucket = TokenBucket::new(1_000_000);
        let before = bucket.tokens;
        bucket.consume(1500).await;
        assert!(bucket.tokens <= before - 1500 + bucket.capacity / 100);
    }

    #[tokio::test]
    async fn test_refill_is_capped() {
        let mut bucket = TokenBucket::new(1_000_000);
        bucket.tokens = 100;
        time::sleep(Duration::from_millis(20)).await;
        bucket.refill();
        assert!(bucket.tokens > 100);
        assert!(bucket.tokens <= bucket.capacity);
    }

    #[tokio::test]
    async fn test_average_rate_is_enforced() {
        // 1 MB/s with 100 KiB capacity: sending 50 chunks of 8 KiB is
        // 409_600 bytes, which cannot fit in the initial burst and must
        // take roughly (409_600 - capacity) / 1_000_000 seconds.
        let mut bucket = TokenBucket::new(1_000_000);
        let start = Instant::now();
        for _ in 0..50 {
            bucket.consume(8192).await;
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(200),
            "rate cap not enforced: {:?}",
            elapsed
        );
    }
}
