//! High-resolution counter probes.
//!
//! Timing jitter between back-to-back clock reads reflects scheduler
//! preemption, cache state, and frequency scaling. Individually these bits
//! are weak; they exist to keep the pool moving between real polls, which is
//! why the weights here are small.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

/// Number of clock reads per jitter poll.
const JITTER_ROUNDS: usize = 256;

static TIMER_JITTER_INFO: SourceInfo = SourceInfo {
    name: "timer_jitter",
    description: "LSBs of deltas between back-to-back monotonic clock reads",
    speed: Speed::Fast,
    weight: 5,
    expected_bytes: JITTER_ROUNDS / 8,
};

/// Jitter between consecutive monotonic clock reads.
pub struct TimerJitterSource;

impl EntropySource for TimerJitterSource {
    fn info(&self) -> &SourceInfo {
        &TIMER_JITTER_INFO
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut deltas = [0u64; JITTER_ROUNDS];
        let mut prev = Instant::now();
        for delta in deltas.iter_mut() {
            let now = Instant::now();
            *delta = now.duration_since(prev).subsec_nanos() as u64;
            prev = now;
        }

        // Pack the LSB of each delta, MSB-first.
        let mut byte = 0u8;
        for (i, delta) in deltas.iter().enumerate() {
            byte = (byte << 1) | (*delta & 1) as u8;
            if i % 8 == 7 {
                batch.add_bytes(&[byte]);
                byte = 0;
            }
        }
        TIMER_JITTER_INFO.weight
    }
}

static CLOCK_INFO: SourceInfo = SourceInfo {
    name: "clock_snapshot",
    description: "Wall-clock nanoseconds and monotonic counter snapshot",
    speed: Speed::Fast,
    weight: 2,
    expected_bytes: 16,
};

/// Raw clock values. Mostly predictable; the sub-microsecond tail is not.
pub struct ClockSource;

impl EntropySource for ClockSource {
    fn info(&self) -> &SourceInfo {
        &CLOCK_INFO
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        batch.add_value(wall);

        let t0 = Instant::now();
        std::hint::black_box(0u64);
        batch.add_value(t0.elapsed().as_nanos() as u64);

        CLOCK_INFO.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_poll_fills_batch() {
        let mut batch = EntropyBatch::new();
        let q = TimerJitterSource.poll(&mut batch);
        assert_eq!(q, TIMER_JITTER_INFO.weight);
        assert_eq!(batch.len(), JITTER_ROUNDS / 8);
    }

    #[test]
    fn clock_poll_produces_expected_bytes() {
        let mut batch = EntropyBatch::new();
        ClockSource.poll(&mut batch);
        assert_eq!(batch.len(), CLOCK_INFO.expected_bytes);
    }
}
