//! Entropy accumulator and CSPRNG.
//!
//! The pool is a fixed byte buffer absorbing everything the pollers deliver.
//! New data is XORed in at a rolling position, then the whole pool is passed
//! through a keyed hash whose output replaces the leading block, so every
//! absorbed byte diffuses into all future output. Extraction stirs before
//! emitting each block and once more afterwards, so pool state is never
//! recoverable from the last output.
//!
//! Quality accounting is deliberately one-way: accepted entropy raises it
//! (saturating at 100), producing output never lowers it, and only a reseed
//! event (fork, explicit reseed) resets it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// Pool size in bytes.
pub const POOL_SIZE: usize = 1024;

/// Size of one stir/output block (SHA-256 output).
pub const POOL_BLOCK_SIZE: usize = 32;

/// Quality level required before any output is produced.
pub const QUALITY_THRESHOLD: u8 = 100;

/// Poison pattern written into the caller's buffer before extraction, so a
/// failure path leaves it unambiguously invalid.
pub const POISON: u8 = 0xAA;

type HmacSha256 = Hmac<Sha256>;

pub struct RandomPool {
    pool: Box<[u8; POOL_SIZE]>,
    quality: u8,
    mix_position: usize,
    output_counter: u64,
    last_output: Option<[u8; POOL_BLOCK_SIZE]>,
    reseed_pending: bool,
}

impl RandomPool {
    /// A fresh pool at quality zero, salted with ambient process state so
    /// two pools created in the same process never start identical.
    pub fn new() -> Self {
        let mut pool = Self {
            pool: Box::new([0u8; POOL_SIZE]),
            quality: 0,
            mix_position: 0,
            output_counter: 0,
            last_output: None,
            reseed_pending: false,
        };
        pool.absorb_initial_state();
        pool
    }

    /// Current quality estimate, 0..=100.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Bytes produced since the last reseed.
    pub fn output_counter(&self) -> u64 {
        self.output_counter
    }

    /// Mark the pool as needing a reseed before any further output. Set when
    /// a fork is detected.
    pub fn mark_reseed(&mut self) {
        self.reseed_pending = true;
    }

    pub fn reseed_pending(&self) -> bool {
        self.reseed_pending
    }

    /// Full reseed: wipe the pool, drop quality to zero, and rerun the
    /// initial salting so a forked clone immediately diverges.
    pub fn reseed(&mut self) {
        self.pool.zeroize();
        self.quality = 0;
        self.mix_position = 0;
        self.output_counter = 0;
        self.reseed_pending = false;
        self.absorb_initial_state();
    }

    /// Absorb entropy bytes: XOR at the rolling position, then stir.
    pub fn add_entropy(&mut self, data: &[u8]) {
        for &byte in data {
            self.pool[self.mix_position] ^= byte;
            self.mix_position = (self.mix_position + 1) % POOL_SIZE;
        }
        self.stir();
    }

    /// Advance the quality estimate, saturating at 100.
    pub fn add_quality(&mut self, delta: u8) {
        self.quality = self.quality.saturating_add(delta).min(QUALITY_THRESHOLD);
    }

    /// One stir round: keyed hash over the whole pool, digest replacing the
    /// leading block. The key is the trailing block, so the round depends on
    /// state the output block does not expose.
    fn stir(&mut self) {
        let mut mac = HmacSha256::new_from_slice(&self.pool[POOL_SIZE - POOL_BLOCK_SIZE..])
            .expect("HMAC accepts any key length");
        mac.update(&self.pool[..]);
        mac.update(&self.output_counter.to_le_bytes());
        let digest = mac.finalize().into_bytes();
        self.pool[..POOL_BLOCK_SIZE].copy_from_slice(&digest);
    }

    /// Extract `out.len()` bytes.
    ///
    /// The caller is responsible for the quality gate and fork check; this
    /// routine assumes the pool is ready. The buffer is poisoned up front
    /// and output is staged in a scratch buffer that only reaches `out`
    /// once every block has passed the continuous check, so a failure at
    /// any point leaves the whole buffer holding the poison pattern rather
    /// than a mix of poison and earlier valid blocks.
    pub fn extract(&mut self, out: &mut [u8]) -> Result<()> {
        out.fill(POISON);

        let mut staged = Zeroizing::new(vec![0u8; out.len()]);
        let mut written = 0usize;
        while written < staged.len() {
            self.stir();

            let mut block = [0u8; POOL_BLOCK_SIZE];
            block.copy_from_slice(&self.pool[..POOL_BLOCK_SIZE]);

            // Continuous check: a block equal to its predecessor means the
            // generator state is wedged.
            if self.last_output == Some(block) {
                block.zeroize();
                return Err(Error::RngCheckFailed);
            }

            let take = (staged.len() - written).min(POOL_BLOCK_SIZE);
            staged[written..written + take].copy_from_slice(&block[..take]);
            written += take;

            self.last_output = Some(block);
            self.output_counter += take as u64;
        }

        // Final stir so the resting pool state is not the last output.
        self.stir();
        out.copy_from_slice(&staged);
        Ok(())
    }

    /// Salt the pool with ambient per-process state. Worth zero quality;
    /// its only job is divergence between pool instances and across reseeds.
    fn absorb_initial_state(&mut self) {
        let mut seed = [0u8; 48];
        let pid = std::process::id();
        seed[..4].copy_from_slice(&pid.to_le_bytes());

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        seed[4..12].copy_from_slice(&now.to_le_bytes());

        let t0 = std::time::Instant::now();
        for (i, chunk) in seed[12..44].chunks_mut(4).enumerate() {
            std::hint::black_box(i);
            let jitter = t0.elapsed().as_nanos() as u32;
            chunk.copy_from_slice(&jitter.to_le_bytes());
        }
        let stack_addr = std::ptr::addr_of!(seed) as usize as u32;
        seed[44..48].copy_from_slice(&stack_addr.to_le_bytes());

        self.add_entropy(&seed);
        seed.zeroize();
    }

    #[cfg(test)]
    pub(crate) fn set_last_output(&mut self, block: [u8; POOL_BLOCK_SIZE]) {
        self.last_output = Some(block);
    }

    #[cfg(test)]
    pub(crate) fn peek_next_block(&self) -> [u8; POOL_BLOCK_SIZE] {
        let mut clone = RandomPool {
            pool: self.pool.clone(),
            quality: self.quality,
            mix_position: self.mix_position,
            output_counter: self.output_counter,
            last_output: self.last_output,
            reseed_pending: self.reseed_pending,
        };
        clone.stir();
        let mut block = [0u8; POOL_BLOCK_SIZE];
        block.copy_from_slice(&clone.pool[..POOL_BLOCK_SIZE]);
        block
    }
}

impl Default for RandomPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RandomPool {
    fn drop(&mut self) {
        self.pool.zeroize();
        if let Some(block) = self.last_output.as_mut() {
            block.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_pool() -> RandomPool {
        let mut pool = RandomPool::new();
        pool.add_entropy(&[0x55; 128]);
        pool.add_quality(100);
        pool
    }

    #[test]
    fn quality_saturates_at_threshold() {
        let mut pool = RandomPool::new();
        pool.add_quality(60);
        assert_eq!(pool.quality(), 60);
        pool.add_quality(60);
        assert_eq!(pool.quality(), 100);
        pool.add_quality(255);
        assert_eq!(pool.quality(), 100);
    }

    #[test]
    fn quality_is_monotonic_outside_reseed() {
        let mut pool = ready_pool();
        let before = pool.quality();
        let mut buf = [0u8; 64];
        pool.extract(&mut buf).unwrap();
        assert_eq!(pool.quality(), before, "output must not reduce quality");
        pool.add_entropy(&[1, 2, 3]);
        assert_eq!(pool.quality(), before);
    }

    #[test]
    fn reseed_resets_quality_and_counter() {
        let mut pool = ready_pool();
        let mut buf = [0u8; 32];
        pool.extract(&mut buf).unwrap();
        assert!(pool.output_counter() > 0);
        pool.reseed();
        assert_eq!(pool.quality(), 0);
        assert_eq!(pool.output_counter(), 0);
        assert!(!pool.reseed_pending());
    }

    #[test]
    fn extract_fills_arbitrary_lengths() {
        let mut pool = ready_pool();
        for len in [1usize, 16, 32, 33, 100, 256] {
            let mut buf = vec![POISON; len];
            pool.extract(&mut buf).unwrap();
            assert!(
                buf.iter().any(|&b| b != POISON),
                "output of length {len} left poisoned"
            );
        }
    }

    #[test]
    fn successive_extractions_differ() {
        let mut pool = ready_pool();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        pool.extract(&mut a).unwrap();
        pool.extract(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn continuous_check_trips_on_repeated_block() {
        let mut pool = ready_pool();
        let next = pool.peek_next_block();
        pool.set_last_output(next);
        let mut buf = [0u8; 16];
        let err = pool.extract(&mut buf).unwrap_err();
        assert!(matches!(err, Error::RngCheckFailed));
        assert_eq!(buf, [POISON; 16], "failed extraction must leave poison");
    }

    #[test]
    fn failed_multiblock_extraction_is_poisoned_throughout() {
        // A request spanning several blocks that fails the continuous
        // check must not hand back any block that was produced along the
        // way: the whole buffer stays poison, end to end.
        let mut pool = ready_pool();
        let next = pool.peek_next_block();
        pool.set_last_output(next);

        let mut buf = [0u8; 3 * POOL_BLOCK_SIZE + 7];
        let err = pool.extract(&mut buf).unwrap_err();
        assert!(matches!(err, Error::RngCheckFailed));
        assert!(
            buf.iter().all(|&b| b == POISON),
            "no partial output may survive a failed extraction"
        );
    }

    #[test]
    fn forked_clones_diverge_after_reseed() {
        let parent = ready_pool();
        // Simulate fork: identical pool state on both sides.
        let mut child_a = RandomPool {
            pool: parent.pool.clone(),
            quality: parent.quality,
            mix_position: parent.mix_position,
            output_counter: parent.output_counter,
            last_output: parent.last_output,
            reseed_pending: true,
        };
        let mut child_b = RandomPool {
            pool: parent.pool.clone(),
            quality: parent.quality,
            mix_position: parent.mix_position,
            output_counter: parent.output_counter,
            last_output: parent.last_output,
            reseed_pending: true,
        };

        child_a.reseed();
        child_b.reseed();
        assert_eq!(child_a.quality(), 0);

        child_a.add_entropy(&[0x11; 64]);
        child_a.add_quality(100);
        child_b.add_entropy(&[0x11; 64]);
        child_b.add_quality(100);

        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        child_a.extract(&mut out_a).unwrap();
        child_b.extract(&mut out_b).unwrap();
        assert_ne!(out_a, out_b, "reseeded clones must not emit identical output");
    }
}
