//! Shared low-level helpers: data checksumming, name hashing, and the
//! clustered-write buffer used by the entropy pollers.

use sha1::{Digest, Sha1};
use zeroize::Zeroize;

/// Size of a name hash produced by [`hash_data`].
pub const HASH_DATA_SIZE: usize = 20;

/// Fletcher-style running checksum over a byte slice.
///
/// Used as the fast prefilter key for trust-cache buckets and as the
/// integrity checksum over the nonce generator state. Not collision
/// resistant; callers that need that follow up with [`hash_data`].
pub fn checksum_data(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0xFFFF;
    let mut sum2: u32 = 0xFFFF;

    for chunk in data.chunks(359) {
        for &byte in chunk {
            sum1 += u32::from(byte);
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
        sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    }
    sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
    sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);

    (sum2 << 16) | sum1
}

/// 20-byte SHA-1 hash of an identifier blob (a DN, a key ID).
pub fn hash_data(data: &[u8]) -> [u8; HASH_DATA_SIZE] {
    let digest = Sha1::digest(data);
    let mut out = [0u8; HASH_DATA_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Clustered-write accumulator for entropy pollers.
///
/// Pollers produce lots of small values (counter reads, struct snapshots,
/// timing deltas). Rather than sending a device message per datum, a poller
/// fills an `EntropyBatch` and the poll driver flushes the whole batch as a
/// single entropy message followed by one quality message. The buffer is
/// wiped when the batch is dropped.
pub struct EntropyBatch {
    buf: Vec<u8>,
}

impl EntropyBatch {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Append raw bytes.
    pub fn add_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Append an integer-sized value (return values of getXYZ()-style calls).
    pub fn add_value(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a signed value.
    pub fn add_long(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the collected data without delivering it.
    pub fn discard(&mut self) {
        self.buf.zeroize();
        self.buf.clear();
    }
}

impl Default for EntropyBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntropyBatch {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_input_sensitive() {
        let a = checksum_data(b"C=NZ, O=Dave's Wetaburgers, CN=Dave Taylor");
        let b = checksum_data(b"C=NZ, O=Dave's Wetaburgers, CN=Dave Taylog");
        assert_eq!(a, checksum_data(b"C=NZ, O=Dave's Wetaburgers, CN=Dave Taylor"));
        assert_ne!(a, b);
        assert_ne!(checksum_data(b""), checksum_data(b"\x00"));
    }

    #[test]
    fn hash_data_matches_sha1() {
        let h = hash_data(b"abc");
        assert_eq!(
            hex::encode(h),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn batch_accumulates_values() {
        let mut batch = EntropyBatch::new();
        batch.add_value(0x1122334455667788);
        batch.add_long(-1);
        batch.add_bytes(&[1, 2, 3]);
        assert_eq!(batch.len(), 8 + 8 + 3);
        batch.discard();
        assert!(batch.is_empty());
    }
}
