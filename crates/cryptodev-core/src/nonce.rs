//! Hash-chain nonce generator.
//!
//! Nonces only need freshness, but handing out values with accidentally
//! weaker properties than a caller assumed is a classic failure, so the
//! generator derives everything from one pull of the crypto RNG and then
//! never touches it again; certificate serial numbers and protocol cookies
//! don't get to drain the critical pool.
//!
//! The state is one buffer split into a public region the size of the hash
//! output and an 8-byte private region seeded from the RNG. Each output
//! block is `public = H(public || private)`. An attacker who sees outputs
//! knows `public_n = H(public_n-1 || private)`, which leaks nothing useful
//! without the private half.
//!
//! A running checksum over the whole structure is validated on every access
//! and refreshed after every mutation; a mismatch means memory corruption
//! and is treated as fatal.

use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::util::checksum_data;

/// Size of the public region: one SHA-1 output.
pub const NONCE_HASH_SIZE: usize = 20;

/// Size of the private region.
pub const NONCE_PRIVATE_SIZE: usize = 8;

pub struct NonceState {
    /// Public region followed by private region.
    data: [u8; NONCE_HASH_SIZE + NONCE_PRIVATE_SIZE],
    hash_size: usize,
    initialised: bool,
    checksum: u32,
}

impl NonceState {
    pub fn new() -> Self {
        let mut state = Self {
            data: [0u8; NONCE_HASH_SIZE + NONCE_PRIVATE_SIZE],
            hash_size: NONCE_HASH_SIZE,
            initialised: false,
            checksum: 0,
        };
        state.refresh_checksum();
        state
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Seed the private region from RNG output. The public region stays
    /// zero; it picks up state with the first generated block.
    pub fn init_with_seed(&mut self, seed: &[u8; NONCE_PRIVATE_SIZE]) -> Result<()> {
        self.verify_checksum()?;
        self.data[NONCE_HASH_SIZE..].copy_from_slice(seed);
        self.initialised = true;
        self.refresh_checksum();
        Ok(())
    }

    /// Fallback seeding from the wall clock, for when the RNG could not
    /// deliver even after a retry. No longer unpredictable, but nonce
    /// consumers that actually need unpredictability will have the missing
    /// randomness detected at key generation instead.
    pub fn init_with_time(&mut self) -> Result<()> {
        self.verify_checksum()?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.data[NONCE_HASH_SIZE..].copy_from_slice(&nanos.to_le_bytes());
        self.initialised = true;
        self.refresh_checksum();
        Ok(())
    }

    /// Fill `out` by iterating the hash chain, up to `hash_size` bytes per
    /// round.
    pub fn generate(&mut self, out: &mut [u8]) -> Result<()> {
        self.verify_checksum()?;
        if !self.initialised {
            return Err(Error::Internal("nonce generator used before seeding"));
        }

        let mut remaining = out.len();
        let mut cursor = 0usize;
        while remaining > 0 {
            // Shuffle the public state: hash over public || private.
            let digest = Sha1::digest(&self.data[..self.hash_size + NONCE_PRIVATE_SIZE]);
            self.data[..self.hash_size].copy_from_slice(&digest);

            let take = remaining.min(self.hash_size);
            out[cursor..cursor + take].copy_from_slice(&self.data[..take]);
            cursor += take;
            remaining -= take;
        }

        self.refresh_checksum();
        Ok(())
    }

    /// Checksum over every field except the checksum slot itself.
    fn compute_checksum(&self) -> u32 {
        let mut view = [0u8; NONCE_HASH_SIZE + NONCE_PRIVATE_SIZE + 2];
        view[..self.data.len()].copy_from_slice(&self.data);
        view[self.data.len()] = self.hash_size as u8;
        view[self.data.len() + 1] = u8::from(self.initialised);
        let sum = checksum_data(&view);
        view.zeroize();
        sum
    }

    fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    fn verify_checksum(&self) -> Result<()> {
        if self.checksum != self.compute_checksum() {
            return Err(Error::Internal("nonce state checksum mismatch"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        self.data[0] ^= 0xFF;
    }
}

impl Default for NonceState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NonceState {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn first_block_is_hash_of_zero_state() {
        // With an all-zero private region the first block is
        // SHA1(zeros(20) || zeros(8)).
        let mut nonce = NonceState::new();
        nonce.init_with_seed(&[0u8; NONCE_PRIVATE_SIZE]).unwrap();
        let mut out = [0u8; 20];
        nonce.generate(&mut out).unwrap();
        assert_eq!(out, hex!("40bf0c6cf2807a6e3c7a97fbd25244690e752b26"));
    }

    #[test]
    fn chain_property_holds() {
        // b1 = H(P0 || priv), b2 = H(b1 || priv).
        let mut nonce = NonceState::new();
        nonce.init_with_seed(&[0u8; NONCE_PRIVATE_SIZE]).unwrap();
        let mut b1 = [0u8; 20];
        let mut b2 = [0u8; 20];
        nonce.generate(&mut b1).unwrap();
        nonce.generate(&mut b2).unwrap();
        assert_eq!(b1, hex!("40bf0c6cf2807a6e3c7a97fbd25244690e752b26"));
        assert_eq!(b2, hex!("bd61dbf32908c0d0fe31cae485d9dbd7ea47dd60"));
    }

    #[test]
    fn output_spans_block_boundaries() {
        let mut nonce = NonceState::new();
        nonce.init_with_seed(&[7u8; NONCE_PRIVATE_SIZE]).unwrap();
        let mut long = [0u8; 50];
        nonce.generate(&mut long).unwrap();

        // The same chain read in 20-byte steps produces the same stream.
        let mut nonce2 = NonceState::new();
        nonce2.init_with_seed(&[7u8; NONCE_PRIVATE_SIZE]).unwrap();
        let mut parts = [0u8; 60];
        for chunk in parts.chunks_mut(20) {
            nonce2.generate(chunk).unwrap();
        }
        assert_eq!(&long[..50], &parts[..50]);
    }

    #[test]
    fn generate_before_seed_is_rejected() {
        let mut nonce = NonceState::new();
        let mut out = [0u8; 8];
        assert!(matches!(
            nonce.generate(&mut out),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn checksum_catches_corruption() {
        let mut nonce = NonceState::new();
        nonce.init_with_seed(&[1u8; NONCE_PRIVATE_SIZE]).unwrap();
        nonce.corrupt_for_test();
        let mut out = [0u8; 8];
        assert!(matches!(
            nonce.generate(&mut out),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn time_fallback_still_initialises() {
        let mut nonce = NonceState::new();
        nonce.init_with_time().unwrap();
        assert!(nonce.is_initialised());
        let mut out = [0u8; 16];
        nonce.generate(&mut out).unwrap();
    }
}
