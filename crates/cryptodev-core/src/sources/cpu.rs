//! CPU hardware-RNG instruction probe.
//!
//! Recent x86 CPUs expose an on-die RNG through the `rdrand` instruction.
//! Presence is reported by a CPUID feature flag checked at runtime; on CPUs
//! without it the source skips cleanly. A read with the carry flag clear
//! means the DRNG could not deliver, and the whole poll is abandoned rather
//! than padded out with whatever was read so far.

#[cfg(target_arch = "x86_64")]
use zeroize::Zeroize;

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

/// 64-bit words read per poll (32 bytes).
const RDRAND_WORDS: usize = 4;

static RDRAND_INFO: SourceInfo = SourceInfo {
    name: "cpu_rdrand",
    description: "On-die CPU RNG read through the rdrand instruction",
    speed: Speed::Slow,
    weight: 45,
    expected_bytes: RDRAND_WORDS * 8,
};

/// The CPU's own RNG instruction, when the processor reports one.
pub struct CpuRngSource;

#[cfg(target_arch = "x86_64")]
fn rdrand_present() -> bool {
    std::arch::is_x86_feature_detected!("rdrand")
}

#[cfg(not(target_arch = "x86_64"))]
fn rdrand_present() -> bool {
    false
}

/// Fill `out` from the instruction. Returns false on the first carry-clear
/// read; the partial buffer is not used.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "rdrand")]
unsafe fn read_rdrand(out: &mut [u64; RDRAND_WORDS]) -> bool {
    for word in out.iter_mut() {
        let mut value = 0u64;
        if std::arch::x86_64::_rdrand64_step(&mut value) != 1 {
            return false;
        }
        *word = value;
    }
    true
}

impl EntropySource for CpuRngSource {
    fn info(&self) -> &SourceInfo {
        &RDRAND_INFO
    }

    fn is_available(&self) -> bool {
        rdrand_present()
    }

    #[cfg(target_arch = "x86_64")]
    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        if !rdrand_present() {
            return 0;
        }

        let mut words = [0u64; RDRAND_WORDS];
        // SAFETY: the rdrand feature flag was checked just above; the
        // target_feature function is only reached on CPUs that have it.
        let complete = unsafe { read_rdrand(&mut words) };
        if !complete {
            log::debug!("rdrand refused to deliver, skipping the source");
            words.zeroize();
            return 0;
        }

        for word in words {
            batch.add_value(word);
        }
        words.zeroize();
        RDRAND_INFO.weight
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn poll(&self, _batch: &mut EntropyBatch) -> u8 {
        0
    }
}
