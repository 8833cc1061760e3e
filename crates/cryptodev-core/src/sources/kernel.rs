//! Kernel and hardware RNG probes.

use std::io::Read;

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

/// Bytes requested from the kernel RNG per poll.
const KERNEL_RNG_BYTES: usize = 64;

static KERNEL_RNG_INFO: SourceInfo = SourceInfo {
    name: "kernel_rng",
    description: "Operating system CSPRNG via the getrandom interface",
    speed: Speed::Slow,
    weight: 60,
    expected_bytes: KERNEL_RNG_BYTES,
};

/// The kernel's own CSPRNG. High quality, but it is exactly the facility a
/// defence-in-depth pool must not depend on exclusively, so its weight stays
/// below the output threshold.
pub struct KernelRngSource;

impl EntropySource for KernelRngSource {
    fn info(&self) -> &SourceInfo {
        &KERNEL_RNG_INFO
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut buf = [0u8; KERNEL_RNG_BYTES];
        match getrandom::fill(&mut buf) {
            Ok(()) => {
                batch.add_bytes(&buf);
                KERNEL_RNG_INFO.weight
            }
            Err(err) => {
                log::debug!("kernel RNG read failed: {err}");
                0
            }
        }
    }
}

/// Path probed for a dedicated hardware RNG character device.
const HWRNG_PATH: &str = "/dev/hwrng";

/// Bytes requested from the hardware RNG per poll.
const HWRNG_BYTES: usize = 32;

static HWRNG_INFO: SourceInfo = SourceInfo {
    name: "hwrng_device",
    description: "Dedicated hardware RNG character device",
    speed: Speed::Slow,
    weight: 100,
    expected_bytes: HWRNG_BYTES,
};

/// A dedicated hardware RNG, when the platform exposes one. This is the one
/// source permitted to carry the pool to full quality on its own.
pub struct HwRngDeviceSource;

impl EntropySource for HwRngDeviceSource {
    fn info(&self) -> &SourceInfo {
        &HWRNG_INFO
    }

    fn is_available(&self) -> bool {
        cfg!(unix) && std::path::Path::new(HWRNG_PATH).exists()
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut file = match std::fs::File::open(HWRNG_PATH) {
            Ok(f) => f,
            Err(err) => {
                log::debug!("{HWRNG_PATH} exists but is not readable: {err}");
                return 0;
            }
        };
        let mut buf = [0u8; HWRNG_BYTES];
        let mut total = 0usize;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => break,
            }
        }
        if total == 0 {
            return 0;
        }
        batch.add_bytes(&buf[..total]);
        if total == HWRNG_BYTES {
            // A full hardware-RNG read is the one contribution allowed to
            // carry the pool to 100 on its own.
            HWRNG_INFO.weight
        } else {
            // Partial read, prorated by the driver anyway.
            HWRNG_INFO.weight / 2
        }
    }
}
