//! Compression-timing probe.
//!
//! Compressing varied data has heavily data-dependent branches (Huffman tree
//! traversal, match finding), so per-operation timing reflects branch
//! predictor and cache state left behind by everything else on the machine.

use std::io::Write;
use std::time::Instant;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use zeroize::Zeroize;

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

/// Compression rounds per poll.
const ROUNDS: usize = 64;

static COMPRESSION_INFO: SourceInfo = SourceInfo {
    name: "compression_timing",
    description: "Zlib compression timing jitter from data-dependent branches",
    speed: Speed::Slow,
    weight: 10,
    expected_bytes: ROUNDS,
};

pub struct CompressionTimingSource;

impl EntropySource for CompressionTimingSource {
    fn info(&self) -> &SourceInfo {
        &COMPRESSION_INFO
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut lcg: u64 = Instant::now().elapsed().as_nanos() as u64
            | std::process::id() as u64
            | 1;
        let mut produced = 0usize;

        for _ in 0..ROUNDS {
            // Vary size and content so successive rounds take different
            // branch paths.
            let len = 128 + (lcg as usize % 385);
            let mut data = vec![0u8; len];
            for byte in data.iter_mut() {
                lcg = lcg.wrapping_mul(6364136223846793005).wrapping_add(1);
                *byte = (lcg >> 32) as u8;
            }

            let t0 = Instant::now();
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
            if encoder.write_all(&data).is_err() {
                data.zeroize();
                return 0;
            }
            let compressed = match encoder.finish() {
                Ok(out) => out,
                Err(_) => {
                    data.zeroize();
                    return 0;
                }
            };
            let elapsed = t0.elapsed().as_nanos() as u64;

            batch.add_bytes(&[(elapsed & 0xFF) as u8]);
            produced += 1;

            data.zeroize();
            drop(compressed);
        }

        if produced == ROUNDS {
            COMPRESSION_INFO.weight
        } else {
            0
        }
    }
}
