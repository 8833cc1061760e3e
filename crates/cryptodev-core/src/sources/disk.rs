//! Storage read-latency probe.
//!
//! Random small reads against a scratch file pick up latency variance from
//! the page cache, I/O scheduler, and the storage controller itself.

use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Instant;

use tempfile::NamedTempFile;

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

/// Size of the scratch file.
const SCRATCH_SIZE: usize = 64 * 1024;

/// Size of each read.
const READ_SIZE: usize = 4 * 1024;

/// Reads per poll.
const ROUNDS: usize = 48;

static DISK_INFO: SourceInfo = SourceInfo {
    name: "disk_latency",
    description: "Read-latency jitter from random reads against a scratch file",
    speed: Speed::Slow,
    weight: 10,
    expected_bytes: ROUNDS,
};

pub struct DiskJitterSource;

impl EntropySource for DiskJitterSource {
    fn info(&self) -> &SourceInfo {
        &DISK_INFO
    }

    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut scratch = match NamedTempFile::new() {
            Ok(f) => f,
            Err(_) => return 0,
        };

        // Fill with incompressible-ish data so the write isn't elided.
        let mut fill = vec![0u8; SCRATCH_SIZE];
        let mut lcg: u64 = 0x9E37_79B9_7F4A_7C15;
        for chunk in fill.chunks_mut(8) {
            lcg = lcg.wrapping_mul(6364136223846793005).wrapping_add(1);
            let bytes = lcg.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        if scratch.write_all(&fill).is_err() || scratch.flush().is_err() {
            return 0;
        }

        let mut read_buf = vec![0u8; READ_SIZE];
        let mut produced = 0usize;
        for _ in 0..ROUNDS {
            lcg = lcg.wrapping_mul(6364136223846793005).wrapping_add(1);
            let offset = (lcg as usize) % (SCRATCH_SIZE - READ_SIZE);

            let t0 = Instant::now();
            if scratch.seek(SeekFrom::Start(offset as u64)).is_err() {
                break;
            }
            if scratch.read_exact(&mut read_buf).is_err() {
                break;
            }
            let elapsed = t0.elapsed().as_nanos() as u64;

            batch.add_bytes(&[(elapsed & 0xFF) as u8]);
            produced += 1;
        }

        if produced == ROUNDS {
            DISK_INFO.weight
        } else if produced > 0 {
            DISK_INFO.weight / 2
        } else {
            0
        }
    }
}
