//! Process and kernel statistics probes.

use crate::source::{EntropySource, SourceInfo, Speed};
use crate::util::EntropyBatch;

#[cfg(unix)]
extern "C" {
    fn clock() -> libc::clock_t;
}

static PROCESS_STAT_INFO: SourceInfo = SourceInfo {
    name: "process_stats",
    description: "Process identifiers, resource usage, and address-space state",
    speed: Speed::Fast,
    weight: 10,
    expected_bytes: 64,
};

/// Snapshot of the calling process: pids, rusage counters, clock ticks, and
/// a couple of address-space values that vary under ASLR.
pub struct ProcessStatSource;

impl EntropySource for ProcessStatSource {
    fn info(&self) -> &SourceInfo {
        &PROCESS_STAT_INFO
    }

    #[cfg(unix)]
    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        // SAFETY: all of these are read-only queries about the calling
        // process with no pointer arguments beyond locals we own.
        unsafe {
            batch.add_long(i64::from(libc::getpid()));
            batch.add_long(i64::from(libc::getppid()));
            batch.add_long(i64::from(libc::getuid()));
            batch.add_long(i64::from(libc::getgid()));

            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                batch.add_long(usage.ru_utime.tv_usec as i64);
                batch.add_long(usage.ru_stime.tv_usec as i64);
                batch.add_long(usage.ru_maxrss as i64);
                batch.add_long(usage.ru_minflt as i64);
                batch.add_long(usage.ru_majflt as i64);
                batch.add_long(usage.ru_nvcsw as i64);
                batch.add_long(usage.ru_nivcsw as i64);
            }
            if libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) == 0 {
                batch.add_long(usage.ru_utime.tv_usec as i64);
                batch.add_long(usage.ru_nvcsw as i64);
            }

            batch.add_value(clock() as u64);
        }

        // Stack and heap addresses move under ASLR.
        let stack_probe = 0u64;
        batch.add_value(std::ptr::addr_of!(stack_probe) as usize as u64);
        let heap_probe = Box::new(0u64);
        batch.add_value(Box::as_ref(&heap_probe) as *const u64 as usize as u64);

        PROCESS_STAT_INFO.weight
    }

    #[cfg(not(unix))]
    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        batch.add_value(std::process::id() as u64);
        let stack_probe = 0u64;
        batch.add_value(std::ptr::addr_of!(stack_probe) as usize as u64);
        2
    }
}

static SYSINFO_INFO: SourceInfo = SourceInfo {
    name: "sysinfo_counters",
    description: "Kernel load averages, memory counters, and process counts",
    speed: Speed::Slow,
    weight: 15,
    expected_bytes: 64,
};

/// System-wide counters from `sysinfo(2)`.
pub struct SysinfoSource;

impl EntropySource for SysinfoSource {
    fn info(&self) -> &SourceInfo {
        &SYSINFO_INFO
    }

    #[cfg(target_os = "linux")]
    fn is_available(&self) -> bool {
        true
    }

    #[cfg(not(target_os = "linux"))]
    fn is_available(&self) -> bool {
        false
    }

    #[cfg(target_os = "linux")]
    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        // SAFETY: sysinfo() fills a caller-owned struct and has no other
        // side effects.
        let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
        if unsafe { libc::sysinfo(&mut info) } != 0 {
            return 0;
        }
        batch.add_value(info.uptime as u64);
        for load in info.loads {
            batch.add_value(load as u64);
        }
        batch.add_value(info.freeram as u64);
        batch.add_value(info.sharedram as u64);
        batch.add_value(info.bufferram as u64);
        batch.add_value(info.freeswap as u64);
        batch.add_value(u64::from(info.procs));

        SYSINFO_INFO.weight
    }

    #[cfg(not(target_os = "linux"))]
    fn poll(&self, _batch: &mut EntropyBatch) -> u8 {
        0
    }
}

/// Files scanned by the procfs probe. Mostly counter files whose contents
/// change continuously under load.
#[cfg(target_os = "linux")]
const PROC_FILES: &[&str] = &[
    "/proc/loadavg",
    "/proc/meminfo",
    "/proc/stat",
    "/proc/uptime",
    "/proc/interrupts",
    "/proc/diskstats",
    "/proc/vmstat",
    "/proc/net/dev",
    "/proc/net/netstat",
    "/proc/net/snmp",
    "/proc/softirqs",
    "/proc/schedstat",
    "/proc/self/stat",
    "/proc/self/statm",
    "/proc/self/status",
    "/proc/self/io",
    "/proc/locks",
    "/proc/timer_list",
    "/proc/zoneinfo",
    "/proc/slabinfo",
    "/proc/pagetypeinfo",
    "/proc/buddyinfo",
    "/proc/sys/kernel/random/entropy_avail",
    "/proc/sys/fs/file-nr",
    "/proc/sys/fs/inode-state",
];

/// How much each successfully-read procfs file is worth.
#[cfg(target_os = "linux")]
const PROC_QUALITY_PER_FILE: u8 = 2;

static PROCFS_INFO: SourceInfo = SourceInfo {
    name: "procfs_scan",
    description: "Contents of continuously-changing /proc counter files",
    speed: Speed::Slow,
    weight: 50,
    expected_bytes: 4096,
};

/// Reads a fixed list of `/proc` files and credits a couple of quality
/// points per readable file, up to the source weight.
pub struct ProcfsSource;

impl EntropySource for ProcfsSource {
    fn info(&self) -> &SourceInfo {
        &PROCFS_INFO
    }

    #[cfg(target_os = "linux")]
    fn is_available(&self) -> bool {
        std::path::Path::new("/proc/stat").exists()
    }

    #[cfg(not(target_os = "linux"))]
    fn is_available(&self) -> bool {
        false
    }

    #[cfg(target_os = "linux")]
    fn poll(&self, batch: &mut EntropyBatch) -> u8 {
        let mut quality = 0u8;
        for path in PROC_FILES {
            match std::fs::read(path) {
                Ok(contents) if !contents.is_empty() => {
                    // Cap huge files; the tail rarely changes anyway.
                    let take = contents.len().min(2048);
                    batch.add_bytes(&contents[..take]);
                    quality = quality.saturating_add(PROC_QUALITY_PER_FILE);
                }
                _ => {}
            }
        }
        quality.min(PROCFS_INFO.weight)
    }

    #[cfg(not(target_os = "linux"))]
    fn poll(&self, _batch: &mut EntropyBatch) -> u8 {
        0
    }
}
