//! Last-resort external-sources poll.
//!
//! On systems with no usable direct source, entropy can still be harvested
//! from the output of system utilities whose results depend on the whole
//! machine's state. The route is expensive (process spawns) and weakly
//! characterised, so the slow-poll driver only takes it when the pool
//! quality after the direct sources is still below [`EXTERNAL_THRESHOLD`].
//!
//! The route is abstracted behind [`EntropyWorker`] so platforms that cannot
//! support it swap in [`UnsupportedWorker`].

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use zeroize::Zeroize;

/// Pool quality below which the slow poll falls back to external sources.
pub const EXTERNAL_THRESHOLD: u8 = 50;

/// Upper bound on the quality the external route can claim.
const EXTERNAL_QUALITY_CAP: u8 = 30;

/// Wall-clock budget for a single harvested command.
const PER_COMMAND_BUDGET: Duration = Duration::from_secs(5);

/// State of a background entropy worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not started yet.
    Idle,
    /// Started and still gathering.
    Running,
    /// Gathering complete (or stopped); results may be collected.
    Finished,
    /// The platform cannot run this worker.
    Unsupported,
}

/// A background harvester for the external-sources route.
pub trait EntropyWorker: Send {
    /// Begin gathering in the background.
    fn start(&mut self) -> WorkerStatus;

    /// Wait up to `timeout` for the gather to finish.
    fn poll(&mut self, timeout: Duration) -> WorkerStatus;

    /// Take whatever was gathered: raw bytes plus a quality estimate.
    fn collect(&mut self) -> (Vec<u8>, u8);

    /// Stop the worker. `force` escalates from the cooperative stop flag to
    /// killing any child process outright. Cleanup always runs.
    fn stop(&mut self, force: bool);
}

/// One harvested utility: candidate paths, arguments, quality credit.
struct CommandSource {
    paths: &'static [&'static str],
    args: &'static [&'static str],
    quality: u8,
}

/// The utility catalogue. Each entry's output depends on machine-wide state
/// (process table, I/O counters, network counters), which is the point.
static COMMAND_SOURCES: &[CommandSource] = &[
    CommandSource {
        paths: &["/usr/bin/vmstat", "/bin/vmstat"],
        args: &["-s"],
        quality: 5,
    },
    CommandSource {
        paths: &["/bin/ps", "/usr/bin/ps"],
        args: &["aux"],
        quality: 4,
    },
    CommandSource {
        paths: &["/usr/bin/netstat", "/bin/netstat"],
        args: &["-s"],
        quality: 5,
    },
    CommandSource {
        paths: &["/bin/df", "/usr/bin/df"],
        args: &["-k"],
        quality: 2,
    },
    CommandSource {
        paths: &["/usr/bin/free"],
        args: &[],
        quality: 2,
    },
    CommandSource {
        paths: &["/usr/bin/uptime", "/bin/uptime"],
        args: &[],
        quality: 1,
    },
    CommandSource {
        paths: &["/usr/bin/iostat", "/usr/sbin/iostat"],
        args: &[],
        quality: 3,
    },
    CommandSource {
        paths: &["/usr/bin/w"],
        args: &[],
        quality: 1,
    },
];

struct WorkerShared {
    results: Mutex<(Vec<u8>, u8)>,
    finished: Mutex<bool>,
    cond: Condvar,
    stop: AtomicBool,
}

/// External-command harvester for Unix-likes.
pub struct ExternalCommandWorker {
    shared: Arc<WorkerShared>,
    handle: Option<std::thread::JoinHandle<()>>,
    status: WorkerStatus,
}

impl ExternalCommandWorker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                results: Mutex::new((Vec::new(), 0)),
                finished: Mutex::new(false),
                cond: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            handle: None,
            status: WorkerStatus::Idle,
        }
    }

    /// Whether any catalogue utility exists on this machine.
    pub fn is_supported() -> bool {
        cfg!(unix)
            && COMMAND_SOURCES
                .iter()
                .any(|src| src.paths.iter().any(|p| std::path::Path::new(p).exists()))
    }

    fn run_catalogue(shared: &WorkerShared) {
        let mut gathered = Vec::new();
        let mut quality = 0u8;

        for source in COMMAND_SOURCES {
            if shared.stop.load(Ordering::Relaxed) {
                break;
            }
            let Some(path) = source
                .paths
                .iter()
                .find(|p| std::path::Path::new(p).exists())
            else {
                continue;
            };

            match run_bounded(path, source.args, &shared.stop) {
                Some(output) if !output.is_empty() => {
                    log::trace!(
                        "external source {path} contributed {} bytes",
                        output.len()
                    );
                    gathered.extend_from_slice(&output);
                    quality = quality.saturating_add(source.quality);
                }
                _ => {
                    log::trace!("external source {path} produced nothing");
                }
            }
        }

        if shared.stop.load(Ordering::Relaxed) {
            // Stopped mid-gather: deliver nothing.
            gathered.zeroize();
            gathered.clear();
            quality = 0;
        }

        {
            let mut results = shared.results.lock().unwrap();
            *results = (gathered, quality.min(EXTERNAL_QUALITY_CAP));
        }
        *shared.finished.lock().unwrap() = true;
        shared.cond.notify_all();
    }
}

impl Default for ExternalCommandWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one utility with a bounded lifetime. The child is killed if it
/// overstays its budget or the stop flag is raised.
fn run_bounded(path: &str, args: &[&str], stop: &AtomicBool) -> Option<Vec<u8>> {
    let mut child = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + PER_COMMAND_BUDGET;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if stop.load(Ordering::Relaxed) || Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }

    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        use std::io::Read;
        let _ = stdout.read_to_end(&mut output);
    }
    Some(output)
}

impl EntropyWorker for ExternalCommandWorker {
    fn start(&mut self) -> WorkerStatus {
        if self.status != WorkerStatus::Idle {
            return self.status;
        }
        if !Self::is_supported() {
            self.status = WorkerStatus::Unsupported;
            return self.status;
        }

        let shared = Arc::clone(&self.shared);
        self.handle = Some(std::thread::spawn(move || {
            ExternalCommandWorker::run_catalogue(&shared);
        }));
        self.status = WorkerStatus::Running;
        self.status
    }

    fn poll(&mut self, timeout: Duration) -> WorkerStatus {
        if self.status != WorkerStatus::Running {
            return self.status;
        }
        let finished = self.shared.finished.lock().unwrap();
        let (finished, _) = self
            .shared
            .cond
            .wait_timeout_while(finished, timeout, |done| !*done)
            .unwrap();
        if *finished {
            self.status = WorkerStatus::Finished;
        }
        self.status
    }

    fn collect(&mut self) -> (Vec<u8>, u8) {
        let mut results = self.shared.results.lock().unwrap();
        std::mem::take(&mut *results)
    }

    fn stop(&mut self, force: bool) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if force {
            std::thread::yield_now();
        }
        if let Some(handle) = self.handle.take() {
            // The gather loop re-checks the stop flag between commands and
            // run_bounded() kills an in-flight child once the flag is up, so
            // the join is short even on the forced path.
            let _ = handle.join();
        }
        self.status = WorkerStatus::Finished;
    }
}

impl Drop for ExternalCommandWorker {
    fn drop(&mut self) {
        self.stop(true);
        let mut results = self.shared.results.lock().unwrap();
        results.0.zeroize();
    }
}

/// Stand-in for platforms that cannot run the external-sources route.
pub struct UnsupportedWorker;

impl EntropyWorker for UnsupportedWorker {
    fn start(&mut self) -> WorkerStatus {
        WorkerStatus::Unsupported
    }

    fn poll(&mut self, _timeout: Duration) -> WorkerStatus {
        WorkerStatus::Unsupported
    }

    fn collect(&mut self) -> (Vec<u8>, u8) {
        (Vec::new(), 0)
    }

    fn stop(&mut self, _force: bool) {}
}

/// The platform's external-sources worker.
pub fn platform_worker() -> Box<dyn EntropyWorker> {
    if ExternalCommandWorker::is_supported() {
        Box::new(ExternalCommandWorker::new())
    } else {
        Box::new(UnsupportedWorker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_worker_is_inert() {
        let mut worker = UnsupportedWorker;
        assert_eq!(worker.start(), WorkerStatus::Unsupported);
        assert_eq!(worker.collect(), (Vec::new(), 0));
    }

    #[test]
    fn stopped_worker_delivers_nothing() {
        if !ExternalCommandWorker::is_supported() {
            return;
        }
        let mut worker = ExternalCommandWorker::new();
        worker.start();
        worker.stop(true);
        let (bytes, quality) = worker.collect();
        // Either it finished a command before the stop landed, or the stop
        // wiped the gather; quality is zero in the wiped case.
        if bytes.is_empty() {
            assert_eq!(quality, 0);
        }
    }

    #[test]
    fn full_gather_is_bounded_and_capped() {
        if !ExternalCommandWorker::is_supported() {
            return;
        }
        let mut worker = ExternalCommandWorker::new();
        worker.start();
        let status = worker.poll(Duration::from_secs(60));
        assert_eq!(status, WorkerStatus::Finished);
        let (_, quality) = worker.collect();
        assert!(quality <= EXTERNAL_QUALITY_CAP);
        worker.stop(false);
    }
}
