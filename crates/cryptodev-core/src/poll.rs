//! Fast and slow poll drivers.
//!
//! The fast poll is synchronous and cheap: it runs every fast source to
//! completion inside a fixed budget and hands each source's batch to the
//! device as it goes. The slow poll is the expensive path: a background
//! gatherer thread works through the slow sources (and, when the direct
//! sources still leave the pool short, the external-command route), then
//! delivers everything to the device in one burst at the end.
//!
//! At most one slow poll is ever in flight; a second request while one is
//! running is a no-op. The gatherer holds no device locks while it works;
//! results come back through the same `AddEntropy`/`AddEntropyQuality`
//! messages any other feeder would use, so callers waiting on the poll
//! keep the device reachable the whole time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::device::SystemDevice;
use crate::error::{Error, Result};
use crate::source::contribution;
use crate::sources;
use crate::sources::external::{platform_worker, WorkerStatus, EXTERNAL_THRESHOLD};
use crate::util::EntropyBatch;

/// Budget for one fast poll.
const FAST_POLL_BUDGET: Duration = Duration::from_millis(100);

/// Wall-clock budget for one slow poll.
const SLOW_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a forced completion wait is allowed to take.
const FORCED_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Sanity cap on a non-forced completion wait.
const WAIT_SANITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Which poll a control message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Fast,
    Slow,
}

struct GathererState {
    /// True when no gatherer is active. The single source of truth for
    /// poll-in-flight state; the stop flag and thread handle hang off it.
    idle: Mutex<bool>,
    cond: Condvar,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

pub struct PollDriver {
    stop: Arc<AtomicBool>,
    gatherer: Arc<GathererState>,
}

impl PollDriver {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            gatherer: Arc::new(GathererState {
                idle: Mutex::new(true),
                cond: Condvar::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Synchronous fast poll: run every fast source within the budget,
    /// delivering each source's batch as soon as it is complete.
    pub fn fast_poll(&self, device: &Arc<SystemDevice>) {
        let deadline = Instant::now() + FAST_POLL_BUDGET;
        for source in sources::fast_sources() {
            if Instant::now() >= deadline {
                log::debug!("fast poll budget exhausted before {}", source.name());
                break;
            }
            if !source.is_available() {
                continue;
            }
            let mut batch = EntropyBatch::new();
            let declared = source.poll(&mut batch);
            let quality = contribution(source.info(), declared, batch.len());
            deliver(device, &batch, quality);
        }
    }

    /// Kick off a background slow poll. A no-op while one is already
    /// running.
    pub fn slow_poll(&self, device: &Arc<SystemDevice>) {
        {
            let mut idle = self.gatherer.idle.lock().unwrap();
            if !*idle {
                return;
            }
            *idle = false;
            self.stop.store(false, Ordering::SeqCst);
        }

        // The fork check runs at the start of every slow poll; a positive
        // result marks the pool for reseeding before any further output.
        device.note_fork_check();

        let device = Arc::clone(device);
        let stop = Arc::clone(&self.stop);
        let state = Arc::clone(&self.gatherer);
        let handle = std::thread::Builder::new()
            .name("entropy-gatherer".into())
            .spawn(move || {
                run_gatherer(&device, &stop);
                *state.idle.lock().unwrap() = true;
                state.cond.notify_all();
            });

        match handle {
            Ok(handle) => {
                *self.gatherer.handle.lock().unwrap() = Some(handle);
            }
            Err(err) => {
                log::warn!("could not spawn entropy gatherer: {err}");
                *self.gatherer.idle.lock().unwrap() = true;
                self.gatherer.cond.notify_all();
            }
        }
    }

    /// Whether a slow poll is currently running.
    pub fn poll_in_progress(&self) -> bool {
        !*self.gatherer.idle.lock().unwrap()
    }

    /// Wait for a running slow poll to finish.
    ///
    /// `force` raises the cooperative stop flag first and shortens the wait
    /// to a hard 2-second cap; the gatherer reacts by killing any external
    /// children and discarding whatever it had gathered. The non-forced
    /// wait is bounded by a generous sanity cap. Worker cleanup (thread
    /// join) runs on every exit path that sees the gatherer finish.
    pub fn wait_for_completion(&self, force: bool) -> Result<()> {
        let idle = self.gatherer.idle.lock().unwrap();
        if *idle {
            drop(idle);
            self.reap();
            return Ok(());
        }

        if force {
            self.stop.store(true, Ordering::SeqCst);
        }
        let timeout = if force {
            FORCED_WAIT_TIMEOUT
        } else {
            WAIT_SANITY_TIMEOUT
        };

        let (idle, wait) = self
            .gatherer
            .cond
            .wait_timeout_while(idle, timeout, |idle| !*idle)
            .unwrap();
        let finished = *idle;
        drop(idle);

        if !finished {
            if wait.timed_out() {
                log::warn!("slow poll did not complete within {timeout:?}");
            }
            return Err(Error::Internal("slow poll did not complete in time"));
        }

        self.reap();
        Ok(())
    }

    /// Join a finished gatherer thread, if one is lying around.
    fn reap(&self) {
        if let Some(handle) = self.gatherer.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for PollDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand one batch to the device. Errors are swallowed: a feeder that can't
/// deliver (device shutting down, fatal latch) just loses its contribution.
fn deliver(device: &Arc<SystemDevice>, batch: &EntropyBatch, quality: u8) {
    if batch.is_empty() {
        return;
    }
    if device.add_entropy(batch.as_slice()).is_err() {
        return;
    }
    if quality > 0 {
        let _ = device.add_entropy_quality(quality);
    }
}

/// The background gatherer body.
///
/// Everything is collected locally first and only delivered once the whole
/// gather is done: a forced shutdown mid-poll must leave the pool exactly
/// as it found it, and batching the delivery makes that a single decision
/// at the end instead of a scattering of partial states.
fn run_gatherer(device: &Arc<SystemDevice>, stop: &AtomicBool) {
    let deadline = Instant::now() + SLOW_POLL_TIMEOUT;
    let mut gathered: Vec<(EntropyBatch, u8)> = Vec::new();
    let mut accumulated = 0u32;

    for source in sources::slow_sources() {
        if stop.load(Ordering::SeqCst) || Instant::now() >= deadline {
            break;
        }
        if !source.is_available() {
            continue;
        }
        let mut batch = EntropyBatch::new();
        let declared = source.poll(&mut batch);
        let quality = contribution(source.info(), declared, batch.len());
        log::debug!(
            "{} contributed {} bytes, quality {quality}",
            source.name(),
            batch.len()
        );
        if !batch.is_empty() {
            accumulated += u32::from(quality);
            gathered.push((batch, quality));
        }
    }

    // Last-resort route: only when the direct sources left us short.
    let pool_quality = u32::from(device.pool_quality());
    if !stop.load(Ordering::SeqCst)
        && Instant::now() < deadline
        && pool_quality + accumulated < u32::from(EXTERNAL_THRESHOLD)
    {
        let mut worker = platform_worker();
        if worker.start() == WorkerStatus::Running {
            loop {
                match worker.poll(Duration::from_millis(500)) {
                    WorkerStatus::Running => {
                        if stop.load(Ordering::SeqCst) || Instant::now() >= deadline {
                            worker.stop(stop.load(Ordering::SeqCst));
                            break;
                        }
                    }
                    _ => break,
                }
            }
            let (bytes, quality) = worker.collect();
            if !bytes.is_empty() {
                let mut batch = EntropyBatch::new();
                batch.add_bytes(&bytes);
                gathered.push((batch, quality));
            }
        }
    }

    if stop.load(Ordering::SeqCst) {
        // Forced shutdown: nothing reaches the pool.
        for (batch, _) in gathered.iter_mut() {
            batch.discard();
        }
        log::debug!("slow poll stopped before delivery, gather discarded");
        return;
    }

    for (batch, quality) in gathered.iter() {
        deliver(device, batch, *quality);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SystemDevice;

    #[test]
    fn wait_without_poll_is_immediate() {
        let driver = PollDriver::new();
        let t0 = Instant::now();
        driver.wait_for_completion(false).unwrap();
        assert!(t0.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn second_slow_poll_is_a_no_op() {
        let device = SystemDevice::new();
        device.poll_driver().slow_poll(&device);
        let was_running = device.poll_driver().poll_in_progress();
        device.poll_driver().slow_poll(&device);
        assert!(was_running);
        device.poll_driver().wait_for_completion(false).unwrap();
        assert!(!device.poll_driver().poll_in_progress());
    }

    #[test]
    fn completed_poll_raises_pool_quality() {
        let device = SystemDevice::new();
        assert_eq!(device.pool_quality(), 0);
        device.poll_driver().slow_poll(&device);
        device.poll_driver().wait_for_completion(false).unwrap();
        assert!(
            device.pool_quality() > 0,
            "slow poll must deliver some quality"
        );
    }

    #[test]
    fn forced_completion_is_prompt_and_delivers_nothing() {
        let device = SystemDevice::new();
        device.poll_driver().slow_poll(&device);

        let t0 = Instant::now();
        device.poll_driver().wait_for_completion(true).unwrap();
        assert!(t0.elapsed() <= FORCED_WAIT_TIMEOUT + Duration::from_millis(500));
        assert!(!device.poll_driver().poll_in_progress());
        assert_eq!(
            device.pool_quality(),
            0,
            "forced shutdown must not deliver partial data"
        );
    }

    #[test]
    fn fast_poll_feeds_the_pool() {
        let device = SystemDevice::new();
        device.poll_driver().fast_poll(&device);
        assert!(device.pool_quality() > 0);
    }
}
