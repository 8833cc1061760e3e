//! Fork detection.
//!
//! A forked child inherits a byte-for-byte copy of the entropy pool, so both
//! sides would emit identical randomness until something disturbs the state.
//! Two mechanisms catch this: a pid snapshot compared on every check (covers
//! single-threaded forks), and a process-wide flag raised by a
//! `pthread_atfork` child/parent hook (covers threaded runtimes where pid
//! comparison can mislead). The hook fires in both parent and child so both
//! sides remix their pools.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Once;

/// Process-wide flag raised by the atfork hook.
static ATFORK_FLAG: AtomicBool = AtomicBool::new(false);

static INSTALL_ONCE: Once = Once::new();

#[cfg(unix)]
extern "C" fn atfork_handler() {
    ATFORK_FLAG.store(true, Ordering::SeqCst);
}

/// Install the process-wide child hook. Idempotent; bound once at device
/// init.
pub fn install_child_hook() {
    INSTALL_ONCE.call_once(|| {
        #[cfg(unix)]
        // SAFETY: pthread_atfork registers async-signal-safe handlers; ours
        // only stores to an atomic.
        unsafe {
            libc::pthread_atfork(None, Some(atfork_handler), Some(atfork_handler));
        }
    });
}

fn current_pid() -> i32 {
    #[cfg(unix)]
    // SAFETY: getpid() is a read-only syscall.
    unsafe {
        libc::getpid()
    }
    #[cfg(not(unix))]
    {
        std::process::id() as i32
    }
}

/// Consume-on-read fork detector.
///
/// [`check`](ForkDetector::check) returns `true` exactly once on the
/// post-fork execution path; the caller that consumes the positive result is
/// responsible for marking the pool reseed-required.
pub struct ForkDetector {
    original_pid: AtomicI32,
    marked: AtomicBool,
}

impl ForkDetector {
    pub fn new() -> Self {
        Self {
            original_pid: AtomicI32::new(current_pid()),
            marked: AtomicBool::new(false),
        }
    }

    /// Has the process forked since the last check? Consumes the positive
    /// result.
    pub fn check(&self) -> bool {
        if self.marked.swap(false, Ordering::SeqCst) {
            return true;
        }
        if ATFORK_FLAG.swap(false, Ordering::SeqCst) {
            self.original_pid.store(current_pid(), Ordering::SeqCst);
            return true;
        }
        let pid = current_pid();
        if pid != self.original_pid.swap(pid, Ordering::SeqCst) {
            return true;
        }
        false
    }

    /// Raise the detector's own flag. Used by tests simulating a fork and by
    /// embedders with their own fork notification.
    pub fn mark(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }
}

impl Default for ForkDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_is_consume_on_read() {
        let detector = ForkDetector::new();
        assert!(!detector.check());
        detector.mark();
        assert!(detector.check());
        assert!(!detector.check());
    }

    #[test]
    fn install_hook_is_idempotent() {
        install_child_hook();
        install_child_hook();
    }
}
