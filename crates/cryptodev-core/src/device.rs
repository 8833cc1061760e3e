//! The system device object.
//!
//! Every externally-visible service (randomness, nonces, entropy feeding,
//! polling, self-tests, trust management, object creation) arrives as a
//! [`Message`] and is dispatched exhaustively. The device owns the entropy
//! pool, schedules polling, and enforces the lock/suspend discipline.
//!
//! Two locks matter. The *object lock* (`state`) covers the nonce state,
//! the capability registry, the trust table, and the flags. The *randomness
//! mutex* (`random`) covers the pool and the fork detector. Long operations
//! (randomness extraction around a slow poll, entropy feeding, the
//! mechanism self-test phase) run *suspended*: without the object lock, so
//! background gatherers can deliver entropy through the normal message path
//! while a caller waits:
//!
//! ```text
//!             device          randomness
//!             ------          ----------
//! get_random --->|                |
//!            [suspend]            |
//!                |--------------->|
//!                |                |
//!                |<===============| entropy
//!                |<===============| entropy quality
//!                |                |
//!                |<---------------|
//!            [resume]             |
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::capability::CapabilityList;
use crate::cert::{self, CertHandle};
use crate::error::{Error, Result};
use crate::fork::{self, ForkDetector};
use crate::mechanism;
use crate::nonce::{NonceState, NONCE_PRIVATE_SIZE};
use crate::poll::{PollDriver, PollKind};
use crate::pool::{RandomPool, POISON, QUALITY_THRESHOLD};
use crate::trust::{TrustId, TrustTable};

/// Reject wall-clock readings earlier than this (2020-01-01); a clock that
/// far off is not a usable time source.
const MIN_RELIABLE_TIME_SECS: u64 = 1_577_836_800;

/// Kinds of object the device can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Certificate,
}

/// A message sent to the device. Payload-carrying variants borrow the
/// caller's buffers; nothing is copied on the way in.
pub enum Message<'a> {
    /// Fill the buffer with CSPRNG output.
    GetRandom(&'a mut [u8]),
    /// Fill the buffer from the nonce sub-generator.
    GetNonce(&'a mut [u8]),
    /// Absorb entropy bytes into the pool.
    AddEntropy(&'a [u8]),
    /// Advance the pool quality estimate.
    AddEntropyQuality(u8),
    /// Run a fast or slow entropy poll.
    Poll(PollKind),
    /// High-reliability wall-clock time.
    GetTime,
    /// Run the algorithm and mechanism self-tests.
    SelfTest,
    /// Trust a certificate.
    TrustAdd(CertHandle),
    /// Trust every certificate in a chain.
    TrustAddChain(&'a [CertHandle]),
    /// Trust a certificate in stored encoded form.
    TrustAddEncoded(&'a [u8]),
    /// Remove a trust entry.
    TrustDelete(TrustId),
    /// Look up the trust entry for a certificate's subject or issuer.
    TrustFind { cert: CertHandle, issuer: bool },
    /// Materialise and return the certificate behind a trust entry.
    TrustGetCert(TrustId),
    /// Visit every trusted certificate.
    TrustEnumerate(&'a mut dyn FnMut(&CertHandle) -> Result<()>),
    /// Whether any trusted certificates are present.
    TrustIsPopulated,
    /// Create an object from encoded data.
    CreateObject {
        kind: ObjectKind,
        encoded: &'a [u8],
    },
    /// Tear the device down.
    Destroy,
}

/// Reply to a dispatched message.
#[derive(Clone)]
pub enum Reply {
    Ok,
    Time(SystemTime),
    TrustEntry(Option<TrustId>),
    Cert(CertHandle),
    Bool(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceFlags {
    /// Initialisation completed.
    pub active: bool,
    /// The single default-user identity is considered logged in.
    pub logged_in: bool,
    /// The device can serve as a time source.
    pub time_source: bool,
}

struct DeviceState {
    nonce: NonceState,
    capabilities: CapabilityList,
    trust: TrustTable,
    flags: DeviceFlags,
    label: &'static str,
}

/// Pool plus fork detector, guarded by the randomness mutex.
struct RandomInfo {
    pool: RandomPool,
    forks: ForkDetector,
}

pub struct SystemDevice {
    /// Self-reference handed to background workers so they can message the
    /// device from their own threads.
    self_ref: Weak<SystemDevice>,
    /// Object lock.
    state: Mutex<DeviceState>,
    /// Randomness mutex.
    random: Mutex<RandomInfo>,
    poll: PollDriver,
    /// Fatal-error latch. Once set, every randomness request fails with the
    /// latched error.
    fatal: Mutex<Option<Error>>,
    shutdown: AtomicBool,
    /// Number of callers currently running suspended.
    suspend_count: AtomicI32,
}

/// RAII marker for a suspended caller.
struct SuspendGuard<'a> {
    device: &'a SystemDevice,
}

impl SystemDevice {
    /// Create and initialise the system device: capability registry built
    /// from the intrinsic table, randomness subsystem at quality zero, fork
    /// hook installed, flags raised.
    pub fn new() -> Arc<Self> {
        fork::install_child_hook();
        Arc::new_cyclic(|self_ref| Self {
            self_ref: Weak::clone(self_ref),
            state: Mutex::new(DeviceState {
                nonce: NonceState::new(),
                capabilities: CapabilityList::builtin(),
                trust: TrustTable::new(),
                flags: DeviceFlags {
                    active: true,
                    logged_in: true,
                    time_source: true,
                },
                label: "cryptodev system device",
            }),
            random: Mutex::new(RandomInfo {
                pool: RandomPool::new(),
                forks: ForkDetector::new(),
            }),
            poll: PollDriver::new(),
            fatal: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            suspend_count: AtomicI32::new(0),
        })
    }

    /// Dispatch one message. Exhaustive over the message set; every arm
    /// manages its own locking so the suspension points are explicit.
    pub fn dispatch(&self, msg: Message<'_>) -> Result<Reply> {
        if let Message::Destroy = msg {
            return self.destroy().map(|()| Reply::Ok);
        }
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::DeviceShuttingDown);
        }

        match msg {
            Message::GetRandom(buf) => {
                let _suspended = self.suspend();
                self.get_random_internal(buf)?;
                Ok(Reply::Ok)
            }
            Message::GetNonce(buf) => {
                self.get_nonce_internal(buf)?;
                Ok(Reply::Ok)
            }
            Message::AddEntropy(data) => {
                // Feeding can take a while and must never serialise against
                // readers, so it always runs suspended.
                let _suspended = self.suspend();
                self.random.lock().unwrap().pool.add_entropy(data);
                Ok(Reply::Ok)
            }
            Message::AddEntropyQuality(quality) => {
                let _suspended = self.suspend();
                self.random.lock().unwrap().pool.add_quality(quality);
                Ok(Reply::Ok)
            }
            Message::Poll(kind) => {
                let _suspended = self.suspend();
                match kind {
                    PollKind::Fast => self.poll.fast_poll(&self.arc()),
                    PollKind::Slow => self.poll.slow_poll(&self.arc()),
                }
                Ok(Reply::Ok)
            }
            Message::GetTime => self.reliable_time().map(Reply::Time),
            Message::SelfTest => {
                self.self_test_internal()?;
                Ok(Reply::Ok)
            }
            Message::TrustAdd(cert) => {
                let mut state = self.state.lock().unwrap();
                state.trust.add_cert(&cert)?;
                Ok(Reply::Ok)
            }
            Message::TrustAddChain(chain) => {
                let mut state = self.state.lock().unwrap();
                state.trust.add_chain(chain)?;
                Ok(Reply::Ok)
            }
            Message::TrustAddEncoded(encoded) => {
                let mut state = self.state.lock().unwrap();
                state.trust.add_encoded(encoded)?;
                Ok(Reply::Ok)
            }
            Message::TrustDelete(id) => {
                let mut state = self.state.lock().unwrap();
                state.trust.delete(id)?;
                Ok(Reply::Ok)
            }
            Message::TrustFind { cert, issuer } => {
                let state = self.state.lock().unwrap();
                Ok(Reply::TrustEntry(state.trust.find(&cert, issuer)))
            }
            Message::TrustGetCert(id) => {
                let mut state = self.state.lock().unwrap();
                state.trust.cert_for(id).map(Reply::Cert)
            }
            Message::TrustEnumerate(visitor) => {
                let mut state = self.state.lock().unwrap();
                state.trust.enumerate(visitor)?;
                Ok(Reply::Ok)
            }
            Message::TrustIsPopulated => {
                let state = self.state.lock().unwrap();
                Ok(Reply::Bool(state.trust.is_populated()))
            }
            Message::CreateObject { kind, encoded } => match kind {
                ObjectKind::Certificate => {
                    cert::create_cert_indirect(encoded).map(Reply::Cert)
                }
            },
            Message::Destroy => unreachable!("handled before the shutdown gate"),
        }
    }

    // -- randomness -------------------------------------------------------

    /// CSPRNG output. Runs without the object lock; the pool's own mutex is
    /// the only serialisation, which is what lets gatherer threads feed the
    /// device while a caller sits in here waiting on a slow poll.
    fn get_random_internal(&self, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        // Poison first: every failure path below leaves the buffer
        // unambiguously invalid.
        out.fill(POISON);
        self.check_fatal()?;

        {
            let mut random = self.random.lock().unwrap();
            if random.forks.check() {
                random.pool.mark_reseed();
            }
            if random.pool.reseed_pending() {
                random.pool.reseed();
            }
            if random.pool.quality() >= QUALITY_THRESHOLD {
                return self.extract_latching(&mut random, out);
            }
        }

        // Not enough accumulated entropy: drive a slow poll and block on
        // its completion, then try once more.
        self.poll.slow_poll(&self.arc());
        self.poll.wait_for_completion(false)?;

        let mut random = self.random.lock().unwrap();
        if random.pool.reseed_pending() {
            random.pool.reseed();
        }
        if random.pool.quality() >= QUALITY_THRESHOLD {
            self.extract_latching(&mut random, out)
        } else {
            Err(Error::InsufficientEntropy)
        }
    }

    fn extract_latching(&self, random: &mut RandomInfo, out: &mut [u8]) -> Result<()> {
        match random.pool.extract(out) {
            Err(Error::RngCheckFailed) => {
                *self.fatal.lock().unwrap() = Some(Error::RngCheckFailed);
                log::warn!("randomness continuous check failed, device latched");
                Err(Error::RngCheckFailed)
            }
            other => other,
        }
    }

    fn check_fatal(&self) -> Result<()> {
        match &*self.fatal.lock().unwrap() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Nonce output.
    ///
    /// First use has to pull from the CSPRNG, which may in turn trigger an
    /// entropy poll; doing that under the object lock would stall every
    /// other message to the device. Instead, a one-byte random read runs
    /// first, serialised by the randomness mutex, which this path borrows
    /// as its init lock. Two threads can still race past the init check,
    /// but the second finds the state initialised and skips; the worst case
    /// is a redundant RNG pull, not a double init.
    fn get_nonce_internal(&self, out: &mut [u8]) -> Result<()> {
        let needs_init = {
            let state = self.state.lock().unwrap();
            !state.nonce.is_initialised()
        };

        if needs_init {
            let mut first = Zeroizing::new([0u8; 1]);
            self.get_random_internal(&mut *first)?;

            // The 64-bit private portion. One retry, then the wall clock:
            // aborting over an unobtainable no-value nonce helps nobody,
            // and a genuinely dead RNG is caught at key generation.
            let mut seed = Zeroizing::new([0u8; NONCE_PRIVATE_SIZE]);
            let seeded = self
                .get_random_internal(&mut *seed)
                .or_else(|_| self.get_random_internal(&mut *seed));

            let mut state = self.state.lock().unwrap();
            if !state.nonce.is_initialised() {
                match seeded {
                    Ok(()) => state.nonce.init_with_seed(&seed)?,
                    Err(_) => state.nonce.init_with_time()?,
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.nonce.generate(out)
    }

    // -- self-test --------------------------------------------------------

    fn self_test_internal(&self) -> Result<()> {
        // The self-tests need randomness for some of their operations;
        // prime both generators up front so a lack of entropy surfaces
        // here rather than somewhere deep inside the crypto code.
        let mut scratch = Zeroizing::new([0u8; 8]);
        {
            let _suspended = self.suspend();
            self.get_random_internal(&mut *scratch)?;
        }
        self.get_nonce_internal(&mut *scratch)?;

        // Algorithm sweep, under the object lock: failing capabilities are
        // pruned from the registry as they are found.
        let algorithm_status = {
            let mut state = self.state.lock().unwrap();
            state.capabilities.run_self_tests()
        };
        algorithm_status?;

        // The mechanism tests are lengthy and touch no device state, so
        // they run suspended.
        let _suspended = self.suspend();
        mechanism::self_test()
    }

    // -- control ----------------------------------------------------------

    fn reliable_time(&self) -> Result<SystemTime> {
        let now = SystemTime::now();
        let secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if secs < MIN_RELIABLE_TIME_SECS {
            return Err(Error::Internal("system clock is not a reliable source"));
        }
        Ok(now)
    }

    fn destroy(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Err(Error::DeviceShuttingDown);
        }

        // Stop background work first so nothing feeds a pool that is about
        // to be wiped; the gatherer's late messages bounce off the
        // shutdown gate.
        let _ = self.poll.wait_for_completion(true);

        {
            let mut random = self.random.lock().unwrap();
            random.pool.reseed();
        }
        let mut state = self.state.lock().unwrap();
        state.nonce = NonceState::new();
        state.trust.clear();
        state.capabilities = CapabilityList::from_table(&[]);
        state.flags.active = false;
        state.flags.logged_in = false;
        Ok(())
    }

    fn suspend(&self) -> SuspendGuard<'_> {
        self.suspend_count.fetch_add(1, Ordering::SeqCst);
        SuspendGuard { device: self }
    }

    /// Owned handle to this device. The self-reference is set at
    /// construction and outlives every call path that can reach here.
    fn arc(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("device self-reference valid for its whole lifetime")
    }

    /// Consult the fork detector on behalf of the poll driver; a positive
    /// result marks the pool for reseeding.
    pub(crate) fn note_fork_check(&self) {
        let mut random = self.random.lock().unwrap();
        if random.forks.check() {
            random.pool.mark_reseed();
        }
    }

    // -- introspection and convenience wrappers ---------------------------

    pub fn poll_driver(&self) -> &PollDriver {
        &self.poll
    }

    /// Current pool quality estimate.
    pub fn pool_quality(&self) -> u8 {
        self.random.lock().unwrap().pool.quality()
    }

    /// Device flags snapshot.
    pub fn flags(&self) -> DeviceFlags {
        self.state.lock().unwrap().flags
    }

    /// Device label.
    pub fn label(&self) -> &'static str {
        self.state.lock().unwrap().label
    }

    /// Number of capabilities currently registered.
    pub fn capability_count(&self) -> usize {
        self.state.lock().unwrap().capabilities.len()
    }

    /// Callers currently running suspended.
    pub fn suspended_callers(&self) -> i32 {
        self.suspend_count.load(Ordering::SeqCst)
    }

    /// Simulate a fork for fork-isolation testing: raises the detector's
    /// flag exactly as the child hook would.
    pub fn mark_forked(&self) {
        self.random.lock().unwrap().forks.mark();
    }

    pub fn get_random(&self, buf: &mut [u8]) -> Result<()> {
        self.dispatch(Message::GetRandom(buf)).map(|_| ())
    }

    pub fn get_nonce(&self, buf: &mut [u8]) -> Result<()> {
        self.dispatch(Message::GetNonce(buf)).map(|_| ())
    }

    pub fn add_entropy(&self, data: &[u8]) -> Result<()> {
        self.dispatch(Message::AddEntropy(data)).map(|_| ())
    }

    pub fn add_entropy_quality(&self, quality: u8) -> Result<()> {
        self.dispatch(Message::AddEntropyQuality(quality)).map(|_| ())
    }

    pub fn run_poll(&self, kind: PollKind) -> Result<()> {
        self.dispatch(Message::Poll(kind)).map(|_| ())
    }

    pub fn time(&self) -> Result<SystemTime> {
        match self.dispatch(Message::GetTime)? {
            Reply::Time(t) => Ok(t),
            _ => Err(Error::Internal("unexpected reply kind")),
        }
    }

    pub fn self_test(&self) -> Result<()> {
        self.dispatch(Message::SelfTest).map(|_| ())
    }

    pub fn trust_add(&self, cert: &CertHandle) -> Result<()> {
        self.dispatch(Message::TrustAdd(CertHandle::clone(cert)))
            .map(|_| ())
    }

    pub fn trust_add_chain(&self, chain: &[CertHandle]) -> Result<()> {
        self.dispatch(Message::TrustAddChain(chain)).map(|_| ())
    }

    pub fn trust_add_encoded(&self, encoded: &[u8]) -> Result<()> {
        self.dispatch(Message::TrustAddEncoded(encoded)).map(|_| ())
    }

    pub fn trust_delete(&self, id: TrustId) -> Result<()> {
        self.dispatch(Message::TrustDelete(id)).map(|_| ())
    }

    pub fn trust_find(&self, cert: &CertHandle, issuer: bool) -> Result<Option<TrustId>> {
        match self.dispatch(Message::TrustFind {
            cert: CertHandle::clone(cert),
            issuer,
        })? {
            Reply::TrustEntry(entry) => Ok(entry),
            _ => Err(Error::Internal("unexpected reply kind")),
        }
    }

    pub fn trust_cert(&self, id: TrustId) -> Result<CertHandle> {
        match self.dispatch(Message::TrustGetCert(id))? {
            Reply::Cert(cert) => Ok(cert),
            _ => Err(Error::Internal("unexpected reply kind")),
        }
    }

    pub fn trust_enumerate(
        &self,
        visitor: &mut dyn FnMut(&CertHandle) -> Result<()>,
    ) -> Result<()> {
        self.dispatch(Message::TrustEnumerate(visitor)).map(|_| ())
    }

    pub fn trust_is_populated(&self) -> Result<bool> {
        match self.dispatch(Message::TrustIsPopulated)? {
            Reply::Bool(populated) => Ok(populated),
            _ => Err(Error::Internal("unexpected reply kind")),
        }
    }

    pub fn create_certificate(&self, encoded: &[u8]) -> Result<CertHandle> {
        match self.dispatch(Message::CreateObject {
            kind: ObjectKind::Certificate,
            encoded,
        })? {
            Reply::Cert(cert) => Ok(cert),
            _ => Err(Error::Internal("unexpected reply kind")),
        }
    }

    pub fn destroy_device(&self) -> Result<()> {
        self.dispatch(Message::Destroy).map(|_| ())
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.device.suspend_count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for SystemDevice {
    fn drop(&mut self) {
        // Belt and braces: a device dropped without an explicit Destroy
        // still stops its gatherer and wipes through the members' own Drop
        // impls.
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.poll.wait_for_completion(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::der::testutil::dummy_cert;
    use std::time::Duration;

    /// Bring a device to full quality without waiting on real polling.
    fn prime(device: &Arc<SystemDevice>) {
        device.add_entropy(&[0x5A; 256]).unwrap();
        device.add_entropy_quality(100).unwrap();
    }

    #[test]
    fn primed_device_serves_randomness() {
        let device = SystemDevice::new();
        prime(&device);
        let mut buf = [0u8; 64];
        device.get_random(&mut buf).unwrap();
        let mut buf2 = [0u8; 64];
        device.get_random(&mut buf2).unwrap();
        assert_ne!(buf, buf2);
    }

    #[test]
    fn quality_messages_cap_at_threshold() {
        let device = SystemDevice::new();
        device.add_entropy_quality(70).unwrap();
        device.add_entropy_quality(70).unwrap();
        assert_eq!(device.pool_quality(), 100);
    }

    #[test]
    fn nonce_first_use_initialises_via_rng() {
        let device = SystemDevice::new();
        prime(&device);
        let mut a = [0u8; 20];
        let mut b = [0u8; 20];
        device.get_nonce(&mut a).unwrap();
        device.get_nonce(&mut b).unwrap();
        assert_ne!(a, b, "nonce stream must advance");
    }

    #[test]
    fn fork_mark_forces_reseed_on_next_output() {
        let device = SystemDevice::new();
        prime(&device);
        let mut buf = [0u8; 16];
        device.get_random(&mut buf).unwrap();

        device.mark_forked();
        assert_eq!(
            device.pool_quality(),
            100,
            "mark alone must not touch the pool"
        );

        // The next read consumes the flag and reseeds (quality back to 0),
        // then drives a slow poll. Depending on what the machine's sources
        // deliver, the read either completes at a fresh quality 100 or is
        // refused; both prove the reseed ran.
        match device.get_random(&mut buf) {
            Ok(()) => assert_eq!(device.pool_quality(), 100),
            Err(Error::InsufficientEntropy) => assert!(device.pool_quality() < 100),
            Err(other) => panic!("unexpected error: {other}"),
        }

        // The flag was consumed: a re-primed pool serves output again
        // without another reseed.
        prime(&device);
        device.get_random(&mut buf).unwrap();
    }

    #[test]
    fn continuous_check_failure_latches_device() {
        let device = SystemDevice::new();
        prime(&device);
        {
            // Arrange the pool so its next block collides with the
            // recorded previous block.
            let mut random = device.random.lock().unwrap();
            let next = random.pool.peek_next_block();
            random.pool.set_last_output(next);
        }

        let mut buf = [0u8; 16];
        assert!(matches!(
            device.get_random(&mut buf),
            Err(Error::RngCheckFailed)
        ));
        assert_eq!(buf, [0xAA; 16], "failure must leave the poison fill");

        // The failure latched: a healthy pool no longer helps.
        assert!(matches!(
            device.get_random(&mut buf),
            Err(Error::RngCheckFailed)
        ));
    }

    #[test]
    fn fatal_latch_sticks() {
        let device = SystemDevice::new();
        prime(&device);
        *device.fatal.lock().unwrap() = Some(Error::RngCheckFailed);

        let mut buf = [0u8; 16];
        for _ in 0..3 {
            assert!(matches!(
                device.get_random(&mut buf),
                Err(Error::RngCheckFailed)
            ));
        }
        // Non-randomness paths keep working.
        device.time().unwrap();
    }

    #[test]
    fn self_test_passes_and_keeps_registry_intact() {
        let device = SystemDevice::new();
        prime(&device);
        device.self_test().unwrap();
        assert_eq!(device.capability_count(), 5);
    }

    #[test]
    fn trust_round_trip_through_messages() {
        let device = SystemDevice::new();
        let encoded = dummy_cert(b"Msg Root", b"Msg Leaf");
        let cert = device.create_certificate(&encoded).unwrap();

        assert!(!device.trust_is_populated().unwrap());
        device.trust_add(&cert).unwrap();
        assert!(device.trust_is_populated().unwrap());

        let id = device.trust_find(&cert, false).unwrap().unwrap();
        let fetched = device.trust_cert(id).unwrap();
        assert_eq!(fetched.subject_dn(), cert.subject_dn());

        device.trust_delete(id).unwrap();
        assert!(device.trust_find(&cert, false).unwrap().is_none());
    }

    #[test]
    fn destroyed_device_rejects_everything() {
        let device = SystemDevice::new();
        prime(&device);
        device.destroy_device().unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(
            device.get_random(&mut buf),
            Err(Error::DeviceShuttingDown)
        ));
        assert!(matches!(
            device.add_entropy(&[1, 2, 3]),
            Err(Error::DeviceShuttingDown)
        ));
        assert!(matches!(
            device.destroy_device(),
            Err(Error::DeviceShuttingDown)
        ));
        assert!(!device.flags().active);
        assert_eq!(device.capability_count(), 0);
    }

    #[test]
    fn concurrent_feeding_during_extraction() {
        let device = SystemDevice::new();
        prime(&device);

        let feeder = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                for i in 0..50u8 {
                    device.add_entropy(&[i; 32]).unwrap();
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let mut buf = [0u8; 32];
        for _ in 0..50 {
            device.get_random(&mut buf).unwrap();
        }
        feeder.join().unwrap();
        assert_eq!(device.pool_quality(), 100);
    }

    #[test]
    fn time_is_reliable_or_refused() {
        let device = SystemDevice::new();
        let t = device.time().unwrap();
        assert!(t.duration_since(UNIX_EPOCH).unwrap().as_secs() >= MIN_RELIABLE_TIME_SECS);
    }
}
