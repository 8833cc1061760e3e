//! Crate-wide error type.
//!
//! Errors inside background entropy polls are swallowed (a failing probe just
//! contributes zero quality); everything on the caller-facing paths (output
//! extraction, self-tests, trust management, object creation) surfaces
//! through [`Error`].

use crate::capability::AlgoId;

/// Which known-answer test tripped during a self-test sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KatKind {
    /// A per-algorithm capability test.
    Algorithm(AlgoId),
    /// The key-derivation mechanism test.
    Derive,
    /// The key-derivation-function mechanism test.
    Kdf,
    /// The signature-block encoding mechanism test.
    Signature,
    /// The key-wrap encoding mechanism test.
    Wrap,
}

impl std::fmt::Display for KatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Algorithm(algo) => write!(f, "algorithm {algo}"),
            Self::Derive => write!(f, "derive mechanism"),
            Self::Kdf => write!(f, "KDF mechanism"),
            Self::Signature => write!(f, "signature mechanism"),
            Self::Wrap => write!(f, "key-wrap mechanism"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Output was requested while pool quality is below 100 and a slow poll
    /// could not raise it.
    #[error("insufficient entropy to satisfy randomness request")]
    InsufficientEntropy,

    /// The output sanity gate tripped. Fatal for the device: every later
    /// randomness request fails with the same error.
    #[error("random number generator continuous check failed")]
    RngCheckFailed,

    /// Dispatch attempted through an absent capability vtable slot.
    #[error("capability does not implement the requested operation")]
    CapabilityMissing,

    /// A known-answer test failed.
    #[error("self-test failed: {0}")]
    CapabilityKatFailed(KatKind),

    /// Every registered capability failed its self-test (or none were
    /// registered to begin with).
    #[error("no capabilities passed their self-tests")]
    NoCapabilities,

    /// The certificate is already present in the trust cache.
    #[error("certificate is already trusted")]
    TrustDuplicate,

    /// No trust entry matches the given identity.
    #[error("no matching trust entry")]
    TrustNotFound,

    /// A chain add found nothing new to insert.
    #[error("trust information already initialised, no new entries added")]
    TrustAlreadyInited,

    /// Malformed DER data, propagated verbatim from the reader.
    #[error("encoding parse failed: {0}")]
    ParseFailed(&'static str),

    /// Allocation failure, propagated upward.
    #[error("memory allocation failed")]
    MemoryExhausted,

    /// Message received after `Destroy` was initiated.
    #[error("device is shutting down")]
    DeviceShuttingDown,

    /// Internal consistency failure (integrity checksum mismatch, poisoned
    /// lock, and similar shouldn't-occur conditions).
    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
