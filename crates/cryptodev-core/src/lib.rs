//! # cryptodev-core
//!
//! A continuously-seeded CSPRNG with its platform entropy-gathering layer,
//! an auxiliary nonce generator, a capability/self-test dispatcher, and a
//! certificate trust cache, all exposed through one message-dispatch
//! "system device" object.
//!
//! ## Quick start
//!
//! ```no_run
//! use cryptodev_core::SystemDevice;
//!
//! let device = SystemDevice::new();
//!
//! // First output drives a slow entropy poll if the pool isn't ready.
//! let mut key_material = [0u8; 32];
//! device.get_random(&mut key_material)?;
//!
//! // Nonces come from a separate hash-chain generator so freshness
//! // values don't drain the critical pool.
//! let mut serial = [0u8; 16];
//! device.get_nonce(&mut serial)?;
//!
//! // Prove the algorithm and mechanism implementations before use.
//! device.self_test()?;
//! # Ok::<(), cryptodev_core::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Sources → poll drivers → pool → device, with the nonce generator,
//! capability registry, and trust cache hanging off the device:
//!
//! - [`source`]/[`sources`]: platform probes producing bytes plus a
//!   self-declared quality score, grouped into fast and slow classes.
//! - [`pool`]: the entropy accumulator: sponge-style mixing, quality
//!   accounting, fork-aware reseeding, a continuous output check.
//! - [`poll`]: synchronous fast polls and a single-flight background slow
//!   poll that feeds the device by message.
//! - [`nonce`]: a checksummed hash-chain generator keyed once from the
//!   pool.
//! - [`capability`]/[`mechanism`]: the algorithm registry with per-entry
//!   known-answer tests, and the derive/sign/wrap/KDF mechanism KATs.
//! - [`trust`]: a 256-bucket cache of trusted certificates with lazy
//!   materialisation from stored encoded form.
//! - [`device`]: the message-dispatch object tying it together under the
//!   lock/suspend discipline.

pub mod capability;
pub mod cert;
pub mod der;
pub mod device;
pub mod error;
pub mod fork;
pub mod mechanism;
pub mod nonce;
pub mod poll;
pub mod pool;
pub mod source;
pub mod sources;
pub mod trust;
pub mod util;

pub use capability::{AlgoId, Capability, CapabilityList, OpVtable};
pub use cert::{create_cert_indirect, create_cert_with_binding, CertHandle, KeyBinding};
pub use device::{DeviceFlags, Message, ObjectKind, Reply, SystemDevice};
pub use error::{Error, KatKind, Result};
pub use nonce::NonceState;
pub use poll::PollKind;
pub use pool::RandomPool;
pub use source::{EntropySource, SourceInfo, Speed};
pub use trust::{TrustId, TrustTable};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
