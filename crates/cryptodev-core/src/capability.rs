//! Capability registry and algorithm self-test.
//!
//! Each cryptographic primitive the device offers is wrapped in a
//! [`Capability`]: an algorithm identifier, a display name, an operation
//! vtable with `Option`-typed slots, and a known-answer self-test. The
//! registry is a singly-linked ownership list whose head is only mutated at
//! device init and during self-test pruning; normal operation sees a stable
//! snapshot.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hex_literal::hex;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, KatKind, Result};

/// Algorithm identifiers for the intrinsic capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoId {
    Aes,
    Sha1,
    Sha256,
    HmacSha1,
    HmacSha256,
    /// Reserved for externally-registered algorithms.
    Vendor,
}

impl std::fmt::Display for AlgoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes => write!(f, "AES"),
            Self::Sha1 => write!(f, "SHA-1"),
            Self::Sha256 => write!(f, "SHA-256"),
            Self::HmacSha1 => write!(f, "HMAC-SHA1"),
            Self::HmacSha256 => write!(f, "HMAC-SHA256"),
            Self::Vendor => write!(f, "vendor"),
        }
    }
}

/// Operation vtable. Slots a capability does not implement stay `None`; the
/// dispatcher checks presence before calling through.
#[derive(Clone, Copy)]
pub struct OpVtable {
    pub encrypt: Option<fn(key: &[u8], block: &mut [u8]) -> Result<()>>,
    pub decrypt: Option<fn(key: &[u8], block: &mut [u8]) -> Result<()>>,
    pub hash: Option<fn(data: &[u8]) -> Vec<u8>>,
    pub mac: Option<fn(key: &[u8], data: &[u8]) -> Result<Vec<u8>>>,
    pub sign: Option<fn(key: &[u8], digest: &[u8]) -> Result<Vec<u8>>>,
    pub verify: Option<fn(key: &[u8], digest: &[u8], sig: &[u8]) -> Result<bool>>,
}

/// All-empty vtable for capabilities built up field by field.
pub const EMPTY_VTABLE: OpVtable = OpVtable {
    encrypt: None,
    decrypt: None,
    hash: None,
    mac: None,
    sign: None,
    verify: None,
};

/// One registered cryptographic capability.
#[derive(Clone, Copy)]
pub struct Capability {
    pub algo: AlgoId,
    pub name: &'static str,
    pub self_test: fn() -> Result<()>,
    pub ops: OpVtable,
}

/// Constructor table entry.
pub type CapabilityCtor = fn() -> Capability;

struct Node {
    cap: Capability,
    next: Option<Box<Node>>,
}

/// Singly-linked capability registry.
pub struct CapabilityList {
    head: Option<Box<Node>>,
}

impl CapabilityList {
    /// Build the list from a constructor table, preserving table order.
    pub fn from_table(table: &[CapabilityCtor]) -> Self {
        let mut list = Self { head: None };
        let mut tail = &mut list.head;
        for ctor in table {
            tail = &mut tail.insert(Box::new(Node {
                cap: ctor(),
                next: None,
            }))
            .next;
        }
        list
    }

    /// The intrinsic capability set.
    pub fn builtin() -> Self {
        Self::from_table(BUILTIN_CAPABILITIES)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        let mut cursor = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.next.as_deref();
            Some(&node.cap)
        })
    }

    pub fn find(&self, algo: AlgoId) -> Option<&Capability> {
        self.iter().find(|cap| cap.algo == algo)
    }

    pub fn contains(&self, algo: AlgoId) -> bool {
        self.find(algo).is_some()
    }

    /// Run every capability's self-test, unlinking the ones that fail.
    ///
    /// The sweep always completes; the status of the first failure is what
    /// gets reported. If nothing was ever tested successfully the registry
    /// is useless and the result is `NoCapabilities`.
    pub fn run_self_tests(&mut self) -> Result<()> {
        let mut first_failure: Option<Error> = None;
        let mut any_passed = false;

        let mut kept: Option<Box<Node>> = None;
        let mut tail = &mut kept;
        let mut cursor = self.head.take();
        while let Some(mut node) = cursor {
            cursor = node.next.take();
            match (node.cap.self_test)() {
                Ok(()) => {
                    any_passed = true;
                    tail = &mut tail.insert(node).next;
                }
                Err(err) => {
                    log::warn!(
                        "capability {} failed its self-test: {err}",
                        node.cap.name
                    );
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }
        self.head = kept;

        match first_failure {
            Some(err) => Err(err),
            None if !any_passed => Err(Error::NoCapabilities),
            None => Ok(()),
        }
    }

    /// Dispatch a block-encrypt through a capability's vtable.
    pub fn encrypt(&self, algo: AlgoId, key: &[u8], block: &mut [u8]) -> Result<()> {
        let cap = self.find(algo).ok_or(Error::CapabilityMissing)?;
        let op = cap.ops.encrypt.ok_or(Error::CapabilityMissing)?;
        op(key, block)
    }

    /// Dispatch a block-decrypt.
    pub fn decrypt(&self, algo: AlgoId, key: &[u8], block: &mut [u8]) -> Result<()> {
        let cap = self.find(algo).ok_or(Error::CapabilityMissing)?;
        let op = cap.ops.decrypt.ok_or(Error::CapabilityMissing)?;
        op(key, block)
    }

    /// Dispatch a hash.
    pub fn hash(&self, algo: AlgoId, data: &[u8]) -> Result<Vec<u8>> {
        let cap = self.find(algo).ok_or(Error::CapabilityMissing)?;
        let op = cap.ops.hash.ok_or(Error::CapabilityMissing)?;
        Ok(op(data))
    }

    /// Dispatch a MAC.
    pub fn mac(&self, algo: AlgoId, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let cap = self.find(algo).ok_or(Error::CapabilityMissing)?;
        let op = cap.ops.mac.ok_or(Error::CapabilityMissing)?;
        op(key, data)
    }

    /// Dispatch a signature. No intrinsic capability fills this slot, so the
    /// path exists to be refused correctly.
    pub fn sign(&self, algo: AlgoId, key: &[u8], digest: &[u8]) -> Result<Vec<u8>> {
        let cap = self.find(algo).ok_or(Error::CapabilityMissing)?;
        let op = cap.ops.sign.ok_or(Error::CapabilityMissing)?;
        op(key, digest)
    }
}

// ---------------------------------------------------------------------------
// Intrinsic capabilities
// ---------------------------------------------------------------------------

/// Constructor table for the intrinsic capability set.
pub static BUILTIN_CAPABILITIES: &[CapabilityCtor] = &[
    aes_capability,
    sha1_capability,
    sha256_capability,
    hmac_sha1_capability,
    hmac_sha256_capability,
];

fn aes_encrypt_block(key: &[u8], block: &mut [u8]) -> Result<()> {
    if block.len() != 16 {
        return Err(Error::Internal("AES block must be 16 bytes"));
    }
    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| Error::Internal("AES-128 key must be 16 bytes"))?;
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
    Ok(())
}

fn aes_decrypt_block(key: &[u8], block: &mut [u8]) -> Result<()> {
    if block.len() != 16 {
        return Err(Error::Internal("AES block must be 16 bytes"));
    }
    let cipher = Aes128::new_from_slice(key)
        .map_err(|_| Error::Internal("AES-128 key must be 16 bytes"))?;
    cipher.decrypt_block(GenericArray::from_mut_slice(block));
    Ok(())
}

/// FIPS-197 appendix C.1 single-block vector, run forward and back.
fn aes_self_test() -> Result<()> {
    const KEY: [u8; 16] = hex!("000102030405060708090a0b0c0d0e0f");
    const PLAIN: [u8; 16] = hex!("00112233445566778899aabbccddeeff");
    const CIPHER: [u8; 16] = hex!("69c4e0d86a7b0430d8cdb78070b4c55a");

    let mut block = PLAIN;
    aes_encrypt_block(&KEY, &mut block)?;
    if block != CIPHER {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(AlgoId::Aes)));
    }
    aes_decrypt_block(&KEY, &mut block)?;
    if block != PLAIN {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(AlgoId::Aes)));
    }
    Ok(())
}

pub fn aes_capability() -> Capability {
    Capability {
        algo: AlgoId::Aes,
        name: "AES-128",
        self_test: aes_self_test,
        ops: OpVtable {
            encrypt: Some(aes_encrypt_block),
            decrypt: Some(aes_decrypt_block),
            ..EMPTY_VTABLE
        },
    }
}

fn sha1_hash(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

fn sha1_self_test() -> Result<()> {
    if sha1_hash(b"abc") != hex!("a9993e364706816aba3e25717850c26c9cd0d89d") {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(AlgoId::Sha1)));
    }
    Ok(())
}

pub fn sha1_capability() -> Capability {
    Capability {
        algo: AlgoId::Sha1,
        name: "SHA-1",
        self_test: sha1_self_test,
        ops: OpVtable {
            hash: Some(sha1_hash),
            ..EMPTY_VTABLE
        },
    }
}

fn sha256_hash(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn sha256_self_test() -> Result<()> {
    if sha256_hash(b"abc")
        != hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(
            AlgoId::Sha256,
        )));
    }
    Ok(())
}

pub fn sha256_capability() -> Capability {
    Capability {
        algo: AlgoId::Sha256,
        name: "SHA-256",
        self_test: sha256_self_test,
        ops: OpVtable {
            hash: Some(sha256_hash),
            ..EMPTY_VTABLE
        },
    }
}

fn hmac_sha1_mac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .map_err(|_| Error::Internal("HMAC accepts any key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 2202 test case 1.
fn hmac_sha1_self_test() -> Result<()> {
    let tag = hmac_sha1_mac(&[0x0b; 20], b"Hi There")?;
    if tag != hex!("b617318655057264e28bc0b6fb378c8ef146be00") {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(
            AlgoId::HmacSha1,
        )));
    }
    Ok(())
}

pub fn hmac_sha1_capability() -> Capability {
    Capability {
        algo: AlgoId::HmacSha1,
        name: "HMAC-SHA1",
        self_test: hmac_sha1_self_test,
        ops: OpVtable {
            mac: Some(hmac_sha1_mac),
            ..EMPTY_VTABLE
        },
    }
}

fn hmac_sha256_mac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| Error::Internal("HMAC accepts any key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 4231 test case 1.
fn hmac_sha256_self_test() -> Result<()> {
    let tag = hmac_sha256_mac(&[0x0b; 20], b"Hi There")?;
    if tag != hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7") {
        return Err(Error::CapabilityKatFailed(KatKind::Algorithm(
            AlgoId::HmacSha256,
        )));
    }
    Ok(())
}

pub fn hmac_sha256_capability() -> Capability {
    Capability {
        algo: AlgoId::HmacSha256,
        name: "HMAC-SHA256",
        self_test: hmac_sha256_self_test,
        ops: OpVtable {
            mac: Some(hmac_sha256_mac),
            ..EMPTY_VTABLE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broken_capability() -> Capability {
        fn failing_test() -> Result<()> {
            Err(Error::CapabilityKatFailed(KatKind::Algorithm(
                AlgoId::Vendor,
            )))
        }
        Capability {
            algo: AlgoId::Vendor,
            name: "broken",
            self_test: failing_test,
            ops: EMPTY_VTABLE,
        }
    }

    #[test]
    fn builtin_list_preserves_table_order() {
        let list = CapabilityList::builtin();
        let names: Vec<_> = list.iter().map(|cap| cap.name).collect();
        assert_eq!(
            names,
            vec!["AES-128", "SHA-1", "SHA-256", "HMAC-SHA1", "HMAC-SHA256"]
        );
    }

    #[test]
    fn builtin_self_tests_all_pass() {
        let mut list = CapabilityList::builtin();
        list.run_self_tests().unwrap();
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn failing_capability_is_pruned_and_reported() {
        let mut list = CapabilityList::from_table(&[
            aes_capability,
            hmac_sha1_capability,
            broken_capability,
        ]);
        let err = list.run_self_tests().unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityKatFailed(KatKind::Algorithm(AlgoId::Vendor))
        ));
        let names: Vec<_> = list.iter().map(|cap| cap.name).collect();
        assert_eq!(names, vec!["AES-128", "HMAC-SHA1"]);

        // Survivors still dispatch normally.
        let mut block = hex!("00112233445566778899aabbccddeeff");
        list.encrypt(
            AlgoId::Aes,
            &hex!("000102030405060708090a0b0c0d0e0f"),
            &mut block,
        )
        .unwrap();
        assert_eq!(block, hex!("69c4e0d86a7b0430d8cdb78070b4c55a"));
    }

    #[test]
    fn all_failing_reports_no_capabilities() {
        let mut list = CapabilityList::from_table(&[broken_capability]);
        let err = list.run_self_tests().unwrap_err();
        // First-failure status wins over the empty-list condition.
        assert!(matches!(err, Error::CapabilityKatFailed(_)));
        assert!(list.is_empty());

        let mut empty = CapabilityList::from_table(&[]);
        assert!(matches!(
            empty.run_self_tests().unwrap_err(),
            Error::NoCapabilities
        ));
    }

    #[test]
    fn missing_vtable_slot_is_refused() {
        let list = CapabilityList::builtin();
        // SHA-1 has no mac slot, AES has no hash slot, nothing signs.
        assert!(matches!(
            list.mac(AlgoId::Sha1, b"key", b"data"),
            Err(Error::CapabilityMissing)
        ));
        assert!(matches!(
            list.hash(AlgoId::Aes, b"data"),
            Err(Error::CapabilityMissing)
        ));
        assert!(matches!(
            list.sign(AlgoId::Aes, b"key", b"digest"),
            Err(Error::CapabilityMissing)
        ));
        // Unknown algorithm entirely.
        assert!(matches!(
            list.hash(AlgoId::Vendor, b"data"),
            Err(Error::CapabilityMissing)
        ));
    }

    #[test]
    fn mac_dispatch_round_trips() {
        let list = CapabilityList::builtin();
        let tag = list.mac(AlgoId::HmacSha1, &[0x0b; 20], b"Hi There").unwrap();
        assert_eq!(
            hex::encode(tag),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
    }
}
