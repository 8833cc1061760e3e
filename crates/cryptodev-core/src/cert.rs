//! Certificate handles.
//!
//! The real certificate machinery lives outside this crate; the device and
//! trust cache only need a handle that carries the encoded form, the two
//! distinguished-name blocks, the self-signed flag, and what kind of key
//! context (if any) is attached. Handles are reference counted; clones share
//! the underlying certificate.

use std::sync::Arc;

use crate::der;
use crate::error::Result;

/// What kind of key context is attached to a certificate.
///
/// The trust cache refuses to keep private-key contexts alive (they may sit
/// in removable hardware, and should not linger in memory) and data-only
/// certificates have nothing to reference, so both cases are stored in
/// encoded form and re-materialised on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBinding {
    /// Data-only certificate, no context attached.
    None,
    /// Public-key context attached.
    Public,
    /// Private-key context attached.
    Private,
}

pub struct Certificate {
    encoded: Vec<u8>,
    issuer_dn: Vec<u8>,
    subject_dn: Vec<u8>,
    self_signed: bool,
    key_binding: KeyBinding,
}

/// Reference-counted certificate handle.
pub type CertHandle = Arc<Certificate>;

impl Certificate {
    /// Complete encoded form.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Encoded issuer DN block, header included.
    pub fn issuer_dn(&self) -> &[u8] {
        &self.issuer_dn
    }

    /// Encoded subject DN block, header included.
    pub fn subject_dn(&self) -> &[u8] {
        &self.subject_dn
    }

    /// Whether issuer and subject name coincide (a CA root).
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    pub fn key_binding(&self) -> KeyBinding {
        self.key_binding
    }
}

/// Instantiate a certificate from its encoded form.
///
/// This is the indirect-creation path used when trust entries are
/// materialised from stored data; the result carries a public-key binding.
pub fn create_cert_indirect(encoded: &[u8]) -> Result<CertHandle> {
    create_cert_with_binding(encoded, KeyBinding::Public)
}

/// Instantiate a certificate with an explicit key binding. Callers that
/// build certificates around existing key contexts (or around none) say so
/// here; the trust cache stores such certificates in encoded form.
pub fn create_cert_with_binding(encoded: &[u8], key_binding: KeyBinding) -> Result<CertHandle> {
    let (issuer, subject) = der::locate_dn_fields(encoded)?;
    let self_signed = issuer == subject;
    Ok(Arc::new(Certificate {
        issuer_dn: issuer.to_vec(),
        subject_dn: subject.to_vec(),
        encoded: encoded.to_vec(),
        self_signed,
        key_binding,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::der::testutil::dummy_cert;

    #[test]
    fn parse_extracts_dn_blocks() {
        let encoded = dummy_cert(b"Example Root", b"Example Leaf");
        let cert = create_cert_indirect(&encoded).unwrap();
        assert!(!cert.is_self_signed());
        assert_ne!(cert.issuer_dn(), cert.subject_dn());
        assert_eq!(cert.encoded(), &encoded[..]);
        assert_eq!(cert.key_binding(), KeyBinding::Public);
    }

    #[test]
    fn identical_names_mean_self_signed() {
        let encoded = dummy_cert(b"Example Root", b"Example Root");
        let cert = create_cert_indirect(&encoded).unwrap();
        assert!(cert.is_self_signed());
    }

    #[test]
    fn malformed_input_propagates_parse_failure() {
        assert!(create_cert_indirect(&[0x30, 0x01]).is_err());
    }

    #[test]
    fn handles_share_one_certificate() {
        let encoded = dummy_cert(b"I", b"S");
        let a = create_cert_indirect(&encoded).unwrap();
        let b = CertHandle::clone(&a);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
