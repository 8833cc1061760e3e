//! Trusted-certificate cache.
//!
//! What's being trusted is the certificate *subject*: entries are keyed by a
//! checksum-plus-hash of the encoded subject DN. The checksum is a cheap
//! prefilter that weeds out almost every entry before the 20-byte hash
//! comparison runs; the hash itself is computed lazily, on the first
//! checksum hit of a lookup.
//!
//! Certificates loaded from configuration arrive as encoded blobs and stay
//! that way until someone actually needs the certificate object; creating a
//! pile of objects that will never be used is exactly what this cache
//! exists to avoid. The stored encoding is wiped the moment the
//! materialised handle exists, so an entry never holds both forms.

use zeroize::{Zeroize, Zeroizing};

use crate::cert::{self, CertHandle, KeyBinding};
use crate::error::{Error, Result};
use crate::util::{checksum_data, hash_data, HASH_DATA_SIZE};

/// Number of hash buckets. Must be a power of two.
const TRUST_TABLE_SIZE: usize = 256;

/// Opaque identity of a trust entry, returned by lookups and accepted by
/// delete/materialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustId {
    check: u32,
    hash: [u8; HASH_DATA_SIZE],
}

struct TrustEntry {
    s_check: u32,
    s_hash: [u8; HASH_DATA_SIZE],
    /// Encoded form, present until materialisation.
    stored: Option<Zeroizing<Vec<u8>>>,
    /// Materialised handle, present from materialisation on.
    cert: Option<CertHandle>,
    next: Option<Box<TrustEntry>>,
}

impl TrustEntry {
    fn matches(&self, check: u32, hash: &[u8; HASH_DATA_SIZE]) -> bool {
        self.s_check == check && &self.s_hash == hash
    }

    /// The certificate object for this entry, created from the stored
    /// encoding on first use. A parse failure leaves the entry in its
    /// encoded state.
    fn materialise(&mut self) -> Result<CertHandle> {
        if let Some(handle) = &self.cert {
            return Ok(CertHandle::clone(handle));
        }
        let stored = self
            .stored
            .as_ref()
            .ok_or(Error::Internal("trust entry holds neither form"))?;
        let handle = cert::create_cert_indirect(stored)?;
        self.stored = None;
        self.cert = Some(CertHandle::clone(&handle));
        Ok(handle)
    }

    fn scrub(&mut self) {
        self.s_check = 0;
        self.s_hash.zeroize();
        self.stored = None;
        self.cert = None;
    }
}

pub struct TrustTable {
    buckets: Vec<Option<Box<TrustEntry>>>,
}

impl TrustTable {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(TRUST_TABLE_SIZE);
        buckets.resize_with(TRUST_TABLE_SIZE, || None);
        Self { buckets }
    }

    fn bucket_index(check: u32) -> usize {
        (check as usize) & (TRUST_TABLE_SIZE - 1)
    }

    /// Whether any trusted certificates are present at all.
    pub fn is_populated(&self) -> bool {
        self.buckets.iter().any(Option::is_some)
    }

    /// Number of entries chained in one bucket.
    pub fn bucket_len(&self, bucket: u8) -> usize {
        let mut count = 0;
        let mut cur = self.buckets[usize::from(bucket)].as_deref();
        while let Some(entry) = cur {
            count += 1;
            cur = entry.next.as_deref();
        }
        count
    }

    /// Total entry count.
    pub fn len(&self) -> usize {
        (0..TRUST_TABLE_SIZE).map(|b| self.bucket_len(b as u8)).sum()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_populated()
    }

    /// Find the trust entry for a certificate's subject, or with
    /// `issuer` set, for its issuer.
    ///
    /// Asking for the issuer of a self-signed certificate answers none:
    /// issuer name equals subject name there, so the lookup would just hand
    /// back the same certificate forever.
    pub fn find(&self, cert: &CertHandle, issuer: bool) -> Option<TrustId> {
        if issuer && cert.is_self_signed() {
            return None;
        }
        let name = if issuer {
            cert.issuer_dn()
        } else {
            cert.subject_dn()
        };
        self.find_name(name)
    }

    fn find_name(&self, name: &[u8]) -> Option<TrustId> {
        let check = checksum_data(name);
        let mut hash: Option<[u8; HASH_DATA_SIZE]> = None;

        let mut cur = self.buckets[Self::bucket_index(check)].as_deref();
        while let Some(entry) = cur {
            if entry.s_check == check {
                let hash = *hash.get_or_insert_with(|| hash_data(name));
                if entry.s_hash == hash {
                    return Some(TrustId { check, hash });
                }
            }
            cur = entry.next.as_deref();
        }
        None
    }

    /// Add a trusted certificate from an existing handle.
    ///
    /// A certificate with a private-key context attached (which shouldn't be
    /// kept hanging around in memory, and may live in removable hardware) or
    /// with no context at all is remembered in encoded form and
    /// re-materialised later; only a plain public-key certificate is
    /// referenced directly.
    pub fn add_cert(&mut self, cert: &CertHandle) -> Result<()> {
        let recreate = matches!(cert.key_binding(), KeyBinding::None | KeyBinding::Private);
        let check = checksum_data(cert.subject_dn());
        let hash = hash_data(cert.subject_dn());

        let (stored, handle) = if recreate {
            (Some(Zeroizing::new(cert.encoded().to_vec())), None)
        } else {
            (None, Some(CertHandle::clone(cert)))
        };
        self.insert(check, hash, stored, handle)
    }

    /// Add a trusted certificate from its encoded form, without creating a
    /// certificate object. This is the path configuration data arrives on.
    pub fn add_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        let (_, subject) = crate::der::locate_dn_fields(encoded)?;
        let check = checksum_data(subject);
        let hash = hash_data(subject);
        self.insert(
            check,
            hash,
            Some(Zeroizing::new(encoded.to_vec())),
            None,
        )
    }

    /// Add every element of a chain. Duplicates along the way are not
    /// fatal (the chain may carry certificates already trusted), but a
    /// chain that contributes nothing new at all is reported as such.
    pub fn add_chain(&mut self, chain: &[CertHandle]) -> Result<()> {
        let mut seen_non_duplicate = false;
        for cert in chain {
            match self.add_cert(cert) {
                Ok(()) => seen_non_duplicate = true,
                Err(Error::TrustDuplicate) => {}
                Err(err) => return Err(err),
            }
        }
        if !seen_non_duplicate {
            return Err(Error::TrustAlreadyInited);
        }
        Ok(())
    }

    fn insert(
        &mut self,
        check: u32,
        hash: [u8; HASH_DATA_SIZE],
        stored: Option<Zeroizing<Vec<u8>>>,
        cert: Option<CertHandle>,
    ) -> Result<()> {
        let bucket = &mut self.buckets[Self::bucket_index(check)];

        // Walk to the chain tail, refusing duplicates on the way.
        let mut cur = bucket;
        loop {
            match cur {
                Some(entry) if entry.matches(check, &hash) => {
                    return Err(Error::TrustDuplicate);
                }
                Some(entry) => cur = &mut entry.next,
                None => break,
            }
        }
        *cur = Some(Box::new(TrustEntry {
            s_check: check,
            s_hash: hash,
            stored,
            cert,
            next: None,
        }));
        Ok(())
    }

    /// The certificate object behind an entry, materialising it on first
    /// access. Subsequent calls return the same handle without re-parsing.
    pub fn cert_for(&mut self, id: TrustId) -> Result<CertHandle> {
        self.entry_mut(&id)
            .ok_or(Error::TrustNotFound)?
            .materialise()
    }

    fn entry_mut(&mut self, id: &TrustId) -> Option<&mut TrustEntry> {
        let mut cur = self.buckets[Self::bucket_index(id.check)].as_deref_mut();
        while let Some(entry) = cur {
            if entry.matches(id.check, &id.hash) {
                return Some(entry);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    /// Remove an entry, scrubbing everything it held.
    pub fn delete(&mut self, id: TrustId) -> Result<()> {
        let index = Self::bucket_index(id.check);
        let mut rebuilt: Option<Box<TrustEntry>> = None;
        let mut tail = &mut rebuilt;
        let mut cur = self.buckets[index].take();
        let mut found = false;

        while let Some(mut entry) = cur {
            cur = entry.next.take();
            if !found && entry.matches(id.check, &id.hash) {
                found = true;
                entry.scrub();
            } else {
                tail = &mut tail.insert(entry).next;
            }
        }
        self.buckets[index] = rebuilt;

        if found {
            Ok(())
        } else {
            Err(Error::TrustNotFound)
        }
    }

    /// Visit every trusted certificate, materialising entries as needed.
    /// The first visitor error aborts the walk.
    pub fn enumerate(
        &mut self,
        visitor: &mut dyn FnMut(&CertHandle) -> Result<()>,
    ) -> Result<()> {
        for bucket in self.buckets.iter_mut() {
            let mut cur = bucket.as_deref_mut();
            while let Some(entry) = cur {
                let handle = entry.materialise()?;
                visitor(&handle)?;
                cur = entry.next.as_deref_mut();
            }
        }
        Ok(())
    }

    /// Drop every entry, scrubbing as it goes.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let mut cur = bucket.take();
            while let Some(mut entry) = cur {
                cur = entry.next.take();
                entry.scrub();
            }
        }
    }
}

impl Default for TrustTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TrustTable {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::create_cert_with_binding;
    use crate::der::testutil::dummy_cert;

    fn leaf(subject: &[u8]) -> CertHandle {
        cert::create_cert_indirect(&dummy_cert(b"Test Root CA", subject)).unwrap()
    }

    #[test]
    fn add_find_delete_round_trip() {
        let mut table = TrustTable::new();
        let cert = leaf(b"server.example.com");

        table.add_cert(&cert).unwrap();
        let id = table.find(&cert, false).expect("entry must be found");

        let check = checksum_data(cert.subject_dn());
        let bucket = (check & 0xFF) as u8;
        assert_eq!(table.bucket_len(bucket), 1);

        table.delete(id).unwrap();
        assert!(table.find(&cert, false).is_none());
        assert_eq!(table.bucket_len(bucket), 0);
        assert!(matches!(table.delete(id), Err(Error::TrustNotFound)));
    }

    #[test]
    fn duplicate_insert_is_rejected_and_table_unchanged() {
        let mut table = TrustTable::new();
        let cert = leaf(b"dup.example.com");

        table.add_cert(&cert).unwrap();
        let before = table.len();
        assert!(matches!(table.add_cert(&cert), Err(Error::TrustDuplicate)));
        assert_eq!(table.len(), before);
    }

    #[test]
    fn issuer_lookup_of_self_signed_answers_none() {
        let mut table = TrustTable::new();
        let root =
            cert::create_cert_indirect(&dummy_cert(b"Lone Root", b"Lone Root")).unwrap();
        table.add_cert(&root).unwrap();

        // The root is present by subject...
        assert!(table.find(&root, false).is_some());
        // ...but asking for its issuer must not loop back to itself.
        assert!(table.find(&root, true).is_none());
    }

    #[test]
    fn issuer_lookup_walks_up_a_chain() {
        let mut table = TrustTable::new();
        let root =
            cert::create_cert_indirect(&dummy_cert(b"Chain Root", b"Chain Root")).unwrap();
        let child =
            cert::create_cert_indirect(&dummy_cert(b"Chain Root", b"Chain Leaf")).unwrap();
        table.add_cert(&root).unwrap();

        let id = table.find(&child, true).expect("issuer entry must resolve");
        let found = table.cert_for(id).unwrap();
        assert_eq!(found.subject_dn(), root.subject_dn());
    }

    #[test]
    fn encoded_entries_materialise_lazily_and_once() {
        let mut table = TrustTable::new();
        let encoded = dummy_cert(b"Lazy Root", b"Lazy Leaf");
        table.add_encoded(&encoded).unwrap();

        let probe = cert::create_cert_indirect(&encoded).unwrap();
        let id = table.find(&probe, false).unwrap();

        let first = table.cert_for(id).unwrap();
        let second = table.cert_for(id).unwrap();
        assert!(CertHandle::ptr_eq(&first, &second), "no re-parse after first access");
        assert_eq!(first.encoded(), &encoded[..]);
    }

    #[test]
    fn private_key_certs_are_stored_encoded() {
        let mut table = TrustTable::new();
        let encoded = dummy_cert(b"HSM Root", b"HSM Leaf");
        let private = create_cert_with_binding(&encoded, KeyBinding::Private).unwrap();

        table.add_cert(&private).unwrap();
        let id = table.find(&private, false).unwrap();

        // The materialised handle is a fresh public-binding object, not the
        // private-key handle that was added.
        let materialised = table.cert_for(id).unwrap();
        assert!(!CertHandle::ptr_eq(&materialised, &private));
        assert_eq!(materialised.key_binding(), KeyBinding::Public);
    }

    #[test]
    fn chain_add_tolerates_duplicates_but_not_nothing_new() {
        let mut table = TrustTable::new();
        let a = leaf(b"chain-a");
        let b = leaf(b"chain-b");

        table.add_cert(&a).unwrap();
        // a is a duplicate, b is new: fine.
        table.add_chain(&[a.clone(), b.clone()]).unwrap();
        // Everything is a duplicate now.
        assert!(matches!(
            table.add_chain(&[a, b]),
            Err(Error::TrustAlreadyInited)
        ));
    }

    #[test]
    fn corrupt_stored_form_keeps_entry_in_encoded_state() {
        let mut table = TrustTable::new();
        let encoded = dummy_cert(b"Corrupt Root", b"Corrupt Leaf");
        table.add_encoded(&encoded).unwrap();

        let probe = cert::create_cert_indirect(&encoded).unwrap();
        let id = table.find(&probe, false).unwrap();

        // Corrupt the stored form in place through the entry.
        table.entry_mut(&id).unwrap().stored.as_mut().unwrap()[0] ^= 0xFF;

        assert!(table.cert_for(id).is_err());
        // Still findable, still in encoded state, still failing the same way.
        assert!(table.entry_mut(&id).unwrap().stored.is_some());
        assert!(table.cert_for(id).is_err());
    }

    #[test]
    fn enumerate_visits_all_and_aborts_on_error() {
        let mut table = TrustTable::new();
        for name in [b"enum-a".as_slice(), b"enum-b", b"enum-c"] {
            table.add_cert(&leaf(name)).unwrap();
        }

        let mut count = 0usize;
        table
            .enumerate(&mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);

        let mut seen = 0usize;
        let result = table.enumerate(&mut |_| {
            seen += 1;
            if seen == 2 {
                Err(Error::Internal("visitor bailed"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    #[test]
    fn clear_empties_the_table() {
        let mut table = TrustTable::new();
        table.add_cert(&leaf(b"clear-me")).unwrap();
        assert!(table.is_populated());
        table.clear();
        assert!(!table.is_populated());
        assert_eq!(table.len(), 0);
    }
}
