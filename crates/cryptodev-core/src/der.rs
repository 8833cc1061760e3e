//! Minimal DER reader.
//!
//! Just enough ASN.1 to walk the outer structure of an encoded certificate
//! and hand out zero-copy views of the distinguished-name blocks: sequence
//! entry, whole-element skip, tag peeking, and length decoding. Anything
//! deeper than that belongs to a real ASN.1 stack, which this crate
//! deliberately does not carry.

use crate::error::{Error, Result};

/// Universal SEQUENCE tag.
pub const TAG_SEQUENCE: u8 = 0x30;

/// Constructed context-specific tag `[n]`.
pub fn context_tag(n: u8) -> u8 {
    0xA0 | (n & 0x1F)
}

/// Cursor over a caller-owned DER buffer. All reads are bounds-checked and
/// return typed parse failures; nothing is copied.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Tag of the next element, without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(Error::ParseFailed("unexpected end of data"))
    }

    /// Advance past `n` bytes of content.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::ParseFailed("skip past end of data"));
        }
        self.pos += n;
        Ok(())
    }

    /// Zero-copy view of `len` bytes at the current position, not consumed.
    pub fn data_block(&self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::ParseFailed("data block past end of data"));
        }
        Ok(&self.buf[self.pos..self.pos + len])
    }

    /// Enter a SEQUENCE: consume tag and length, return the content length.
    pub fn read_sequence(&mut self) -> Result<usize> {
        if self.peek_tag()? != TAG_SEQUENCE {
            return Err(Error::ParseFailed("expected SEQUENCE"));
        }
        self.pos += 1;
        let len = self.read_length()?;
        if len > self.remaining() {
            return Err(Error::ParseFailed("SEQUENCE length past end of data"));
        }
        Ok(len)
    }

    /// Skip one complete element (tag, length, content).
    pub fn read_universal(&mut self) -> Result<()> {
        self.peek_tag()?;
        self.pos += 1;
        let len = self.read_length()?;
        self.skip(len)
    }

    /// Total length (header plus content) of the element at the current
    /// position, without consuming anything.
    pub fn object_length(&self) -> Result<usize> {
        let mut probe = Reader {
            buf: self.buf,
            pos: self.pos,
        };
        probe.peek_tag()?;
        probe.pos += 1;
        let content = probe.read_length()?;
        let header = probe.pos - self.pos;
        if content > probe.remaining() {
            return Err(Error::ParseFailed("object length past end of data"));
        }
        Ok(header + content)
    }

    /// Decode a DER length at the cursor. Indefinite lengths and lengths
    /// wider than four bytes are rejected.
    fn read_length(&mut self) -> Result<usize> {
        let first = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or(Error::ParseFailed("unexpected end of data"))?;
        self.pos += 1;

        if first < 0x80 {
            return Ok(usize::from(first));
        }
        if first == 0x80 {
            return Err(Error::ParseFailed("indefinite length not permitted"));
        }
        let n_bytes = usize::from(first & 0x7F);
        if n_bytes > 4 {
            return Err(Error::ParseFailed("length field too wide"));
        }
        let mut len = 0usize;
        for _ in 0..n_bytes {
            let byte = self
                .buf
                .get(self.pos)
                .copied()
                .ok_or(Error::ParseFailed("truncated length field"))?;
            self.pos += 1;
            len = (len << 8) | usize::from(byte);
        }
        Ok(len)
    }
}

/// Walk an encoded certificate up to its issuer and subject DN blocks and
/// return zero-copy views of both (complete elements, headers included).
///
/// The layout walked here is the standard TBSCertificate prefix: outer
/// wrapper, inner wrapper, optional `[0]` version, serial number, signature
/// algorithm, issuer DN, validity, subject DN.
pub fn locate_dn_fields(cert: &[u8]) -> Result<(&[u8], &[u8])> {
    let mut reader = Reader::new(cert);
    reader.read_sequence()?; /* Outer wrapper */
    reader.read_sequence()?; /* Inner wrapper */
    if reader.peek_tag()? == context_tag(0) {
        reader.read_universal()?; /* Version */
    }
    reader.read_universal()?; /* Serial number */
    reader.read_universal()?; /* Signature algo */

    let issuer_len = reader.object_length()?;
    let issuer = reader.data_block(issuer_len)?;
    reader.skip(issuer_len)?; /* Issuer DN */
    reader.read_universal()?; /* Validity */

    let subject_len = reader.object_length()?;
    let subject = reader.data_block(subject_len)?;
    Ok((issuer, subject))
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Tiny DER builder for fixtures.

    pub fn encode_length(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
        } else if len <= 0xFF {
            out.push(0x81);
            out.push(len as u8);
        } else {
            out.push(0x82);
            out.push((len >> 8) as u8);
            out.push(len as u8);
        }
    }

    pub fn element(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        encode_length(&mut out, content.len());
        out.extend_from_slice(content);
        out
    }

    pub fn sequence(content: &[u8]) -> Vec<u8> {
        element(super::TAG_SEQUENCE, content)
    }

    /// A structurally-valid certificate skeleton with the given issuer and
    /// subject name payloads.
    pub fn dummy_cert(issuer_name: &[u8], subject_name: &[u8]) -> Vec<u8> {
        let version = element(super::context_tag(0), &element(0x02, &[2]));
        let serial = element(0x02, &[0x01, 0x23]);
        let sig_algo = sequence(&element(0x06, &[0x2A, 0x03, 0x04]));
        let issuer = sequence(&element(0x0C, issuer_name));
        let validity = sequence(
            &[
                element(0x17, b"240101000000Z"),
                element(0x17, b"340101000000Z"),
            ]
            .concat(),
        );
        let subject = sequence(&element(0x0C, subject_name));
        let spki = sequence(&element(0x03, &[0x00, 0x05, 0x06, 0x07]));

        let tbs = sequence(
            &[version, serial, sig_algo.clone(), issuer, validity, subject, spki].concat(),
        );
        let signature = element(0x03, &[0x00, 0xDE, 0xAD]);
        sequence(&[tbs, sig_algo, signature].concat())
    }
}
