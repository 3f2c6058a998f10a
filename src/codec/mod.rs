//! Minimal ASN.1 DER codec.
//!
//! Only the subset needed for key encodings and PKCS #10 certification requests is supported:
//! definite lengths, single-byte tags, and the INTEGER / BIT STRING content rules.

use crate::error::{Error, Result};

pub mod csr;
pub mod ecdsa;
pub mod keys;

/// Universal and context-specific tags used by the key and CSR layouts.
pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OID: u8 = 0x06;
    pub const UTF8_STRING: u8 = 0x0c;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;

    /// `[0]` constructed (CSR attributes, SEC1 curve parameters).
    pub const CONTEXT_0: u8 = 0xa0;

    /// `[1]` constructed (SEC1 public key).
    pub const CONTEXT_1: u8 = 0xa1;

    /// `[2]` primitive (`dNSName` in a `GeneralName`).
    pub const DNS_NAME: u8 = 0x82;
}

/// Object identifiers, as DER content bytes.
pub mod oid {
    /// 1.2.840.113549.1.1.1
    pub const RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

    /// 1.2.840.113549.1.1.11
    pub const SHA256_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];

    /// 1.2.840.10045.2.1
    pub const EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];

    /// 1.2.840.10045.3.1.7
    pub const PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

    /// 1.3.132.0.34
    pub const SECP384R1: &[u8] = &[0x2b, 0x81, 0x04, 0x00, 0x22];

    /// 1.2.840.10045.4.3.2
    pub const ECDSA_WITH_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];

    /// 1.2.840.10045.4.3.3
    pub const ECDSA_WITH_SHA384: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x03];

    /// 1.2.840.113549.1.9.14
    pub const EXTENSION_REQUEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x0e];

    /// 2.5.29.17
    pub const SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];

    /// 2.5.4.3
    pub const COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
}

/// A TLV tree that encodes to DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tlv {
    /// Tag with nested values; content is the concatenation of the children's encodings.
    Constructed(u8, Vec<Tlv>),

    /// Tag with raw content bytes.
    Primitive(u8, Vec<u8>),
}

impl Tlv {
    pub fn seq(children: Vec<Tlv>) -> Self {
        Tlv::Constructed(tag::SEQUENCE, children)
    }

    pub fn set(children: Vec<Tlv>) -> Self {
        Tlv::Constructed(tag::SET, children)
    }

    /// Unsigned big-endian INTEGER.
    pub fn uint(bytes: impl Into<Vec<u8>>) -> Self {
        Tlv::Primitive(tag::INTEGER, bytes.into())
    }

    pub fn small_int(value: u8) -> Self {
        Tlv::Primitive(tag::INTEGER, vec![value])
    }

    pub fn oid(oid: &[u8]) -> Self {
        Tlv::Primitive(tag::OID, oid.to_vec())
    }

    pub fn null() -> Self {
        Tlv::Primitive(tag::NULL, Vec::new())
    }

    pub fn octets(bytes: impl Into<Vec<u8>>) -> Self {
        Tlv::Primitive(tag::OCTET_STRING, bytes.into())
    }

    pub fn bits(bytes: impl Into<Vec<u8>>) -> Self {
        Tlv::Primitive(tag::BIT_STRING, bytes.into())
    }

    /// BIT STRING whose payload is itself DER.
    pub fn bits_of(inner: Tlv) -> Self {
        Tlv::Constructed(tag::BIT_STRING, vec![inner])
    }

    /// OCTET STRING whose payload is itself DER.
    pub fn octets_of(inner: Tlv) -> Self {
        Tlv::Constructed(tag::OCTET_STRING, vec![inner])
    }

    pub fn utf8(value: &str) -> Self {
        Tlv::Primitive(tag::UTF8_STRING, value.as_bytes().to_vec())
    }

    pub fn context(tag: u8, children: Vec<Tlv>) -> Self {
        Tlv::Constructed(tag, children)
    }

    /// Encodes this tree to DER.
    pub fn to_der(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Tlv::Primitive(tag, bytes) => encode(*tag, bytes, out),
            Tlv::Constructed(tag, children) => {
                let content = children.iter().flat_map(Tlv::to_der).collect::<Vec<_>>();
                encode(*tag, &content, out);
            }
        }
    }
}

/// Writes one TLV, applying the INTEGER and BIT STRING content rules.
pub fn encode(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    match tag {
        tag::INTEGER => {
            let content = integer_content(content);
            out.push(tag);
            encode_length(content.len(), out);
            out.extend_from_slice(&content);
        }
        tag::BIT_STRING => {
            out.push(tag);
            encode_length(content.len() + 1, out);
            out.push(0x00);
            out.extend_from_slice(content);
        }
        _ => {
            out.push(tag);
            encode_length(content.len(), out);
            out.extend_from_slice(content);
        }
    }
}

/// Short form below 128, otherwise `0x80 | n` followed by `n` big-endian length bytes.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }

    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let bytes = &bytes[skip..];

    out.push(0x80 | bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// Minimal unsigned INTEGER content: redundant leading zeros stripped, one zero byte prepended
/// when the high bit is set.
fn integer_content(bytes: &[u8]) -> Vec<u8> {
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let bytes = &bytes[skip..];

    match bytes.first() {
        None => vec![0x00],
        Some(first) if first & 0x80 != 0 => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(0x00);
            out.extend_from_slice(bytes);
            out
        }
        Some(_) => bytes.to_vec(),
    }
}

/// A decoded TLV borrowing from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    pub tag: u8,

    /// The complete encoding, header included.
    pub raw: &'a [u8],

    /// Content bytes.
    pub value: &'a [u8],

    pub children: Vec<Node<'a>>,
}

impl<'a> Node<'a> {
    /// Parses exactly one TLV spanning all of `der`.
    pub fn parse(der: &'a [u8]) -> Result<Self> {
        let (node, rest) = Self::parse_one(der)?;

        if !rest.is_empty() {
            return Err(Error::codec(format!(
                "{} trailing bytes after DER value",
                rest.len()
            )));
        }

        Ok(node)
    }

    fn parse_one(der: &'a [u8]) -> Result<(Self, &'a [u8])> {
        let (&tag, rest) = der
            .split_first()
            .ok_or_else(|| Error::codec("unexpected end of DER input"))?;

        let (len, rest) = decode_length(rest)?;

        if rest.len() < len {
            return Err(Error::codec(format!(
                "DER length {len} exceeds remaining {} bytes",
                rest.len()
            )));
        }

        let header_len = der.len() - rest.len();
        let raw = &der[..header_len + len];
        let (value, rest) = rest.split_at(len);

        let children = if tag & 0x20 != 0 {
            Self::parse_all(value)?
        } else {
            Vec::new()
        };

        Ok((
            Node {
                tag,
                raw,
                value,
                children,
            },
            rest,
        ))
    }

    fn parse_all(mut der: &'a [u8]) -> Result<Vec<Self>> {
        let mut nodes = Vec::new();

        while !der.is_empty() {
            let (node, rest) = Self::parse_one(der)?;
            nodes.push(node);
            der = rest;
        }

        Ok(nodes)
    }

    /// Checks the tag, returning `self` for chaining.
    pub fn expect(&self, tag: u8) -> Result<&Self> {
        if self.tag == tag {
            Ok(self)
        } else {
            Err(Error::codec(format!(
                "expected tag 0x{tag:02x}, found 0x{:02x}",
                self.tag
            )))
        }
    }

    /// Returns the `idx`th child.
    pub fn child(&self, idx: usize) -> Result<&Self> {
        self.children.get(idx).ok_or_else(|| {
            Error::codec(format!(
                "expected at least {} elements in 0x{:02x}, found {}",
                idx + 1,
                self.tag,
                self.children.len()
            ))
        })
    }

    /// INTEGER content with sign padding removed.
    pub fn uint_bytes(&self) -> Result<&'a [u8]> {
        self.expect(tag::INTEGER)?;
        let skip = self.value.iter().take_while(|b| **b == 0).count();
        Ok(&self.value[skip..])
    }

    /// BIT STRING content without the unused-bits byte.
    pub fn bit_string_bytes(&self) -> Result<&'a [u8]> {
        self.expect(tag::BIT_STRING)?;
        match self.value.split_first() {
            Some((0, bytes)) => Ok(bytes),
            _ => Err(Error::codec("unsupported BIT STRING padding")),
        }
    }

    /// Parses the payload of a BIT STRING or OCTET STRING as nested DER.
    pub fn nested(&self) -> Result<Node<'a>> {
        let bytes = match self.tag {
            tag::BIT_STRING => self.bit_string_bytes()?,
            tag::OCTET_STRING => self.value,
            other => {
                return Err(Error::codec(format!(
                    "tag 0x{other:02x} does not wrap DER"
                )))
            }
        };

        Node::parse(bytes)
    }
}

fn decode_length(der: &[u8]) -> Result<(usize, &[u8])> {
    let (&first, rest) = der
        .split_first()
        .ok_or_else(|| Error::codec("unexpected end of DER length"))?;

    if first & 0x80 == 0 {
        return Ok((first as usize, rest));
    }

    let n = (first & 0x7f) as usize;

    if n == 0 {
        return Err(Error::codec("indefinite length is not DER"));
    }

    if n > std::mem::size_of::<usize>() || rest.len() < n {
        return Err(Error::codec(format!("unsupported DER length of {n} bytes")));
    }

    let len = rest[..n]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);

    Ok((len, &rest[n..]))
}
