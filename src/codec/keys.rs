//! Structural key encodings: PKCS #1, PKCS #8, SPKI and SEC1.
//!
//! These only rearrange JWK members into the ASN.1 layout for each PEM label; no cryptographic
//! computation happens here.

use zeroize::Zeroizing;

use super::{oid, tag, Node, Tlv};
use crate::{
    error::{Error, Result},
    jwk::{Curve, Jwk, KeyType},
};

pub const LABEL_RSA_PRIVATE: &str = "RSA PRIVATE KEY";
pub const LABEL_RSA_PUBLIC: &str = "RSA PUBLIC KEY";
pub const LABEL_EC_PRIVATE: &str = "EC PRIVATE KEY";
pub const LABEL_PRIVATE: &str = "PRIVATE KEY";
pub const LABEL_PUBLIC: &str = "PUBLIC KEY";

/// Container formats for key export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// `RSA PRIVATE KEY` / `RSA PUBLIC KEY` (RSA only).
    Pkcs1,

    /// `PRIVATE KEY` (private keys only).
    Pkcs8,

    /// `PUBLIC KEY`; private members are ignored.
    Spki,

    /// `EC PRIVATE KEY` (EC private keys only).
    Sec1,
}

/// Encodes a key as DER in the given container.
pub fn export_der(jwk: &Jwk, format: KeyFormat) -> Result<Zeroizing<Vec<u8>>> {
    let der = match format {
        KeyFormat::Pkcs1 if jwk.is_private() => pack_pkcs1_private(jwk)?,
        KeyFormat::Pkcs1 => pack_pkcs1_public(jwk)?,
        KeyFormat::Pkcs8 => pack_pkcs8(jwk)?,
        KeyFormat::Spki => pack_spki(jwk)?,
        KeyFormat::Sec1 => pack_sec1(jwk)?,
    };

    Ok(Zeroizing::new(der.to_der()))
}

/// Encodes a key as PEM (64 column lines, LF endings) in the given container.
pub fn export_pem(jwk: &Jwk, format: KeyFormat) -> Result<Zeroizing<String>> {
    let label = match format {
        KeyFormat::Pkcs1 if jwk.is_private() => LABEL_RSA_PRIVATE,
        KeyFormat::Pkcs1 => LABEL_RSA_PUBLIC,
        KeyFormat::Pkcs8 => LABEL_PRIVATE,
        KeyFormat::Spki => LABEL_PUBLIC,
        KeyFormat::Sec1 => LABEL_EC_PRIVATE,
    };

    let der = export_der(jwk, format)?;
    pem_encode(label, &der).map(Zeroizing::new)
}

pub(crate) fn pem_encode(label: &str, der: &[u8]) -> Result<String> {
    pem::encode_string(label, pem::LineEnding::LF, der)
        .map_err(|err| Error::codec(format!("PEM encoding failed: {err}")))
}

/// Reads a PEM key of any supported label back into a JWK.
pub fn import_pem(pem: &str) -> Result<Jwk> {
    let (label, der) = pem::decode_vec(pem.trim().as_bytes())
        .map_err(|err| Error::codec(format!("invalid PEM: {err}")))?;
    let der = Zeroizing::new(der);

    match label {
        LABEL_RSA_PRIVATE => parse_pkcs1_private(&Node::parse(&der)?),
        LABEL_RSA_PUBLIC => parse_pkcs1_public(&Node::parse(&der)?),
        LABEL_EC_PRIVATE | LABEL_PRIVATE | LABEL_PUBLIC => import_der(&der),
        other => Err(Error::codec(format!("unsupported PEM label '{other}'"))),
    }
}

/// Reads a SEC1, PKCS #8 or SPKI DER key back into a JWK, recognising the layout structurally.
pub fn import_der(der: &[u8]) -> Result<Jwk> {
    let root = Node::parse(der)?;
    root.expect(tag::SEQUENCE)?;

    let first = root.child(0)?;

    match first.tag {
        // SPKI: SEQUENCE { AlgorithmIdentifier, BIT STRING }
        tag::SEQUENCE => import_spki(&root),

        tag::INTEGER => match (first.value, root.child(1)?.tag) {
            ([1], tag::OCTET_STRING) => parse_sec1(&root, None),
            ([0], tag::SEQUENCE) => parse_pkcs8(&root),
            ([0], tag::INTEGER) => parse_pkcs1_private(&root),
            _ => Err(Error::codec("unrecognised private key layout")),
        },

        other => Err(Error::codec(format!(
            "unrecognised key layout starting with tag 0x{other:02x}"
        ))),
    }
}

fn curve_oid(curve: Curve) -> &'static [u8] {
    match curve {
        Curve::P256 => oid::PRIME256V1,
        Curve::P384 => oid::SECP384R1,
    }
}

fn curve_from_oid(node: &Node<'_>) -> Result<Curve> {
    node.expect(tag::OID)?;
    match node.value {
        oid::PRIME256V1 => Ok(Curve::P256),
        oid::SECP384R1 => Ok(Curve::P384),
        _ => Err(Error::codec("unsupported named curve")),
    }
}

fn ec_curve(jwk: &Jwk) -> Result<Curve> {
    match jwk.key_type()? {
        KeyType::Ec(curve) => Ok(curve),
        KeyType::Rsa => Err(Error::codec("expected an EC key")),
    }
}

fn expect_rsa(jwk: &Jwk) -> Result<()> {
    match jwk.key_type()? {
        KeyType::Rsa => Ok(()),
        KeyType::Ec(_) => Err(Error::codec("expected an RSA key")),
    }
}

fn require_private(jwk: &Jwk) -> Result<()> {
    if jwk.is_private() {
        Ok(())
    } else {
        Err(Error::codec("a private key is required for this format"))
    }
}

/// Left-pads a big-endian field element to the curve size.
fn fixed_width(bytes: &[u8], len: usize) -> Result<Vec<u8>> {
    let bytes = match bytes.len().checked_sub(len) {
        // only leading zero octets may be dropped
        Some(excess) => {
            let (lead, rest) = bytes.split_at(excess);
            if lead.iter().any(|b| *b != 0) {
                return Err(Error::codec(format!(
                    "field element of {} bytes exceeds {len}",
                    bytes.len()
                )));
            }
            rest
        }
        None => bytes,
    };

    let mut out = vec![0; len - bytes.len()];
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Uncompressed SEC1 point `04 ‖ x ‖ y`.
fn ec_point(jwk: &Jwk, curve: Curve) -> Result<Vec<u8>> {
    let x = fixed_width(&jwk.bytes("x", &jwk.x)?, curve.field_len())?;
    let y = fixed_width(&jwk.bytes("y", &jwk.y)?, curve.field_len())?;
    Ok([&[0x04][..], &x, &y].concat())
}

fn ec_algorithm(curve: Curve) -> Tlv {
    Tlv::seq(vec![Tlv::oid(oid::EC_PUBLIC_KEY), Tlv::oid(curve_oid(curve))])
}

fn rsa_algorithm() -> Tlv {
    Tlv::seq(vec![Tlv::oid(oid::RSA_ENCRYPTION), Tlv::null()])
}

/// `RSAPublicKey ::= SEQUENCE { modulus, publicExponent }`
pub(crate) fn pack_pkcs1_public(jwk: &Jwk) -> Result<Tlv> {
    expect_rsa(jwk)?;
    Ok(Tlv::seq(vec![
        Tlv::uint(jwk.bytes("n", &jwk.n)?),
        Tlv::uint(jwk.bytes("e", &jwk.e)?),
    ]))
}

/// `RSAPrivateKey ::= SEQUENCE { version, n, e, d, p, q, dp, dq, qi }`
pub(crate) fn pack_pkcs1_private(jwk: &Jwk) -> Result<Tlv> {
    expect_rsa(jwk)?;
    require_private(jwk)?;
    Ok(Tlv::seq(vec![
        Tlv::small_int(0),
        Tlv::uint(jwk.bytes("n", &jwk.n)?),
        Tlv::uint(jwk.bytes("e", &jwk.e)?),
        Tlv::uint(jwk.bytes("d", &jwk.d)?),
        Tlv::uint(jwk.bytes("p", &jwk.p)?),
        Tlv::uint(jwk.bytes("q", &jwk.q)?),
        Tlv::uint(jwk.bytes("dp", &jwk.dp)?),
        Tlv::uint(jwk.bytes("dq", &jwk.dq)?),
        Tlv::uint(jwk.bytes("qi", &jwk.qi)?),
    ]))
}

/// `ECPrivateKey ::= SEQUENCE { version(1), privateKey, [0] parameters, [1] publicKey }`
///
/// PKCS #8 carries the curve in its algorithm identifier, so `[0]` is omitted there.
fn pack_ec_private(jwk: &Jwk, with_parameters: bool) -> Result<Tlv> {
    require_private(jwk)?;
    let curve = ec_curve(jwk)?;
    let d = fixed_width(&jwk.bytes("d", &jwk.d)?, curve.field_len())?;

    let mut fields = vec![Tlv::small_int(1), Tlv::octets(d)];

    if with_parameters {
        fields.push(Tlv::context(tag::CONTEXT_0, vec![Tlv::oid(curve_oid(curve))]));
    }

    fields.push(Tlv::context(
        tag::CONTEXT_1,
        vec![Tlv::bits(ec_point(jwk, curve)?)],
    ));

    Ok(Tlv::seq(fields))
}

pub(crate) fn pack_sec1(jwk: &Jwk) -> Result<Tlv> {
    pack_ec_private(jwk, true)
}

/// `PrivateKeyInfo ::= SEQUENCE { version(0), AlgorithmIdentifier, OCTET STRING key }`
pub(crate) fn pack_pkcs8(jwk: &Jwk) -> Result<Tlv> {
    require_private(jwk)?;

    let (algorithm, key) = match jwk.key_type()? {
        KeyType::Rsa => (rsa_algorithm(), pack_pkcs1_private(jwk)?),
        KeyType::Ec(curve) => (ec_algorithm(curve), pack_ec_private(jwk, false)?),
    };

    Ok(Tlv::seq(vec![
        Tlv::small_int(0),
        algorithm,
        Tlv::octets_of(key),
    ]))
}

/// `SubjectPublicKeyInfo ::= SEQUENCE { AlgorithmIdentifier, BIT STRING key }`
pub(crate) fn pack_spki(jwk: &Jwk) -> Result<Tlv> {
    Ok(match jwk.key_type()? {
        KeyType::Rsa => Tlv::seq(vec![rsa_algorithm(), Tlv::bits_of(pack_pkcs1_public(jwk)?)]),
        KeyType::Ec(curve) => Tlv::seq(vec![ec_algorithm(curve), Tlv::bits(ec_point(jwk, curve)?)]),
    })
}

fn split_ec_point(point: &[u8], curve: Option<Curve>) -> Result<(Curve, &[u8], &[u8])> {
    let coords = match point.split_first() {
        Some((0x04, coords)) if coords.len() % 2 == 0 => coords,
        _ => return Err(Error::codec("only uncompressed EC points are supported")),
    };

    let half = coords.len() / 2;
    let curve = match curve {
        Some(curve) if curve.field_len() == half => curve,
        Some(_) => return Err(Error::codec("EC point does not match curve")),
        None => Curve::from_field_len(half)
            .ok_or_else(|| Error::codec(format!("no supported curve with {half}-byte fields")))?,
    };

    let (x, y) = coords.split_at(half);
    Ok((curve, x, y))
}

fn parse_sec1(root: &Node<'_>, curve: Option<Curve>) -> Result<Jwk> {
    let d = root.child(1)?.expect(tag::OCTET_STRING)?.value;

    let mut curve = curve;
    let mut point = None;

    for field in root.children.iter().skip(2) {
        match field.tag {
            tag::CONTEXT_0 => curve = Some(curve_from_oid(field.child(0)?)?),
            tag::CONTEXT_1 => point = Some(field.child(0)?.bit_string_bytes()?),
            _ => {}
        }
    }

    let point = point.ok_or_else(|| Error::codec("EC private key without public point"))?;
    let (curve, x, y) = split_ec_point(point, curve)?;

    Ok(Jwk::from_ec_parts(curve, x, y, Some(d)))
}

fn parse_pkcs8(root: &Node<'_>) -> Result<Jwk> {
    let algorithm = root.child(1)?;
    let key = root.child(2)?.expect(tag::OCTET_STRING)?.nested()?;

    match algorithm.child(0)?.expect(tag::OID)?.value {
        oid::EC_PUBLIC_KEY => {
            let curve = curve_from_oid(algorithm.child(1)?)?;
            parse_sec1(&key, Some(curve))
        }
        oid::RSA_ENCRYPTION => parse_pkcs1_private(&key),
        _ => Err(Error::codec("unsupported PKCS #8 key algorithm")),
    }
}

pub(crate) fn import_spki(root: &Node<'_>) -> Result<Jwk> {
    let algorithm = root.child(0)?;
    let key = root.child(1)?;

    match algorithm.child(0)?.expect(tag::OID)?.value {
        oid::EC_PUBLIC_KEY => {
            let curve = curve_from_oid(algorithm.child(1)?)?;
            let (curve, x, y) = split_ec_point(key.bit_string_bytes()?, Some(curve))?;
            Ok(Jwk::from_ec_parts(curve, x, y, None))
        }
        oid::RSA_ENCRYPTION => parse_pkcs1_public(&key.nested()?),
        _ => Err(Error::codec("unsupported public key algorithm")),
    }
}

pub(crate) fn parse_pkcs1_public(root: &Node<'_>) -> Result<Jwk> {
    root.expect(tag::SEQUENCE)?;
    Ok(Jwk::from_rsa_parts(
        root.child(0)?.uint_bytes()?,
        root.child(1)?.uint_bytes()?,
        None,
    ))
}

fn parse_pkcs1_private(root: &Node<'_>) -> Result<Jwk> {
    root.expect(tag::SEQUENCE)?;

    let int = |idx| root.child(idx).and_then(Node::uint_bytes);

    Ok(Jwk::from_rsa_parts(
        int(1)?,
        int(2)?,
        Some([int(3)?, int(4)?, int(5)?, int(6)?, int(7)?, int(8)?]),
    ))
}
