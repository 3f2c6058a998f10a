//! Conversion between ASN.1 `ECDSA-Sig-Value` and the fixed-width JOSE `r‖s` form.
//!
//! See [RFC 7518 §3.4](https://datatracker.ietf.org/doc/html/rfc7518#section-3.4).

use super::{tag, Node, Tlv};
use crate::error::{Error, Result};

/// Converts `SEQUENCE { INTEGER r, INTEGER s }` to `r‖s`, each left-padded to `field_len`.
pub fn der_to_jose(der: &[u8], field_len: usize) -> Result<Vec<u8>> {
    let sig = Node::parse(der)?;
    sig.expect(tag::SEQUENCE)?;

    if sig.children.len() != 2 {
        return Err(Error::codec(format!(
            "ECDSA signature has {} elements, expected 2",
            sig.children.len()
        )));
    }

    let mut out = Vec::with_capacity(field_len * 2);

    for int in &sig.children {
        let bytes = int.uint_bytes()?;

        if bytes.len() > field_len {
            return Err(Error::codec(format!(
                "ECDSA signature component of {} bytes exceeds field size {field_len}",
                bytes.len()
            )));
        }

        out.resize(out.len() + field_len - bytes.len(), 0);
        out.extend_from_slice(bytes);
    }

    Ok(out)
}

/// Converts `r‖s` (two equal halves) to `SEQUENCE { INTEGER r, INTEGER s }`.
pub fn jose_to_der(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(Error::codec(format!(
            "JOSE signature length {} is not two equal halves",
            raw.len()
        )));
    }

    let (r, s) = raw.split_at(raw.len() / 2);

    Ok(Tlv::seq(vec![Tlv::uint(r), Tlv::uint(s)]).to_der())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(r_first: u8, s_first: u8, len: usize) -> Vec<u8> {
        let mut r = vec![0x5a; len];
        r[0] = r_first;
        let mut s = vec![0xa5; len];
        s[0] = s_first;
        [r, s].concat()
    }

    #[test]
    fn round_trip_with_and_without_padding() {
        for len in [32, 48] {
            for (r0, s0) in [(0x12, 0x34), (0x80, 0x7f), (0x00, 0xff), (0x00, 0x00), (0xff, 0x00)] {
                let jose = raw(r0, s0, len);
                let der = jose_to_der(&jose).unwrap();
                assert_eq!(der_to_jose(&der, len).unwrap(), jose, "r0={r0:x} s0={s0:x}");
            }
        }
    }

    #[test]
    fn leading_zero_stripped_and_restored() {
        let mut jose = vec![0u8; 64];
        jose[2] = 0x01; // r = 0x0001...
        jose[32] = 0x90; // s has high bit set

        let der = jose_to_der(&jose).unwrap();
        let node = Node::parse(&der).unwrap();

        // r lost its two leading zeros
        assert_eq!(node.child(0).unwrap().value.len(), 30);
        // s gained a sign byte
        assert_eq!(node.child(1).unwrap().value.len(), 33);
        assert_eq!(node.child(1).unwrap().value[0], 0x00);

        assert_eq!(der_to_jose(&der, 32).unwrap(), jose);
    }

    #[test]
    fn long_form_sequence_length() {
        // 2 * (2 + 66) = 136 content bytes forces a long-form SEQUENCE length
        let jose = raw(0x81, 0x82, 66);
        let der = jose_to_der(&jose).unwrap();
        assert_eq!(&der[..3], &[0x30, 0x81, 136]);
        assert_eq!(der_to_jose(&der, 66).unwrap(), jose);
    }

    #[test]
    fn rejects_oversized_component() {
        let der = jose_to_der(&raw(0x80, 0x01, 33)).unwrap();
        assert!(der_to_jose(&der, 32).is_err());
    }

    #[test]
    fn rejects_odd_length() {
        assert!(jose_to_der(&[0x01, 0x02, 0x03]).is_err());
        assert!(jose_to_der(&[]).is_err());
    }

    #[test]
    fn matches_reference_der_signature() {
        use p256::ecdsa::{signature::Signer as _, DerSignature, Signature, SigningKey};

        let key = SigningKey::random(&mut rand::thread_rng());
        let der: DerSignature = key.sign(b"acme");
        let fixed: Signature = key.sign(b"acme");

        assert_eq!(der_to_jose(der.as_bytes(), 32).unwrap(), fixed.to_bytes().to_vec());
        assert_eq!(jose_to_der(&fixed.to_bytes()).unwrap(), der.as_bytes());
    }
}
