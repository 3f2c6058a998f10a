//! PKCS #10 certification requests.
//!
//! See [RFC 2986](https://datatracker.ietf.org/doc/html/rfc2986) for the layout and
//! [RFC 2985 §5.4.2](https://datatracker.ietf.org/doc/html/rfc2985#section-5.4.2) for the
//! `extensionRequest` attribute carrying the subject alternative names.

use super::{keys, oid, tag, Node, Tlv};
use crate::{
    error::{Error, Result},
    jwk::{Algorithm, Jwk},
    jws,
    util::{base64url, base64url_decode},
};

pub const LABEL_CSR: &str = "CERTIFICATE REQUEST";

/// Label written by older OpenSSL and Netscape tooling.
pub const LABEL_CSR_LEGACY: &str = "NEW CERTIFICATE REQUEST";

/// Builds and signs a CSR for `domains` with the private key `jwk`.
///
/// The first domain becomes the subject common name; every domain (including the first) is
/// listed in the subject alternative name extension.
pub fn pack_csr(jwk: &Jwk, domains: &[String]) -> Result<Vec<u8>> {
    let subject = domains
        .first()
        .ok_or_else(|| Error::config("a CSR needs at least one domain"))?;

    if !jwk.is_private() {
        return Err(Error::codec("a private key is required to sign a CSR"));
    }

    let san = Tlv::seq(
        domains
            .iter()
            .map(|domain| Tlv::Primitive(tag::DNS_NAME, domain.as_bytes().to_vec()))
            .collect(),
    );

    let request = Tlv::seq(vec![
        Tlv::small_int(0),
        Tlv::seq(vec![Tlv::set(vec![Tlv::seq(vec![
            Tlv::oid(oid::COMMON_NAME),
            Tlv::utf8(subject),
        ])])]),
        keys::pack_spki(jwk)?,
        Tlv::context(
            tag::CONTEXT_0,
            vec![Tlv::seq(vec![
                Tlv::oid(oid::EXTENSION_REQUEST),
                Tlv::set(vec![Tlv::seq(vec![Tlv::seq(vec![
                    Tlv::oid(oid::SUBJECT_ALT_NAME),
                    Tlv::octets_of(san),
                ])])]),
            ])],
        ),
    ]);

    let alg = jwk.algorithm()?;
    let signature = jws::sign_bytes(jwk, alg, &request.to_der())?;

    let (sig_alg, signature) = match alg {
        Algorithm::RS256 => (
            Tlv::seq(vec![Tlv::oid(oid::SHA256_WITH_RSA), Tlv::null()]),
            signature,
        ),
        Algorithm::ES256 => (
            Tlv::seq(vec![Tlv::oid(oid::ECDSA_WITH_SHA256)]),
            super::ecdsa::jose_to_der(&signature)?,
        ),
        Algorithm::ES384 => (
            Tlv::seq(vec![Tlv::oid(oid::ECDSA_WITH_SHA384)]),
            super::ecdsa::jose_to_der(&signature)?,
        ),
    };

    Ok(Tlv::seq(vec![request, sig_alg, Tlv::bits(signature)]).to_der())
}

/// Frames CSR DER as a `CERTIFICATE REQUEST` PEM block.
pub fn csr_pem(der: &[u8]) -> Result<String> {
    keys::pem_encode(LABEL_CSR, der)
}

/// What a CSR asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrInfo {
    /// Subject common name, if present.
    pub subject: Option<String>,

    /// `dNSName` entries of the subject alternative name extension, in order.
    pub altnames: Vec<String>,

    /// Public key the certificate will be issued for.
    pub public_key: Jwk,
}

/// Decodes the subject, public key and SAN list of a CSR.
///
/// The signature is not verified.
pub fn parse_csr(der: &[u8]) -> Result<CsrInfo> {
    let root = Node::parse(der)?;
    root.expect(tag::SEQUENCE)?;

    if root.children.len() != 3 {
        return Err(Error::codec(format!(
            "CSR has {} parts, expected 3",
            root.children.len()
        )));
    }

    let request = root.child(0)?.expect(tag::SEQUENCE)?;

    if request.children.len() != 4 {
        return Err(Error::codec(format!(
            "CSR request info has {} parts, expected 4",
            request.children.len()
        )));
    }

    let subject = parse_common_name(request.child(1)?)?;
    let public_key = keys::import_spki(request.child(2)?)?;
    let altnames = parse_altnames(request.child(3)?)?;

    Ok(CsrInfo {
        subject,
        altnames,
        public_key,
    })
}

fn parse_common_name(name: &Node<'_>) -> Result<Option<String>> {
    name.expect(tag::SEQUENCE)?;

    for rdn in &name.children {
        for attr in &rdn.children {
            if attr.child(0)?.value == oid::COMMON_NAME {
                return utf8(attr.child(1)?.value).map(Some);
            }
        }
    }

    Ok(None)
}

fn parse_altnames(attributes: &Node<'_>) -> Result<Vec<String>> {
    attributes.expect(tag::CONTEXT_0)?;

    let mut names = Vec::new();

    for attr in &attributes.children {
        if attr.child(0)?.value != oid::EXTENSION_REQUEST {
            continue;
        }

        for extensions in &attr.child(1)?.expect(tag::SET)?.children {
            for ext in &extensions.children {
                if ext.child(0)?.value != oid::SUBJECT_ALT_NAME {
                    continue;
                }

                // optional `critical` BOOLEAN precedes the value
                let value = ext
                    .children
                    .last()
                    .ok_or_else(|| Error::codec("empty extension"))?
                    .nested()?;

                for general_name in &value.children {
                    if general_name.tag == tag::DNS_NAME {
                        names.push(utf8(general_name.value)?);
                    }
                }
            }
        }
    }

    Ok(names)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::codec("CSR string is not UTF-8"))
}

/// A caller-supplied CSR in one of its accepted encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrInput {
    /// Raw DER bytes.
    Der(Vec<u8>),

    /// Unpadded base64url of the DER.
    Base64Url(String),

    /// A `-----BEGIN CERTIFICATE REQUEST-----` block.
    Pem(String),
}

impl CsrInput {
    /// Guesses the encoding of textual CSR input.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();

        if text.starts_with("-----BEGIN") {
            CsrInput::Pem(text.to_owned())
        } else {
            CsrInput::Base64Url(text.to_owned())
        }
    }

    /// The base64url DER form sent in a finalize request.
    pub fn to_base64url(&self) -> Result<String> {
        Ok(match self {
            CsrInput::Base64Url(text) => text.trim().trim_end_matches('=').to_owned(),
            other => base64url(&other.to_der()?),
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        match self {
            CsrInput::Der(der) => Ok(der.clone()),
            CsrInput::Base64Url(text) => base64url_decode(text.trim()),
            CsrInput::Pem(text) => {
                let (label, der) = pem::decode_vec(text.trim().as_bytes())
                    .map_err(|err| Error::codec(format!("invalid CSR PEM: {err}")))?;

                if label != LABEL_CSR && label != LABEL_CSR_LEGACY {
                    return Err(Error::codec(format!(
                        "expected a {LABEL_CSR} PEM block, found {label}"
                    )));
                }

                if der.is_empty() {
                    return Err(Error::codec("empty CSR PEM block"));
                }

                Ok(der)
            }
        }
    }

    /// Decodes and checks that the subject matches the first altname.
    ///
    /// The altnames become the order's domains.
    pub fn info(&self) -> Result<CsrInfo> {
        let info = parse_csr(&self.to_der()?)?;

        let first = info
            .altnames
            .first()
            .ok_or_else(|| Error::config("CSR has no subject alternative names"))?;

        if info.subject.as_deref() != Some(first.as_str()) {
            return Err(Error::config(format!(
                "CSR subject {:?} must equal its first altname '{first}'",
                info.subject
            )));
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use der::{Decode as _, Encode as _};
    use x509_cert::{
        ext::pkix::{name::GeneralName, SubjectAltName},
        request::CertReq,
    };

    use super::*;
    use crate::{
        jwk::Curve,
        test::{ec_jwk, rsa_jwk},
    };

    fn domains() -> Vec<String> {
        vec!["example.com".to_owned(), "www.example.com".to_owned()]
    }

    #[test]
    fn reference_parser_reads_generated_csr() {
        for jwk in [ec_jwk(Curve::P256), ec_jwk(Curve::P384), rsa_jwk()] {
            let der = pack_csr(&jwk, &domains()).unwrap();
            let req = CertReq::from_der(&der).unwrap();

            assert_eq!(req.info.subject.to_string(), "CN=example.com");

            let spki = req.info.public_key.to_der().unwrap();
            assert_eq!(
                spki,
                keys::export_der(&jwk, keys::KeyFormat::Spki).unwrap().to_vec()
            );

            let attr = req.info.attributes.iter().next().unwrap();
            let exts = attr.values.iter().next().unwrap();
            let exts = x509_cert::ext::Extensions::from_der(&exts.to_der().unwrap()).unwrap();
            let san = SubjectAltName::from_der(exts[0].extn_value.as_bytes()).unwrap();

            let names = san
                .0
                .iter()
                .map(|name| match name {
                    GeneralName::DnsName(name) => name.to_string(),
                    other => panic!("unexpected name {other:?}"),
                })
                .collect::<Vec<_>>();
            assert_eq!(names, domains());
        }
    }

    #[test]
    fn ec_signature_verifies() {
        use p256::ecdsa::{signature::Verifier as _, DerSignature, VerifyingKey};

        let jwk = ec_jwk(Curve::P256);
        let der = pack_csr(&jwk, &domains()).unwrap();
        let root = Node::parse(&der).unwrap();

        let signed = root.child(0).unwrap().raw;
        let sig = root.child(2).unwrap().bit_string_bytes().unwrap();

        let point = [
            &[0x04][..],
            &crate::util::base64url_decode(jwk.x.as_deref().unwrap()).unwrap(),
            &crate::util::base64url_decode(jwk.y.as_deref().unwrap()).unwrap(),
        ]
        .concat();
        let key = VerifyingKey::from_sec1_bytes(&point).unwrap();
        let sig = DerSignature::try_from(sig).unwrap();
        key.verify(signed, &sig).unwrap();
    }

    #[test]
    fn rsa_signature_verifies() {
        use rsa::{
            pkcs1v15::{Signature, VerifyingKey},
            signature::Verifier as _,
            BigUint, RsaPublicKey,
        };
        use sha2::Sha256;

        let jwk = rsa_jwk();
        let der = pack_csr(&jwk, &domains()).unwrap();
        let root = Node::parse(&der).unwrap();

        let signed = root.child(0).unwrap().raw;
        let sig = root.child(2).unwrap().bit_string_bytes().unwrap();

        let n = crate::util::base64url_decode(jwk.n.as_deref().unwrap()).unwrap();
        let e = crate::util::base64url_decode(jwk.e.as_deref().unwrap()).unwrap();
        let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e)).unwrap();

        VerifyingKey::<Sha256>::new(key)
            .verify(signed, &Signature::try_from(sig).unwrap())
            .unwrap();
    }

    #[test]
    fn parse_round_trip() {
        let jwk = ec_jwk(Curve::P256);
        let der = pack_csr(&jwk, &domains()).unwrap();

        let info = CsrInput::Der(der).info().unwrap();
        assert_eq!(info.subject.as_deref(), Some("example.com"));
        assert_eq!(info.altnames, domains());
        assert_eq!(info.public_key, jwk.neuter());
    }

    #[test]
    fn input_normalisation() {
        let der = pack_csr(&rsa_jwk(), &domains()).unwrap();
        let web64 = base64url(&der);
        let pem = csr_pem(&der).unwrap();

        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----\n"));

        assert_eq!(CsrInput::Der(der.clone()).to_base64url().unwrap(), web64);
        assert_eq!(CsrInput::from_text(&pem).to_base64url().unwrap(), web64);
        assert_eq!(CsrInput::from_text(&pem.replace('\n', "\r\n")).to_base64url().unwrap(), web64);
        assert_eq!(CsrInput::from_text(&web64).to_der().unwrap(), der);

        let legacy = pem.replace(LABEL_CSR, LABEL_CSR_LEGACY);
        assert_eq!(CsrInput::from_text(&legacy).to_der().unwrap(), der);
    }

    #[test]
    fn pem_label_checked() {
        let der = pack_csr(&ec_jwk(Curve::P256), &domains()).unwrap();
        let pem = csr_pem(&der).unwrap();

        let wrong = pem.replace(LABEL_CSR, "CERTIFICATE");
        assert!(matches!(
            CsrInput::from_text(&wrong).to_base64url(),
            Err(Error::Codec(_))
        ));

        let unterminated = pem.replace("-----END CERTIFICATE REQUEST-----", "");
        assert!(CsrInput::from_text(&unterminated).to_der().is_err());
    }

    #[test]
    fn subject_must_match_first_altname() {
        let jwk = ec_jwk(Curve::P256);
        let mut der = pack_csr(&jwk, &domains()).unwrap();

        // flip the CN to a different name of equal length
        let pos = der
            .windows(b"example.com".len())
            .position(|w| w == b"example.com")
            .unwrap();
        der[pos] = b'x';

        assert!(matches!(CsrInput::Der(der).info(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_domain_list_rejected() {
        assert!(pack_csr(&ec_jwk(Curve::P256), &[]).is_err());
        assert!(pack_csr(&ec_jwk(Curve::P256).neuter(), &domains()).is_err());
    }
}
