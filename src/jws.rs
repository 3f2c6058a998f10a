//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};

use crate::{
    codec,
    error::{Error, Result},
    jwk::{Algorithm, Curve, Jwk, KeyType},
    util::{base64url, base64url_decode},
};

/// How the signing key is identified in the protected header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBinding {
    /// Embed the public JWK. Used for newAccount, where no key ID exists yet.
    Jwk,

    /// Reference the account URL returned by newAccount.
    Kid(String),
}

/// Protected header template; the engine fills in the algorithm (when not explicit) and the key.
#[derive(Debug, Clone)]
pub struct ProtectedTemplate {
    pub alg: Option<Algorithm>,
    pub nonce: Option<String>,
    pub url: String,
    pub binding: KeyBinding,
}

impl ProtectedTemplate {
    pub fn new(url: &str, nonce: String, binding: KeyBinding) -> Self {
        Self {
            alg: None,
            nonce: Some(nonce),
            url: url.to_owned(),
            binding,
        }
    }
}

/// JWS Protected Header as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// Never "none". A MAC algorithm only appears in the inner external account binding JWS.
    pub alg: String,

    /// Anti-replay value from [RFC 8555 §6.5]; absent in the external account binding.
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Target URL, see [RFC 8555 §6.4].
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    pub url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedJsonJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Signs `payload` under `jwk`.
///
/// An empty payload (POST-as-GET) is sent as an empty string, not as encoded JSON.
pub fn sign(jwk: &Jwk, template: &ProtectedTemplate, payload: &[u8]) -> Result<FlattenedJsonJws> {
    let derived = jwk.algorithm()?;

    let alg = match template.alg {
        Some(alg) if alg != derived => {
            return Err(Error::config(format!(
                "algorithm {alg} does not match {} key",
                jwk.kty
            )))
        }
        _ => derived,
    };

    let (jwk_member, kid) = match &template.binding {
        KeyBinding::Jwk => (Some(jwk.neuter()), None),
        KeyBinding::Kid(kid) => (None, Some(kid.clone())),
    };

    let protected = JwsProtectedHeader {
        alg: alg.as_str().to_owned(),
        nonce: template.nonce.clone(),
        url: template.url.clone(),
        jwk: jwk_member,
        kid,
    };

    let protected = base64url(&serde_json::to_vec(&protected)?);
    let payload = base64url(payload);

    let signature = sign_bytes(jwk, alg, format!("{protected}.{payload}").as_bytes())?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: base64url(&signature),
    })
}

/// Raw signature over `msg`; EC signatures are returned in the fixed-width JOSE form.
pub(crate) fn sign_bytes(jwk: &Jwk, alg: Algorithm, msg: &[u8]) -> Result<Vec<u8>> {
    use ecdsa::signature::Signer as _;

    let crypto = |err: ecdsa::Error| Error::Crypto(err.to_string());
    let d = jwk.bytes("d", &jwk.d)?;

    match (jwk.key_type()?, alg) {
        (KeyType::Ec(Curve::P256), Algorithm::ES256) => {
            let key = p256::ecdsa::SigningKey::from_slice(&d).map_err(crypto)?;
            let sig: p256::ecdsa::DerSignature = key.try_sign(msg).map_err(crypto)?;
            codec::ecdsa::der_to_jose(sig.as_bytes(), Curve::P256.field_len())
        }

        (KeyType::Ec(Curve::P384), Algorithm::ES384) => {
            let key = p384::ecdsa::SigningKey::from_slice(&d).map_err(crypto)?;
            let sig: p384::ecdsa::DerSignature = key.try_sign(msg).map_err(crypto)?;
            codec::ecdsa::der_to_jose(sig.as_bytes(), Curve::P384.field_len())
        }

        (KeyType::Rsa, Algorithm::RS256) => sign_rsa(jwk, d, msg),

        (_, alg) => Err(Error::config(format!(
            "algorithm {alg} does not match {} key",
            jwk.kty
        ))),
    }
}

fn sign_rsa(jwk: &Jwk, d: Vec<u8>, msg: &[u8]) -> Result<Vec<u8>> {
    use rsa::{
        pkcs1v15::SigningKey,
        signature::{SignatureEncoding as _, Signer as _},
        BigUint, RsaPrivateKey,
    };

    let int = |name: &'static str, value: &Option<String>| {
        jwk.bytes(name, value).map(|b| BigUint::from_bytes_be(&b))
    };

    let key = RsaPrivateKey::from_components(
        int("n", &jwk.n)?,
        int("e", &jwk.e)?,
        BigUint::from_bytes_be(&d),
        vec![int("p", &jwk.p)?, int("q", &jwk.q)?],
    )
    .map_err(|err| Error::Crypto(err.to_string()))?;

    let sig = SigningKey::<Sha256>::new(key)
        .try_sign(msg)
        .map_err(|err| Error::Crypto(err.to_string()))?;

    Ok(sig.to_vec())
}

/// MAC algorithms accepted for external account binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl MacAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            MacAlgorithm::HS256 => "HS256",
            MacAlgorithm::HS384 => "HS384",
            MacAlgorithm::HS512 => "HS512",
        }
    }

    fn mac(self, secret: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        match self {
            MacAlgorithm::HS256 => mac_with::<Hmac<Sha256>>(secret, msg),
            MacAlgorithm::HS384 => mac_with::<Hmac<Sha384>>(secret, msg),
            MacAlgorithm::HS512 => mac_with::<Hmac<Sha512>>(secret, msg),
        }
    }
}

fn mac_with<M: Mac + hmac::digest::KeyInit>(secret: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        <M as Mac>::new_from_slice(secret).map_err(|err| Error::Crypto(err.to_string()))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds the `externalAccountBinding` JWS of [RFC 8555 §7.3.4].
///
/// The payload is the account's public JWK, MACed with the CA-issued `hmac_key` (base64url).
///
/// [RFC 8555 §7.3.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
pub fn external_account_binding(
    account_key: &Jwk,
    key_id: &str,
    hmac_key: &str,
    alg: MacAlgorithm,
    new_account_url: &str,
) -> Result<FlattenedJsonJws> {
    let protected = serde_json::json!({
        "alg": alg.as_str(),
        "kid": key_id,
        "url": new_account_url,
    });

    let protected = base64url(&serde_json::to_vec(&protected)?);
    let payload = base64url(&serde_json::to_vec(&account_key.neuter())?);

    let secret = base64url_decode(hmac_key)?;
    let signature = base64url(&alg.mac(&secret, format!("{protected}.{payload}").as_bytes())?);

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{ec_jwk, rsa_jwk};

    fn decode_header(jws: &FlattenedJsonJws) -> serde_json::Value {
        serde_json::from_slice(&base64url_decode(&jws.protected).unwrap()).unwrap()
    }

    fn signing_input(jws: &FlattenedJsonJws) -> Vec<u8> {
        format!("{}.{}", jws.protected, jws.payload).into_bytes()
    }

    fn ec_point(jwk: &Jwk) -> Vec<u8> {
        [
            vec![0x04],
            base64url_decode(jwk.x.as_deref().unwrap()).unwrap(),
            base64url_decode(jwk.y.as_deref().unwrap()).unwrap(),
        ]
        .concat()
    }

    fn template(binding: KeyBinding) -> ProtectedTemplate {
        ProtectedTemplate::new("https://ca.test/acme/x", "nonce-1".to_owned(), binding)
    }

    #[test]
    fn es256_verifies() {
        use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};

        let jwk = ec_jwk(Curve::P256);
        let jws = sign(&jwk, &template(KeyBinding::Jwk), br#"{"a":1}"#).unwrap();

        let key = VerifyingKey::from_sec1_bytes(&ec_point(&jwk)).unwrap();
        let sig = base64url_decode(&jws.signature).unwrap();
        assert_eq!(sig.len(), 64);

        let sig = Signature::from_slice(&sig).unwrap();
        key.verify(&signing_input(&jws), &sig).unwrap();

        assert_eq!(decode_header(&jws)["alg"], "ES256");
    }

    #[test]
    fn es384_verifies() {
        use p384::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};

        let jwk = ec_jwk(Curve::P384);
        let jws = sign(&jwk, &template(KeyBinding::Jwk), b"payload").unwrap();

        let key = VerifyingKey::from_sec1_bytes(&ec_point(&jwk)).unwrap();
        let sig = base64url_decode(&jws.signature).unwrap();
        assert_eq!(sig.len(), 96);

        let sig = Signature::from_slice(&sig).unwrap();
        key.verify(&signing_input(&jws), &sig).unwrap();

        assert_eq!(decode_header(&jws)["alg"], "ES384");
    }

    #[test]
    fn rs256_verifies() {
        use rsa::{
            pkcs1v15::{Signature, VerifyingKey},
            signature::Verifier as _,
            BigUint, RsaPublicKey,
        };

        let jwk = rsa_jwk();
        let jws = sign(&jwk, &template(KeyBinding::Kid("kid-1".to_owned())), b"").unwrap();

        let n = BigUint::from_bytes_be(&base64url_decode(jwk.n.as_deref().unwrap()).unwrap());
        let e = BigUint::from_bytes_be(&base64url_decode(jwk.e.as_deref().unwrap()).unwrap());
        let key = VerifyingKey::<Sha256>::new(RsaPublicKey::new(n, e).unwrap());

        let sig = Signature::try_from(base64url_decode(&jws.signature).unwrap().as_slice()).unwrap();
        key.verify(&signing_input(&jws), &sig).unwrap();

        assert_eq!(decode_header(&jws)["alg"], "RS256");
    }

    #[test]
    fn exactly_one_of_jwk_or_kid() {
        let jwk = ec_jwk(Curve::P256);

        let header = decode_header(&sign(&jwk, &template(KeyBinding::Jwk), b"{}").unwrap());
        assert!(header.get("kid").is_none());
        assert_eq!(header["jwk"]["kty"], "EC");
        assert!(header["jwk"].get("d").is_none(), "private scalar leaked");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca.test/acme/x");

        let header = decode_header(
            &sign(&jwk, &template(KeyBinding::Kid("https://ca.test/acct/1".into())), b"{}")
                .unwrap(),
        );
        assert!(header.get("jwk").is_none());
        assert_eq!(header["kid"], "https://ca.test/acct/1");
    }

    #[test]
    fn post_as_get_payload_is_empty() {
        let jws = sign(&ec_jwk(Curve::P256), &template(KeyBinding::Jwk), b"").unwrap();
        assert_eq!(jws.payload, "");
    }

    #[test]
    fn explicit_algorithm_must_match_key() {
        let mut tpl = template(KeyBinding::Jwk);
        tpl.alg = Some(Algorithm::RS256);
        assert!(matches!(
            sign(&ec_jwk(Curve::P256), &tpl, b""),
            Err(Error::Config(_))
        ));

        tpl.alg = Some(Algorithm::ES256);
        assert!(sign(&ec_jwk(Curve::P256), &tpl, b"").is_ok());
    }

    #[test]
    fn eab_is_hmac_over_public_jwk() {
        let jwk = ec_jwk(Curve::P256);
        let hmac_key = base64url(b"super secret mac key");

        let eab = external_account_binding(
            &jwk,
            "eab-kid",
            &hmac_key,
            MacAlgorithm::default(),
            "https://ca.test/acme/new-acct",
        )
        .unwrap();

        let header = decode_header(&eab);
        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["kid"], "eab-kid");
        assert!(header.get("nonce").is_none());

        let payload: Jwk = serde_json::from_slice(&base64url_decode(&eab.payload).unwrap()).unwrap();
        assert_eq!(payload, jwk.neuter());

        let mut mac = Hmac::<Sha256>::new_from_slice(b"super secret mac key").unwrap();
        mac.update(&signing_input(&eab));
        mac.verify_slice(&base64url_decode(&eab.signature).unwrap())
            .unwrap();
    }

    #[test]
    fn eab_mac_width_follows_algorithm() {
        let jwk = ec_jwk(Curve::P384);
        let hmac_key = base64url(b"another mac key");

        for (alg, len) in [
            (MacAlgorithm::HS256, 32),
            (MacAlgorithm::HS384, 48),
            (MacAlgorithm::HS512, 64),
        ] {
            let eab =
                external_account_binding(&jwk, "eab-kid", &hmac_key, alg, "https://ca.test/n")
                    .unwrap();

            assert_eq!(decode_header(&eab)["alg"], alg.as_str());
            assert_eq!(base64url_decode(&eab.signature).unwrap().len(), len);
        }

        let eab = external_account_binding(
            &jwk,
            "eab-kid",
            &hmac_key,
            MacAlgorithm::HS512,
            "https://ca.test/n",
        )
        .unwrap();

        let mut mac = Hmac::<Sha512>::new_from_slice(b"another mac key").unwrap();
        mac.update(&signing_input(&eab));
        mac.verify_slice(&base64url_decode(&eab.signature).unwrap())
            .unwrap();
    }
}
