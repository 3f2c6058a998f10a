//! JSON Web Keys.
//!
//! See [RFC 7517](https://datatracker.ietf.org/doc/html/rfc7517) and, for thumbprints,
//! [RFC 7638](https://datatracker.ietf.org/doc/html/rfc7638).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{
    error::{Error, Result},
    util::{base64url, base64url_decode},
};

/// An RSA or EC key in JWK form.
///
/// Public and private keys share this structure; a private key additionally carries `d` (and for
/// RSA the CRT parameters). Any other JWK members (`kid`, `use`, `key_ops`, …) are dropped on
/// deserialization.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

// private members never reach logs
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("crv", &self.crv)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("n", &self.n)
            .field("e", &self.e)
            .field("private", &self.is_private())
            .finish()
    }
}

/// Supported elliptic curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
        }
    }

    /// Size in bytes of a field element (and of each signature half).
    pub fn field_len(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }

    pub(crate) fn from_field_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Curve::P256),
            48 => Some(Curve::P384),
            _ => None,
        }
    }
}

/// Key families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ec(Curve),
}

/// JWS signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    RS256,
    ES256,
    ES384,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::RS256 => "RS256",
            Algorithm::ES256 => "ES256",
            Algorithm::ES384 => "ES384",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// LEXICAL ORDER OF FIELDS MATTER!
#[derive(Serialize)]
struct EcThumb<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

// LEXICAL ORDER OF FIELDS MATTER!
#[derive(Serialize)]
struct RsaThumb<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

impl Jwk {
    /// Returns the key family, validating that the public members are present.
    pub fn key_type(&self) -> Result<KeyType> {
        match self.kty.as_str() {
            "RSA" => {
                self.require("n", &self.n)?;
                self.require("e", &self.e)?;
                Ok(KeyType::Rsa)
            }
            "EC" => {
                let curve = match self.crv.as_deref() {
                    Some("P-256") => Curve::P256,
                    Some("P-384") => Curve::P384,
                    other => {
                        return Err(Error::codec(format!("unsupported EC curve {other:?}")))
                    }
                };
                self.require("x", &self.x)?;
                self.require("y", &self.y)?;
                Ok(KeyType::Ec(curve))
            }
            other => Err(Error::codec(format!("unsupported key type {other:?}"))),
        }
    }

    /// Signature algorithm implied by the key type and curve.
    pub fn algorithm(&self) -> Result<Algorithm> {
        Ok(match self.key_type()? {
            KeyType::Rsa => Algorithm::RS256,
            KeyType::Ec(Curve::P256) => Algorithm::ES256,
            KeyType::Ec(Curve::P384) => Algorithm::ES384,
        })
    }

    /// True when the key carries the private exponent / scalar.
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Copy of this key with all private members removed.
    pub fn neuter(&self) -> Jwk {
        Jwk {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            ..self.clone()
        }
    }

    /// RFC 7638 thumbprint: base64url SHA-256 over the canonical public members.
    pub fn thumbprint(&self) -> Result<String> {
        let json = match self.key_type()? {
            KeyType::Rsa => serde_json::to_string(&RsaThumb {
                e: self.member("e", &self.e)?,
                kty: &self.kty,
                n: self.member("n", &self.n)?,
            })?,
            KeyType::Ec(_) => serde_json::to_string(&EcThumb {
                crv: self.member("crv", &self.crv)?,
                kty: &self.kty,
                x: self.member("x", &self.x)?,
                y: self.member("y", &self.y)?,
            })?,
        };

        Ok(base64url(&Sha256::digest(json)))
    }

    /// Decodes a base64url member to bytes.
    pub(crate) fn bytes(&self, name: &'static str, value: &Option<String>) -> Result<Vec<u8>> {
        base64url_decode(self.member(name, value)?)
    }

    fn member<'a>(&self, name: &'static str, value: &'a Option<String>) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| Error::codec(format!("{} JWK is missing '{name}'", self.kty)))
    }

    fn require(&self, name: &'static str, value: &Option<String>) -> Result<()> {
        self.member(name, value).map(|_| ())
    }

    /// Builds an EC JWK from raw big-endian components.
    pub(crate) fn from_ec_parts(curve: Curve, x: &[u8], y: &[u8], d: Option<&[u8]>) -> Jwk {
        Jwk {
            kty: "EC".to_owned(),
            crv: Some(curve.name().to_owned()),
            x: Some(base64url(x)),
            y: Some(base64url(y)),
            d: d.map(base64url),
            ..Default::default()
        }
    }

    /// Builds an RSA JWK from raw big-endian components (`[d, p, q, dp, dq, qi]` when private).
    pub(crate) fn from_rsa_parts(n: &[u8], e: &[u8], private: Option<[&[u8]; 6]>) -> Jwk {
        let mut jwk = Jwk {
            kty: "RSA".to_owned(),
            n: Some(base64url(n)),
            e: Some(base64url(e)),
            ..Default::default()
        };

        if let Some([d, p, q, dp, dq, qi]) = private {
            jwk.d = Some(base64url(d));
            jwk.p = Some(base64url(p));
            jwk.q = Some(base64url(q));
            jwk.dp = Some(base64url(dp));
            jwk.dq = Some(base64url(dq));
            jwk.qi = Some(base64url(qi));
        }

        jwk
    }
}
