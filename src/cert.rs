use std::io::{BufReader, Cursor};

use crate::{
    api,
    error::{Error, Result},
};

/// Normalises a PEM bundle.
///
/// Line break runs collapse to a single `\n`, concatenated blocks get a blank line between them,
/// and the result ends with a newline.
pub fn format_pem_chain(pem: &str) -> String {
    let mut out = String::with_capacity(pem.len() + 1);
    let mut in_break = false;

    for c in pem.trim().chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                out.push('\n');
                in_break = true;
            }
            continue;
        }

        in_break = false;
        out.push(c);
    }

    let mut out = out.replace("-\n-", "-\n\n-");
    out.push('\n');
    out
}

/// Splits a formatted PEM bundle on blank lines. Each block keeps a trailing newline.
pub fn split_pem_chain(pem: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut block = String::new();
    let mut breaks = String::new();

    for c in pem.trim().chars() {
        if c == '\r' || c == '\n' {
            breaks.push(c);
            continue;
        }

        if breaks.len() >= 2 {
            block.push('\n');
            blocks.push(std::mem::take(&mut block));
        } else {
            block.push_str(&breaks);
        }

        breaks.clear();
        block.push(c);
    }

    if !block.is_empty() {
        block.push('\n');
        blocks.push(block);
    }

    blocks
}

/// An issued certificate: the leaf and its issuer chain, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    cert: String,
    chain: String,
    expires: Option<String>,
    identifiers: Vec<api::Identifier>,
}

impl Certificate {
    pub(crate) fn from_bundle(bundle: &str, order: &api::Order) -> Result<Self> {
        let mut cert = Self::parse(bundle)?;
        cert.expires = order.expires.clone();
        cert.identifiers = order.identifiers.clone();
        Ok(cert)
    }

    /// Splits a PEM bundle as downloaded from the CA.
    ///
    /// The first block is the leaf, the rest the chain.
    pub fn parse(bundle: &str) -> Result<Self> {
        let mut blocks = split_pem_chain(&format_pem_chain(bundle)).into_iter();

        let cert = blocks
            .next()
            .filter(|block| !block.trim().is_empty())
            .ok_or_else(|| Error::codec("empty certificate bundle"))?;

        let cert = Certificate {
            cert,
            chain: blocks.collect::<Vec<_>>().join("\n"),
            expires: None,
            identifiers: Vec::new(),
        };

        // validate the PEM framing
        cert.certificate_der()?;

        Ok(cert)
    }

    /// The leaf certificate in PEM format.
    pub fn cert(&self) -> &str {
        &self.cert
    }

    /// Issuer certificates in PEM format, blank line separated. May be empty.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Leaf followed by the chain.
    pub fn fullchain(&self) -> String {
        if self.chain.is_empty() {
            self.cert.clone()
        } else {
            format!("{}\n{}", self.cert, self.chain)
        }
    }

    /// Expiry of the order the certificate was issued for (RFC 3339), if the CA reported one.
    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    /// Identifiers of the order, in request order.
    pub fn identifiers(&self) -> &[api::Identifier] {
        &self.identifiers
    }

    /// The issued certificate chain in DER format, leaf first.
    pub fn certificate_chain_der(&self) -> Result<Vec<Vec<u8>>> {
        let fullchain = self.fullchain();
        let mut rdr = BufReader::new(Cursor::new(fullchain.as_bytes()));

        let chain = rustls_pemfile::certs(&mut rdr)
            .map(|res| res.map(|cert| cert.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Error::codec(format!("invalid certificate PEM: {err}")))?;

        if chain.is_empty() {
            return Err(Error::codec("no certificates in bundle"));
        }

        Ok(chain)
    }

    /// The leaf certificate in DER format.
    pub fn certificate_der(&self) -> Result<Vec<u8>> {
        self.certificate_chain_der()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::codec("no certificates in bundle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "-----BEGIN CERTIFICATE-----\r\nTGVhZiBjZXJ0aWZpY2F0ZQ==\r\n-----END CERTIFICATE-----";
    const ISSUER: &str = "-----BEGIN CERTIFICATE-----\r\nSW50ZXJtZWRpYXRl\r\n-----END CERTIFICATE-----";

    #[test]
    fn format_separates_concatenated_blocks() {
        let bundle = format!("\r\n{LEAF}\r\n{ISSUER}\r\n\r\n");

        assert_eq!(
            format_pem_chain(&bundle),
            "-----BEGIN CERTIFICATE-----\nTGVhZiBjZXJ0aWZpY2F0ZQ==\n-----END CERTIFICATE-----\n\
             \n\
             -----BEGIN CERTIFICATE-----\nSW50ZXJtZWRpYXRl\n-----END CERTIFICATE-----\n"
        );
    }

    #[test]
    fn split_on_blank_lines() {
        let blocks = split_pem_chain("a\nb\n\n\nc\n\nd\n");
        assert_eq!(blocks, ["a\nb\n", "c\n", "d\n"]);

        assert!(split_pem_chain("  \n ").is_empty());
    }

    #[test]
    fn bundle_splits_into_leaf_and_chain() {
        let cert = Certificate::parse(&format!("{LEAF}\n{ISSUER}\n{ISSUER}")).unwrap();

        assert!(cert.cert().starts_with("-----BEGIN CERTIFICATE-----\nTGVh"));
        assert!(cert.cert().ends_with("-----END CERTIFICATE-----\n"));
        assert_eq!(cert.chain().matches("BEGIN CERTIFICATE").count(), 2);
        assert!(cert.chain().contains("-----\n\n-----"));

        assert_eq!(cert.certificate_der().unwrap(), b"Leaf certificate");
        assert_eq!(cert.certificate_chain_der().unwrap().len(), 3);
        assert_eq!(cert.expires(), None);
    }

    #[test]
    fn leaf_only() {
        let cert = Certificate::parse(LEAF).unwrap();
        assert_eq!(cert.chain(), "");
        assert_eq!(cert.fullchain(), cert.cert());
    }

    #[test]
    fn empty_bundle_rejected() {
        assert!(matches!(Certificate::parse("\r\n"), Err(Error::Codec(_))));
        assert!(matches!(
            Certificate::parse("not a certificate"),
            Err(Error::Codec(_))
        ));
    }
}
