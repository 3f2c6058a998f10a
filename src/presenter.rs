//! Challenge presentation.
//!
//! The core never publishes validation resources itself. For each challenge kind it hands an
//! [`EnrichedChallenge`] to a [`Presenter`], which creates the DNS record, serves the HTTP file or
//! installs the ALPN certificate.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error};

/// Domain validation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// See [RFC 8555 §8.3](https://datatracker.ietf.org/doc/html/rfc8555#section-8.3).
    #[serde(rename = "http-01")]
    Http01,

    /// See [RFC 8555 §8.4](https://datatracker.ietf.org/doc/html/rfc8555#section-8.4).
    #[serde(rename = "dns-01")]
    Dns01,

    /// See [RFC 8737](https://datatracker.ietf.org/doc/html/rfc8737).
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeKind {
    /// Default preference: DNS last since it propagates slowest, but it is the only kind valid
    /// for wildcard names.
    pub const DEFAULT_PREFERENCE: [ChallengeKind; 3] = [
        ChallengeKind::Http01,
        ChallengeKind::TlsAlpn01,
        ChallengeKind::Dns01,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
            ChallengeKind::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http-01" => Ok(ChallengeKind::Http01),
            "dns-01" => Ok(ChallengeKind::Dns01),
            "tls-alpn-01" => Ok(ChallengeKind::TlsAlpn01),
            other => Err(Error::config(format!("unknown challenge type '{other}'"))),
        }
    }
}

/// A server challenge together with everything a presenter needs to publish it.
///
/// Derived once per challenge and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedChallenge {
    #[serde(rename = "type")]
    pub kind: ChallengeKind,

    /// Challenge URL to respond to (and poll).
    pub url: String,

    /// Authorization the challenge belongs to.
    pub authorization_url: String,

    pub token: String,

    /// Identifier value with any `*.` prefix removed.
    pub hostname: String,

    /// Identifier as requested, `*.` included for wildcards.
    pub altname: String,

    pub wildcard: bool,

    /// Account key thumbprint.
    pub thumbprint: String,

    /// `token.thumbprint`
    pub key_authorization: String,

    /// `http://<hostname>/.well-known/acme-challenge/<token>`
    pub challenge_url: String,

    /// `_acme-challenge.<hostname>` (a randomised prefix during dry runs).
    pub dns_host: String,

    /// base64url SHA-256 of the key authorization; the TXT record value.
    pub dns_authorization: String,

    /// Longest presenter zone containing `dns_host`, if zones were reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_zone: Option<String>,

    /// `dns_host` relative to `dns_zone`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_prefix: Option<String>,

    /// Set for synthetic challenges created by the local self-test.
    pub dry_run: bool,
}

impl EnrichedChallenge {
    /// The value a validator must observe for this challenge.
    pub fn expected_value(&self) -> &str {
        match self.kind {
            ChallengeKind::Dns01 => &self.dns_authorization,
            ChallengeKind::Http01 | ChallengeKind::TlsAlpn01 => &self.key_authorization,
        }
    }

    /// Where a validator looks for this challenge.
    pub fn target(&self) -> &str {
        match self.kind {
            ChallengeKind::Http01 => &self.challenge_url,
            ChallengeKind::Dns01 => &self.dns_host,
            ChallengeKind::TlsAlpn01 => &self.hostname,
        }
    }
}

/// Publishes and removes validation resources.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Publishes the resource. May wait for propagation.
    async fn set(&self, challenge: &EnrichedChallenge) -> Result<(), BoxError>;

    /// Removes the resource. Failures are logged and otherwise ignored.
    async fn remove(&self, challenge: &EnrichedChallenge) -> Result<(), BoxError>;

    /// Reads back the currently published value, for presenters that can.
    async fn get(&self, _challenge: &EnrichedChallenge) -> Result<Option<String>, BoxError> {
        Ok(None)
    }

    /// DNS zones this presenter manages, used to derive record names relative to a zone.
    async fn zones(&self) -> Result<Vec<String>, BoxError> {
        Ok(Vec::new())
    }

    /// Time to wait after `set` before the resource is expected to be visible.
    ///
    /// Overrides the configured default for this presenter's challenge kind.
    fn propagation_delay(&self) -> Option<Duration> {
        None
    }
}

/// TXT lookups for the DNS self-test.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn txt_records(&self, name: &str) -> Result<Vec<String>, BoxError>;
}

/// Mapping from challenge kind to the presenter handling it.
#[derive(Clone, Default)]
pub struct Presenters {
    map: BTreeMap<ChallengeKind, Arc<dyn Presenter>>,
}

impl Presenters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `presenter` for `kind`, replacing any previous one.
    pub fn with(mut self, kind: ChallengeKind, presenter: impl Presenter + 'static) -> Self {
        self.insert(kind, Arc::new(presenter));
        self
    }

    pub fn insert(&mut self, kind: ChallengeKind, presenter: Arc<dyn Presenter>) {
        self.map.insert(kind, presenter);
    }

    pub fn get(&self, kind: ChallengeKind) -> Option<&Arc<dyn Presenter>> {
        self.map.get(&kind)
    }

    pub fn contains(&self, kind: ChallengeKind) -> bool {
        self.map.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn presenter(&self, kind: ChallengeKind) -> crate::Result<&Arc<dyn Presenter>> {
        self.get(kind)
            .ok_or_else(|| Error::config(format!("no presenter registered for {kind}")))
    }
}

impl fmt::Debug for Presenters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}
