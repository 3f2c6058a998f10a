use serde::{Deserialize, Serialize};

use crate::{api, presenter::ChallengeKind};

/// The status of an [`api::Authorization`].
///
/// See [RFC 8555 §7.1.4].
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,

    #[serde(other)]
    Unknown,
}

/// Proof, pending or settled, that the account controls one identifier of an order.
///
/// Failed challenges carry the CA's problem document, e.g. `urn:ietf:params:acme:error:dns` with
/// the TXT lookup that went wrong. See [RFC 8555 §7.1.4].
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: api::Identifier,

    pub status: AuthorizationStatus,

    /// RFC 3339 timestamp; always present once valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// While pending, every challenge the CA would accept. Afterwards, only the one attempted.
    pub challenges: Vec<api::Challenge>,

    /// Set by the CA when the order named `*.<identifier>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,
}

impl Authorization {
    /// Returns true if authorization was created for a wildcard domain.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }

    /// Returns true if ownership was already proven, either for the authorization or through any
    /// of its challenges.
    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
            || self
                .challenges
                .iter()
                .any(|c| c.status == Some(api::ChallengeStatus::Valid))
    }

    /// Returns the challenge of the given kind, if one is offered.
    pub fn challenge(&self, kind: ChallengeKind) -> Option<&api::Challenge> {
        self.challenges.iter().find(|c| c._type == kind.as_str())
    }

    /// Types of all offered challenges, including ones this library cannot handle.
    pub fn offered_types(&self) -> Vec<String> {
        self.challenges.iter().map(|c| c._type.clone()).collect()
    }
}

/// Payload deactivating an authorization, see [RFC 8555 §7.5.2].
///
/// [RFC 8555 §7.5.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.5.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deactivation {
    status: AuthorizationStatus,
}

impl Default for Deactivation {
    fn default() -> Self {
        Self {
            status: AuthorizationStatus::Deactivated,
        }
    }
}
