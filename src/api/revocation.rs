use serde::{Deserialize, Serialize};

use crate::{acc::RevocationReason, util::base64url};

/// Payload of a revokeCert request, see [RFC 8555 §7.6].
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// base64url DER of the leaf certificate.
    pub certificate: String,

    /// RFC 5280 reason code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

impl Revocation {
    pub(crate) fn new(certificate_der: &[u8], reason: RevocationReason) -> Self {
        Self {
            certificate: base64url(certificate_der),
            // RFC 5280 §5.3.1: omit the extension rather than send unspecified (0)
            reason: match reason {
                RevocationReason::Unspecified => None,
                reason => Some(reason as u8),
            },
        }
    }
}
