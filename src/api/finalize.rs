use serde::{Deserialize, Serialize};

use crate::util::base64url;

/// Payload posted to an order's `finalize` URL, see [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// base64url DER of the PKCS #10 request, no PEM armour.
    pub csr: String,
}

impl Finalize {
    pub(crate) fn from_der(csr_der: &[u8]) -> Self {
        Self {
            csr: base64url(csr_der),
        }
    }
}
