use serde::{Deserialize, Serialize};

use crate::{
    api,
    error::{Error, Result},
};

/// The status of an [`api::Order`].
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,

    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
            OrderStatus::Unknown => "unknown",
        }
    }
}

/// An ACME order object.
///
/// Represents a client's request for a certificate and is used to track the progress of that order
/// through to issuance.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43.570360537Z",
///   "identifiers": [
///     {
///       "type": "dns",
///       "value": "acmetest.algesten.se"
///     }
///   ],
///   "authorizations": [
///     "https://example.com/acme/authz/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs"
///   ],
///   "finalize": "https://example.com/acme/finalize/7738992/18234324"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    /// Requested start of the certificate validity period.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    /// Requested end of the certificate validity period.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizations: Option<Vec<String>>,

    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub finalize: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Order {
    pub(crate) fn from_identifiers(identifiers: Vec<api::Identifier>) -> Self {
        Self {
            identifiers,
            ..Default::default()
        }
    }

    /// Status as a string, `"unknown"` when absent.
    pub fn status_str(&self) -> &'static str {
        self.status.map_or("unknown", OrderStatus::as_str)
    }

    /// Returns all domains associated with this order.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    // Let's Encrypt was observed to return domains in alternate order which
    // may flip primary with SAN(s).
    //
    // This overwrites self without changing the order of the domains.
    pub(crate) fn overwrite(&mut self, mut from_api: Self) -> Result<()> {
        // Make sure the lists are the same.
        if from_api.identifiers.len() != self.identifiers.len()
            || from_api
                .identifiers
                .iter()
                .any(|id| !self.identifiers.contains(id))
        {
            return Err(Error::IdentifierMismatch {
                requested: self.domains().into_iter().map(str::to_owned).collect(),
                returned: from_api.domains().into_iter().map(str::to_owned).collect(),
            });
        }
        // Then preserve the original order.
        from_api.identifiers = std::mem::take(&mut self.identifiers);
        *self = from_api;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(domains: &[&str]) -> Order {
        Order::from_identifiers(domains.iter().map(|d| api::Identifier::dns(d)).collect())
    }

    #[test]
    fn new_order_payload_only_carries_identifiers() {
        let json = serde_json::to_value(order(&["example.com"])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "identifiers": [{ "type": "dns", "value": "example.com" }] })
        );
    }

    #[test]
    fn overwrite_keeps_requested_order() {
        let mut ours = order(&["example.com", "www.example.com"]);
        let mut theirs = order(&["www.example.com", "example.com"]);
        theirs.status = Some(OrderStatus::Pending);
        theirs.finalize = "https://ca/finalize/1".to_owned();

        ours.overwrite(theirs).unwrap();
        assert_eq!(ours.domains(), ["example.com", "www.example.com"]);
        assert_eq!(ours.status_str(), "pending");
        assert_eq!(ours.finalize, "https://ca/finalize/1");

        let err = ours.overwrite(order(&["example.com"])).unwrap_err();
        assert!(matches!(err, Error::IdentifierMismatch { .. }));
    }

    #[test]
    fn unknown_status_tolerated() {
        let order: Order =
            serde_json::from_str(r#"{"status":"archived","identifiers":[]}"#).unwrap();
        assert_eq!(order.status, Some(OrderStatus::Unknown));
    }
}
