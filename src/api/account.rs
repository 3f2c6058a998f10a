use serde::{Deserialize, Serialize};

use crate::jws::FlattenedJsonJws;

/// Status of an account, see [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// Account resource as returned by newAccount, and the payload sent to it.
///
/// See [RFC 8555 §7.1.2].
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<FlattenedJsonJws>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

impl Account {
    /// Payload of a newAccount request.
    pub(crate) fn registration(
        contact: Option<Vec<String>>,
        external_account_binding: Option<FlattenedJsonJws>,
    ) -> Self {
        Self {
            contact,
            external_account_binding,
            terms_of_service_agreed: Some(true),
            only_return_existing: Some(false),
            ..Default::default()
        }
    }

    /// Whether the account may still place orders.
    pub fn is_usable(&self) -> bool {
        self.status.map_or(true, |status| status == AccountStatus::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_payload() {
        let acc = Account::registration(Some(vec!["mailto:foo@bar.com".to_owned()]), None);

        assert_eq!(
            serde_json::to_value(&acc).unwrap(),
            serde_json::json!({
                "contact": ["mailto:foo@bar.com"],
                "termsOfServiceAgreed": true,
                "onlyReturnExisting": false,
            })
        );
    }

    #[test]
    fn revoked_account_is_unusable() {
        let acc: Account = serde_json::from_str(r#"{"status":"revoked","orders":"https://ca/o"}"#)
            .unwrap();
        assert_eq!(acc.status, Some(AccountStatus::Revoked));
        assert!(!acc.is_usable());
        assert!(Account::default().is_usable());
    }
}
