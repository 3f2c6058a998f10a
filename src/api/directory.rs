use serde::{Deserialize, Serialize};

/// The CA's table of contents: one URL per resource, plus optional metadata.
///
/// Fields a CA adds beyond [RFC 8555 §7.1.1] (e.g. `renewalInfo`) are ignored.
///
/// [RFC 8555 §7.1.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,

    /// Only offered by CAs supporting pre-authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,

    pub revoke_cert: String,
    pub key_change: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    /// URL of the terms of service currently in force.
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }

    /// Whether newAccount must carry an external account binding.
    pub fn requires_external_account(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.external_account_required)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Names the CA answers to in CAA records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}
