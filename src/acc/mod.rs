use std::sync::Arc;

use zeroize::Zeroizing;

use crate::{
    api,
    cancel::CancelToken,
    cert::Certificate,
    error::Result,
    order::{CertificateRequest, NewOrder},
    trans::Transport,
};

mod acme_key;

pub(crate) use self::acme_key::AccountKey;

#[derive(Debug, Clone)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub api_account: api::Account,
    pub api_directory: api::Directory,
}

/// Account with an ACME provider.
///
/// Accounts are resolved using [`Directory::account()`] from a private key in JWK form; the key
/// signs every request to the ACME API. RSA, P-256 and P-384 keys are supported.
///
/// [`Directory::account()`]: crate::Directory::account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        api_directory: api::Directory,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                api_directory,
            }),
        }
    }

    /// Account URL, used as `kid` in every request after registration.
    pub fn key_id(&self) -> &str {
        // set by `Directory::account` before construction
        self.inner
            .transport
            .account_key()
            .key_id()
            .unwrap_or_default()
    }

    /// RFC 7638 thumbprint of the account key; the suffix of every key authorization.
    pub fn thumbprint(&self) -> Result<String> {
        self.inner.transport.account_key().jwk().thumbprint()
    }

    /// Private key for this account as PKCS #8 PEM.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>> {
        self.inner.transport.account_key().to_pem()
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// The request is validated before anything is sent, and unless disabled the presenters are
    /// self-tested with a dry run. Every call creates a new order with the ACME API provider, even
    /// when the domain names supplied are exactly the same.
    ///
    /// Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order(
        &self,
        request: CertificateRequest,
        cancel: &CancelToken,
    ) -> Result<NewOrder> {
        NewOrder::create(&self.inner, request, cancel).await
    }

    /// Runs an order from creation to certificate download.
    pub async fn issue(
        &self,
        request: CertificateRequest,
        cancel: &CancelToken,
    ) -> Result<Certificate> {
        self.new_order(request, cancel)
            .await?
            .authorizations()
            .await?
            .select()?
            .present()
            .await?
            .validate()
            .await?
            .finalize()
            .await?
            .download_cert()
            .await
    }

    /// Revoke a certificate for the reason given.
    pub async fn revoke_certificate(
        &self,
        cert: &Certificate,
        reason: RevocationReason,
    ) -> Result<()> {
        let revocation = api::Revocation::new(&cert.certificate_der()?, reason);

        let url = &self.inner.api_directory.revoke_cert;
        self.inner.transport.call_kid(url, &revocation).await?;

        Ok(())
    }

    /// Returns a reference to the account's API object.
    ///
    /// Empty when the account was resolved from a known key ID. Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }
}

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jwk::Curve,
        util::base64url,
        presenter::ChallengeKind,
        test::{ec_jwk, registered_account, MemoryPresenter},
        IssueConfig,
    };

    #[tokio::test]
    async fn test_revoke_certificate() {
        let server = crate::test::with_directory_server();
        let acc = registered_account(&server).await;

        let presenter = MemoryPresenter::default();
        let request = CertificateRequest::new(["acme-test.example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Http01, presenter)
            .config(IssueConfig {
                skip_dry_run: true,
                ..IssueConfig::immediate()
            });

        let cert = acc.issue(request, &CancelToken::new()).await.unwrap();

        acc.revoke_certificate(&cert, RevocationReason::Superseded)
            .await
            .unwrap();

        let payload = server.state.last_payload("/acme/revoke-cert").unwrap();
        assert_eq!(payload["reason"], 4);
        assert_eq!(
            payload["certificate"],
            base64url(&cert.certificate_der().unwrap())
        );
    }

    #[tokio::test]
    async fn account_exposes_key_material() {
        let server = crate::test::with_directory_server();
        let acc = registered_account(&server).await;

        assert!(acc.private_key_pem().unwrap().contains("PRIVATE KEY"));
        assert_eq!(acc.thumbprint().unwrap().len(), 43);
    }
}
