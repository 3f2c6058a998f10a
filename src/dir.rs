use std::{fmt, sync::Arc};

use crate::{
    acc::{Account, AccountKey},
    api,
    error::{Error, Result},
    jwk::Jwk,
    jws::{self, MacAlgorithm},
    req::{expect_header, handle_error, HttpClient, HttpRequest, ReqwestClient},
    trans::{NoncePool, Transport},
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// How the caller agrees to the CA's terms of service.
pub enum AgreeToTerms {
    /// Agree to whatever the current terms are.
    Accept,

    /// Called with the current terms URL; must return the URL being agreed to.
    Callback(Box<dyn Fn(&str) -> String + Send + Sync>),
}

impl AgreeToTerms {
    pub fn callback(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        AgreeToTerms::Callback(Box::new(f))
    }

    fn agree(&self, current: &str) -> String {
        match self {
            AgreeToTerms::Accept => current.to_owned(),
            AgreeToTerms::Callback(f) => f(current),
        }
    }
}

impl fmt::Debug for AgreeToTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgreeToTerms::Accept => f.write_str("Accept"),
            AgreeToTerms::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Credentials for [external account binding].
///
/// [external account binding]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
#[derive(Debug, Clone)]
pub struct ExternalAccountKey {
    /// Key identifier issued by the CA.
    pub key_id: String,

    /// MAC key issued by the CA, base64url encoded.
    pub hmac_key: String,

    pub alg: MacAlgorithm,
}

impl ExternalAccountKey {
    pub fn new(key_id: impl Into<String>, hmac_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            hmac_key: hmac_key.into(),
            alg: MacAlgorithm::default(),
        }
    }
}

/// Options for [`Directory::account`].
#[derive(Debug)]
pub struct AccountOptions {
    key: Jwk,
    key_id: Option<String>,
    contact: Option<Vec<String>>,
    agree_to_terms: AgreeToTerms,
    external_account: Option<ExternalAccountKey>,
}

impl AccountOptions {
    /// Options for the account owning the private key `key`.
    ///
    /// Terms of service are declined until [`agree_to_terms`](Self::agree_to_terms) is set.
    pub fn new(key: Jwk) -> Self {
        Self {
            key,
            key_id: None,
            contact: None,
            agree_to_terms: AgreeToTerms::callback(|_| String::new()),
            external_account: None,
        }
    }

    /// Reuse an already registered account; no registration request is made.
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Contact URLs, e.g. `mailto:admin@example.com`.
    pub fn contact(mut self, contact: Vec<String>) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Shorthand for a single `mailto:` contact.
    pub fn email(self, email: &str) -> Self {
        self.contact(vec![format!("mailto:{email}")])
    }

    pub fn agree_to_terms(mut self, agree: AgreeToTerms) -> Self {
        self.agree_to_terms = agree;
        self
    }

    pub fn external_account(mut self, eab: ExternalAccountKey) -> Self {
        self.external_account = Some(eab);
        self
    }
}

/// Entry point for accessing an ACME API.
#[derive(Clone)]
pub struct Directory {
    client: Arc<dyn HttpClient>,
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("api_directory", &self.api_directory)
            .finish_non_exhaustive()
    }
}

impl Directory {
    /// Fetches the directory using the default `reqwest` client.
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        Self::fetch_with(url, Arc::new(ReqwestClient::new()?)).await
    }

    /// Fetches the directory through a caller-provided transport.
    pub async fn fetch_with(url: DirectoryUrl<'_>, client: Arc<dyn HttpClient>) -> Result<Directory> {
        let api_directory = fetch_api_directory(client.as_ref(), url.to_url()).await?;
        let nonce_pool = Arc::new(NoncePool::new(&api_directory.new_nonce));

        Ok(Directory {
            client,
            nonce_pool,
            api_directory,
        })
    }

    /// Re-fetches the directory document, keeping the nonce pool when the nonce URL is unchanged.
    pub async fn refresh(&mut self, url: DirectoryUrl<'_>) -> Result<()> {
        let api_directory = fetch_api_directory(self.client.as_ref(), url.to_url()).await?;

        if api_directory.new_nonce != self.api_directory.new_nonce {
            self.nonce_pool = Arc::new(NoncePool::new(&api_directory.new_nonce));
        }

        self.api_directory = api_directory;
        Ok(())
    }

    /// Current terms of service URL, if the CA publishes one.
    pub fn terms_of_service(&self) -> Option<&str> {
        self.api_directory.terms_of_service()
    }

    /// Registers the account, or finds the existing one for the same key.
    ///
    /// When a key ID is supplied the account is assumed to exist and no request is made.
    pub async fn account(&self, options: AccountOptions) -> Result<Account> {
        let AccountOptions {
            key,
            key_id,
            contact,
            agree_to_terms,
            external_account,
        } = options;

        let account_key = AccountKey::new(key)?;
        let mut transport = Transport::new(
            Arc::clone(&self.client),
            Arc::clone(&self.nonce_pool),
            account_key,
        );

        if let Some(kid) = key_id {
            log::debug!("Reusing account {kid}");
            transport.set_key_id(kid);

            return Ok(Account::new(
                transport,
                api::Account::default(),
                self.api_directory.clone(),
            ));
        }

        self.check_terms(&agree_to_terms)?;

        let eab = match external_account {
            Some(eab) => Some(jws::external_account_binding(
                transport.account_key().jwk(),
                &eab.key_id,
                &eab.hmac_key,
                eab.alg,
                &self.api_directory.new_account,
            )?),

            None if self.api_directory.requires_external_account() => {
                return Err(Error::config(
                    "the CA requires an external account binding",
                ))
            }

            None => None,
        };

        // Prepare making a call to newAccount. This is fine to do both for new
        // keys and existing. For existing RFC 8555 says to return a 200 with
        // the Location header set to the key ID (kid).
        let acc = api::Account::registration(contact, eab);

        let res = transport
            .call_jwk(&self.api_directory.new_account, &acc)
            .await?;

        let kid = expect_header(&res, "location")?;
        log::debug!("Key ID is: {kid}");
        let api_account = res.json::<api::Account>()?;

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(
            transport,
            api_account,
            self.api_directory.clone(),
        ))
    }

    fn check_terms(&self, agree: &AgreeToTerms) -> Result<()> {
        let Some(current) = self.terms_of_service() else {
            return Ok(());
        };

        let agreed = agree.agree(current);

        if agreed != current {
            return Err(Error::TermsOfService {
                current: current.to_owned(),
                agreed: (!agreed.is_empty()).then_some(agreed),
            });
        }

        Ok(())
    }

    /// Returns a reference to the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }
}

async fn fetch_api_directory(client: &dyn HttpClient, url: &str) -> Result<api::Directory> {
    log::debug!("Fetch directory: {url}");
    let res = handle_error(client.send(HttpRequest::get(url)).await?)?;
    res.json()
}
