//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/).
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2 to
//! issue certificates. JWS signing, CSR encoding and key (de)serialization are built in; the only
//! crypto dependencies are the RustCrypto signature primitives.
//!
//! # Usage
//!
//! 1. [`Directory::fetch`] the CA's directory.
//! 2. Resolve an [`Account`] with [`Directory::account`], agreeing to the terms of service.
//! 3. Describe the certificate with a [`CertificateRequest`], registering a [`Presenter`] for each
//!    [`ChallengeKind`] you can publish.
//! 4. [`Account::issue`] it, or step through the [`order`] façades yourself.
//!
//! ```no_run
//! # async fn demo(
//! #     account_key: acme::Jwk,
//! #     server_key: acme::Jwk,
//! #     presenter: impl acme::Presenter + 'static,
//! # ) -> acme::Result<()> {
//! use acme::{
//!     AccountOptions, AgreeToTerms, CancelToken, CertificateRequest, ChallengeKind, Directory,
//!     DirectoryUrl,
//! };
//!
//! let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;
//!
//! let account = dir
//!     .account(
//!         AccountOptions::new(account_key)
//!             .email("admin@example.com")
//!             .agree_to_terms(AgreeToTerms::Accept),
//!     )
//!     .await?;
//!
//! let request = CertificateRequest::new(["example.com"], server_key)
//!     .presenter(ChallengeKind::Http01, presenter);
//!
//! let cert = account.issue(request, &CancelToken::new()).await?;
//! println!("{}", cert.fullchain());
//! # Ok(())
//! # }
//! ```
//!
//! A complete `http-01` example is provided in the `demos/` directory of the source repository.
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. For ACME, this means proving you control either:
//!
//! - a server answering TLS or HTTP requests for that domain;
//! - the DNS server answering name lookups against the domain.
//!
//! Presenters do the publishing. Before any challenge is shown to the CA, each presenter is
//! self-tested with throwaway challenges (see [`IssueConfig::skip_dry_run`]).
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. Wildcard
//! names can only be proven with `dns-01`.
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the delays in [`IssueConfig`] really low, but balance this against the
//! real risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cancel;
mod cert;
mod config;
mod dir;
mod error;
mod jwk;
mod presenter;
mod req;
mod trans;
mod util;

pub mod api;
pub mod codec;
pub mod jws;
pub mod order;


pub use crate::{
    acc::{Account, RevocationReason},
    cancel::CancelToken,
    cert::{format_pem_chain, split_pem_chain, Certificate},
    codec::{csr::CsrInput, keys::KeyFormat},
    config::IssueConfig,
    dir::{AccountOptions, AgreeToTerms, Directory, DirectoryUrl, ExternalAccountKey},
    error::{BoxError, Error, Result},
    jwk::{Algorithm, Curve, Jwk, KeyType},
    order::{CertificateRequest, CsrSource},
    presenter::{ChallengeKind, DnsResolver, EnrichedChallenge, Presenter, Presenters},
    req::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient},
};
