//! Order life cycle.
//!
//! An order goes through a life cycle of different states that each allow one action. To ensure
//! the user only uses appropriate actions, this library has simple façade structs that wrap the
//! actual [`api::Order`], each consuming itself into the next.
//!
//! [`NewOrder`] -> [`FetchedOrder`] -> [`SelectedOrder`] -> [`PresentedOrder`] ->
//! [`ValidatedOrder`] -> [`CertOrder`] -> [`Certificate`]
//!
//! [`Account::issue`] drives the whole chain.
//!
//! [`Account::issue`]: crate::Account::issue

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use futures::future::join_all;

use crate::{
    acc::AccountInner,
    api,
    cancel::CancelToken,
    cert::Certificate,
    codec::csr::{pack_csr, CsrInput},
    config::IssueConfig,
    error::{Error, Result},
    jwk::Jwk,
    presenter::{ChallengeKind, DnsResolver, EnrichedChallenge, Presenter, Presenters},
    req::expect_header,
};

mod auth;
mod dry_run;

/// Where the CSR submitted at finalization comes from.
#[derive(Debug, Clone)]
pub enum CsrSource {
    /// Build and sign a CSR for the order's domains with this private key.
    Generate(Jwk),

    /// Submit a caller-built CSR; its altnames become the order's domains.
    Provided(CsrInput),
}

/// Everything needed to issue one certificate.
///
/// ```no_run
/// # use acme::{CertificateRequest, ChallengeKind, Jwk, Presenter};
/// # fn demo(server_key: Jwk, presenter: impl Presenter + 'static) {
/// let request = CertificateRequest::new(["example.com", "www.example.com"], server_key)
///     .presenter(ChallengeKind::Http01, presenter);
/// # }
/// ```
#[derive(Clone)]
pub struct CertificateRequest {
    domains: Vec<String>,
    subject: Option<String>,
    csr: CsrSource,
    presenters: Presenters,
    challenge_preference: Vec<ChallengeKind>,
    config: IssueConfig,
    dns_resolver: Option<Arc<dyn DnsResolver>>,
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("domains", &self.domains)
            .field("subject", &self.subject)
            .field("presenters", &self.presenters)
            .field("challenge_preference", &self.challenge_preference)
            .field("config", &self.config)
            .field("dns_resolver", &self.dns_resolver.is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateRequest {
    /// Request for `domains`, with a CSR generated from `server_key` at finalization.
    ///
    /// `server_key` must be a private RSA, P-256 or P-384 key and must differ from the account key.
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>, server_key: Jwk) -> Self {
        Self::with_source(
            domains.into_iter().map(Into::into).collect(),
            CsrSource::Generate(server_key),
        )
    }

    /// Request for the domains of a caller-built CSR.
    pub fn from_csr(csr: CsrInput) -> Self {
        Self::with_source(Vec::new(), CsrSource::Provided(csr))
    }

    fn with_source(domains: Vec<String>, csr: CsrSource) -> Self {
        Self {
            domains,
            subject: None,
            csr,
            presenters: Presenters::new(),
            challenge_preference: ChallengeKind::DEFAULT_PREFERENCE.to_vec(),
            config: IssueConfig::default(),
            dns_resolver: None,
        }
    }

    /// Domain to move to the front of the identifier list. Must be one of the domains.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Registers the presenter for `kind`.
    pub fn presenter(mut self, kind: ChallengeKind, presenter: impl Presenter + 'static) -> Self {
        self.presenters.insert(kind, Arc::new(presenter));
        self
    }

    pub fn presenters(mut self, presenters: Presenters) -> Self {
        self.presenters = presenters;
        self
    }

    /// Order in which challenge kinds are tried. Kinds without a presenter are skipped.
    pub fn challenge_preference(mut self, kinds: impl IntoIterator<Item = ChallengeKind>) -> Self {
        self.challenge_preference = kinds.into_iter().collect();
        self
    }

    pub fn config(mut self, config: IssueConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver used to probe `dns-01` records during the dry run.
    pub fn dns_resolver(mut self, resolver: impl DnsResolver + 'static) -> Self {
        self.dns_resolver = Some(Arc::new(resolver));
        self
    }

    /// Validates the request; nothing here touches the network.
    fn prepare(self) -> Result<Plan> {
        let CertificateRequest {
            domains,
            subject,
            csr,
            presenters,
            challenge_preference,
            config,
            dns_resolver,
        } = self;

        let (mut domains, subject) = match &csr {
            CsrSource::Provided(input) => {
                let info = input.info()?;
                (info.altnames, info.subject.or(subject))
            }

            CsrSource::Generate(jwk) => {
                if !jwk.is_private() {
                    return Err(Error::config("the server key must be a private key"));
                }
                jwk.algorithm()?;

                (domains, subject)
            }
        };

        if domains.is_empty() {
            return Err(Error::config("at least one domain is required"));
        }

        if let Some(bad) = domains.iter().find(|d| d.is_empty() || !d.is_ascii()) {
            return Err(Error::config(format!(
                "'{bad}' is not an ASCII domain name; convert it to punycode (xn--) first"
            )));
        }

        let mut seen = HashSet::new();
        domains.retain(|domain| seen.insert(domain.clone()));

        if let Some(subject) = subject {
            if !domains.contains(&subject) {
                return Err(Error::config(format!(
                    "subject '{subject}' must be one of the domains {domains:?}"
                )));
            }

            // stable, so the remaining domains keep their order
            domains.sort_by_key(|domain| *domain != subject);
        }

        if presenters.is_empty() {
            return Err(Error::config("at least one challenge presenter is required"));
        }

        let mut enabled = Vec::new();
        for kind in challenge_preference {
            if presenters.contains(kind) && !enabled.contains(&kind) {
                enabled.push(kind);
            }
        }

        if enabled.is_empty() {
            return Err(Error::config(
                "none of the preferred challenge types has a presenter",
            ));
        }

        for domain in &domains {
            let offered = dry_run::offered_kinds(domain);

            if !enabled.iter().any(|kind| offered.contains(kind)) {
                return Err(auth::no_suitable_challenge(
                    domain,
                    offered.iter().map(|kind| kind.as_str().to_owned()).collect(),
                    &enabled,
                ));
            }
        }

        Ok(Plan {
            domains,
            csr,
            presenters,
            enabled,
            config,
            dns_resolver,
        })
    }
}

/// A validated [`CertificateRequest`].
pub(crate) struct Plan {
    pub domains: Vec<String>,
    pub csr: CsrSource,
    pub presenters: Presenters,

    /// Challenge preference restricted to kinds with a presenter.
    pub enabled: Vec<ChallengeKind>,

    pub config: IssueConfig,
    pub dns_resolver: Option<Arc<dyn DnsResolver>>,
}

#[cfg(test)]
impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("domains", &self.domains)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Immutable per-order state shared by every façade.
pub(crate) struct OrderContext {
    pub account: Arc<AccountInner>,
    pub plan: Plan,
    pub thumbprint: String,

    /// Zones reported by the `dns-01` presenter, fetched once per order.
    pub zones: Vec<String>,

    pub cancel: CancelToken,
}

impl OrderContext {
    /// Sets every challenge concurrently, then waits for the slowest kind to propagate.
    ///
    /// If any `set` fails all challenges are removed again.
    pub(crate) async fn set_all(
        &self,
        challenges: &[EnrichedChallenge],
        default_delay: impl Fn(ChallengeKind) -> Duration,
    ) -> Result<()> {
        let sets = challenges.iter().map(|challenge| async move {
            let presenter = self.plan.presenters.presenter(challenge.kind)?;
            log::debug!(
                "Setting {} challenge for {}",
                challenge.kind,
                challenge.altname
            );

            self.cancel
                .run(async {
                    presenter
                        .set(challenge)
                        .await
                        .map_err(|source| Error::Presenter {
                            kind: challenge.kind,
                            source,
                        })
                })
                .await
        });

        let failed = join_all(sets).await.into_iter().find_map(Result::err);

        if let Some(err) = failed {
            self.remove_all(challenges).await;
            return Err(err);
        }

        let wait = challenges
            .iter()
            .map(|challenge| {
                self.plan
                    .presenters
                    .get(challenge.kind)
                    .and_then(|presenter| presenter.propagation_delay())
                    .unwrap_or_else(|| default_delay(challenge.kind))
            })
            .max()
            .unwrap_or_default();

        if let Err(err) = self.cancel.sleep(wait).await {
            self.remove_all(challenges).await;
            return Err(err);
        }

        Ok(())
    }

    /// Best-effort removal of every challenge.
    pub(crate) async fn remove_all(&self, challenges: &[EnrichedChallenge]) {
        let removes = challenges.iter().filter_map(|challenge| {
            let presenter = self.plan.presenters.get(challenge.kind)?;
            Some(auth::remove(presenter.as_ref(), challenge))
        });

        join_all(removes).await;
    }

    fn requested(&self) -> Vec<String> {
        self.plan.domains.clone()
    }
}

/// The order wrapped with an outer façade.
struct Order {
    ctx: Arc<OrderContext>,
    api_order: api::Order,
    url: String,
}

impl Order {
    async fn refresh(&mut self) -> Result<()> {
        let transport = &self.ctx.account.transport;
        let res = self.ctx.cancel.run(transport.post_as_get(&self.url)).await?;
        self.api_order.overwrite(res.json()?)
    }

    fn error(&self, validated: &[String]) -> Error {
        Error::Order {
            status: self.api_order.status_str().to_owned(),
            requested: self.ctx.requested(),
            validated: validated.to_vec(),
            problem: self.api_order.error.clone(),
        }
    }
}

/// A new order, created by [`Account::new_order`].
///
/// The request has been validated, the presenters self-tested, and the CA has accepted the
/// identifiers.
///
/// [`Account::new_order`]: crate::Account::new_order
pub struct NewOrder {
    order: Order,
}

impl NewOrder {
    pub(crate) async fn create(
        account: &Arc<AccountInner>,
        request: CertificateRequest,
        cancel: &CancelToken,
    ) -> Result<NewOrder> {
        let plan = request.prepare()?;
        let thumbprint = account.transport.account_key().jwk().thumbprint()?;

        let zones = match plan.presenters.get(ChallengeKind::Dns01) {
            Some(presenter) if plan.enabled.contains(&ChallengeKind::Dns01) => {
                cancel
                    .run(async {
                        presenter.zones().await.map_err(|source| Error::Presenter {
                            kind: ChallengeKind::Dns01,
                            source,
                        })
                    })
                    .await?
            }
            _ => Vec::new(),
        };

        let ctx = Arc::new(OrderContext {
            account: Arc::clone(account),
            plan,
            thumbprint,
            zones,
            cancel: cancel.clone(),
        });

        if ctx.plan.config.skip_dry_run {
            log::debug!("Skipping dry run");
        } else {
            dry_run::run(&ctx).await?;
        }

        let identifiers = ctx
            .plan
            .domains
            .iter()
            .map(|domain| api::Identifier::dns(domain))
            .collect();
        let mut api_order = api::Order::from_identifiers(identifiers);

        let new_order_url = &account.api_directory.new_order;
        let res = cancel
            .run(account.transport.call_kid(new_order_url, &api_order))
            .await?;

        let url = expect_header(&res, "location")?;
        api_order.overwrite(res.json()?)?;

        log::debug!("Created order {url} for {:?}", ctx.plan.domains);

        Ok(NewOrder {
            order: Order {
                ctx,
                api_order,
                url,
            },
        })
    }

    /// Fetches every authorization of the order (POST-as-GET).
    pub async fn authorizations(self) -> Result<FetchedOrder> {
        let ctx = &self.order.ctx;
        let transport = &ctx.account.transport;

        let urls = match self.order.api_order.authorizations.as_deref() {
            Some(urls) if !urls.is_empty() => urls,
            _ => {
                return Err(Error::Protocol(format!(
                    "order {} lists no authorizations",
                    self.order.url
                )))
            }
        };

        let mut authorizations = Vec::with_capacity(urls.len());

        for url in urls {
            let res = ctx.cancel.run(transport.post_as_get(url)).await?;
            authorizations.push((url.clone(), res.json::<api::Authorization>()?));
        }

        Ok(FetchedOrder {
            order: self.order,
            authorizations,
        })
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }

    /// Order URL from the `Location` header.
    pub fn url(&self) -> &str {
        &self.order.url
    }
}

/// An order with its authorizations fetched.
pub struct FetchedOrder {
    order: Order,
    authorizations: Vec<(String, api::Authorization)>,
}

impl FetchedOrder {
    /// Picks one challenge per authorization that is not yet valid.
    pub fn select(self) -> Result<SelectedOrder> {
        let ctx = &self.order.ctx;
        let enrichment = auth::Enrichment {
            thumbprint: &ctx.thumbprint,
            zones: &ctx.zones,
            dns_prefix: auth::DNS_PREFIX,
            dry_run: false,
        };

        let mut challenges = Vec::new();
        let mut validated = Vec::new();

        for (url, authorization) in &self.authorizations {
            let identifier = &authorization.identifier;

            if authorization.is_valid() {
                log::debug!("Authorization for {} already valid", identifier.value);
                validated.push(identifier.value.clone());
                continue;
            }

            let (kind, challenge) = auth::choose(&ctx.plan.enabled, &authorization.challenges)
                .ok_or_else(|| {
                    let altname = if authorization.is_wildcard() {
                        format!("*.{}", identifier.hostname())
                    } else {
                        identifier.value.clone()
                    };
                    auth::no_suitable_challenge(
                        &altname,
                        authorization.offered_types(),
                        &ctx.plan.enabled,
                    )
                })?;

            challenges.push(auth::enrich(
                kind,
                challenge,
                url,
                identifier,
                authorization.is_wildcard(),
                &enrichment,
            )?);
        }

        Ok(SelectedOrder {
            order: self.order,
            challenges,
            validated,
        })
    }

    /// Authorization URLs with their objects, in order.
    pub fn authorizations(&self) -> &[(String, api::Authorization)] {
        &self.authorizations
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// An order with one enriched challenge per pending authorization.
pub struct SelectedOrder {
    order: Order,
    challenges: Vec<EnrichedChallenge>,
    validated: Vec<String>,
}

impl SelectedOrder {
    /// Publishes every challenge before any is confirmed to the CA.
    pub async fn present(self) -> Result<PresentedOrder> {
        let config = &self.order.ctx.plan.config;

        self.order
            .ctx
            .set_all(&self.challenges, |_| config.set_challenge_wait)
            .await?;

        Ok(PresentedOrder {
            order: self.order,
            challenges: self.challenges,
            validated: self.validated,
        })
    }

    pub fn challenges(&self) -> &[EnrichedChallenge] {
        &self.challenges
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// An order whose challenges are published and waiting for the CA.
pub struct PresentedOrder {
    order: Order,
    challenges: Vec<EnrichedChallenge>,
    validated: Vec<String>,
}

impl PresentedOrder {
    /// Confirms the challenges to the CA one at a time.
    ///
    /// Each challenge is removed once valid. On failure the ones not yet confirmed are removed.
    pub async fn validate(mut self) -> Result<ValidatedOrder> {
        let ctx = Arc::clone(&self.order.ctx);

        for (i, challenge) in self.challenges.iter().enumerate() {
            let res = async {
                let presenter = ctx.plan.presenters.presenter(challenge.kind)?;
                auth::confirm(
                    &ctx.account.transport,
                    challenge,
                    presenter.as_ref(),
                    &ctx.plan.config,
                    &ctx.cancel,
                )
                .await
            }
            .await;

            if let Err(err) = res {
                ctx.remove_all(&self.challenges[i..]).await;
                return Err(err);
            }

            self.validated.push(challenge.altname.clone());
        }

        Ok(ValidatedOrder {
            order: self.order,
            validated: self.validated,
        })
    }

    pub fn challenges(&self) -> &[EnrichedChallenge] {
        &self.challenges
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// An order with every identifier validated, ready for a CSR.
pub struct ValidatedOrder {
    order: Order,
    validated: Vec<String>,
}

impl ValidatedOrder {
    /// Submits the CSR and polls the order until the certificate is issued.
    pub async fn finalize(mut self) -> Result<CertOrder> {
        let ctx = Arc::clone(&self.order.ctx);
        let config = &ctx.plan.config;

        let csr_der = match &ctx.plan.csr {
            CsrSource::Generate(jwk) => pack_csr(jwk, &ctx.plan.domains)?,
            CsrSource::Provided(input) => input.to_der()?,
        };

        log::debug!("Finalizing order {}", self.order.url);

        let res = ctx
            .cancel
            .run(
                ctx.account
                    .transport
                    .call_kid(&self.order.api_order.finalize, &api::Finalize::from_der(&csr_der)),
            )
            .await?;
        self.order.api_order.overwrite(res.json()?)?;

        let mut polls = 0;

        loop {
            match self.order.api_order.status {
                Some(api::OrderStatus::Valid) => break,

                Some(api::OrderStatus::Processing) if polls < config.max_poll => {
                    polls += 1;
                    ctx.cancel.sleep(config.order_poll_interval).await?;
                    self.order.refresh().await?;
                }

                _ => return Err(self.order.error(&self.validated)),
            }
        }

        Ok(CertOrder {
            order: self.order,
            validated: self.validated,
        })
    }

    /// Domains proven during this order or already valid before it.
    pub fn validated(&self) -> &[String] {
        &self.validated
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// Order for an issued certificate that is ready to download.
pub struct CertOrder {
    order: Order,
    validated: Vec<String>,
}

impl CertOrder {
    /// Request download of the issued certificate.
    pub async fn download_cert(self) -> Result<Certificate> {
        let ctx = &self.order.ctx;

        let Some(url) = &self.order.api_order.certificate else {
            return Err(self.order.error(&self.validated));
        };

        let res = ctx
            .cancel
            .run(ctx.account.transport.post_as_get(url))
            .await?;

        Certificate::from_bundle(&res.text(), &self.order.api_order)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jwk::Curve,
        req::ReqwestClient,
        test::{
            account_with_key, ec_jwk, registered_account, rsa_jwk, with_directory_server,
            ChallengeMode, MemoryPresenter, MemoryResolver, OrderMode,
        },
    };

    fn request(domains: &[&str]) -> CertificateRequest {
        CertificateRequest::new(domains.iter().copied(), ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Http01, MemoryPresenter::default())
            .config(IssueConfig {
                skip_dry_run: true,
                ..IssueConfig::immediate()
            })
    }

    #[test]
    fn subject_moves_first_and_duplicates_collapse() {
        let plan = request(&["a.example.com", "b.example.com", "a.example.com", "c.example.com"])
            .subject("c.example.com")
            .prepare()
            .unwrap();

        assert_eq!(
            plan.domains,
            ["c.example.com", "a.example.com", "b.example.com"]
        );
    }

    #[test]
    fn configuration_errors_before_network() {
        let err = request(&[]).prepare().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = request(&["bücher.example"]).prepare().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = request(&["example.com"])
            .subject("other.com")
            .prepare()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .prepare()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = request(&["example.com"])
            .challenge_preference([ChallengeKind::Dns01])
            .prepare()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let public = ec_jwk(Curve::P256).neuter();
        let err = CertificateRequest::new(["example.com"], public)
            .presenter(ChallengeKind::Http01, MemoryPresenter::default())
            .prepare()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wildcard_without_dns_presenter_rejected() {
        let err = request(&["*.example.com"]).prepare().unwrap_err();

        match err {
            Error::NoSuitableChallenge {
                identifier,
                offered,
                enabled,
            } => {
                assert_eq!(identifier, "*.example.com");
                assert_eq!(offered, ["dns-01"]);
                assert_eq!(enabled, ["http-01"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn csr_domains_win() {
        let jwk = ec_jwk(Curve::P256);
        let domains = vec!["example.com".to_owned(), "www.example.com".to_owned()];
        let der = pack_csr(&jwk, &domains).unwrap();

        let plan = CertificateRequest::from_csr(CsrInput::Der(der))
            .presenter(ChallengeKind::Http01, MemoryPresenter::default())
            .prepare()
            .unwrap();

        assert_eq!(plan.domains, domains);
    }

    #[tokio::test]
    async fn issues_certificate_end_to_end() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let presenter = MemoryPresenter::default();
        let request = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Http01, presenter.clone())
            .config(IssueConfig {
                skip_dry_run: true,
                ..IssueConfig::immediate()
            });

        let cert = acc.issue(request, &CancelToken::new()).await.unwrap();

        assert!(cert.cert().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(!cert.chain().is_empty());
        assert_eq!(cert.identifiers()[0].value, "example.com");

        // set once, removed once after validation
        assert_eq!(presenter.sets().len(), 1);
        assert_eq!(presenter.removes().len(), 1);
        assert!(presenter.values().is_empty());

        let csr = server.state.last_payload("/acme/finalize/1").unwrap();
        assert!(csr["csr"].as_str().is_some_and(|csr| !csr.is_empty()));
    }

    #[tokio::test]
    async fn subject_first_in_new_order() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let request = request(&["www.example.com", "example.com"]).subject("example.com");
        let order = acc.new_order(request, &CancelToken::new()).await.unwrap();

        assert_eq!(order.api_order().domains(), ["example.com", "www.example.com"]);
        assert_eq!(
            server.state.requested_identifiers(),
            ["example.com", "www.example.com"]
        );
    }

    #[tokio::test]
    async fn wildcard_uses_dns() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let request = request(&["*.example.com"])
            .presenter(ChallengeKind::Dns01, MemoryPresenter::default());

        let selected = acc
            .new_order(request, &CancelToken::new())
            .await
            .unwrap()
            .authorizations()
            .await
            .unwrap()
            .select()
            .unwrap();

        let challenges = selected.challenges();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].kind, ChallengeKind::Dns01);
        assert_eq!(challenges[0].altname, "*.example.com");
        assert_eq!(challenges[0].dns_host, "_acme-challenge.example.com");
    }

    #[tokio::test]
    async fn dry_run_never_touches_live_record() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let presenter = MemoryPresenter::default();
        let request = CertificateRequest::new(["*.example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Dns01, presenter.clone())
            .dns_resolver(MemoryResolver::new(presenter.clone()))
            .config(IssueConfig::immediate());

        acc.issue(request, &CancelToken::new()).await.unwrap();

        let sets = presenter.sets();
        let dry: Vec<_> = sets.iter().filter(|c| c.dry_run).collect();
        assert_eq!(dry.len(), 1);

        for challenge in dry {
            assert!(challenge.dns_host.starts_with("_acme-dryrun-"));
            assert!(challenge.token.starts_with("test-"));
        }

        assert!(sets
            .iter()
            .filter(|c| c.dns_host == "_acme-challenge.example.com")
            .all(|c| !c.dry_run));
        assert!(presenter.values().is_empty());
    }

    #[tokio::test]
    async fn dry_run_failure_aborts_before_order() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        // publishes nothing, so the probe reads back nothing
        let presenter = MemoryPresenter::default().dropping_values();
        let request = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Dns01, presenter.clone())
            .dns_resolver(MemoryResolver::new(presenter.clone()))
            .config(IssueConfig::immediate());

        let err = acc.issue(request, &CancelToken::new()).await.unwrap_err();

        match err {
            Error::DryRun {
                kind, altname, got, ..
            } => {
                assert_eq!(kind, ChallengeKind::Dns01);
                assert_eq!(altname, "example.com");
                assert_eq!(got, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(presenter.removes().len(), 1);
        assert!(server.state.requested_identifiers().is_empty());
    }

    #[tokio::test]
    async fn stuck_pending_deactivates_once() {
        let server = with_directory_server();
        server.state.set_challenge_mode(ChallengeMode::PendingForever);
        let acc = registered_account(&server).await;

        let presenter = MemoryPresenter::default();
        let request = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Http01, presenter.clone())
            .config(IssueConfig {
                skip_dry_run: true,
                ..IssueConfig::immediate()
            });

        let err = acc.issue(request, &CancelToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::StuckPending { ref altname, attempts: 8 } if altname == "example.com"
        ));
        assert_eq!(server.state.deactivations(), 1);

        // the failed challenge is cleaned up
        assert_eq!(presenter.removes().len(), 1);
    }

    #[tokio::test]
    async fn invalid_challenge_carries_problem() {
        let server = with_directory_server();
        server.state.set_challenge_mode(ChallengeMode::Invalid);
        let acc = registered_account(&server).await;

        let err = acc
            .issue(request(&["example.com"]), &CancelToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Challenge {
                altname,
                kind,
                status,
                problem,
            } => {
                assert_eq!(altname, "example.com");
                assert_eq!(kind, ChallengeKind::Http01);
                assert_eq!(status, "invalid");
                assert!(problem.is_some_and(|p| p._type.ends_with(":unauthorized")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn zone_mismatch_is_config_error() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let presenter = MemoryPresenter::default().with_zones(["example.org"]);
        let request = request(&["*.example.com"]).presenter(ChallengeKind::Dns01, presenter);

        let err = acc
            .new_order(request, &CancelToken::new())
            .await
            .unwrap()
            .authorizations()
            .await
            .unwrap()
            .select()
            .err()
            .unwrap();

        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let cancel = CancelToken::new();
        cancel.cancel();

        let err = acc
            .issue(request(&["example.com"]), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(server.state.requested_identifiers().is_empty());
    }

    async fn issue_with_account_key(key: Jwk) {
        let server = with_directory_server();
        let client = Arc::new(ReqwestClient::new().unwrap());
        let acc = account_with_key(&server, client, key).await;

        // every request after newAccount is verified against the registered key
        let cert = acc
            .issue(request(&["example.com"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(cert.identifiers()[0].value, "example.com");
        assert!(server.state.last_payload("/acme/finalize/1").is_some());
    }

    #[tokio::test]
    async fn issues_with_rsa_account() {
        issue_with_account_key(rsa_jwk()).await;
    }

    #[tokio::test]
    async fn issues_with_p384_account() {
        issue_with_account_key(ec_jwk(Curve::P384)).await;
    }

    #[tokio::test]
    async fn processing_challenge_polled_without_new_response() {
        let server = with_directory_server();
        server
            .state
            .set_challenge_mode(ChallengeMode::ProcessingThenValid);
        let acc = registered_account(&server).await;

        acc.issue(request(&["example.com"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(server.state.challenge_responses(), 1);
        assert_eq!(server.state.challenge_polls(), 2);
        assert_eq!(server.state.deactivations(), 0);
    }

    #[tokio::test]
    async fn invalid_order_after_finalize() {
        let server = with_directory_server();
        server.state.set_order_mode(OrderMode::Invalid);
        let acc = registered_account(&server).await;

        let err = acc
            .issue(
                request(&["example.com", "www.example.com"]),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Order {
                status,
                requested,
                mut validated,
                problem,
            } => {
                assert_eq!(status, "invalid");
                assert_eq!(requested, ["example.com", "www.example.com"]);
                validated.sort();
                assert_eq!(validated, ["example.com", "www.example.com"]);
                assert_eq!(
                    problem.unwrap()._type,
                    "urn:ietf:params:acme:error:badCSR"
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(server.state.order_polls(), 1);
    }

    #[tokio::test]
    async fn order_stuck_processing_gives_up() {
        let server = with_directory_server();
        server.state.set_order_mode(OrderMode::ProcessingForever);
        let acc = registered_account(&server).await;

        let err = acc
            .issue(request(&["example.com"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Order { ref status, ref validated, problem: None, .. }
                if status == "processing" && validated == &["example.com"]
        ));
        assert_eq!(server.state.order_polls(), 8);
    }

    #[tokio::test]
    async fn order_without_authorizations_rejected() {
        let server = with_directory_server();
        server.state.set_order_mode(OrderMode::WithoutAuthorizations);
        let acc = registered_account(&server).await;

        let err = acc
            .new_order(request(&["example.com"]), &CancelToken::new())
            .await
            .unwrap()
            .authorizations()
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::Protocol(_)));
        assert!(server.state.last_payload("/acme/finalize/1").is_none());
    }

    #[tokio::test]
    async fn propagation_wait_sleeps_once_for_all_sets() {
        let server = with_directory_server();
        let acc = registered_account(&server).await;

        let wait = Duration::from_millis(300);
        let request = request(&["a.example.com", "b.example.com", "c.example.com"]).config(
            IssueConfig {
                skip_dry_run: true,
                set_challenge_wait: wait,
                ..IssueConfig::immediate()
            },
        );

        let selected = acc
            .new_order(request, &CancelToken::new())
            .await
            .unwrap()
            .authorizations()
            .await
            .unwrap()
            .select()
            .unwrap();
        assert_eq!(selected.challenges().len(), 3);

        let started = std::time::Instant::now();
        selected.present().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= wait);
        assert!(elapsed < wait * 3);
    }
}
