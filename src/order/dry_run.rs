//! Local self-test of the configured presenters.
//!
//! Synthetic challenges with random tokens are set, probed the way a CA would probe them, then
//! removed. The CA never sees them, so a misconfigured presenter fails here instead of burning
//! the CA's validation budget.

use crate::{
    api,
    error::{Error, Result},
    presenter::{ChallengeKind, EnrichedChallenge, Presenter},
    req::HttpRequest,
    util::random_hex,
};

use super::{
    auth::{self, Enrichment},
    OrderContext,
};

/// Kinds a synthetic challenge set offers for `domain`. Wildcards only validate over DNS.
pub(crate) fn offered_kinds(domain: &str) -> &'static [ChallengeKind] {
    if domain.starts_with("*.") {
        &[ChallengeKind::Dns01]
    } else {
        &[
            ChallengeKind::Http01,
            ChallengeKind::Dns01,
            ChallengeKind::TlsAlpn01,
        ]
    }
}

/// Server-shaped challenges that point nowhere.
fn synthetic_challenges(domain: &str) -> Vec<api::Challenge> {
    let nonce = random_hex(8);

    [
        ChallengeKind::Http01,
        ChallengeKind::Dns01,
        ChallengeKind::TlsAlpn01,
    ]
    .into_iter()
    .enumerate()
    .filter(|(_, kind)| offered_kinds(domain).contains(kind))
    .map(|(i, kind)| api::Challenge {
        _type: kind.as_str().to_owned(),
        url: format!("https://acme-staging-v02.example.com/{i}"),
        status: Some(api::ChallengeStatus::Pending),
        validated: None,
        error: None,
        token: format!("test-{nonce}-{i}"),
    })
    .collect()
}

pub(crate) async fn run(ctx: &OrderContext) -> Result<()> {
    let plan = &ctx.plan;
    let dns_prefix = format!("_acme-dryrun-{}", random_hex(2));
    let enrichment = Enrichment {
        thumbprint: &ctx.thumbprint,
        zones: &ctx.zones,
        dns_prefix: &dns_prefix,
        dry_run: true,
    };

    let mut challenges = Vec::with_capacity(plan.domains.len());

    for domain in &plan.domains {
        let identifier = api::Identifier::dns(domain);
        let offered = synthetic_challenges(domain);

        let (kind, challenge) = auth::choose(&plan.enabled, &offered).ok_or_else(|| {
            auth::no_suitable_challenge(
                domain,
                offered.iter().map(|c| c._type.clone()).collect(),
                &plan.enabled,
            )
        })?;

        challenges.push(auth::enrich(
            kind,
            challenge,
            "",
            &identifier,
            false,
            &enrichment,
        )?);
    }

    log::debug!("Dry run of {} challenge(s)", challenges.len());

    ctx.set_all(&challenges, |kind| plan.config.dry_run_delay_for(kind))
        .await?;

    let mut result = Ok(());

    for challenge in &challenges {
        let res = match plan.presenters.presenter(challenge.kind) {
            Ok(presenter) => probe(ctx, challenge, presenter.as_ref()).await,
            Err(err) => Err(err),
        };

        if let Err(err) = res {
            result = Err(err);
            break;
        }
    }

    ctx.remove_all(&challenges).await;

    result
}

async fn probe(
    ctx: &OrderContext,
    challenge: &EnrichedChallenge,
    presenter: &dyn Presenter,
) -> Result<()> {
    let expected = challenge.expected_value();

    let got = match (challenge.kind, &ctx.plan.dns_resolver) {
        (ChallengeKind::Http01, _) => {
            let client = ctx.account.transport.client();
            let res = ctx
                .cancel
                .run(client.send(HttpRequest::get(&challenge.challenge_url)))
                .await;

            match res {
                Ok(res) if res.is_success() => Some(res.text().trim().to_owned()),
                Ok(res) => {
                    log::debug!("Dry run GET {} returned {}", challenge.challenge_url, res.status);
                    None
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    log::debug!("Dry run GET {} failed: {err}", challenge.challenge_url);
                    None
                }
            }
        }

        (ChallengeKind::Dns01, Some(resolver)) => {
            let records = ctx
                .cancel
                .run(async {
                    Ok(resolver.txt_records(&challenge.dns_host).await.unwrap_or_else(|err| {
                        log::debug!("Dry run TXT lookup of {} failed: {err}", challenge.dns_host);
                        Vec::new()
                    }))
                })
                .await?;

            if records.iter().any(|record| record == expected) {
                return Ok(());
            }

            (!records.is_empty()).then(|| records.join(", "))
        }

        _ => {
            let value = ctx
                .cancel
                .run(async {
                    presenter
                        .get(challenge)
                        .await
                        .map_err(|source| Error::Presenter {
                            kind: challenge.kind,
                            source,
                        })
                })
                .await?;

            match value {
                Some(value) => Some(value.trim().to_owned()),
                None => {
                    log::debug!(
                        "No way to probe {} for {}, skipping",
                        challenge.kind,
                        challenge.altname
                    );
                    return Ok(());
                }
            }
        }
    };

    if got.as_deref() == Some(expected) {
        return Ok(());
    }

    Err(Error::DryRun {
        kind: challenge.kind,
        altname: challenge.altname.clone(),
        expected: expected.to_owned(),
        got,
        target: challenge.target().to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cancel::CancelToken,
        config::IssueConfig,
        jwk::Curve,
        order::CertificateRequest,
        test::{
            ec_jwk, registered_account_with, with_directory_server, LoopbackClient,
            MemoryPresenter,
        },
    };

    async fn issue_over_loopback(presenter: MemoryPresenter) -> Result<()> {
        let server = with_directory_server();
        let client = Arc::new(LoopbackClient::new(presenter.clone()));
        let acc = registered_account_with(&server, client).await;

        let request = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::Http01, presenter)
            .config(IssueConfig::immediate());

        acc.issue(request, &CancelToken::new()).await.map(drop)
    }

    #[tokio::test]
    async fn http_probe_reads_published_file() {
        let presenter = MemoryPresenter::default();
        issue_over_loopback(presenter.clone()).await.unwrap();

        let sets = presenter.sets();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].dry_run);
        assert!(sets[0].token.starts_with("test-"));
        assert!(!sets[1].dry_run);
    }

    #[tokio::test]
    async fn http_probe_reports_missing_file() {
        let presenter = MemoryPresenter::default().dropping_values();
        let err = issue_over_loopback(presenter.clone()).await.unwrap_err();

        match err {
            Error::DryRun { kind, target, got, .. } => {
                assert_eq!(kind, ChallengeKind::Http01);
                assert!(target.starts_with("http://example.com/.well-known/acme-challenge/test-"));
                assert_eq!(got, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(presenter.removes().len(), 1);
    }

    #[tokio::test]
    async fn unprobeable_kinds_skipped_without_read_back() {
        let server = with_directory_server();
        let acc = crate::test::registered_account(&server).await;

        // no resolver and nothing to read back: the self-test cannot fail
        let presenter = MemoryPresenter::default().dropping_values();
        let request = CertificateRequest::new(["example.com"], ec_jwk(Curve::P256))
            .presenter(ChallengeKind::TlsAlpn01, presenter.clone())
            .config(IssueConfig::immediate());

        acc.issue(request, &CancelToken::new()).await.unwrap();
        assert_eq!(presenter.sets().iter().filter(|c| c.dry_run).count(), 1);
    }

    #[test]
    fn wildcards_only_offer_dns() {
        let offered = synthetic_challenges("*.example.com");
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0]._type, "dns-01");
        assert_eq!(offered[0].url, "https://acme-staging-v02.example.com/1");
        assert!(offered[0].token.starts_with("test-"));
        assert!(offered[0].token.ends_with("-1"));

        let offered = synthetic_challenges("example.com");
        let kinds: Vec<_> = offered.iter().map(|c| c._type.as_str()).collect();
        assert_eq!(kinds, ["http-01", "dns-01", "tls-alpn-01"]);
    }
}
