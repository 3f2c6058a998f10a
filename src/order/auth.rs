use sha2::{Digest as _, Sha256};

use crate::{
    api,
    cancel::CancelToken,
    config::IssueConfig,
    error::{Error, Result},
    presenter::{ChallengeKind, EnrichedChallenge, Presenter},
    trans::Transport,
    util::base64url,
};

/// Record name prefix of live `dns-01` challenges.
pub(crate) const DNS_PREFIX: &str = "_acme-challenge";

/// Picks the first kind in `enabled` that the server offers.
///
/// Preference wins over the order the server lists its challenges in.
pub(crate) fn choose<'a>(
    enabled: &[ChallengeKind],
    offered: &'a [api::Challenge],
) -> Option<(ChallengeKind, &'a api::Challenge)> {
    enabled.iter().find_map(|&kind| {
        offered
            .iter()
            .find(|challenge| challenge._type == kind.as_str())
            .map(|challenge| (kind, challenge))
    })
}

/// Error for an identifier none of whose offered challenges is enabled.
pub(crate) fn no_suitable_challenge(
    altname: &str,
    offered: Vec<String>,
    enabled: &[ChallengeKind],
) -> Error {
    Error::NoSuitableChallenge {
        identifier: altname.to_owned(),
        offered: if offered.is_empty() {
            vec!["none".to_owned()]
        } else {
            offered
        },
        enabled: enabled.iter().map(|kind| kind.as_str().to_owned()).collect(),
    }
}

/// Inputs shared by every challenge enriched for one order.
pub(crate) struct Enrichment<'a> {
    pub thumbprint: &'a str,
    pub zones: &'a [String],
    pub dns_prefix: &'a str,
    pub dry_run: bool,
}

pub(crate) fn enrich(
    kind: ChallengeKind,
    challenge: &api::Challenge,
    authorization_url: &str,
    identifier: &api::Identifier,
    wildcard: bool,
    ctx: &Enrichment<'_>,
) -> Result<EnrichedChallenge> {
    let hostname = identifier.hostname().to_owned();
    let wildcard = wildcard || identifier.value.starts_with("*.");

    let altname = if wildcard {
        format!("*.{hostname}")
    } else {
        hostname.clone()
    };

    let token = &challenge.token;
    let key_authorization = format!("{token}.{}", ctx.thumbprint);
    let dns_host = format!("{}.{hostname}", ctx.dns_prefix);
    let dns_authorization = base64url(&Sha256::digest(&key_authorization));

    let (dns_zone, dns_prefix) = if kind == ChallengeKind::Dns01 && !ctx.zones.is_empty() {
        let zone = pluck_zone(ctx.zones, &hostname).ok_or_else(|| {
            Error::config(format!(
                "none of the DNS zones {:?} contains '{hostname}'",
                ctx.zones
            ))
        })?;

        let prefix = dns_host
            .strip_suffix(zone)
            .map(|rest| rest.trim_end_matches('.'))
            .unwrap_or(&dns_host)
            .to_owned();

        (Some(zone.to_owned()), Some(prefix))
    } else {
        (None, None)
    };

    Ok(EnrichedChallenge {
        kind,
        url: challenge.url.clone(),
        authorization_url: authorization_url.to_owned(),
        token: token.clone(),
        challenge_url: format!("http://{hostname}/.well-known/acme-challenge/{token}"),
        hostname,
        altname,
        wildcard,
        thumbprint: ctx.thumbprint.to_owned(),
        key_authorization,
        dns_host,
        dns_authorization,
        dns_zone,
        dns_prefix,
        dry_run: ctx.dry_run,
    })
}

/// Longest zone that equals `name` or is one of its parent domains.
pub(crate) fn pluck_zone<'a>(zones: &'a [String], name: &str) -> Option<&'a str> {
    zones
        .iter()
        .map(|zone| zone.trim_end_matches('.'))
        .filter(|zone| {
            !zone.is_empty()
                && name
                    .strip_suffix(zone)
                    .is_some_and(|rest| rest.is_empty() || rest.ends_with('.'))
        })
        .max_by_key(|zone| zone.len())
}

/// Responds to a presented challenge and polls it until the CA reaches a verdict.
///
/// A challenge that stays `pending` for `max_pending` polls gets its authorization deactivated
/// once before being re-submitted. On success the presenter's resource is removed.
pub(crate) async fn confirm(
    transport: &Transport,
    challenge: &EnrichedChallenge,
    presenter: &dyn Presenter,
    config: &IssueConfig,
    cancel: &CancelToken,
) -> Result<()> {
    let respond = || async {
        log::debug!("Responding to {} for {}", challenge.kind, challenge.altname);
        cancel
            .run(transport.call_kid(&challenge.url, &api::EmptyObject))
            .await?;
        cancel.sleep(config.retry_interval).await
    };

    let mut polls = 0;
    let mut deactivated = false;

    respond().await?;

    loop {
        if polls >= config.max_poll {
            return Err(Error::StuckPending {
                altname: challenge.altname.clone(),
                attempts: polls,
            });
        }

        polls += 1;

        let res = cancel.run(transport.get(&challenge.url)).await?;
        let status = res.json::<api::Challenge>()?;

        match status.status {
            Some(api::ChallengeStatus::Processing) => {
                log::debug!("{} still processing, poll again", challenge.altname);
                cancel.sleep(config.retry_interval).await?;
            }

            // the CA has not picked up our response; nudge it
            Some(api::ChallengeStatus::Pending) => {
                cancel.sleep(config.retry_interval).await?;

                if polls >= config.max_pending && !deactivated {
                    deactivated = true;
                    log::debug!(
                        "Deactivating authorization stuck in pending: {}",
                        challenge.authorization_url
                    );

                    cancel
                        .run(
                            transport.call_kid(
                                &challenge.authorization_url,
                                &api::Deactivation::default(),
                            ),
                        )
                        .await?;
                    cancel.sleep(config.deauth_wait).await?;
                }

                respond().await?;
            }

            Some(api::ChallengeStatus::Valid) => {
                log::debug!("{} validated for {}", challenge.kind, challenge.altname);
                remove(presenter, challenge).await;
                return Ok(());
            }

            other => {
                return Err(Error::Challenge {
                    altname: challenge.altname.clone(),
                    kind: challenge.kind,
                    status: other.map_or("empty", api::ChallengeStatus::as_str).to_owned(),
                    problem: status.error,
                })
            }
        }
    }
}

/// Best-effort cleanup; failures are only logged.
pub(crate) async fn remove(presenter: &dyn Presenter, challenge: &EnrichedChallenge) {
    if let Err(err) = presenter.remove(challenge).await {
        log::warn!(
            "failed to remove {} challenge for {}: {err}",
            challenge.kind,
            challenge.altname
        );
    }
}
