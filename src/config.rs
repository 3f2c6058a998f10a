use std::time::Duration;

use crate::presenter::ChallengeKind;

/// Delays and retry budgets for an issuance.
///
/// Every timing knob lives here; presenters may override only the propagation delay of their own
/// challenge kind (see [`Presenter::propagation_delay`]).
///
/// [`Presenter::propagation_delay`]: crate::Presenter::propagation_delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueConfig {
    /// Wait between challenge status polls.
    pub retry_interval: Duration,

    /// Wait after deactivating a stuck authorization.
    pub deauth_wait: Duration,

    /// Challenge status polls before giving up. Also bounds order polling after finalize.
    pub max_poll: u32,

    /// Polls still `pending` before the authorization is deactivated and the challenge re-sent.
    pub max_pending: u32,

    /// Propagation wait for presenters that report none of their own.
    ///
    /// Once every `set` has settled, the longest wait across the presented challenges
    /// is slept once.
    pub set_challenge_wait: Duration,

    /// Propagation wait before probing dry-run `dns-01` records.
    pub dns_dry_run_delay: Duration,

    /// Propagation wait before probing dry-run `http-01` and `tls-alpn-01` resources.
    pub dry_run_delay: Duration,

    /// Skips the local self-test of the presenters.
    pub skip_dry_run: bool,

    /// Wait between order polls after finalize.
    pub order_poll_interval: Duration,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(1000),
            deauth_wait: Duration::from_secs(10),
            max_poll: 8,
            max_pending: 4,
            set_challenge_wait: Duration::from_millis(500),
            dns_dry_run_delay: Duration::from_millis(1500),
            dry_run_delay: Duration::ZERO,
            skip_dry_run: false,
            order_poll_interval: Duration::from_millis(1100),
        }
    }
}

impl IssueConfig {
    /// Zero delays; for tests against local stub servers.
    pub fn immediate() -> Self {
        Self {
            retry_interval: Duration::ZERO,
            deauth_wait: Duration::ZERO,
            set_challenge_wait: Duration::ZERO,
            dns_dry_run_delay: Duration::ZERO,
            dry_run_delay: Duration::ZERO,
            order_poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Configured propagation wait for a dry run of `kind`.
    pub(crate) fn dry_run_delay_for(&self, kind: ChallengeKind) -> Duration {
        match kind {
            ChallengeKind::Dns01 => self.dns_dry_run_delay,
            ChallengeKind::Http01 | ChallengeKind::TlsAlpn01 => self.dry_run_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IssueConfig::default();
        assert_eq!(config.max_poll, 8);
        assert_eq!(config.max_pending, 4);
        assert!(config.max_pending < config.max_poll);
        assert_eq!(
            config.dry_run_delay_for(ChallengeKind::Dns01),
            Duration::from_millis(1500)
        );
        assert_eq!(config.dry_run_delay_for(ChallengeKind::Http01), Duration::ZERO);
    }
}
