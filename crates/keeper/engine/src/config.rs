use core::time::Duration;

use std::collections::BTreeSet;

use bitcoin::Network;
use bon::Builder;

/// Immutable keeper parameters, built once at startup and shared by every handler.
///
/// Every keeper replaying the same feed must run with the same configuration, except for
/// `idle_interval` and `rpc_retry`, which only affect liveness.
#[derive(Debug, Clone, Builder)]
pub struct KeeperConfig {
    /// The bitcoin network safes and receivers belong to.
    network: Network,

    /// Relative timelock of the holder and observer recovery path.
    timelock: Duration,

    /// How long a network status report can price transactions and gate deposits.
    network_info_timeout: Duration,

    /// How long a signature request waits for the signer quorum before responses are ignored.
    signature_timeout: Duration,

    /// How long the dispatcher sleeps when no request can make progress.
    #[builder(default = Duration::from_secs(1))]
    idle_interval: Duration,

    /// Addresses whose deposits are trusted without confirmations.
    #[builder(default)]
    trusted_addresses: BTreeSet<String>,

    /// Backoff applied to transient chain RPC failures.
    #[builder(default)]
    rpc_retry: RetryPolicy,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, Builder)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    max_retries: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Upper bound of a single delay.
    max_delay: Duration,
}

impl KeeperConfig {
    pub fn network(&self) -> Network {
        self.network
    }

    pub fn timelock(&self) -> Duration {
        self.timelock
    }

    pub fn network_info_timeout(&self) -> Duration {
        self.network_info_timeout
    }

    pub fn signature_timeout(&self) -> Duration {
        self.signature_timeout
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    pub fn is_trusted_address(&self, address: &str) -> bool {
        self.trusted_addresses.contains(address)
    }

    pub fn rpc_retry(&self) -> RetryPolicy {
        self.rpc_retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry number `retry`, counted from zero.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry)).min(self.max_delay)
    }

    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_double_up_to_the_cap() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350))
            .build();

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));

        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
