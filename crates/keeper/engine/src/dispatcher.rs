//! The request dispatcher.
//!
//! [`Dispatcher::step`] reads the pending request with the lowest arrival sequence, checks its
//! format and sender, routes it to the handler of its action and applies the handler's
//! [`Outcome`]:
//!
//! ```text
//!   Committed   the handler wrote its effects and finished the request in one transaction
//!   Finished    the request is marked done without effect
//!   Rejected    the request is marked failed without effect
//!   Abstained   the request stays pending and is tried again after the idle interval
//! ```
//!
//! Anything else is a [`DispatchError`]. The dispatcher owns no locks: the runtime calls
//! [`Dispatcher::step`] from a single task, so two requests are never processed concurrently.

mod account;
mod deposit;
mod error;
mod keys;
mod network;
mod signature;
mod transaction;

pub use self::error::{DispatchError, Result};

use core::time::Duration;

use std::{borrow::Cow, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use safe_keeper_domain::{
    outbound::{Operation, OutboundKind, OutboundMessage},
    request::{Action, Request, Role},
};
use safe_keeper_rpc_client::{ChainRpc, RpcError};
use safe_keeper_store::KeeperStore;
use uuid::Uuid;

use crate::config::KeeperConfig;

/// How a handler settled a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Effects written and request finished by the handler.
    Committed,
    /// Nothing to do, finish the request.
    Finished(Cow<'static, str>),
    /// Invalid request, fail it.
    Rejected(Cow<'static, str>),
    /// Not decidable yet, leave the request pending.
    Abstained(Cow<'static, str>),
}

impl Outcome {
    pub fn finished<E>(reason: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Finished(reason.into())
    }

    pub fn rejected<E>(reason: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Rejected(reason.into())
    }

    pub fn abstained<E>(reason: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Abstained(reason.into())
    }
}

/// Replays the request feed against the custody state.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<KeeperConfig>,
    store: KeeperStore,
    chain: Arc<dyn ChainRpc>,
}

impl Dispatcher {
    pub fn new(config: Arc<KeeperConfig>, store: KeeperStore, chain: Arc<dyn ChainRpc>) -> Self {
        Self { config, store, chain }
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn store(&self) -> &KeeperStore {
        &self.store
    }

    pub fn chain(&self) -> &dyn ChainRpc {
        self.chain.as_ref()
    }

    /// Processes the next pending request, if any.
    ///
    /// Returns the request id and how it was settled, or `None` when the feed is drained.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Transient`] when the chain node stays unavailable; the request
    /// stays pending. Every other error is fatal.
    pub async fn step(&self) -> Result<Option<(Uuid, Outcome)>> {
        let Some(request) = self.store.read_pending_request().await? else {
            return Ok(None);
        };

        let outcome = self.process(&request).await?;
        Ok(Some((request.id(), outcome)))
    }

    #[tracing::instrument(
        skip_all,
        fields(id = %request.id(), action = %request.action(), holder = %request.holder()),
    )]
    async fn process(&self, request: &Request) -> Result<Outcome> {
        request.verify_format()?;

        let outcome = if request.is_authorized() {
            self.dispatch(request).await?
        } else {
            Outcome::rejected(format!("{} may not send {}", request.role(), request.action()))
        };

        match &outcome {
            Outcome::Committed => tracing::info!("done"),
            Outcome::Finished(reason) => {
                self.store.finish_request(request.id()).await?;
                tracing::info!(%reason, "done without effect");
            },
            Outcome::Rejected(reason) => {
                self.store.fail_request(request.id()).await?;
                tracing::info!(%reason, "failed");
            },
            Outcome::Abstained(reason) => tracing::info!(%reason, "abstained"),
        }

        Ok(outcome)
    }

    async fn dispatch(&self, request: &Request) -> Result<Outcome> {
        match request.action() {
            Action::SignerKeygenOutput | Action::ObserverAddKey => self.add_key(request).await,
            Action::SignerSignOutput => self.add_signature(request).await,
            Action::ObserverRequestSignerKeys => self.request_signer_keys(request).await,
            Action::ObserverUpdateNetworkStatus => self.update_network_status(request).await,
            Action::ObserverHolderDeposit | Action::ObserverAccountantDeposit => {
                self.process_deposit(request).await
            },
            Action::ObserverSetAccountPlan => self.set_account_plan(request).await,
            Action::SafeProposeAccount => self.propose_account(request).await,
            Action::SafeApproveAccount => self.approve_account(request).await,
            Action::SafeProposeTransaction => self.propose_transaction(request).await,
            Action::SafeRevokeTransaction => self.revoke_transaction(request).await,
        }
    }

    /// Runs a chain RPC call, retrying transient failures with the configured backoff.
    async fn call_chain<'a, T, F, Fut>(&'a self, what: &str, f: F) -> Result<T, RpcError>
    where
        F: Fn(&'a dyn ChainRpc) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let policy = self.config.rpc_retry();
        let mut retry = 0;

        loop {
            match f(self.chain.as_ref()).await {
                Err(err) if err.is_transient() && policy.should_retry(retry) => {
                    let delay = policy.delay(retry);
                    tracing::warn!(%err, retry, ?delay, "chain rpc {what} failed, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                },
                result => return result,
            }
        }
    }
}

/// Wraps an operation caused by `request` into an outbound message with the operation id.
fn operation_message(
    request: &Request,
    receiver: Role,
    kind: OutboundKind,
    operation: &Operation,
) -> OutboundMessage {
    OutboundMessage::builder()
        .id(operation.id)
        .request_id(request.id())
        .receiver(receiver)
        .kind(kind)
        .payload(operation.encode())
        .created_at(request.created_at())
        .build()
}

/// Returns whether something dated `since` and valid for `timeout` has expired at `at`.
///
/// Timeouts too large for a timestamp never expire.
fn is_expired(since: DateTime<Utc>, timeout: Duration, at: DateTime<Utc>) -> bool {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|timeout| since.checked_add_signed(timeout))
        .is_some_and(|deadline| deadline < at)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn expiry_is_exclusive_of_the_deadline() {
        let since = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
        let timeout = Duration::from_secs(60);

        assert!(!is_expired(since, timeout, since + TimeDelta::seconds(60)));
        assert!(is_expired(since, timeout, since + TimeDelta::seconds(61)));
        assert!(!is_expired(since, Duration::MAX, since + TimeDelta::days(365)));
    }
}
