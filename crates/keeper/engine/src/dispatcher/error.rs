use std::borrow::Cow;

use safe_keeper_bitcoin::BitcoinError;
use safe_keeper_domain::request::RequestFormatError;
use safe_keeper_rpc_client::RpcError;
use safe_keeper_store::KeeperStoreError;

pub type Result<T, E = DispatchError> = core::result::Result<T, E>;

/// Errors that stop a request from reaching a final state.
///
/// Only [`DispatchError::Transient`] leaves the dispatcher running; every other variant means
/// the feed or the custody state can no longer be trusted, see [`DispatchError::is_fatal`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The chain node kept failing with transient errors after all retries.
    #[error("transient chain rpc error: {0}")]
    Transient(RpcError),

    /// The chain node failed in a way retrying cannot fix.
    #[error("chain rpc error: {0}")]
    Chain(RpcError),

    /// A stored request is malformed, which only a corrupted feed can produce.
    #[error("malformed request error: {0}")]
    Malformed(#[from] RequestFormatError),

    /// Custody state contradicts itself or the chain.
    #[error("invariant violation error: {0}")]
    Invariant(Cow<'static, str>),

    #[error("keeper store error: {0}")]
    Store(#[from] KeeperStoreError),

    #[error("bitcoin error: {0}")]
    Bitcoin(#[from] BitcoinError),

    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl DispatchError {
    pub fn invariant<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Invariant(err.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(err.into())
    }

    /// Returns whether the dispatcher must halt instead of retrying the request later.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }
}

impl From<RpcError> for DispatchError {
    fn from(err: RpcError) -> Self {
        if err.is_transient() { Self::Transient(err) } else { Self::Chain(err) }
    }
}
