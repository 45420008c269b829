use std::borrow::Cow;

use safe_keeper_rpc_client::RpcError;
use safe_keeper_store::KeeperStoreError;

use crate::dispatcher::DispatchError;

#[derive(Debug, thiserror::Error)]
#[error("keeper engine error: {0}")]
pub struct KeeperEngineError(#[from] KeeperEngineErrorKind);

#[derive(Debug, thiserror::Error)]
pub(crate) enum KeeperEngineErrorKind {
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("keeper store error: {0}")]
    KeeperStore(#[from] KeeperStoreError),

    #[error("chain rpc error: {0}")]
    ChainRpc(#[from] RpcError),

    #[error("mpsc sender error: {0}")]
    MpscSender(Cow<'static, str>),

    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl KeeperEngineErrorKind {
    pub fn mpsc_sender<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::MpscSender(err.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(err.into())
    }
}

impl KeeperEngineError {
    /// Returns the dispatch error that halted the dispatcher runtime, if this is one.
    pub fn as_dispatch(&self) -> Option<&DispatchError> {
        match &self.0 {
            KeeperEngineErrorKind::Dispatch(err) => Some(err),
            _ => None,
        }
    }
}
