use std::borrow::Cow;

pub type Result<T, E = RpcError> = core::result::Result<T, E>;

/// bitcoind: no such mempool or blockchain transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// bitcoind: the node is still loading or verifying blocks.
const RPC_IN_WARMUP: i64 = -28;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("not found error: {0}")]
    NotFound(Cow<'static, str>),

    #[error("decode error: {0}")]
    Decode(Cow<'static, str>),

    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl RpcError {
    pub fn other<E>(e: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(e.into())
    }

    /// Returns whether retrying the same call may succeed: timeouts, refused or reset
    /// connections, failed TLS handshakes and a node still warming up.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            },
            Self::Rpc { code, .. } => *code == RPC_IN_WARMUP,
            Self::NotFound(_) | Self::Decode(_) | Self::Other(_) => false,
        }
    }

    /// Returns whether the node does not know the requested transaction or output.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Rpc { code, .. } => *code == RPC_INVALID_ADDRESS_OR_KEY,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_warmup_rpc_errors_are_transient() {
        let warmup = RpcError::Rpc { code: -28, message: "Loading block index...".into() };
        assert!(warmup.is_transient());
        assert!(!warmup.is_not_found());

        let missing =
            RpcError::Rpc { code: -5, message: "No such mempool or blockchain transaction".into() };
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());

        assert!(!RpcError::Decode("bad json".into()).is_transient());
        assert!(RpcError::NotFound("output 2".into()).is_not_found());
    }
}
