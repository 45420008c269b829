use std::borrow::Cow;

use safe_keeper_domain::request::{Action, RequestFormatError, Role};

/// Reasons a request envelope never enters the feed.
#[derive(Debug, thiserror::Error)]
pub enum SubmitRequestError {
    #[error("unknown action error: {0}")]
    UnknownAction(u8),

    #[error("unknown role error: {0}")]
    UnknownRole(u8),

    #[error("unknown curve error: {0}")]
    UnknownCurve(u8),

    #[error("unauthorized error: {role} may not send {action}")]
    Unauthorized { action: Action, role: Role },

    #[error("format error: {0}")]
    Format(#[from] RequestFormatError),

    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl SubmitRequestError {
    pub fn other<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(err.into())
    }
}
