use std::borrow::Cow;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use safe_keeper_engine::{KeeperEngineError, request::SubmitRequestError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum AppError {
    #[error("keeper engine error: {0}")]
    KeeperEngine(Box<KeeperEngineError>),

    #[error("submit request error: {0}")]
    SubmitRequest(#[from] SubmitRequestError),

    #[error("invalid chain error: {0}")]
    InvalidChain(u8),

    #[error("safe not found error")]
    SafeNotFound,

    #[error("transaction not found error")]
    TransactionNotFound,

    #[allow(dead_code)]
    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl AppError {
    #[allow(dead_code)]
    pub fn other<E>(err: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(err.into())
    }
}

impl From<KeeperEngineError> for AppError {
    fn from(err: KeeperEngineError) -> Self {
        Self::KeeperEngine(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = match self {
            AppError::SubmitRequest(_) | AppError::InvalidChain(_) => StatusCode::BAD_REQUEST,
            AppError::SafeNotFound | AppError::TransactionNotFound => StatusCode::NOT_FOUND,
            AppError::KeeperEngine(_) | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match code {
            StatusCode::NOT_FOUND => tracing::info!("not found: {self}"),
            code if code.is_client_error() => tracing::warn!("client error: {self}"),
            _ => tracing::error!("server error: {self}"),
        }

        (code, self.to_string()).into_response()
    }
}
