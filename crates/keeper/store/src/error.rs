use std::borrow::Cow;

use crate::persistence::store::StoreError;

pub type Result<T, E = KeeperStoreError> = core::result::Result<T, E>;

/// Errors that can occur when interacting with the keeper store.
#[derive(Debug, thiserror::Error)]
pub enum KeeperStoreError {
    /// A database-level error occurred.
    ///
    /// This wraps errors from the persistence layer, including connection issues, query
    /// failures and aborted transactions.
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    /// Failed to acquire a database connection from the pool.
    #[error("pool error")]
    Pool,

    /// A stored value cannot be converted to its domain type.
    ///
    /// This includes unknown action or role tags in replayed requests.
    #[error("invalid value error: {0}")]
    InvalidValue(Cow<'static, str>),

    /// A row a write depends on does not exist.
    #[error("not found error: {0}")]
    NotFound(Cow<'static, str>),

    /// A write would break a ledger invariant, such as a negative accountant balance or an
    /// output locked by two transactions.
    ///
    /// The enclosing database transaction is rolled back.
    #[error("invariant error: {0}")]
    Invariant(Cow<'static, str>),

    /// An unclassified error occurred.
    #[error("other error: {0}")]
    Other(Cow<'static, str>),
}

impl KeeperStoreError {
    pub fn other<E>(e: E) -> Self
    where
        Cow<'static, str>: From<E>,
    {
        Self::Other(e.into())
    }
}

impl From<diesel::result::Error> for KeeperStoreError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<rust_decimal::Error> for KeeperStoreError {
    fn from(err: rust_decimal::Error) -> Self {
        Self::InvalidValue(err.to_string().into())
    }
}

impl From<serde_json::Error> for KeeperStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidValue(err.to_string().into())
    }
}
