use diesel_async::pooled_connection::deadpool::BuildError;
use tokio::task::JoinError;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("join error: {0}")]
    Join(#[from] JoinError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),
}
