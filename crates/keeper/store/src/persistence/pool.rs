mod error;

pub use self::error::PoolError;

use core::num::NonZeroUsize;

use diesel::ConnectionError;
use diesel_async::{
    AsyncPgConnection,
    pooled_connection::{
        AsyncDieselConnectionManager, ManagerConfig,
        deadpool::{Object, Pool},
    },
};
use rustls::{ClientConfig, RootCertStore};
use rustls_native_certs::CertificateResult;
use tokio::task;
use tokio_postgres_rustls::MakeRustlsConnect;

/// A deadpool of asynchronous PostgreSQL connections.
pub type DbPool = Pool<AsyncPgConnection>;

/// A connection checked out of a [`DbPool`], returned to the pool on drop.
pub type DbConn = Object<AsyncPgConnection>;

/// Builds a connection pool for the keeper database.
///
/// Connections are opened lazily over TLS, trusting the platform root certificates. Servers
/// that do not offer TLS are connected to in plain text, as negotiated by the url's `sslmode`.
///
/// # Errors
///
/// Returns an error if loading the native root certificates panics or the pool configuration is
/// invalid.
#[tracing::instrument(skip(url))]
pub async fn establish_pool<U>(url: U, max_size: NonZeroUsize) -> Result<DbPool, PoolError>
where
    String: From<U>,
{
    let tls = task::spawn_blocking(make_rustls_config).await?;

    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup = Box::new(move |url: &str| {
        let tls = tls.clone();
        let url = url.to_string();
        Box::pin(async move {
            let (client, conn) = tokio_postgres::connect(&url, tls)
                .await
                .map_err(|e| e.to_string())
                .map_err(ConnectionError::BadConnection)?;

            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    tracing::warn!(%err, "keeper database connection closed");
                }
            });

            AsyncPgConnection::try_from(client).await
        })
    });

    let manager =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(url, manager_config);

    let pool = Pool::builder(manager).max_size(max_size.get()).build()?;
    tracing::info!(max_size = max_size.get(), "keeper database pool ready");

    Ok(pool)
}

fn make_rustls_config() -> MakeRustlsConnect {
    let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
    for err in errors {
        tracing::warn!(%err, "skipping native root certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    tracing::debug!(added, ignored, "loaded native root certificates");

    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

    MakeRustlsConnect::new(config)
}
