use std::sync::{LazyLock, Mutex};

use diesel::{Connection, PgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

pub const MIGRATIONS: EmbeddedMigrations =
    diesel_migrations::embed_migrations!("../keeper/store/migrations");

static POSTGRES_CONTAINER: OnceCell<ContainerAsync<Postgres>> = OnceCell::const_new();

static DB_COUNTER: LazyLock<Mutex<u32>> = LazyLock::new(|| Mutex::new(0));

pub async fn pg_container() -> &'static ContainerAsync<Postgres> {
    POSTGRES_CONTAINER
        .get_or_init(|| async {
            Postgres::default()
                .with_tag("18-alpine")
                .start()
                .await
                .expect("failed to start postgres container")
        })
        .await
}

/// Creates a fresh database with the keeper migrations applied and returns its url.
pub async fn setup_test_db() -> String {
    let container = pg_container().await;

    let db_name = {
        let mut counter = DB_COUNTER.lock().unwrap();
        *counter += 1;
        format!("test_db_{}", *counter)
    };

    let host = container.get_host().await.expect("failed to get host");

    let port = container.get_host_port_ipv4(5432).await.expect("failed to get port");

    let admin_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    let mut admin_conn =
        PgConnection::establish(&admin_url).expect("failed to connect to postgres");

    diesel::sql_query(format!("CREATE DATABASE {db_name}"))
        .execute(&mut admin_conn)
        .expect("failed to create test database");

    let test_db_url = format!("postgres://postgres:postgres@{host}:{port}/{db_name}");

    PgConnection::establish(&test_db_url)
        .expect("failed to connect to test database")
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");

    test_db_url
}

/// Runs a raw statement against the database at `db_url` and returns the number of rows it
/// touched.
pub fn execute_sql(db_url: &str, sql: &str) -> usize {
    let mut conn = PgConnection::establish(db_url).expect("failed to connect to test database");

    diesel::sql_query(sql).execute(&mut conn).expect("failed to execute statement")
}
