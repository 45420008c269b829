//! Configuration management for the safe keeper server.
//!
//! This module provides configuration loading from both base configuration file
//! and environment variables. Environment variables override the base configuration
//! and use the prefix `SAFEKEEPER_`.

use core::{num::NonZeroUsize, time::Duration};

use std::collections::BTreeSet;

use bitcoin::Network;
use config::{ConfigError, Environment, File, FileFormat};
use safe_keeper_engine::{KeeperConfig, RetryPolicy};
use serde::Deserialize;

/// Loads the application configuration from base config and environment variables.
///
/// Environment variables use double underscores `__` to denote nested keys.
/// For example, `SAFEKEEPER_APP__LISTEN` corresponds to `app.listen`.
///
/// # Errors
///
/// If the configuration could not be loaded or parsed
pub fn get_configuration() -> Result<Config, ConfigError> {
    config::Config::builder()
        .add_source(File::from_str(include_str!("base_config.ron"), FileFormat::Ron))
        .add_source(
            Environment::with_prefix(Config::CONFIG_ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("app.cors_allowed_origins")
                .with_list_parse_key("keeper.trusted_addresses")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Root configuration structure containing all application settings.
#[derive(Deserialize)]
pub struct Config {
    /// Application-specific configuration
    pub app: AppConfig,

    /// Database configuration
    pub db: DbConfig,

    /// Request processing parameters, shared by every keeper replaying the same feed
    pub keeper: KeeperSection,

    /// Chain node configuration
    pub bitcoin_rpc: BitcoinRpcConfig,
}

/// Application-specific configuration settings.
#[derive(Deserialize)]
pub struct AppConfig {
    /// The address to listen on (e.g., "0.0.0.0:59060")
    pub listen: String,

    /// CORS allowed origins (e.g., ["http://localhost:3000", "https://example.com"])
    /// Use ["*"] to allow all origins
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration settings.
#[derive(Deserialize)]
pub struct DbConfig {
    /// The database connection URL
    pub db_url: String,

    /// Maximum number of database connections in the pool
    pub max_conn: NonZeroUsize,
}

/// Request processing configuration settings.
#[derive(Deserialize)]
pub struct KeeperSection {
    /// "bitcoin", "testnet", "signet" or "regtest"
    pub network: Network,

    /// Relative timelock of the recovery path of new safes
    #[serde(with = "humantime_serde")]
    pub timelock: Duration,

    #[serde(with = "humantime_serde")]
    pub network_info_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub signature_timeout: Duration,

    /// Dispatcher sleep when no request can make progress
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,

    /// Addresses whose deposits need no confirmations
    pub trusted_addresses: Vec<String>,

    pub rpc_max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub rpc_base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub rpc_max_delay: Duration,
}

/// Chain node configuration settings.
#[derive(Deserialize)]
pub struct BitcoinRpcConfig {
    /// The JSON-RPC endpoint of a bitcoind node with `txindex=1`
    pub url: String,

    pub user: String,

    pub password: String,

    /// Timeout of a single RPC call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Config {
    const CONFIG_ENV_PREFIX: &str = "SAFEKEEPER";
}

impl From<KeeperSection> for KeeperConfig {
    fn from(section: KeeperSection) -> Self {
        let rpc_retry = RetryPolicy::builder()
            .max_retries(section.rpc_max_retries)
            .base_delay(section.rpc_base_delay)
            .max_delay(section.rpc_max_delay)
            .build();

        KeeperConfig::builder()
            .network(section.network)
            .timelock(section.timelock)
            .network_info_timeout(section.network_info_timeout)
            .signature_timeout(section.signature_timeout)
            .idle_interval(section.idle_interval)
            .trusted_addresses(section.trusted_addresses.into_iter().collect::<BTreeSet<_>>())
            .rpc_retry(rpc_retry)
            .build()
    }
}
