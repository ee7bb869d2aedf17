//! Runtime configuration from the environment (and `.env`, via dotenvy in `main`).

use std::path::PathBuf;
use thiserror::Error;
use crate::domain::value_objects::{TaxRate, UserId};

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Postgres backend when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub tax_rate: TaxRate,
    /// JSON catalog loaded into the in-memory backend.
    pub catalog_seed: Option<PathBuf>,
    pub ledger_queue_depth: usize,
    /// Users allowed to move orders through fulfilment.
    pub staff_user_ids: Vec<UserId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            tax_rate: TaxRate::default(),
            catalog_seed: None,
            ledger_queue_depth: 64,
            staff_user_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS")?.unwrap_or(defaults.database_max_connections),
            nats_url: get("NATS_URL"),
            tax_rate: parse(&get, "TAX_RATE_BPS")?.map(TaxRate::from_basis_points).unwrap_or(defaults.tax_rate),
            catalog_seed: get("CATALOG_SEED").map(PathBuf::from),
            ledger_queue_depth: parse::<usize>(&get, "LEDGER_QUEUE_DEPTH")?.filter(|d| *d > 0).unwrap_or(defaults.ledger_queue_depth),
            staff_user_ids: get("STAFF_USER_IDS")
                .map(|ids| ids.split(',').map(str::trim).filter(|id| !id.is_empty()).map(UserId::from).collect())
                .unwrap_or_default(),
        })
    }
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    get(name)
        .map(|value| value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }))
        .transpose()
}
