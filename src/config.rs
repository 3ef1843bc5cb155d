//! Broker and client settings.
//!
//! Sources are layered: built-in defaults, then an optional TOML file, then
//! environment variables (`STOCKMESH_BROKER__PORT=1100`,
//! `STOCKMESH_CLIENT__ENDPOINTS=localhost:1099,localhost:1100`).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::engine::types::StockRecord;
use crate::error::ConfigError;
use crate::rpc::remote::DEFAULT_REQUEST_TIMEOUT;
use crate::rpc::Endpoint;

pub const BROKER_ENV_PREFIX: &str = "STOCKMESH_BROKER";
pub const CLIENT_ENV_PREFIX: &str = "STOCKMESH_CLIENT";

const DEFAULT_TIMEOUT_MS: u64 = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedStock {
    pub symbol: String,
    pub price: f64,
    pub quantity: u64,
}

impl From<SeedStock> for StockRecord {
    fn from(s: SeedStock) -> Self {
        StockRecord::new(s.symbol, s.price, s.quantity)
    }
}

/// Catalog a broker starts with when its config lists none.
pub fn default_seed() -> Vec<StockRecord> {
    vec![
        StockRecord::new("AAPL", 150.0, 1000),
        StockRecord::new("GOOGL", 2800.0, 500),
        StockRecord::new("TSLA", 700.0, 800),
        StockRecord::new("AMZN", 3400.0, 300),
        StockRecord::new("MSFT", 300.0, 1200),
    ]
}

fn parse_endpoints(raw: &[String]) -> Result<Vec<Endpoint>, ConfigError> {
    raw.iter()
        .map(|s| s.parse::<Endpoint>().map_err(|e| ConfigError::Invalid(e.to_string())))
        .collect()
}

fn env_source(prefix: &str, list_key: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key(list_key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker_id: String,
    /// Interface to bind.
    pub host: String,
    pub port: u16,
    /// Host peers should dial back on; defaults to `host`.
    pub advertise_host: Option<String>,
    /// `host:port` of brokers to ask for replication at startup.
    pub peers: Vec<String>,
    pub seed: Vec<SeedStock>,
    pub request_timeout_ms: u64,
    pub metrics_addr: Option<SocketAddr>,
    pub log_filter: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: "broker1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1099,
            advertise_host: None,
            peers: Vec::new(),
            seed: Vec::new(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            metrics_addr: None,
            log_filter: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg: BrokerConfig = builder
            .add_source(env_source(BROKER_ENV_PREFIX, "peers"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_id.trim().is_empty() {
            return Err(ConfigError::Invalid("broker_id must not be empty".into()));
        }
        if let Some(bad) = self.seed.iter().find(|s| !(s.price > 0.0)) {
            return Err(ConfigError::Invalid(format!("seed price for {} must be positive", bad.symbol)));
        }
        parse_endpoints(&self.peers)?;
        Ok(())
    }

    pub fn seed_records(&self) -> Vec<StockRecord> {
        if self.seed.is_empty() {
            default_seed()
        } else {
            self.seed.iter().cloned().map(StockRecord::from).collect()
        }
    }

    pub fn peer_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        parse_endpoints(&self.peers)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn advertised_endpoint(&self) -> Endpoint {
        let host = self.advertise_host.clone().unwrap_or_else(|| self.host.clone());
        Endpoint::new(host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Client-side settings, including the broker list the client may fail over across.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoints: Vec<String>,
    pub request_timeout_ms: u64,
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:1099".into(), "localhost:1100".into(), "localhost:1101".into()],
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_filter: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg: ClientConfig = builder
            .add_source(env_source(CLIENT_ENV_PREFIX, "endpoints"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one broker endpoint is required".into()));
        }
        parse_endpoints(&self.endpoints)?;
        Ok(())
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        parse_endpoints(&self.endpoints)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
