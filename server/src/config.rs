use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::content::GatewayEndpoint;
use crate::ledger::{WatcherSettings, DEFAULT_EVENT_SIGNATURE};

/// Data marketplace delivery server
///
/// Command-line layer. Only flags the user actually passed are serialized, so
/// unset flags never mask values from the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "delivery-server", version, about = "Data marketplace delivery server")]
pub struct Cli {
    /// Port to listen on [default: 5000]
    #[arg(long, env = "DELIVERY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "DELIVERY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./delivery.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "DELIVERY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for delivered files [default: ./data]
    #[arg(long, env = "DELIVERY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Asset catalog / key vault JSON file [default: {data_dir}/catalog.json]
    #[arg(long, env = "DELIVERY_CATALOG_PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,

    pub bind_address: String,

    /// TOML file the configuration was read from
    pub config: String,

    pub json_logs: bool,

    pub generate_config: bool,

    pub data_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<String>,

    /// Seconds between catalog file change checks (0 disables)
    #[serde(default = "default_catalog_reload")]
    pub catalog_reload_secs: u64,

    /// Ledger connection ([ledger] section). Watcher is off when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerConfig>,

    /// Gateway retrieval ([retrieval] section)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalConfig>,

    /// Compute endpoint ([compute] section)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<ComputeConfig>,
}

fn default_catalog_reload() -> u64 {
    5
}

/// Ledger RPC and watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,

    /// Marketplace contract emitting purchase events
    pub contract_address: String,

    #[serde(default = "default_event_signature")]
    pub event_signature: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    /// First block to scan (default: chain head at startup)
    #[serde(default)]
    pub start_block: Option<u64>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Largest block range per eth_getLogs call
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

impl LedgerConfig {
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            start_block: self.start_block,
            max_block_range: self.max_block_range,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_event_signature() -> String {
    DEFAULT_EVENT_SIGNATURE.to_string()
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_backoff() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_max_block_range() -> u64 {
    5_000
}

/// Content gateways, tried in ascending priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-gateway attempt timeout (default: 10000)
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_ms: u64,

    #[serde(default = "default_gateways")]
    pub gateways: Vec<GatewayEndpoint>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            gateway_timeout_ms: default_gateway_timeout(),
            gateways: default_gateways(),
        }
    }
}

impl RetrievalConfig {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

fn default_gateway_timeout() -> u64 {
    10_000
}

fn default_gateways() -> Vec<GatewayEndpoint> {
    [
        "https://ipfs.io/ipfs",
        "https://gateway.pinata.cloud/ipfs",
        "https://cf-ipfs.com/ipfs",
        "https://dweb.link/ipfs",
    ]
    .iter()
    .enumerate()
    .map(|(i, url)| GatewayEndpoint::new(*url, i as u32))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Algorithm used when a request or catalog record names none
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_rate_burst")]
    pub rate_limit_burst: u32,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            rate_limit_per_minute: default_rate_limit(),
            rate_limit_burst: default_rate_burst(),
        }
    }
}

fn default_algorithm() -> String {
    crate::compute::algorithms::DATASET_SUMMARY.to_string()
}

fn default_rate_limit() -> u32 {
    30
}

fn default_rate_burst() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./delivery.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            catalog_path: None,
            catalog_reload_secs: default_catalog_reload(),
            ledger: None,
            retrieval: None,
            compute: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DELIVERY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_with(Cli::parse())
    }

    /// Same layering as [`Config::load`] with already parsed arguments.
    pub fn load_with(cli: Cli) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(&cli.config))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    fn figment(toml: impl figment::Provider) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            // Nested keys use a double underscore: DELIVERY_LEDGER__RPC_URL
            .merge(Env::prefixed("DELIVERY_").split("__"))
    }

    pub fn catalog_path(&self) -> PathBuf {
        match &self.catalog_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("catalog.json"),
        }
    }

    pub fn retrieval(&self) -> RetrievalConfig {
        self.retrieval.clone().unwrap_or_default()
    }

    pub fn compute(&self) -> ComputeConfig {
        self.compute.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Delivery Server Configuration
# Place this file at ./delivery.toml or specify with --config <path>
# All settings can be overridden via environment variables (DELIVERY_PORT,
# DELIVERY_LEDGER__RPC_URL, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory; delivered purchases are written to {data_dir}/downloads
# data_dir = "./data"

# Asset catalog / key vault (default: {data_dir}/catalog.json)
# catalog_path = "./data/catalog.json"

# Seconds between checks for catalog file changes, e.g. after `seal register`
# (default: 5, 0 disables)
# catalog_reload_secs = 5

# ---- Ledger (purchase events) ----
# The watcher only runs when this section is present.
# [ledger]
# rpc_url = "http://127.0.0.1:8545"
# contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
# event_signature = "FilePurchased(address,string)"
# poll_interval_ms = 2000
# reconnect_attempts = 3
# reconnect_backoff_ms = 2000
# start_block = 0             # default: chain head at startup
# request_timeout_ms = 10000
# max_block_range = 5000

# ---- Content retrieval ----
# [retrieval]
# gateway_timeout_ms = 10000
# Lower priority is tried first; ties keep file order.
# gateways = [
#   { base_url = "https://ipfs.io/ipfs", priority = 0 },
#   { base_url = "https://gateway.pinata.cloud/ipfs", priority = 1 },
#   { base_url = "https://cf-ipfs.com/ipfs", priority = 2 },
#   { base_url = "https://dweb.link/ipfs", priority = 3 },
# ]

# ---- Compute ----
# [compute]
# default_algorithm = "dataset_summary"
# rate_limit_per_minute = 30   # per client IP on POST /compute
# rate_limit_burst = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sections() {
        let config: Config = Config::figment(Toml::string("port = 6000")).extract().unwrap();
        assert_eq!(config.port, 6000);
        assert!(config.ledger.is_none());
        assert_eq!(config.retrieval().gateways.len(), 4);
        assert_eq!(config.retrieval().gateways[0].base_url, "https://ipfs.io/ipfs");
        assert_eq!(config.compute().default_algorithm, "dataset_summary");
        assert_eq!(config.catalog_path(), PathBuf::from("./data/catalog.json"));
    }

    #[test]
    fn test_sections_from_toml() {
        let toml = r#"
            catalog_path = "/srv/catalog.json"

            [ledger]
            rpc_url = "http://127.0.0.1:8545"
            contract_address = "0xabc"
            start_block = 12

            [retrieval]
            gateway_timeout_ms = 500
            gateways = [{ base_url = "http://localhost:8080/ipfs" }]
        "#;
        let config: Config = Config::figment(Toml::string(toml)).extract().unwrap();

        let ledger = config.ledger.clone().unwrap();
        assert_eq!(ledger.event_signature, "FilePurchased(address,string)");
        let settings = ledger.watcher_settings();
        assert_eq!(settings.start_block, Some(12));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));

        let retrieval = config.retrieval();
        assert_eq!(retrieval.gateway_timeout(), Duration::from_millis(500));
        assert_eq!(retrieval.gateways, vec![GatewayEndpoint::new("http://localhost:8080/ipfs", 0)]);
        assert_eq!(config.catalog_path(), PathBuf::from("/srv/catalog.json"));
    }

    fn write_toml(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("delivery.toml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_toml_values_survive_unset_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(
            &dir,
            "port = 6000\nbind_address = \"127.0.0.1\"\ndata_dir = \"/srv/delivery\"\njson_logs = true\n",
        );

        let config = Config::load_with(Cli::parse_from(["delivery-server", "--config", path.as_str()])).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.data_dir, "/srv/delivery");
        assert!(config.json_logs);
        assert!(!config.generate_config);
        assert_eq!(config.config, path);
    }

    #[test]
    fn test_flags_override_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "port = 6000\ndata_dir = \"/srv/delivery\"\n");

        let config = Config::load_with(Cli::parse_from([
            "delivery-server",
            "--config",
            path.as_str(),
            "--port",
            "7000",
        ]))
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.data_dir, "/srv/delivery");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load_with(Cli::parse_from([
            "delivery-server",
            "--config",
            path.to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.catalog_reload_secs, 5);
    }

    #[test]
    fn test_template_parses() {
        let config: Config = Config::figment(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 5000);
    }
}
