/// Service configuration from environment variables
///
/// Controls the listening address, the keychain store backend and where
/// derivation requests go. Defaults to an in-memory store and the
/// in-process oracle.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bitcoin_keychain::{
    DerivationOracle, FileStore, HttpDerivationOracle, InMemoryStore, KeychainStore, Keystore,
    LocalDerivationOracle,
};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_DATA_DIR: &str = "./keychains";
const DEFAULT_ORACLE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LOOKAHEAD_SIZE: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    /// One JSON document per keychain under this directory
    File(PathBuf),
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub store: StoreBackend,
    /// Remote oracle base URL; the in-process oracle is used when unset
    pub oracle_url: Option<String>,
    /// Bound on each individual oracle call
    pub oracle_timeout: Duration,
    /// Lookahead of keychains created without an explicit size
    pub default_lookahead_size: u32,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIND_ADDRESS`: listen address (default `0.0.0.0:8080`)
    /// - `KEYCHAIN_STORE`: "memory" (default) or "file"
    /// - `KEYCHAIN_DATA_DIR`: document directory of the file store (default `./keychains`)
    /// - `ORACLE_URL`: remote derivation oracle (optional)
    /// - `ORACLE_TIMEOUT_MS`: per-call oracle timeout (default 5000)
    /// - `DEFAULT_LOOKAHEAD_SIZE`: lookahead when a request omits it (default 20)
    ///
    /// # Examples
    ///
    /// ```bash
    /// # In-memory store, in-process oracle
    /// cargo run -p keychain-service
    ///
    /// # File store with a separate oracle service
    /// KEYCHAIN_STORE=file ORACLE_URL=http://localhost:8081 cargo run -p keychain-service
    /// ```
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address =
            lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let store_kind = lookup("KEYCHAIN_STORE")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase();
        let store = match store_kind.as_str() {
            "memory" | "" => {
                log::info!("Using in-memory keychain store");
                StoreBackend::Memory
            }
            "file" => {
                let dir = lookup("KEYCHAIN_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
                log::info!("Using file keychain store at {}", dir);
                StoreBackend::File(PathBuf::from(dir))
            }
            other => {
                log::warn!("Unknown keychain store '{}', defaulting to memory", other);
                StoreBackend::Memory
            }
        };

        let oracle_url = lookup("ORACLE_URL").filter(|url| !url.trim().is_empty());
        match &oracle_url {
            Some(url) => log::info!("Derivation oracle: {}", url),
            None => log::info!("Derivation oracle: in-process"),
        }

        let oracle_timeout_ms = parse_or(
            &lookup,
            "ORACLE_TIMEOUT_MS",
            DEFAULT_ORACLE_TIMEOUT_MS,
        );
        let default_lookahead_size =
            parse_or(&lookup, "DEFAULT_LOOKAHEAD_SIZE", DEFAULT_LOOKAHEAD_SIZE);

        Self {
            bind_address,
            store,
            oracle_url,
            oracle_timeout: Duration::from_millis(oracle_timeout_ms),
            default_lookahead_size,
        }
    }

    /// Wires the keystore described by this configuration
    pub fn build_keystore(&self) -> Keystore {
        let store: Arc<dyn KeychainStore> = match &self.store {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::File(dir) => Arc::new(FileStore::new(dir.clone())),
        };
        let oracle: Arc<dyn DerivationOracle> = match &self.oracle_url {
            Some(url) => Arc::new(HttpDerivationOracle::new(url.clone())),
            None => Arc::new(LocalDerivationOracle::new()),
        };

        Keystore::new(store, oracle).with_oracle_timeout(self.oracle_timeout)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', using {}", key, raw, default);
            default
        }),
        None => default,
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            store: StoreBackend::Memory,
            oracle_url: None,
            oracle_timeout: Duration::from_millis(DEFAULT_ORACLE_TIMEOUT_MS),
            default_lookahead_size: DEFAULT_LOOKAHEAD_SIZE,
        }
    }
}
