/// Derivation Oracle Service
///
/// A lightweight HTTP service deriving child public keys and encoding
/// addresses for watch-only keychains. Never sees private keys.

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;

use bitcoin_keychain::LocalDerivationOracle;
use derivation_oracle::run_server;

#[derive(Debug)]
struct Config {
    server_host: String,
    server_port: u16,
}

impl Config {
    fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let server_host = env::var("ORACLE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let server_port = env::var("ORACLE_PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse()
            .context("Invalid ORACLE_PORT")?;

        Ok(Self {
            server_host,
            server_port,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting derivation oracle...");

    let config = Config::from_env().context("Failed to load configuration")?;
    log::info!(
        "Server will listen on {}:{}",
        config.server_host,
        config.server_port
    );

    run_server(
        Arc::new(LocalDerivationOracle::new()),
        config.server_host,
        config.server_port,
    )
    .await
    .context("Server error")?;

    Ok(())
}
