/// Axum HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bitcoin_keychain::DerivationOracle;

use crate::handlers::*;

pub fn create_router(oracle: Arc<dyn DerivationOracle>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        
        // Derivation endpoints
        .route("/derive-extended-key", post(derive_extended_key))
        .route("/encode-address", post(encode_address))
        .route("/account-extended-key", post(account_extended_key))
        
        // Shared state
        .with_state(oracle)
        
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(
    oracle: Arc<dyn DerivationOracle>,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(oracle);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Derivation oracle listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
