use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use crate::config::ServiceConfig;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Keychain routes
        .route("/api/keychains", post(handlers::create_keychain_handler))
        .route(
            "/api/keychains/:id",
            get(handlers::get_keychain_handler).delete(handlers::delete_keychain_handler),
        )
        .route(
            "/api/keychains/:id/reset",
            post(handlers::reset_keychain_handler),
        )
        // Address routes
        .route(
            "/api/keychains/:id/fresh-addresses",
            get(handlers::get_fresh_addresses_handler),
        )
        .route(
            "/api/keychains/:id/fresh-address",
            get(handlers::get_fresh_address_handler),
        )
        .route(
            "/api/keychains/:id/observable-addresses",
            get(handlers::get_observable_addresses_handler),
        )
        .route(
            "/api/keychains/:id/mark-address-used",
            post(handlers::mark_address_used_handler),
        )
        .route(
            "/api/keychains/:id/mark-path-used",
            post(handlers::mark_path_used_handler),
        )
        .route(
            "/api/keychains/:id/derivation-path",
            get(handlers::get_derivation_path_handler),
        )
        .route(
            "/api/keychains/:id/public-keys",
            post(handlers::get_public_keys_handler),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: ServiceConfig) -> anyhow::Result<()> {
    let state = AppState {
        keystore: Arc::new(config.build_keystore()),
        default_lookahead_size: config.default_lookahead_size,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    log::info!("Server listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            log::info!("Received SIGTERM signal");
        },
    }

    log::info!("Shutdown signal received, exiting gracefully...");
}
