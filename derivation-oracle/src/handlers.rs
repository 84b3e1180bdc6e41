/// Axum HTTP handlers for the derivation endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use bitcoin_keychain::oracle::{
    AccountExtendedKeyRequest, AccountExtendedKeyResponse, DeriveExtendedKeyRequest,
    EncodeAddressRequest, EncodeAddressResponse, ErrorResponse,
};
use bitcoin_keychain::{DerivationOracle, DerivedKey, OracleError};

/// Shared application state
pub type AppState = Arc<dyn DerivationOracle>;

/// Custom error type for handlers
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::InvalidKey(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// POST /derive-extended-key
/// Derives the child of an extended public key at relative indices
pub async fn derive_extended_key(
    State(oracle): State<AppState>,
    Json(req): Json<DeriveExtendedKeyRequest>,
) -> Result<Json<DerivedKey>, ApiError> {
    let derived = oracle
        .derive_extended_key(&req.extended_key, &req.derivation)
        .await?;
    Ok(Json(derived))
}

/// POST /encode-address
/// Encodes a public key as an address of the requested scheme and network
pub async fn encode_address(
    State(oracle): State<AppState>,
    Json(req): Json<EncodeAddressRequest>,
) -> Result<Json<EncodeAddressResponse>, ApiError> {
    let address = oracle
        .encode_address(&req.public_key, req.scheme, req.network)
        .await?;
    Ok(Json(EncodeAddressResponse { address }))
}

/// POST /account-extended-key
/// Assembles an account-level extended public key from key and chain code
pub async fn account_extended_key(
    State(oracle): State<AppState>,
    Json(req): Json<AccountExtendedKeyRequest>,
) -> Result<Json<AccountExtendedKeyResponse>, ApiError> {
    let extended_key = oracle.account_extended_key(&req.key, req.network).await?;
    log::debug!(
        "Assembled account {} key for {}",
        req.key.account_index,
        req.network
    );
    Ok(Json(AccountExtendedKeyResponse { extended_key }))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}
