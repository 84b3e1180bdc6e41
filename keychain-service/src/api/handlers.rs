use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use bitcoin_keychain::{
    AccountKey, AddressInfo, Chain, DerivationPath, KeychainInfo, Keystore, Network, Scheme,
};

use super::types::*;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub keystore: Arc<Keystore>,
    pub default_lookahead_size: u32,
}

/// Most addresses a single request may make the service derive
pub const MAX_ADDRESS_BATCH: u32 = 1000;

/// Highest exclusive end of an observable range
pub const MAX_OBSERVABLE_INDEX: u32 = 100_000;

fn check_batch(name: &str, value: u32) -> Result<(), ApiError> {
    if value > MAX_ADDRESS_BATCH {
        return Err(ApiError::InvalidRequest(format!(
            "{} {} exceeds the limit of {}",
            name, value, MAX_ADDRESS_BATCH
        )));
    }
    Ok(())
}

/// Missing chain selects the external (receive) chain
fn parse_chain(chain: Option<&str>) -> Result<Chain, ApiError> {
    Ok(chain.map(str::parse::<Chain>).transpose()?.unwrap_or(Chain::External))
}

pub async fn create_keychain_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateKeychainRequest>,
) -> Result<Json<KeychainInfo>, ApiError> {
    let network: Network = req.network.parse()?;
    let lookahead_size = req.lookahead_size.unwrap_or(state.default_lookahead_size);
    check_batch("lookahead_size", lookahead_size)?;

    let info = match req.descriptor {
        Some(descriptor) => {
            state
                .keystore
                .create_from_descriptor(&descriptor, network, lookahead_size)
                .await?
        }
        None => {
            let scheme: Scheme = req
                .scheme
                .as_deref()
                .ok_or_else(|| ApiError::InvalidRequest("scheme is required".to_string()))?
                .parse()?;
            let account_key =
                AccountKey::from_parts(req.extended_public_key, req.from_chain_code)?;
            state
                .keystore
                .create(account_key, scheme, network, lookahead_size)
                .await?
        }
    };

    Ok(Json(info))
}

pub async fn get_keychain_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<KeychainInfo>, ApiError> {
    let info = state.keystore.get(id).await?;
    Ok(Json(info))
}

pub async fn delete_keychain_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteKeychainResponse>, ApiError> {
    state.keystore.delete(id).await?;

    Ok(Json(DeleteKeychainResponse {
        id,
        status: "deleted".to_string(),
    }))
}

pub async fn reset_keychain_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<KeychainInfo>, ApiError> {
    let info = state.keystore.reset(id).await?;
    Ok(Json(info))
}

pub async fn get_fresh_addresses_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<FreshAddressesQuery>,
) -> Result<Json<Vec<AddressInfo>>, ApiError> {
    let chain = parse_chain(query.chain.as_deref())?;
    check_batch("count", query.count)?;
    let addresses = state
        .keystore
        .get_fresh_addresses(id, chain, query.count)
        .await?;
    Ok(Json(addresses))
}

pub async fn get_fresh_address_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<AddressInfo>, ApiError> {
    let chain = parse_chain(query.chain.as_deref())?;
    let address = state.keystore.get_fresh_address(id, chain).await?;
    Ok(Json(address))
}

pub async fn get_observable_addresses_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ObservableAddressesQuery>,
) -> Result<Json<Vec<AddressInfo>>, ApiError> {
    let chain = parse_chain(query.chain.as_deref())?;
    check_batch("range", query.to.saturating_sub(query.from))?;
    if query.to > MAX_OBSERVABLE_INDEX {
        return Err(ApiError::InvalidRequest(format!(
            "range end {} exceeds the limit of {}",
            query.to, MAX_OBSERVABLE_INDEX
        )));
    }
    let addresses = state
        .keystore
        .get_all_observable_addresses(id, chain, query.from, query.to)
        .await?;
    Ok(Json(addresses))
}

pub async fn mark_address_used_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkAddressRequest>,
) -> Result<Json<MarkUsedResponse>, ApiError> {
    let derivation_path = state
        .keystore
        .mark_address_as_used(id, &req.address)
        .await?;
    Ok(Json(MarkUsedResponse { derivation_path }))
}

pub async fn mark_path_used_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkPathRequest>,
) -> Result<Json<MarkUsedResponse>, ApiError> {
    let derivation_path: DerivationPath = req.derivation_path.parse()?;
    state
        .keystore
        .mark_path_as_used(id, derivation_path)
        .await?;
    Ok(Json(MarkUsedResponse { derivation_path }))
}

pub async fn get_derivation_path_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DerivationPathQuery>,
) -> Result<Json<DerivationPathResponse>, ApiError> {
    let derivation_path = state
        .keystore
        .get_derivation_path(id, &query.address)
        .await?;
    Ok(Json(DerivationPathResponse {
        address: query.address,
        derivation_path,
    }))
}

pub async fn get_public_keys_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PublicKeysRequest>,
) -> Result<Json<PublicKeysResponse>, ApiError> {
    let paths = req
        .derivation_paths
        .iter()
        .map(|path| path.parse::<DerivationPath>())
        .collect::<Result<Vec<_>, _>>()?;

    let public_keys = state
        .keystore
        .get_addresses_public_keys(id, &paths)
        .await?;
    Ok(Json(PublicKeysResponse { public_keys }))
}

pub async fn health_handler() -> &'static str {
    "OK"
}
