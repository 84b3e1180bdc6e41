use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bitcoin_keychain::{DerivationPath, FromChainCode};

/// Either `descriptor`, `extended_public_key` or `from_chain_code` must be set
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateKeychainRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_chain_code: Option<FromChainCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    /// Ignored when a descriptor is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookahead_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteKeychainResponse {
    pub id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct FreshAddressesQuery {
    pub chain: Option<String>,
    #[serde(default = "default_address_count")]
    pub count: u32,
}

fn default_address_count() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ChainQuery {
    pub chain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObservableAddressesQuery {
    pub chain: Option<String>,
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MarkAddressRequest {
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MarkPathRequest {
    /// Text form `"<chain>/<index>"`
    pub derivation_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkUsedResponse {
    pub derivation_path: DerivationPath,
}

#[derive(Debug, Deserialize)]
pub struct DerivationPathQuery {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DerivationPathResponse {
    pub address: String,
    pub derivation_path: DerivationPath,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PublicKeysRequest {
    pub derivation_paths: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeysResponse {
    pub public_keys: Vec<String>,
}
