//! Derivation oracle capability
//!
//! The keychain never performs elliptic-curve math itself. Child public keys,
//! address encoding and account-key assembly are delegated to an oracle:
//!
//! - [`LocalDerivationOracle`] computes them in-process with the `bitcoin` crate
//! - [`HttpDerivationOracle`] calls a remote oracle service over HTTP/JSON

mod http;
mod local;

pub use http::{
    AccountExtendedKeyRequest, AccountExtendedKeyResponse, DeriveExtendedKeyRequest,
    EncodeAddressRequest, EncodeAddressResponse, ErrorResponse, HttpDerivationOracle,
};
pub use local::LocalDerivationOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::scheme::{Network, Scheme};

/// A derived child extended key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedKey {
    /// Base58 extended public key of the child
    pub extended_key: String,
    /// Hex-encoded compressed public key
    pub public_key: String,
    /// Hex-encoded chain code
    pub chain_code: String,
}

/// Account-level key material supplied instead of a ready-made xpub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromChainCode {
    /// Hex-encoded compressed public key of the account
    pub public_key: String,
    /// Hex-encoded 32-byte chain code of the account
    pub chain_code: String,
    /// Non-hardened account number, hardened on assembly
    pub account_index: u32,
}

#[async_trait]
pub trait DerivationOracle: Send + Sync {
    /// Derives the child of `extended_key` at the relative `derivation` indices.
    async fn derive_extended_key(
        &self,
        extended_key: &str,
        derivation: &[u32],
    ) -> Result<DerivedKey, OracleError>;

    /// Encodes a hex public key as an address of the given scheme and network.
    async fn encode_address(
        &self,
        public_key: &str,
        scheme: Scheme,
        network: Network,
    ) -> Result<String, OracleError>;

    /// Assembles the account-level extended public key from its parts.
    async fn account_extended_key(
        &self,
        request: &FromChainCode,
        network: Network,
    ) -> Result<String, OracleError>;
}
