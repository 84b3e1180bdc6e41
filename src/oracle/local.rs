use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{self, Secp256k1, VerifyOnly};
use bitcoin::Address;

use super::{DerivationOracle, DerivedKey, FromChainCode};
use crate::error::OracleError;
use crate::path::HARDENED_OFFSET;
use crate::scheme::{Network, Scheme};

const XPUB_VERSION_MAINNET: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
const XPUB_VERSION_TESTNET: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];

/// In-process oracle backed by the `bitcoin` crate
pub struct LocalDerivationOracle {
    secp: Secp256k1<VerifyOnly>,
}

impl LocalDerivationOracle {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for LocalDerivationOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DerivationOracle for LocalDerivationOracle {
    async fn derive_extended_key(
        &self,
        extended_key: &str,
        derivation: &[u32],
    ) -> Result<DerivedKey, OracleError> {
        let xpub = Xpub::from_str(extended_key)
            .map_err(|e| OracleError::InvalidKey(format!("{}: {}", extended_key, e)))?;

        let path = derivation
            .iter()
            .map(|index| ChildNumber::from_normal_idx(*index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OracleError::InvalidKey(e.to_string()))?;

        let child = xpub
            .derive_pub(&self.secp, &path)
            .map_err(|e| OracleError::InvalidKey(e.to_string()))?;

        Ok(DerivedKey {
            extended_key: child.to_string(),
            public_key: hex::encode(child.public_key.serialize()),
            chain_code: hex::encode(child.chain_code.as_bytes()),
        })
    }

    async fn encode_address(
        &self,
        public_key: &str,
        scheme: Scheme,
        network: Network,
    ) -> Result<String, OracleError> {
        let bytes = hex::decode(public_key)
            .map_err(|e| OracleError::InvalidKey(format!("public key hex: {}", e)))?;
        let public_key = CompressedPublicKey::from_slice(&bytes)
            .map_err(|e| OracleError::InvalidKey(e.to_string()))?;

        let network = network.bitcoin_network();
        let address = match scheme {
            Scheme::Bip44 => Address::p2pkh(public_key.pubkey_hash(), network),
            Scheme::Bip49 => Address::p2shwpkh(&public_key, network),
            Scheme::Bip84 => Address::p2wpkh(&public_key, network),
        };

        Ok(address.to_string())
    }

    async fn account_extended_key(
        &self,
        request: &FromChainCode,
        network: Network,
    ) -> Result<String, OracleError> {
        if request.account_index >= HARDENED_OFFSET {
            return Err(OracleError::InvalidKey(format!(
                "account index {} already hardened",
                request.account_index
            )));
        }

        let public_key = hex::decode(&request.public_key)
            .map_err(|e| OracleError::InvalidKey(format!("public key hex: {}", e)))?;
        secp256k1::PublicKey::from_slice(&public_key)
            .map_err(|e| OracleError::InvalidKey(e.to_string()))?;
        if public_key.len() != 33 {
            return Err(OracleError::InvalidKey(
                "public key must be compressed".to_string(),
            ));
        }

        let chain_code = hex::decode(&request.chain_code)
            .map_err(|e| OracleError::InvalidKey(format!("chain code hex: {}", e)))?;
        if chain_code.len() != 32 {
            return Err(OracleError::InvalidKey(format!(
                "chain code must be 32 bytes, got {}",
                chain_code.len()
            )));
        }

        let version = match network {
            Network::BitcoinMainnet => XPUB_VERSION_MAINNET,
            Network::BitcoinTestnet3 | Network::BitcoinRegtest => XPUB_VERSION_TESTNET,
        };

        // BIP32 serialization: version | depth | parent fingerprint | child | chain code | key
        // The parent fingerprint is unknown and left zeroed.
        let mut data = Vec::with_capacity(78);
        data.extend_from_slice(&version);
        data.push(3);
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&(request.account_index | HARDENED_OFFSET).to_be_bytes());
        data.extend_from_slice(&chain_code);
        data.extend_from_slice(&public_key);

        let xpub = Xpub::decode(&data).map_err(|e| OracleError::InvalidKey(e.to_string()))?;
        Ok(xpub.to_string())
    }
}
