//! Address schemes, networks and output descriptors
//!
//! A scheme plus a network fully determines how a derived public key is turned
//! into an address. Descriptor strings are rendered once per keychain at
//! creation time and cached in [`crate::KeychainInfo`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KeychainError;
use crate::path::Chain;

/// Address-encoding convention of a keychain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Legacy P2PKH
    Bip44,
    /// Wrapped segwit P2SH-P2WPKH
    Bip49,
    /// Native segwit P2WPKH
    Bip84,
}

impl Scheme {
    /// Renders the output descriptor of one chain under `extended_key`
    pub fn descriptor(self, extended_key: &str, chain: Chain) -> String {
        let key = format!("{}/{}/*", extended_key, chain.index());
        match self {
            Scheme::Bip44 => format!("pkh({})", key),
            Scheme::Bip49 => format!("sh(wpkh({}))", key),
            Scheme::Bip84 => format!("wpkh({})", key),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Bip44 => f.write_str("bip44"),
            Scheme::Bip49 => f.write_str("bip49"),
            Scheme::Bip84 => f.write_str("bip84"),
        }
    }
}

impl FromStr for Scheme {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bip44" | "p2pkh" | "legacy" => Ok(Scheme::Bip44),
            "bip49" | "p2sh-p2wpkh" | "wrapped-segwit" => Ok(Scheme::Bip49),
            "bip84" | "p2wpkh" | "native-segwit" => Ok(Scheme::Bip84),
            _ => Err(KeychainError::UnrecognizedScheme(s.to_string())),
        }
    }
}

/// Network profile selecting address prefixes and extended-key versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    BitcoinMainnet,
    BitcoinTestnet3,
    BitcoinRegtest,
}

impl Network {
    pub fn bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::BitcoinMainnet => bitcoin::Network::Bitcoin,
            Network::BitcoinTestnet3 => bitcoin::Network::Testnet,
            Network::BitcoinRegtest => bitcoin::Network::Regtest,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::BitcoinMainnet => f.write_str("bitcoin_mainnet"),
            Network::BitcoinTestnet3 => f.write_str("bitcoin_testnet3"),
            Network::BitcoinRegtest => f.write_str("bitcoin_regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin_mainnet" | "mainnet" => Ok(Network::BitcoinMainnet),
            "bitcoin_testnet3" | "testnet3" | "testnet" => Ok(Network::BitcoinTestnet3),
            "bitcoin_regtest" | "regtest" => Ok(Network::BitcoinRegtest),
            _ => Err(KeychainError::UnrecognizedNetwork(s.to_string())),
        }
    }
}

/// A parsed single-chain output descriptor, e.g. `wpkh(xpub.../0/*)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub scheme: Scheme,
    pub extended_key: String,
    pub chain: Chain,
}

impl Descriptor {
    pub fn parse(descriptor: &str) -> Result<Self, KeychainError> {
        let invalid = |reason: &str| {
            KeychainError::InvalidDescriptor(format!("{}: {}", reason, descriptor))
        };

        let trimmed = descriptor.trim();
        // Optional "#checksum" suffix is ignored.
        let body = trimmed.split('#').next().unwrap_or(trimmed);

        let (scheme, inner) = if let Some(rest) = body.strip_prefix("sh(wpkh(") {
            (Scheme::Bip49, rest.strip_suffix("))"))
        } else if let Some(rest) = body.strip_prefix("wpkh(") {
            (Scheme::Bip84, rest.strip_suffix(')'))
        } else if let Some(rest) = body.strip_prefix("pkh(") {
            (Scheme::Bip44, rest.strip_suffix(')'))
        } else if let Some((wrapper, _)) = body.split_once('(') {
            return Err(KeychainError::UnrecognizedScheme(wrapper.to_string()));
        } else {
            return Err(invalid("missing script wrapper"));
        };
        let inner = inner.ok_or_else(|| invalid("unbalanced parentheses"))?;
        // Key origin info such as "[d34db33f/84h/0h/0h]" is not retained.
        let inner = match inner.strip_prefix('[') {
            Some(origin) => {
                origin
                    .split_once(']')
                    .ok_or_else(|| invalid("unterminated key origin"))?
                    .1
            }
            None => inner,
        };

        let mut parts = inner.split('/');
        let key = parts.next().filter(|k| !k.is_empty());
        let change = parts.next();
        let wildcard = parts.next();
        if parts.next().is_some() {
            return Err(invalid("too many derivation levels"));
        }

        let (Some(key), Some(change), Some("*")) = (key, change, wildcard) else {
            return Err(invalid("expected KEY/CHANGE/*"));
        };
        let change = change
            .parse::<u32>()
            .map_err(|_| invalid("non-numeric change index"))?;

        Ok(Self {
            scheme,
            extended_key: key.to_string(),
            chain: Chain::from_index(change)?,
        })
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme.descriptor(&self.extended_key, self.chain))
    }
}

impl FromStr for Descriptor {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
