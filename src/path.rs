//! Derivation paths relative to an account-level extended key
//!
//! Only BIP32 levels 4 and 5 are represented:
//!
//! ```text
//! m / purpose' / coin_type' / account' / change / address_index
//!                                        ^^^^^^   ^^^^^^^^^^^^^
//! ```
//!
//! so `m/44'/0'/0'/1/2` is `DerivationPath { chain: Internal, index: 2 }`,
//! written `"1/2"`. Neither level may be hardened.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KeychainError;

/// First hardened child index; address indices must stay below it.
pub const HARDENED_OFFSET: u32 = 1 << 31;

/// External (receive) or internal (change) branch of a keychain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Internal,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::External, Chain::Internal];

    /// Maps a raw BIP32 level-4 index to a chain
    pub fn from_index(raw: u32) -> Result<Self, KeychainError> {
        match raw {
            0 => Ok(Chain::External),
            1 => Ok(Chain::Internal),
            other => Err(KeychainError::UnrecognizedChange(other)),
        }
    }

    /// Raw BIP32 level-4 index
    pub fn index(self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::External => f.write_str("external"),
            Chain::Internal => f.write_str("internal"),
        }
    }
}

impl FromStr for Chain {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "external" | "receive" | "0" => Ok(Chain::External),
            "internal" | "change" | "1" => Ok(Chain::Internal),
            other => other
                .parse::<u32>()
                .map_err(|_| KeychainError::InvalidDerivationPath(format!("unknown chain '{}'", s)))
                .and_then(Chain::from_index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DerivationPath {
    pub chain: Chain,
    pub index: u32,
}

impl DerivationPath {
    pub fn new(chain: Chain, index: u32) -> Result<Self, KeychainError> {
        if index >= HARDENED_OFFSET {
            return Err(KeychainError::InvalidDerivationPath(format!(
                "hardened address index {} is not supported",
                index
            )));
        }
        Ok(Self { chain, index })
    }

    /// Builds a path from its raw `[change, address_index]` form
    pub fn from_raw(raw: [u32; 2]) -> Result<Self, KeychainError> {
        Self::new(Chain::from_index(raw[0])?, raw[1])
    }

    /// Builds a path from an arbitrary-length raw slice, as received on the wire
    pub fn from_slice(raw: &[u32]) -> Result<Self, KeychainError> {
        match raw {
            [change, index] => Self::from_raw([*change, *index]),
            _ => Err(KeychainError::InvalidDerivationPath(format!(
                "expected 2 levels, got {}",
                raw.len()
            ))),
        }
    }

    pub fn change_index(&self) -> Chain {
        self.chain
    }

    pub fn address_index(&self) -> u32 {
        self.index
    }

    /// Raw index form passed to the derivation oracle
    pub fn to_slice(&self) -> [u32; 2] {
        [self.chain.index(), self.index]
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain.index(), self.index)
    }
}

impl FromStr for DerivationPath {
    type Err = KeychainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeychainError::InvalidDerivationPath(s.to_string());

        let (change, index) = s.trim().split_once('/').ok_or_else(invalid)?;
        let change = change.parse::<u32>().map_err(|_| invalid())?;
        let index = index.parse::<u32>().map_err(|_| invalid())?;

        Self::from_raw([change, index])
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_from_index() {
        assert_eq!(Chain::from_index(0).unwrap(), Chain::External);
        assert_eq!(Chain::from_index(1).unwrap(), Chain::Internal);
        assert!(matches!(
            Chain::from_index(2),
            Err(KeychainError::UnrecognizedChange(2))
        ));
    }

    #[test]
    fn test_path_text_form() {
        let path = DerivationPath::new(Chain::Internal, 5).unwrap();
        assert_eq!(path.to_string(), "1/5");
        assert_eq!("1/5".parse::<DerivationPath>().unwrap(), path);
        assert_eq!(path.to_slice(), [1, 5]);
        assert_eq!(path.change_index(), Chain::Internal);
        assert_eq!(path.address_index(), 5);
    }

    #[test]
    fn test_rejects_malformed_paths() {
        for input in ["", "0", "0/", "a/1", "0/1/2", "2/0", "0/2147483648"] {
            assert!(
                input.parse::<DerivationPath>().is_err(),
                "'{}' should not parse",
                input
            );
        }
        assert!(DerivationPath::from_slice(&[0, 1, 2]).is_err());
        assert!(DerivationPath::new(Chain::External, HARDENED_OFFSET).is_err());
    }

    #[test]
    fn test_path_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(DerivationPath::new(Chain::External, 3).unwrap(), "pk");

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"0/3":"pk"}"#);

        let back: std::collections::BTreeMap<DerivationPath, String> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_chain_text_forms() {
        assert_eq!("change".parse::<Chain>().unwrap(), Chain::Internal);
        assert_eq!("EXTERNAL".parse::<Chain>().unwrap(), Chain::External);
        assert!(matches!(
            "3".parse::<Chain>(),
            Err(KeychainError::UnrecognizedChange(3))
        ));
        assert_eq!(serde_json::to_string(&Chain::Internal).unwrap(), r#""internal""#);
    }
}
