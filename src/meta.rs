//! Keychain index: the per-keychain document persisted by the stores
//!
//! A [`Meta`] holds the immutable [`KeychainInfo`], one [`ChainState`] per
//! chain and the address/path maps. Derived addresses are append-only and
//! contiguous from index 0, and `address_to_path` always agrees with the path
//! recorded on each [`AddressInfo`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KeychainError;
use crate::path::{Chain, DerivationPath};
use crate::scheme::{Network, Scheme};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub derivation_path: DerivationPath,
    pub chain: Chain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainInfo {
    pub id: Uuid,
    pub extended_public_key: String,
    pub external_descriptor: String,
    pub internal_descriptor: String,
    pub scheme: Scheme,
    pub network: Network,
    pub lookahead_size: u32,
}

impl KeychainInfo {
    /// Builds the info of a new keychain, rendering both descriptors once
    pub fn new(
        id: Uuid,
        extended_public_key: String,
        scheme: Scheme,
        network: Network,
        lookahead_size: u32,
    ) -> Self {
        Self {
            id,
            external_descriptor: scheme.descriptor(&extended_public_key, Chain::External),
            internal_descriptor: scheme.descriptor(&extended_public_key, Chain::Internal),
            extended_public_key,
            scheme,
            network,
            lookahead_size,
        }
    }

    pub fn descriptor(&self, chain: Chain) -> &str {
        match chain {
            Chain::External => &self.external_descriptor,
            Chain::Internal => &self.internal_descriptor,
        }
    }
}

/// Lookahead state of one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    derived_addresses: Vec<AddressInfo>,
    last_used_index: Option<u32>,
}

impl ChainState {
    pub fn derived_addresses(&self) -> &[AddressInfo] {
        &self.derived_addresses
    }

    pub fn derived_count(&self) -> u32 {
        self.derived_addresses.len() as u32
    }

    pub fn last_used_index(&self) -> Option<u32> {
        self.last_used_index
    }

    /// First index past the used frontier
    pub fn next_unused_index(&self) -> u32 {
        self.last_used_index.map_or(0, |index| index + 1)
    }

    /// Number of derived addresses past the used frontier
    pub fn unused_count(&self) -> u32 {
        self.derived_count().saturating_sub(self.next_unused_index())
    }

    pub(crate) fn advance_frontier(&mut self, index: u32) -> bool {
        match self.last_used_index {
            Some(current) if current >= index => false,
            _ => {
                self.last_used_index = Some(index);
                true
            }
        }
    }
}

/// The full per-keychain index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub main: KeychainInfo,
    external: ChainState,
    internal: ChainState,
    address_to_path: BTreeMap<String, DerivationPath>,
    path_to_public_key: BTreeMap<DerivationPath, String>,
}

impl Meta {
    pub fn new(main: KeychainInfo) -> Self {
        Self {
            main,
            external: ChainState::default(),
            internal: ChainState::default(),
            address_to_path: BTreeMap::new(),
            path_to_public_key: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.main.id
    }

    pub fn chain(&self, chain: Chain) -> &ChainState {
        match chain {
            Chain::External => &self.external,
            Chain::Internal => &self.internal,
        }
    }

    pub(crate) fn chain_mut(&mut self, chain: Chain) -> &mut ChainState {
        match chain {
            Chain::External => &mut self.external,
            Chain::Internal => &mut self.internal,
        }
    }

    pub fn address_to_path(&self) -> &BTreeMap<String, DerivationPath> {
        &self.address_to_path
    }

    /// Total number of derived addresses over both chains
    pub fn derived_count(&self) -> usize {
        self.external.derived_addresses.len() + self.internal.derived_addresses.len()
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.address_to_path.contains_key(address)
    }

    /// Appends the next address of its chain and indexes it.
    ///
    /// The caller guarantees that `info.derivation_path.index` equals the current
    /// length of the chain and that the address is not yet indexed.
    pub(crate) fn push_address(&mut self, info: AddressInfo) {
        let path = info.derivation_path;
        debug_assert_eq!(path.index, self.chain(path.chain).derived_count());
        debug_assert!(!self.address_to_path.contains_key(&info.address));

        self.address_to_path.insert(info.address.clone(), path);
        if let Some(public_key) = &info.public_key {
            self.path_to_public_key.insert(path, public_key.clone());
        }
        self.chain_mut(path.chain).derived_addresses.push(info);
    }

    /// Drops every derived address and all usage, keeping `main` untouched
    pub(crate) fn clear(&mut self) {
        self.external = ChainState::default();
        self.internal = ChainState::default();
        self.address_to_path.clear();
        self.path_to_public_key.clear();
    }

    pub fn address_info(&self, path: DerivationPath) -> Option<&AddressInfo> {
        self.chain(path.chain)
            .derived_addresses
            .get(path.index as usize)
    }

    pub fn resolve_address(&self, address: &str) -> Result<DerivationPath, KeychainError> {
        self.address_to_path
            .get(address)
            .copied()
            .ok_or_else(|| KeychainError::AddressNotFound(address.to_string()))
    }

    /// Public keys of the given paths, in order; any unknown path fails the batch
    pub fn public_keys(&self, paths: &[DerivationPath]) -> Result<Vec<String>, KeychainError> {
        paths
            .iter()
            .map(|path| {
                self.path_to_public_key
                    .get(path)
                    .cloned()
                    .ok_or(KeychainError::DerivationPathNotFound(*path))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_meta() -> Meta {
        Meta::new(KeychainInfo::new(
            Uuid::new_v4(),
            "xpubTEST".to_string(),
            Scheme::Bip84,
            Network::BitcoinMainnet,
            3,
        ))
    }

    fn address(chain: Chain, index: u32) -> AddressInfo {
        AddressInfo {
            address: format!("addr-{}-{}", chain, index),
            derivation_path: DerivationPath::new(chain, index).unwrap(),
            chain,
            public_key: Some(format!("pk-{}-{}", chain, index)),
        }
    }

    #[test]
    fn test_keychain_info_descriptors() {
        let meta = test_meta();
        assert_eq!(meta.main.external_descriptor, "wpkh(xpubTEST/0/*)");
        assert_eq!(meta.main.descriptor(Chain::Internal), "wpkh(xpubTEST/1/*)");
    }

    #[test]
    fn test_push_and_resolve() {
        let mut meta = test_meta();
        meta.push_address(address(Chain::External, 0));
        meta.push_address(address(Chain::Internal, 0));
        meta.push_address(address(Chain::External, 1));

        assert_eq!(meta.chain(Chain::External).derived_count(), 2);
        assert_eq!(meta.derived_count(), 3);
        assert_eq!(
            meta.resolve_address("addr-external-1").unwrap(),
            DerivationPath::new(Chain::External, 1).unwrap()
        );
        assert!(matches!(
            meta.resolve_address("nope"),
            Err(KeychainError::AddressNotFound(_))
        ));
    }

    #[test]
    fn test_public_keys_all_or_nothing() {
        let mut meta = test_meta();
        meta.push_address(address(Chain::External, 0));

        let found = DerivationPath::new(Chain::External, 0).unwrap();
        let missing = DerivationPath::new(Chain::Internal, 0).unwrap();

        assert_eq!(
            meta.public_keys(&[found]).unwrap(),
            vec!["pk-external-0".to_string()]
        );
        assert!(matches!(
            meta.public_keys(&[found, missing]),
            Err(KeychainError::DerivationPathNotFound(p)) if p == missing
        ));
    }

    #[test]
    fn test_frontier_is_monotonic() {
        let mut state = ChainState::default();
        assert_eq!(state.next_unused_index(), 0);
        assert!(state.advance_frontier(4));
        assert!(!state.advance_frontier(2));
        assert!(!state.advance_frontier(4));
        assert_eq!(state.last_used_index(), Some(4));
        assert_eq!(state.next_unused_index(), 5);
    }

    #[test]
    fn test_clear_keeps_identity() {
        let mut meta = test_meta();
        let main = meta.main.clone();
        meta.push_address(address(Chain::External, 0));
        meta.chain_mut(Chain::External).advance_frontier(0);

        meta.clear();

        assert_eq!(meta.main, main);
        assert_eq!(meta.derived_count(), 0);
        assert!(meta.address_to_path().is_empty());
        assert_eq!(meta.chain(Chain::External).last_used_index(), None);
    }

    #[test]
    fn test_json_document_roundtrip() {
        let mut meta = test_meta();
        meta.push_address(address(Chain::Internal, 0));

        let json = serde_json::to_string_pretty(&meta).unwrap();
        assert!(json.contains(r#""1/0": "pk-internal-0""#));

        let back: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
