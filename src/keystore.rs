//! Keystore façade
//!
//! Every operation on a keychain runs as one load-mutate-persist transaction
//! while holding that keychain's lock, so concurrent calls on the same
//! identifier never interleave. Calls on different identifiers share nothing
//! but the store and the oracle.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::bip32::Xpub;
use bitcoin::NetworkKind;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{KeychainError, OracleError};
use crate::lookahead::LookaheadWindow;
use crate::meta::{AddressInfo, KeychainInfo, Meta};
use crate::oracle::{DerivationOracle, FromChainCode};
use crate::path::{Chain, DerivationPath};
use crate::scheme::{Descriptor, Network, Scheme};
use crate::store::KeychainStore;
use crate::Result;

/// Account key material a keychain is created from
#[derive(Debug, Clone)]
pub enum AccountKey {
    ExtendedPublicKey(String),
    FromChainCode(FromChainCode),
}

impl AccountKey {
    /// Prefers a ready-made extended key when both forms are supplied
    pub fn from_parts(
        extended_public_key: Option<String>,
        from_chain_code: Option<FromChainCode>,
    ) -> Result<Self> {
        match (extended_public_key, from_chain_code) {
            (Some(xpub), _) if !xpub.trim().is_empty() => {
                Ok(Self::ExtendedPublicKey(xpub.trim().to_string()))
            }
            (_, Some(from_chain_code)) => Ok(Self::FromChainCode(from_chain_code)),
            _ => Err(KeychainError::InvalidDescriptor(
                "either an extended public key or a chain code is required".to_string(),
            )),
        }
    }
}

/// Checks that `extended_key` is an account xpub of `network`
fn check_extended_key(extended_key: &str, network: Network) -> Result<()> {
    let xpub = Xpub::from_str(extended_key)
        .map_err(|e| KeychainError::InvalidDescriptor(format!("{}: {}", extended_key, e)))?;
    if xpub.network != NetworkKind::from(network.bitcoin_network()) {
        return Err(KeychainError::InvalidDescriptor(format!(
            "{} is not a {} key",
            extended_key, network
        )));
    }
    Ok(())
}

pub struct Keystore {
    store: Arc<dyn KeychainStore>,
    oracle: Arc<dyn DerivationOracle>,
    oracle_timeout: Option<Duration>,
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl Keystore {
    pub fn new(store: Arc<dyn KeychainStore>, oracle: Arc<dyn DerivationOracle>) -> Self {
        Self {
            store,
            oracle,
            oracle_timeout: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Bounds each individual oracle call
    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = Some(timeout);
        self
    }

    fn window<'a>(&'a self, meta: &'a mut Meta) -> LookaheadWindow<'a> {
        LookaheadWindow::new(meta, self.oracle.as_ref()).with_timeout(self.oracle_timeout)
    }

    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the lock entry of `id` unless another call is waiting on it.
    ///
    /// Must be called while holding the guard of `id`.
    fn release(&self, id: Uuid) {
        let mut locks = self.locks.lock();
        // One reference in the table, one in the caller's guard.
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            locks.remove(&id);
        }
    }

    async fn load(&self, id: Uuid) -> Result<Meta> {
        self.store
            .load(id)
            .await?
            .ok_or(KeychainError::KeychainNotFound(id))
    }

    /// Loads `id` under its lock, releasing the lock entry of unknown ids
    async fn load_locked(&self, id: Uuid) -> Result<(OwnedMutexGuard<()>, Meta)> {
        let guard = self.lock(id).await;
        match self.load(id).await {
            Ok(meta) => Ok((guard, meta)),
            Err(e) => {
                if matches!(e, KeychainError::KeychainNotFound(_)) {
                    self.release(id);
                }
                Err(e)
            }
        }
    }

    /// Persists `meta` when the window changed it, then releases its lock entry.
    ///
    /// After a failed operation the partial extension is still saved, since
    /// derivation only ever appends. Must be called while holding the guard.
    async fn commit<T>(&self, meta: &Meta, modified: bool, result: Result<T>) -> Result<T> {
        let result = self.persist(meta, modified, result).await;
        self.release(meta.id());
        result
    }

    async fn persist<T>(&self, meta: &Meta, modified: bool, result: Result<T>) -> Result<T> {
        if !modified {
            return result;
        }
        match result {
            Ok(value) => {
                self.store.save(meta.id(), meta).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(save_err) = self.store.save(meta.id(), meta).await {
                    log::warn!(
                        "Could not save partial progress of keychain {}: {}",
                        meta.id(),
                        save_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Creates a keychain and derives the initial lookahead on both chains
    pub async fn create(
        &self,
        account_key: AccountKey,
        scheme: Scheme,
        network: Network,
        lookahead_size: u32,
    ) -> Result<KeychainInfo> {
        let extended_public_key = match account_key {
            AccountKey::ExtendedPublicKey(xpub) => {
                check_extended_key(&xpub, network)?;
                xpub
            }
            AccountKey::FromChainCode(from_chain_code) => {
                let call = self.oracle.account_extended_key(&from_chain_code, network);
                let xpub = match self.oracle_timeout {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .map_err(|_| OracleError::Timeout(limit))??,
                    None => call.await?,
                };
                check_extended_key(&xpub, network)
                    .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
                xpub
            }
        };

        let id = Uuid::new_v4();
        let mut meta = Meta::new(KeychainInfo::new(
            id,
            extended_public_key,
            scheme,
            network,
            lookahead_size,
        ));

        self.window(&mut meta).fill().await?;
        self.store.save(id, &meta).await?;

        log::info!(
            "Created {} keychain {} on {} with lookahead {}",
            scheme,
            id,
            network,
            lookahead_size
        );
        Ok(meta.main)
    }

    /// Creates a keychain from a single-chain output descriptor
    pub async fn create_from_descriptor(
        &self,
        descriptor: &str,
        network: Network,
        lookahead_size: u32,
    ) -> Result<KeychainInfo> {
        let descriptor = Descriptor::parse(descriptor)?;
        self.create(
            AccountKey::ExtendedPublicKey(descriptor.extended_key),
            descriptor.scheme,
            network,
            lookahead_size,
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<KeychainInfo> {
        Ok(self.load(id).await?.main)
    }

    /// Full index of a keychain
    pub async fn snapshot(&self, id: Uuid) -> Result<Meta> {
        self.load(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock(id).await;
        let deleted = self.store.delete(id).await;
        self.release(id);

        if !deleted? {
            return Err(KeychainError::KeychainNotFound(id));
        }
        log::info!("Deleted keychain {}", id);
        Ok(())
    }

    /// Discards all derived addresses and usage, keeping the keychain identity
    pub async fn reset(&self, id: Uuid) -> Result<KeychainInfo> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        meta.clear();

        let result = self.window(&mut meta).fill().await;
        // The cleared document replaces the old one even when re-derivation fails.
        self.commit(&meta, true, result).await?;

        log::info!("Reset keychain {}", id);
        Ok(meta.main)
    }

    pub async fn get_fresh_addresses(
        &self,
        id: Uuid,
        chain: Chain,
        count: u32,
    ) -> Result<Vec<AddressInfo>> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        let mut window = self.window(&mut meta);
        let result = window.fresh_addresses(chain, count).await;
        let modified = window.is_modified();
        self.commit(&meta, modified, result).await
    }

    pub async fn get_fresh_address(&self, id: Uuid, chain: Chain) -> Result<AddressInfo> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        let mut window = self.window(&mut meta);
        let result = window.fresh_address(chain).await;
        let modified = window.is_modified();
        self.commit(&meta, modified, result).await
    }

    pub async fn mark_path_as_used(&self, id: Uuid, path: DerivationPath) -> Result<()> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        let mut window = self.window(&mut meta);
        let result = window.mark_used(path).await;
        let modified = window.is_modified();
        self.commit(&meta, modified, result).await.map(|_| ())
    }

    pub async fn mark_address_as_used(&self, id: Uuid, address: &str) -> Result<DerivationPath> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        let mut window = self.window(&mut meta);
        let result = window.mark_address_used(address).await;
        let modified = window.is_modified();
        self.commit(&meta, modified, result).await
    }

    pub async fn get_all_observable_addresses(
        &self,
        id: Uuid,
        chain: Chain,
        from: u32,
        to: u32,
    ) -> Result<Vec<AddressInfo>> {
        let (_guard, mut meta) = self.load_locked(id).await?;
        let mut window = self.window(&mut meta);
        let result = window.observable_addresses(chain, from, to).await;
        let modified = window.is_modified();
        self.commit(&meta, modified, result).await
    }

    pub async fn get_derivation_path(&self, id: Uuid, address: &str) -> Result<DerivationPath> {
        self.load(id).await?.resolve_address(address)
    }

    pub async fn get_addresses_public_keys(
        &self,
        id: Uuid,
        paths: &[DerivationPath],
    ) -> Result<Vec<String>> {
        self.load(id).await?.public_keys(paths)
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::LocalDerivationOracle;
    use crate::store::InMemoryStore;

    const BIP44_XPUB: &str = "xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj";

    fn keystore() -> Keystore {
        Keystore::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(LocalDerivationOracle::new()),
        )
    }

    #[test]
    fn test_account_key_from_parts() {
        assert!(matches!(
            AccountKey::from_parts(Some(" xpubX ".to_string()), None),
            Ok(AccountKey::ExtendedPublicKey(k)) if k == "xpubX"
        ));
        assert!(matches!(
            AccountKey::from_parts(Some(String::new()), None),
            Err(KeychainError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            AccountKey::from_parts(None, None),
            Err(KeychainError::InvalidDescriptor(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let keystore = keystore();
        let info = keystore
            .create(
                AccountKey::ExtendedPublicKey(BIP44_XPUB.to_string()),
                Scheme::Bip44,
                Network::BitcoinMainnet,
                2,
            )
            .await
            .unwrap();

        keystore
            .get_fresh_addresses(info.id, Chain::External, 1)
            .await
            .unwrap();
        keystore
            .mark_path_as_used(info.id, DerivationPath::new(Chain::External, 0).unwrap())
            .await
            .unwrap();
        keystore.reset(info.id).await.unwrap();
        assert_eq!(keystore.lock_count(), 0);

        assert!(keystore
            .get_fresh_addresses(Uuid::new_v4(), Chain::External, 1)
            .await
            .is_err());
        assert_eq!(keystore.lock_count(), 0);

        keystore.delete(info.id).await.unwrap();
        assert_eq!(keystore.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_table_drains_after_concurrent_calls() {
        let keystore = Arc::new(keystore());
        let info = keystore
            .create(
                AccountKey::ExtendedPublicKey(BIP44_XPUB.to_string()),
                Scheme::Bip44,
                Network::BitcoinMainnet,
                2,
            )
            .await
            .unwrap();

        let id = info.id;
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let keystore = keystore.clone();
                tokio::spawn(async move {
                    let path = DerivationPath::new(Chain::Internal, i % 2).unwrap();
                    keystore.mark_path_as_used(id, path).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(keystore.lock_count(), 0);
        let meta = keystore.snapshot(id).await.unwrap();
        assert_eq!(meta.chain(Chain::Internal).last_used_index(), Some(1));
    }

    #[test]
    fn test_check_extended_key() {
        assert!(check_extended_key(BIP44_XPUB, Network::BitcoinMainnet).is_ok());
        assert!(matches!(
            check_extended_key("not-an-xpub", Network::BitcoinMainnet),
            Err(KeychainError::InvalidDescriptor(_))
        ));
        assert!(matches!(
            check_extended_key(BIP44_XPUB, Network::BitcoinTestnet3),
            Err(KeychainError::InvalidDescriptor(m)) if m.contains("not a")
        ));
    }
}
