//! Lookahead window engine
//!
//! A [`LookaheadWindow`] borrows one keychain's [`Meta`] for the span of a
//! single operation and keeps, per chain, at least `lookahead_size` derived
//! addresses past the used frontier:
//!
//! ```text
//! index:   0   1   2   3   4   5   6   7   8
//!          [used ....  ^]  [unused ...........]
//!                      |   |<-- lookahead -->|
//!               last_used_index
//! ```
//!
//! Derivation is append-only. When an oracle call fails mid-extension, every
//! address derived before the failure is kept and the window is left shorter
//! than requested but consistent, so the operation can simply be retried.

use std::future::Future;
use std::time::Duration;

use crate::error::{KeychainError, OracleError};
use crate::meta::{AddressInfo, Meta};
use crate::oracle::DerivationOracle;
use crate::path::{Chain, DerivationPath, HARDENED_OFFSET};
use crate::Result;

pub struct LookaheadWindow<'a> {
    meta: &'a mut Meta,
    oracle: &'a dyn DerivationOracle,
    timeout: Option<Duration>,
    modified: bool,
}

impl<'a> LookaheadWindow<'a> {
    pub fn new(meta: &'a mut Meta, oracle: &'a dyn DerivationOracle) -> Self {
        Self {
            meta,
            oracle,
            timeout: None,
            modified: false,
        }
    }

    /// Bounds every oracle call made through this window
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn meta(&self) -> &Meta {
        &*self.meta
    }

    /// Whether any address was derived or any frontier advanced
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, OracleError>
    where
        F: Future<Output = std::result::Result<T, OracleError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| OracleError::Timeout(limit))?,
            None => call.await,
        }
    }

    /// Derives addresses until `chain` holds `target` of them.
    ///
    /// Returns the number of newly derived addresses. Targets past the
    /// non-hardened index space are rejected before the oracle is called.
    pub async fn extend(&mut self, chain: Chain, target: u64) -> Result<u32> {
        if target > u64::from(HARDENED_OFFSET) {
            return Err(KeychainError::InvalidDerivationPath(format!(
                "window of {} addresses exceeds the non-hardened index space",
                target
            )));
        }

        let start = self.meta.chain(chain).derived_count();
        // Checked above, fits in u32 (2^31).
        let target = target as u32;
        if start >= target {
            return Ok(0);
        }

        log::debug!(
            "Extending {} chain of keychain {} from {} to {} addresses",
            chain,
            self.meta.id(),
            start,
            target
        );

        for index in start..target {
            if let Err(e) = self.derive_next(chain, index).await {
                log::warn!(
                    "Extension of {} chain of keychain {} stopped at {}/{}: {}",
                    chain,
                    self.meta.id(),
                    index,
                    target,
                    e
                );
                return Err(e);
            }
        }

        Ok(target - start)
    }

    async fn derive_next(&mut self, chain: Chain, index: u32) -> Result<()> {
        let path = DerivationPath::new(chain, index)?;
        let extended_key = self.meta.main.extended_public_key.clone();
        let scheme = self.meta.main.scheme;
        let network = self.meta.main.network;

        let derived = self
            .bounded(self.oracle.derive_extended_key(&extended_key, &path.to_slice()))
            .await?;
        let address = self
            .bounded(self.oracle.encode_address(&derived.public_key, scheme, network))
            .await?;

        if self.meta.contains_address(&address) {
            return Err(OracleError::InvalidResponse(format!(
                "address {} returned for {} is already indexed",
                address, path
            ))
            .into());
        }

        self.meta.push_address(AddressInfo {
            address,
            derivation_path: path,
            chain,
            public_key: Some(derived.public_key),
        });
        self.modified = true;
        Ok(())
    }

    /// Restores the gap limit on both chains
    pub async fn fill(&mut self) -> Result<()> {
        for chain in Chain::ALL {
            let target = self.gap_target(chain, 0);
            self.extend(chain, target).await?;
        }
        Ok(())
    }

    /// Length the chain needs so that `count` addresses past the frontier are
    /// followed by a full lookahead
    fn gap_target(&self, chain: Chain, count: u32) -> u64 {
        u64::from(self.meta.chain(chain).next_unused_index())
            + u64::from(count)
            + u64::from(self.meta.main.lookahead_size)
    }

    /// The `count` addresses following the used frontier.
    ///
    /// Repeated calls return the same addresses until the frontier moves.
    pub async fn fresh_addresses(&mut self, chain: Chain, count: u32) -> Result<Vec<AddressInfo>> {
        let target = self.gap_target(chain, count);
        self.extend(chain, target).await?;

        let start = self.meta.chain(chain).next_unused_index() as usize;
        let derived = self.meta.chain(chain).derived_addresses();
        Ok(derived[start..start + count as usize].to_vec())
    }

    pub async fn fresh_address(&mut self, chain: Chain) -> Result<AddressInfo> {
        let target = self.gap_target(chain, 1);
        self.extend(chain, target).await?;

        let path = DerivationPath::new(chain, self.meta.chain(chain).next_unused_index())?;
        self.meta
            .address_info(path)
            .cloned()
            .ok_or(KeychainError::DerivationPathNotFound(path))
    }

    /// Marks `path` as used, moving the frontier forward.
    ///
    /// Returns `false` when the path is at or below the frontier, which leaves
    /// the window untouched. The window is extended before the frontier moves,
    /// so a failed extension leaves the frontier where it was.
    pub async fn mark_used(&mut self, path: DerivationPath) -> Result<bool> {
        let state = self.meta.chain(path.chain);
        if path.index >= state.derived_count() {
            return Err(KeychainError::IndexOutOfRange {
                chain: path.chain,
                index: path.index,
                derived: state.derived_count(),
            });
        }
        if matches!(state.last_used_index(), Some(last) if last >= path.index) {
            return Ok(false);
        }

        let target = u64::from(path.index) + 1 + u64::from(self.meta.main.lookahead_size);
        self.extend(path.chain, target).await?;

        self.meta.chain_mut(path.chain).advance_frontier(path.index);
        self.modified = true;
        log::info!(
            "Keychain {} {} chain used up to {}",
            self.meta.id(),
            path.chain,
            path.index
        );
        Ok(true)
    }

    pub async fn mark_address_used(&mut self, address: &str) -> Result<DerivationPath> {
        let path = self.meta.resolve_address(address)?;
        self.mark_used(path).await?;
        Ok(path)
    }

    /// Addresses in `[from, to)`, deriving past the lookahead when needed
    pub async fn observable_addresses(
        &mut self,
        chain: Chain,
        from: u32,
        to: u32,
    ) -> Result<Vec<AddressInfo>> {
        if from > to {
            return Err(KeychainError::InvalidRange { from, to });
        }
        self.extend(chain, u64::from(to)).await?;

        let derived = self.meta.chain(chain).derived_addresses();
        Ok(derived[from as usize..to as usize].to_vec())
    }

    pub fn resolve_address(&self, address: &str) -> Result<DerivationPath> {
        self.meta.resolve_address(address)
    }

    pub fn public_keys(&self, paths: &[DerivationPath]) -> Result<Vec<String>> {
        self.meta.public_keys(paths)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::meta::KeychainInfo;
    use crate::oracle::{DerivedKey, FromChainCode, LocalDerivationOracle};
    use crate::scheme::{Network, Scheme};

    const BIP84_XPUB: &str = "xpub6CatWdiZiodmUeTDp8LT5or8nmbKNcuyvz7WyksVFkKB4RHwCD3XyuvPEbvqAQY3rAPshWcMLoP2fMFMKHPJ4ZeZXYVUhLv1VMrjPC7PW6V";

    /// Local oracle that fails every derivation once `budget` is spent
    struct BudgetOracle {
        inner: LocalDerivationOracle,
        budget: AtomicUsize,
    }

    impl BudgetOracle {
        fn new(budget: usize) -> Self {
            Self {
                inner: LocalDerivationOracle::new(),
                budget: AtomicUsize::new(budget),
            }
        }
    }

    #[async_trait]
    impl DerivationOracle for BudgetOracle {
        async fn derive_extended_key(
            &self,
            extended_key: &str,
            derivation: &[u32],
        ) -> std::result::Result<DerivedKey, OracleError> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(OracleError::Request("budget exhausted".to_string()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.derive_extended_key(extended_key, derivation).await
        }

        async fn encode_address(
            &self,
            public_key: &str,
            scheme: Scheme,
            network: Network,
        ) -> std::result::Result<String, OracleError> {
            self.inner.encode_address(public_key, scheme, network).await
        }

        async fn account_extended_key(
            &self,
            request: &FromChainCode,
            network: Network,
        ) -> std::result::Result<String, OracleError> {
            self.inner.account_extended_key(request, network).await
        }
    }

    /// Oracle whose calls never complete
    struct StalledOracle;

    #[async_trait]
    impl DerivationOracle for StalledOracle {
        async fn derive_extended_key(
            &self,
            _extended_key: &str,
            _derivation: &[u32],
        ) -> std::result::Result<DerivedKey, OracleError> {
            std::future::pending().await
        }

        async fn encode_address(
            &self,
            _public_key: &str,
            _scheme: Scheme,
            _network: Network,
        ) -> std::result::Result<String, OracleError> {
            std::future::pending().await
        }

        async fn account_extended_key(
            &self,
            _request: &FromChainCode,
            _network: Network,
        ) -> std::result::Result<String, OracleError> {
            std::future::pending().await
        }
    }

    fn test_meta(lookahead_size: u32) -> Meta {
        Meta::new(KeychainInfo::new(
            Uuid::new_v4(),
            BIP84_XPUB.to_string(),
            Scheme::Bip84,
            Network::BitcoinMainnet,
            lookahead_size,
        ))
    }

    #[tokio::test]
    async fn test_fill_derives_lookahead_on_both_chains() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(3);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);

        window.fill().await.unwrap();
        assert!(window.is_modified());

        let external = meta.chain(Chain::External).derived_addresses();
        assert_eq!(external.len(), 3);
        assert_eq!(external[0].address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(external[1].address, "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
        assert_eq!(external[2].address, "bc1qp59yckz4ae5c4efgw2s5wfyvrz0ala7rgvuz8z");

        let internal = meta.chain(Chain::Internal).derived_addresses();
        assert_eq!(internal.len(), 3);
        assert_eq!(internal[0].address, "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el");
        assert_eq!(internal[0].derivation_path.to_string(), "1/0");
        assert_eq!(meta.derived_count(), 6);
    }

    #[tokio::test]
    async fn test_fresh_addresses_are_stable() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);

        let first = window.fresh_addresses(Chain::External, 2).await.unwrap();
        let second = window.fresh_addresses(Chain::External, 2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].derivation_path.index, 0);
        assert_eq!(window.fresh_address(Chain::External).await.unwrap(), first[0]);

        // count + lookahead past the frontier
        assert_eq!(meta.chain(Chain::External).derived_count(), 4);
    }

    #[tokio::test]
    async fn test_fresh_zero_still_enforces_gap_limit() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);

        assert!(window
            .fresh_addresses(Chain::Internal, 0)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(meta.chain(Chain::Internal).derived_count(), 2);
    }

    #[tokio::test]
    async fn test_mark_used_advances_and_extends() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(3);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        window.fill().await.unwrap();

        let path = DerivationPath::new(Chain::External, 2).unwrap();
        assert!(window.mark_used(path).await.unwrap());
        assert_eq!(window.meta().chain(Chain::External).derived_count(), 6);

        let fresh = window.fresh_address(Chain::External).await.unwrap();
        assert_eq!(fresh.derivation_path.index, 3);

        let state = meta.chain(Chain::External);
        assert_eq!(state.last_used_index(), Some(2));
        assert_eq!(state.derived_count(), 7);
        assert_eq!(state.unused_count(), 4);
    }

    #[tokio::test]
    async fn test_mark_used_below_frontier_is_noop() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        window.fill().await.unwrap();

        window
            .mark_used(DerivationPath::new(Chain::External, 1).unwrap())
            .await
            .unwrap();
        let before = window.meta().clone();

        assert!(!window
            .mark_used(DerivationPath::new(Chain::External, 0).unwrap())
            .await
            .unwrap());
        assert!(!window
            .mark_used(DerivationPath::new(Chain::External, 1).unwrap())
            .await
            .unwrap());
        assert_eq!(window.meta(), &before);
    }

    #[tokio::test]
    async fn test_mark_used_out_of_range() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        window.fill().await.unwrap();
        let before = window.meta().clone();

        let result = window
            .mark_used(DerivationPath::new(Chain::Internal, 2).unwrap())
            .await;
        assert!(matches!(
            result,
            Err(KeychainError::IndexOutOfRange {
                chain: Chain::Internal,
                index: 2,
                derived: 2
            })
        ));
        assert_eq!(window.meta(), &before);
    }

    #[tokio::test]
    async fn test_mark_address_used() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        window.fill().await.unwrap();

        let path = window
            .mark_address_used("bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el")
            .await
            .unwrap();
        assert_eq!(path, DerivationPath::new(Chain::Internal, 0).unwrap());
        assert!(matches!(
            window.mark_address_used("bc1qnotours").await,
            Err(KeychainError::AddressNotFound(_))
        ));
        assert_eq!(meta.chain(Chain::Internal).last_used_index(), Some(0));
    }

    #[tokio::test]
    async fn test_observable_addresses_derive_on_demand() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        window.fill().await.unwrap();

        let range = window
            .observable_addresses(Chain::External, 1, 6)
            .await
            .unwrap();
        assert_eq!(range.len(), 5);
        assert_eq!(range[0].derivation_path.index, 1);
        assert_eq!(range[4].derivation_path.index, 5);

        assert!(window
            .observable_addresses(Chain::External, 3, 3)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            window.observable_addresses(Chain::External, 4, 3).await,
            Err(KeychainError::InvalidRange { from: 4, to: 3 })
        ));
        assert_eq!(meta.chain(Chain::External).derived_count(), 6);
    }

    #[tokio::test]
    async fn test_partial_extension_is_kept() {
        let oracle = BudgetOracle::new(3);
        let mut meta = test_meta(5);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);

        let result = window.extend(Chain::External, 5).await;
        assert!(matches!(
            result,
            Err(KeychainError::Oracle(OracleError::Request(_)))
        ));
        assert!(window.is_modified());
        assert_eq!(meta.chain(Chain::External).derived_count(), 3);

        // Retrying with a fresh budget continues where the last attempt stopped.
        let oracle = BudgetOracle::new(2);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);
        assert_eq!(window.extend(Chain::External, 5).await.unwrap(), 2);
        let indices: Vec<u32> = meta
            .chain(Chain::External)
            .derived_addresses()
            .iter()
            .map(|info| info.derivation_path.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_mark_keeps_frontier() {
        let oracle = LocalDerivationOracle::new();
        let mut meta = test_meta(2);
        LookaheadWindow::new(&mut meta, &oracle)
            .fill()
            .await
            .unwrap();

        let exhausted = BudgetOracle::new(0);
        let mut window = LookaheadWindow::new(&mut meta, &exhausted);
        let result = window
            .mark_used(DerivationPath::new(Chain::External, 1).unwrap())
            .await;
        assert!(matches!(result, Err(KeychainError::Oracle(_))));
        assert!(!window.is_modified());
        assert_eq!(meta.chain(Chain::External).last_used_index(), None);
    }

    #[tokio::test]
    async fn test_oracle_timeout() {
        let oracle = StalledOracle;
        let mut meta = test_meta(1);
        let mut window =
            LookaheadWindow::new(&mut meta, &oracle).with_timeout(Some(Duration::from_millis(20)));

        let result = window.fill().await;
        assert!(matches!(
            result,
            Err(KeychainError::Oracle(OracleError::Timeout(_)))
        ));
        assert_eq!(meta.derived_count(), 0);
    }

    #[tokio::test]
    async fn test_extend_rejects_hardened_range() {
        let oracle = BudgetOracle::new(0);
        let mut meta = test_meta(1);
        let mut window = LookaheadWindow::new(&mut meta, &oracle);

        let result = window
            .fresh_addresses(Chain::External, u32::MAX)
            .await;
        assert!(matches!(
            result,
            Err(KeychainError::InvalidDerivationPath(_))
        ));
        assert_eq!(meta.derived_count(), 0);
    }
}
