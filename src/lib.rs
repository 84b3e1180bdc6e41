//! Bitcoin Keychain: HD address lookahead without private keys
//!
//! This crate tracks hierarchical-deterministic keychains from their
//! account-level extended public key. For each keychain it keeps a window of
//! derived receive and change addresses that always holds `lookahead_size`
//! unused addresses past the last used one.
//!
//! # Architecture
//!
//! - **Keystore**: façade running each operation as a locked load-mutate-persist transaction
//! - **Lookahead Window**: extends chains, advances the used frontier, answers queries
//! - **Meta**: per-keychain index of derived addresses and the address/path maps
//! - **Derivation Oracle**: child-key derivation and address encoding (in-process or HTTP)
//! - **Keychain Store**: whole-document persistence (in-memory or JSON files)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bitcoin_keychain::{
//!     AccountKey, Chain, InMemoryStore, Keystore, LocalDerivationOracle, Network, Scheme,
//! };
//!
//! let keystore = Keystore::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(LocalDerivationOracle::new()),
//! );
//!
//! let info = keystore
//!     .create(AccountKey::ExtendedPublicKey(xpub), Scheme::Bip84, Network::BitcoinMainnet, 20)
//!     .await?;
//!
//! let receive = keystore.get_fresh_address(info.id, Chain::External).await?;
//! keystore.mark_address_as_used(info.id, &receive.address).await?;
//! ```

// Public modules
pub mod error;
pub mod keystore;
pub mod lookahead;
pub mod meta;
pub mod oracle;
pub mod path;
pub mod scheme;
pub mod store;

// Re-exports for convenience
pub use error::{ErrorKind, KeychainError, OracleError, StorageError};
pub use keystore::{AccountKey, Keystore};
pub use lookahead::LookaheadWindow;
pub use meta::{AddressInfo, ChainState, KeychainInfo, Meta};
pub use oracle::{
    DerivationOracle, DerivedKey, FromChainCode, HttpDerivationOracle, LocalDerivationOracle,
};
pub use path::{Chain, DerivationPath, HARDENED_OFFSET};
pub use scheme::{Descriptor, Network, Scheme};
pub use store::{FileStore, InMemoryStore, KeychainStore};

/// Result type for keychain operations
pub type Result<T> = std::result::Result<T, KeychainError>;
