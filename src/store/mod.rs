//! Storage capability for keychain documents
//!
//! - In-memory map for tests and single-process deployments
//! - File-system backed JSON documents, one per keychain

mod file_system;
mod memory;

pub use file_system::FileStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use crate::meta::Meta;

/// Whole-document storage keyed by keychain identifier.
///
/// A `save` either replaces the stored document entirely or leaves the
/// previous one in place.
#[async_trait]
pub trait KeychainStore: Send + Sync {
    async fn save(&self, id: Uuid, meta: &Meta) -> Result<(), StorageError>;

    async fn load(&self, id: Uuid) -> Result<Option<Meta>, StorageError>;

    /// Returns `false` when nothing was stored under `id`
    async fn delete(&self, id: Uuid) -> Result<bool, StorageError>;
}
