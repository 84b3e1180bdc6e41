use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::KeychainStore;
use crate::error::StorageError;
use crate::meta::Meta;

#[derive(Default)]
pub struct InMemoryStore {
    keychains: RwLock<HashMap<Uuid, Meta>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keychains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keychains.read().is_empty()
    }
}

#[async_trait]
impl KeychainStore for InMemoryStore {
    async fn save(&self, id: Uuid, meta: &Meta) -> Result<(), StorageError> {
        self.keychains.write().insert(id, meta.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Meta>, StorageError> {
        Ok(self.keychains.read().get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        Ok(self.keychains.write().remove(&id).is_some())
    }
}
