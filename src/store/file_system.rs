use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::KeychainStore;
use crate::error::StorageError;
use crate::meta::Meta;

/// Stores each keychain as `<base>/<id>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_path`; the directory is created on first save
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_path
    }

    fn document_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }
}

#[async_trait]
impl KeychainStore for FileStore {
    async fn save(&self, id: Uuid, meta: &Meta) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path).await?;

        let path = self.document_path(id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(meta)?;

        // Readers only ever see a complete document.
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        log::debug!("Saved keychain {} to {}", id, path.display());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Meta>, StorageError> {
        let path = self.document_path(id);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta: Meta = serde_json::from_str(&contents)?;
        if meta.id() != id {
            return Err(StorageError::Backend(format!(
                "{} holds keychain {}",
                path.display(),
                meta.id()
            )));
        }
        Ok(Some(meta))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        match fs::remove_file(self.document_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
