use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::StoreError;

/// In-memory state that is optionally mirrored to a JSON file.
///
/// Writes go through `<file>.json.tmp` and a rename. When the main file fails to
/// parse on load, the leftover tmp file is tried before starting empty.
#[derive(Debug)]
pub struct JsonFile<T> {
    inner: Arc<RwLock<T>>,
    path: Option<PathBuf>,
    // Serializes writers of the shared tmp file.
    flush: Arc<Mutex<()>>,
}

impl<T> Clone for JsonFile<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            path: self.path.clone(),
            flush: Arc::clone(&self.flush),
        }
    }
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync,
{
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(T::default())),
            path: None,
            flush: Arc::default(),
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, path = %parent.display(), "failed to create data dir");
            }
        }
        let data = read_json_with_tmp_fallback::<T>(&path).await;
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
            flush: Arc::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().await
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            debug!("store is in-memory only; skipping persist");
            return Ok(());
        };
        let _flush = self.flush.lock().await;
        let bytes = {
            let inner = self.inner.read().await;
            serde_json::to_vec(&*inner)?
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return T::default();
    };
    let err = match serde_json::from_slice::<T>(&bytes) {
        Ok(data) => return data,
        Err(e) => e,
    };
    let tmp = path.with_extension("json.tmp");
    warn!(error = %err, path = %path.display(), "store file is corrupt, trying {}", tmp.display());
    match tokio::fs::read(&tmp).await.map(|b| serde_json::from_slice::<T>(&b)) {
        Ok(Ok(data)) => data,
        _ => {
            warn!(path = %path.display(), "no usable store data, starting empty");
            T::default()
        }
    }
}
