//! Durable blob storage keyed by namespace

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::StoreError;

/// Get/set of an opaque blob under a fixed namespace
pub trait LocalDurableStore: Send + Sync {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, namespace: &str, blob: &[u8]) -> Result<(), StoreError>;
}

impl<T: LocalDurableStore + ?Sized> LocalDurableStore for std::sync::Arc<T> {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(namespace)
    }

    fn set(&self, namespace: &str, blob: &[u8]) -> Result<(), StoreError> {
        (**self).set(namespace, blob)
    }
}

/// One JSON file per namespace inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }
}

impl LocalDurableStore for FileStore {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(namespace);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn set(&self, namespace: &str, blob: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(namespace);

        // Write to a sibling file first so a crash never leaves a torn record
        let tmp = path.with_extension("json.tmp");
        write_private(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Write a file readable only by the owner
pub fn write_private(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, contents)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)?;
    }

    Ok(())
}

/// Process-local storage for tests and the devnet demo
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalDurableStore for MemoryStore {
    fn get(&self, namespace: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().get(namespace).cloned())
    }

    fn set(&self, namespace: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.blobs.lock().insert(namespace.to_string(), blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert!(store.get("tickets").unwrap().is_none());
        store.set("tickets", b"[1,2,3]").unwrap();
        assert_eq!(store.get("tickets").unwrap().unwrap(), b"[1,2,3]");

        store.set("tickets", b"[]").unwrap();
        assert_eq!(store.get("tickets").unwrap().unwrap(), b"[]");
        assert!(!store.path_for("tickets").with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set("tickets", b"{}").unwrap();

        let mode = fs::metadata(store.path_for("tickets")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store_namespaces_are_separate() {
        let store = MemoryStore::new();
        store.set("a", b"one").unwrap();
        store.set("b", b"two").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"one");
        assert_eq!(store.get("b").unwrap().unwrap(), b"two");
        assert!(store.get("c").unwrap().is_none());
    }
}
