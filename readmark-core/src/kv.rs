use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};

/// String-keyed local store holding the slot pool and UI flags.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
}

fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// One file per key under a state directory.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&root).map_err(|source| StorageError::CreateDirectory {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn item_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.item_path(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::read(path, err)),
        };
        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .map_err(|err| StorageError::read(path.clone(), err))?;
        Ok(Some(buf))
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.item_path(key)?;
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|err| StorageError::write(tmp.clone(), err))?;
        file.write_all(value.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|err| StorageError::write(tmp.clone(), err))?;
        fs::rename(&tmp, &path).map_err(|err| StorageError::write(path.clone(), err))?;
        Ok(())
    }
}

pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let dir = tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().join("state")).unwrap();

        assert_eq!(store.get_item("book0").unwrap(), None);
        store.set_item("book0", "{\"id\":\"a\"}").unwrap();
        assert_eq!(
            store.get_item("book0").unwrap().as_deref(),
            Some("{\"id\":\"a\"}")
        );

        store.set_item("book0", "overwritten").unwrap();
        assert_eq!(store.get_item("book0").unwrap().as_deref(), Some("overwritten"));
        assert!(!dir.path().join("state").join("book0.tmp").exists());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = FileKeyValueStore::new(dir.path().to_path_buf()).unwrap();

        assert!(matches!(
            store.set_item("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(store.get_item(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn memory_store_overwrites_values() {
        let store = MemoryKeyValueStore::new();
        store.set_item("hide_words", "1").unwrap();
        store.set_item("hide_words", "0").unwrap();
        assert_eq!(store.get_item("hide_words").unwrap().as_deref(), Some("0"));
        assert_eq!(store.get_item("book3").unwrap(), None);
    }
}
