//! Catalog store persisted as a JSON document on disk.
//!
//! A transaction holds an exclusive advisory lock on `<file>.lock` for its
//! whole lifetime, so separate processes sharing one catalog file see each
//! other's commits and never interleave a read-modify-write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Error, StorageError};
use crate::storage::lock::FileLock;
use crate::types::TableId;

use super::{CatalogRow, CatalogStore, CatalogTxn, RowSet};

/// On-disk format version of the catalog document.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CatalogDocument {
    version: u32,
    rows: Vec<CatalogRow>,
}

/// Catalog rows stored in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileCatalogStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileCatalogStore {
    /// Use the catalog file at `path`, creating parent directories. The file
    /// itself is created by the first committed write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StorageError::from)?;
            }
        }
        let lock_path = path.with_extension("lock");
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<RowSet, Error> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RowSet::default()),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        let doc: CatalogDocument = serde_json::from_slice(&bytes).map_err(|e| {
            CatalogError::Corrupted(format!("{}: {e}", self.path.display()))
        })?;
        if doc.version != FORMAT_VERSION {
            return Err(CatalogError::Corrupted(format!(
                "{}: unsupported catalog version {}",
                self.path.display(),
                doc.version
            ))
            .into());
        }
        Ok(RowSet::from_rows(doc.rows))
    }

    fn write_rows(&self, rows: &RowSet) -> Result<(), Error> {
        let doc = CatalogDocument {
            version: FORMAT_VERSION,
            rows: rows.to_rows(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| CatalogError::Corrupted(format!("failed to serialize catalog: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path).map_err(StorageError::from)?;
        tmp.write_all(&bytes).map_err(StorageError::from)?;
        tmp.sync_all().map_err(StorageError::from)?;
        fs::rename(&tmp_path, &self.path).map_err(StorageError::from)?;
        Ok(())
    }
}

impl CatalogStore for FileCatalogStore {
    fn begin(&self) -> Result<Box<dyn CatalogTxn + '_>, Error> {
        let lock = FileLock::exclusive(&self.lock_path)?;
        let staged = self.read_rows()?;
        Ok(Box::new(FileTxn {
            store: self,
            _lock: lock,
            staged,
            dirty: false,
        }))
    }
}

struct FileTxn<'a> {
    store: &'a FileCatalogStore,
    _lock: FileLock,
    staged: RowSet,
    dirty: bool,
}

impl CatalogTxn for FileTxn<'_> {
    fn get(&self, id: &TableId) -> Result<Option<CatalogRow>, Error> {
        Ok(self.staged.get(id))
    }

    fn list(&self) -> Result<Vec<CatalogRow>, Error> {
        Ok(self.staged.to_rows())
    }

    fn insert(&mut self, row: CatalogRow) -> Result<(), Error> {
        self.staged.insert(row)?;
        self.dirty = true;
        Ok(())
    }

    fn update_payload(
        &mut self,
        id: &TableId,
        schema: Vec<u8>,
        part_of_data: Vec<u8>,
        updated_at: u64,
    ) -> Result<(), Error> {
        self.staged
            .update_payload(id, schema, part_of_data, updated_at)?;
        self.dirty = true;
        Ok(())
    }

    fn add_count(&mut self, id: &TableId, delta: u64) -> Result<u64, Error> {
        let count = self.staged.add_count(id, delta)?;
        self.dirty = true;
        Ok(count)
    }

    fn delete(&mut self, id: &TableId) -> Result<bool, Error> {
        let removed = self.staged.delete(id);
        self.dirty |= removed;
        Ok(removed)
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        if self.dirty {
            self.store.write_rows(&self.staged)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, SchemaUpdate};
    use crate::types::MetaKind;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta").join("catalog.json");
        let id = TableId::new("t", "ns");

        {
            let catalog = Catalog::open_file(&path).unwrap();
            catalog.provision(&id).unwrap();
            catalog
                .merge(&id, &SchemaUpdate::new().field("k", json!("v")).count(2))
                .unwrap();
        }

        let catalog = Catalog::open_file(&path).unwrap();
        assert_eq!(catalog.load(&id, MetaKind::Schema), json!({"k": "v"}));
        assert_eq!(catalog.load(&id, MetaKind::Count), json!(2));
    }

    #[test]
    fn test_read_only_txn_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let store = FileCatalogStore::open(&path).unwrap();

        let txn = store.begin().unwrap();
        assert!(txn.list().unwrap().is_empty());
        txn.commit().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_uncommitted_changes_are_discarded() {
        let dir = tempdir().unwrap();
        let store = FileCatalogStore::open(dir.path().join("catalog.json")).unwrap();
        let catalog = Catalog::new(store.clone());
        let id = TableId::new("t", "ns");
        catalog.provision(&id).unwrap();

        {
            let mut txn = store.begin().unwrap();
            txn.delete(&id).unwrap();
        }
        assert!(catalog.contains(&id).unwrap());
    }

    #[test]
    fn test_transaction_holds_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let store = FileCatalogStore::open(&path).unwrap();

        let txn = store.begin().unwrap();
        assert!(FileLock::try_exclusive(&path.with_extension("lock")).is_err());
        drop(txn);
        assert!(FileLock::try_exclusive(&path.with_extension("lock")).is_ok());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, b"{ definitely not a catalog").unwrap();

        let catalog = Catalog::open_file(&path).unwrap();
        let id = TableId::new("t", "ns");
        assert_eq!(catalog.load(&id, MetaKind::Schema), json!({}));
        match catalog.provision(&id) {
            Err(Error::Catalog(CatalogError::Corrupted(_))) => {}
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn test_two_handles_share_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let a = Catalog::open_file(&path).unwrap();
        let b = Catalog::open_file(&path).unwrap();
        let id = TableId::new("t", "ns");
        a.provision(&id).unwrap();

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|catalog| {
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        catalog.merge(&id, &SchemaUpdate::new().count(1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reader = Catalog::open_file(&path).unwrap();
        assert_eq!(reader.load(&id, MetaKind::Count), json!(20));
    }
}
