//! Directory-backed engine.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<namespace>/<name>/
//!     MANIFEST          JSON: id, partition count, persistence, creation time
//!     .lock             advisory lock for the directory
//!     part-00000.seg    one segment per non-empty partition
//! ```
//!
//! Writers hold the directory lock exclusively while rewriting segments;
//! readers take it shared around each segment read.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::{FilesystemAddress, StorageAddress};
use crate::catalog::Catalog;
use crate::error::{Error, Result, StorageError, TableError};
use crate::partition::partition_for;
use crate::storage::lock::FileLock;
use crate::storage::segment;
use crate::table::records::{ChunkPolicy, RecordBatches, RecordEncoder, write_chunked};
use crate::table::{
    CollectOptions, PutOptions, SaveAsOptions, Table, check_destination, check_partitions,
};
use crate::types::{DEFAULT_PARTITIONS, EngineKind, RawRecord, Record, TableId, now_millis};

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = ".lock";
const MANIFEST_VERSION: u32 = 1;

/// Descriptor written once when a table directory is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub name: String,
    pub namespace: String,
    pub partitions: usize,
    pub persistent: bool,
    pub created_at: u64,
}

impl Manifest {
    fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(StorageError::UnsupportedVersion(manifest.version).into());
        }
        Ok(Some(manifest))
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| StorageError::Corrupted {
            path: dir.display().to_string(),
            reason: format!("failed to serialize manifest: {e}"),
        })?;
        let path = dir.join(MANIFEST_FILE);
        let tmp_path = path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path).map_err(StorageError::from)?;
        tmp.write_all(&bytes).map_err(StorageError::from)?;
        tmp.sync_all().map_err(StorageError::from)?;
        fs::rename(&tmp_path, &path).map_err(StorageError::from)?;
        Ok(())
    }
}

struct StoreInner {
    root: PathBuf,
    catalog: Catalog,
}

/// A root directory holding filesystem tables.
///
/// `FsStore` is cheaply clonable (`Arc`-based) and `Send + Sync`.
#[derive(Clone)]
pub struct FsStore {
    inner: Arc<StoreInner>,
}

impl FsStore {
    /// Use `root` as the store directory, creating it if needed.
    pub fn open(root: impl AsRef<Path>, catalog: Catalog) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| unavailable(root, &e))?;
        let root = root.canonicalize().map_err(|e| unavailable(root, &e))?;
        info!(root = %root.display(), "filesystem store opened");
        Ok(Self {
            inner: Arc::new(StoreInner { root, catalog }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Start opening the table `(name, namespace)`.
    pub fn table(&self, name: &str, namespace: &str) -> FsTableBuilder<'_> {
        FsTableBuilder {
            store: self,
            id: TableId::new(name, namespace),
            address: None,
            partitions: None,
            persistent: false,
            register: true,
        }
    }

    /// Default directory of a table. Fails with `InvalidName` unless both
    /// parts of `id` are plain directory names.
    pub fn table_dir(&self, id: &TableId) -> Result<PathBuf> {
        check_path_component("namespace", &id.namespace)?;
        check_path_component("name", &id.name)?;
        Ok(self.inner.root.join(&id.namespace).join(&id.name))
    }

    /// Whether a table directory with a manifest exists for `id`.
    pub fn exists(&self, id: &TableId) -> bool {
        self.table_dir(id)
            .is_ok_and(|dir| dir.join(MANIFEST_FILE).is_file())
    }

    fn ensure_root(&self) -> Result<()> {
        if !self.inner.root.is_dir() {
            return Err(TableError::BackendUnavailable(format!(
                "store root {} is missing",
                self.inner.root.display()
            ))
            .into());
        }
        Ok(())
    }
}

/// A name or namespace must map to exactly one directory below its parent.
fn check_path_component(part: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value == "." || value == ".." {
        "must not be a relative directory reference"
    } else if value.contains(['/', '\\']) {
        "must not contain a path separator"
    } else if value.contains('\0') {
        "must not contain NUL"
    } else {
        return Ok(());
    };
    Err(TableError::InvalidName {
        part,
        value: value.to_string(),
        reason,
    }
    .into())
}

fn unavailable(root: &Path, e: &io::Error) -> Error {
    TableError::BackendUnavailable(format!("{}: {e}", root.display())).into()
}

/// Builder returned by [`FsStore::table`].
pub struct FsTableBuilder<'a> {
    store: &'a FsStore,
    id: TableId,
    address: Option<StorageAddress>,
    partitions: Option<usize>,
    persistent: bool,
    register: bool,
}

impl FsTableBuilder<'_> {
    /// Partition count for a new table (default 16). An existing table keeps
    /// the count recorded in its manifest.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Mark the table as persistent in its manifest.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Store data in this directory instead of `<root>/<namespace>/<name>`.
    /// Must be a filesystem address. Relative paths resolve against the
    /// working directory; the table reports the canonical absolute path.
    pub fn address(mut self, address: StorageAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Provision the table's catalog entry (default `true`).
    pub fn register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn execute(self) -> Result<FsTable> {
        self.store.ensure_root()?;
        let default_dir = self.store.table_dir(&self.id)?;
        let partitions = check_partitions(self.partitions.unwrap_or(DEFAULT_PARTITIONS))?;
        let dir = match self.address {
            Some(address) => {
                let path = address.into_filesystem()?.path;
                fs::create_dir_all(&path).map_err(StorageError::from)?;
                path.canonicalize().map_err(StorageError::from)?
            }
            None => {
                fs::create_dir_all(&default_dir).map_err(StorageError::from)?;
                default_dir
            }
        };
        let manifest = {
            let _lock = FileLock::exclusive(&dir.join(LOCK_FILE))?;
            match Manifest::read(&dir)? {
                Some(mut existing) => {
                    if self.persistent && !existing.persistent {
                        existing.persistent = true;
                        existing.write(&dir)?;
                    }
                    existing
                }
                None => {
                    let manifest = Manifest {
                        version: MANIFEST_VERSION,
                        name: self.id.name.clone(),
                        namespace: self.id.namespace.clone(),
                        partitions,
                        persistent: self.persistent,
                        created_at: now_millis(),
                    };
                    manifest.write(&dir)?;
                    manifest
                }
            }
        };

        if self.register {
            self.store.catalog().provision(&self.id)?;
        }
        debug!(
            table = %self.id,
            dir = %dir.display(),
            partitions = manifest.partitions,
            "filesystem table opened"
        );
        Ok(FsTable {
            id: self.id,
            dir,
            partitions: manifest.partitions,
            persistent: manifest.persistent,
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Handle to a table directory in an [`FsStore`].
pub struct FsTable {
    id: TableId,
    dir: PathBuf,
    partitions: usize,
    persistent: bool,
    store: FsStore,
    closed: AtomicBool,
}

impl FsTable {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// The manifest as currently stored on disk.
    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::read(&self.dir)?.ok_or_else(|| TableError::NotFound(self.id.clone()).into())
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TableError::Closed(self.id.clone()).into());
        }
        self.store.ensure_root()?;
        if !self.dir.join(MANIFEST_FILE).is_file() {
            return Err(TableError::NotFound(self.id.clone()).into());
        }
        Ok(())
    }

    /// Merge one chunk into the segments it touches.
    fn flush(&self, chunk: Vec<RawRecord>) -> Result<()> {
        let mut buckets: BTreeMap<usize, Vec<RawRecord>> = BTreeMap::new();
        for (key, value) in chunk {
            buckets
                .entry(partition_for(&key, self.partitions))
                .or_default()
                .push((key, value));
        }
        let _lock = FileLock::exclusive(&self.lock_path())?;
        for (partition, bucket) in buckets {
            let path = segment_path(&self.dir, partition);
            let mut records = segment::read_map(&path)?;
            records.extend(bucket);
            segment::write_segment(&path, &records)?;
        }
        Ok(())
    }

    /// Prepare the destination directory of `save_as`.
    fn create_destination(
        &self,
        dest_id: &TableId,
        dest_dir: &Path,
        partitions: usize,
        overwrite: bool,
    ) -> Result<()> {
        if dest_dir.join(MANIFEST_FILE).is_file() {
            if !overwrite {
                return Err(TableError::NameConflict(dest_id.clone()).into());
            }
            fs::remove_dir_all(dest_dir).map_err(StorageError::from)?;
        }
        fs::create_dir_all(dest_dir).map_err(StorageError::from)?;
        Manifest {
            version: MANIFEST_VERSION,
            name: dest_id.name.clone(),
            namespace: dest_id.namespace.clone(),
            partitions,
            persistent: true,
            created_at: now_millis(),
        }
        .write(dest_dir)
    }

    /// Copy segment files as-is. Only valid for equal partition counts.
    fn copy_segments(&self, dest_dir: &Path) -> Result<u64> {
        let mut copied = 0;
        for p in 0..self.partitions {
            let src = segment_path(&self.dir, p);
            let _lock = FileLock::shared(&self.lock_path())?;
            if let Some(header) = segment::read_header(&src)? {
                fs::copy(&src, segment_path(dest_dir, p)).map_err(StorageError::from)?;
                copied += header.record_count;
            }
        }
        Ok(copied)
    }

    /// Redistribute every record over `partitions` new segments.
    fn repartition_into(&self, dest_dir: &Path, partitions: usize) -> Result<u64> {
        let mut targets: Vec<BTreeMap<Vec<u8>, Vec<u8>>> =
            (0..partitions).map(|_| BTreeMap::new()).collect();
        for p in 0..self.partitions {
            let records = {
                let _lock = FileLock::shared(&self.lock_path())?;
                segment::read_segment(&segment_path(&self.dir, p))?
            };
            for (key, value) in records {
                targets[partition_for(&key, partitions)].insert(key, value);
            }
        }
        let mut copied = 0;
        for (p, records) in targets.iter().enumerate() {
            if records.is_empty() {
                continue;
            }
            copied += segment::write_segment(&segment_path(dest_dir, p), records)?.record_count;
        }
        Ok(copied)
    }
}

fn segment_path(dir: &Path, partition: usize) -> PathBuf {
    dir.join(format!("part-{partition:05}.seg"))
}

impl Table for FsTable {
    fn id(&self) -> &TableId {
        &self.id
    }

    fn get_partitions(&self) -> usize {
        self.partitions
    }

    fn get_storage_engine(&self) -> EngineKind {
        EngineKind::Filesystem
    }

    fn get_address(&self) -> StorageAddress {
        StorageAddress::Filesystem(FilesystemAddress {
            path: self.dir.clone(),
        })
    }

    fn catalog(&self) -> &Catalog {
        self.store.catalog()
    }

    fn put_all(
        &self,
        records: &mut dyn Iterator<Item = Record>,
        options: &PutOptions,
    ) -> Result<()> {
        self.check_open()?;
        let encoder = RecordEncoder::new(self.catalog().codec(), options.use_codec);
        let written = write_chunked(records, encoder, options.chunk_size, |chunk| {
            self.flush(chunk)
        })?;
        debug!(table = %self.id, written, "filesystem put_all");
        Ok(())
    }

    fn collect(&self, options: &CollectOptions) -> Result<RecordBatches<'_>> {
        self.check_open()?;
        let dir = self.dir.clone();
        let lock_path = self.lock_path();
        let source = (0..self.partitions).flat_map(move |p| {
            let read = FileLock::shared(&lock_path)
                .and_then(|_lock| segment::read_segment(&segment_path(&dir, p)));
            match read {
                Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err::<RawRecord, Error>(e.into())],
            }
        });
        Ok(RecordBatches::new(
            Box::new(source),
            RecordEncoder::new(self.catalog().codec(), options.use_codec),
            ChunkPolicy::resolve(options.min_chunk_size, self.partitions),
        ))
    }

    fn count(&self) -> Result<u64> {
        self.check_open()?;
        let _lock = FileLock::shared(&self.lock_path())?;
        let mut total = 0;
        for p in 0..self.partitions {
            if let Some(header) = segment::read_header(&segment_path(&self.dir, p))? {
                total += header.record_count;
            }
        }
        Ok(total)
    }

    fn save_as(
        &self,
        name: &str,
        namespace: &str,
        options: &SaveAsOptions,
    ) -> Result<Box<dyn Table>> {
        self.check_open()?;
        let dest_id = TableId::new(name, namespace);
        check_destination(&self.id, &dest_id)?;
        let dest_dir = self.store.table_dir(&dest_id)?;
        if dest_dir == self.dir {
            return Err(TableError::NameConflict(dest_id).into());
        }
        let partitions = check_partitions(options.partitions.unwrap_or(self.partitions))?;

        self.create_destination(&dest_id, &dest_dir, partitions, options.overwrite)?;
        let copied = {
            let _dest_lock = FileLock::exclusive(&dest_dir.join(LOCK_FILE))?;
            if partitions == self.partitions {
                self.copy_segments(&dest_dir)?
            } else {
                self.repartition_into(&dest_dir, partitions)?
            }
        };
        self.catalog().seed_copy(&self.id, &dest_id, copied)?;
        info!(src = %self.id, dst = %dest_id, copied, partitions, "filesystem save_as");

        Ok(Box::new(FsTable {
            id: dest_id,
            dir: dest_dir,
            partitions,
            persistent: true,
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(table = %self.id, "filesystem table closed");
        }
        Ok(())
    }

    fn purge(&self) -> Result<()> {
        self.store.ensure_root()?;
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!(table = %self.id, dir = %self.dir.display(), "filesystem table purged");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from(e).into()),
        }
    }
}
