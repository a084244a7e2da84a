//! In-process grid-compute engine.
//!
//! A [`GridSession`] owns named stores keyed by [`GridAddress`]. Each store is
//! split into hash partitions guarded by their own lock. Stores opened as
//! ephemeral disappear when their last handle closes; persistent stores live
//! as long as the session.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::address::{GridAddress, StorageAddress};
use crate::catalog::Catalog;
use crate::error::{Error, Result, TableError};
use crate::partition::partition_for;
use crate::table::records::{ChunkPolicy, RecordBatches, RecordEncoder, write_chunked};
use crate::table::{
    CollectOptions, PutOptions, SaveAsOptions, Table, check_destination, check_partitions,
};
use crate::types::{DEFAULT_PARTITIONS, EngineKind, RawRecord, Record, TableId};

type Partition = RwLock<BTreeMap<Vec<u8>, Vec<u8>>>;

/// Partitioned records of one grid address.
struct GridStore {
    partitions: Vec<Partition>,
    persistent: AtomicBool,
    handles: AtomicUsize,
}

impl GridStore {
    fn new(partitions: usize, persistent: bool) -> Self {
        Self {
            partitions: (0..partitions).map(|_| RwLock::new(BTreeMap::new())).collect(),
            persistent: AtomicBool::new(persistent),
            handles: AtomicUsize::new(0),
        }
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn put(&self, chunk: Vec<RawRecord>) {
        let n = self.partition_count();
        let mut buckets: Vec<Vec<RawRecord>> = (0..n).map(|_| Vec::new()).collect();
        for (key, value) in chunk {
            buckets[partition_for(&key, n)].push((key, value));
        }
        for (partition, bucket) in self.partitions.iter().zip(buckets) {
            if bucket.is_empty() {
                continue;
            }
            let mut guard = partition.write();
            guard.extend(bucket);
        }
    }

    fn len(&self) -> u64 {
        self.partitions.iter().map(|p| p.read().len() as u64).sum()
    }

    /// Copy of one partition's records in key order.
    fn snapshot(&self, partition: usize) -> Vec<RawRecord> {
        self.partitions[partition]
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn clear(&self) {
        for partition in &self.partitions {
            partition.write().clear();
        }
    }
}

struct SessionInner {
    stores: RwLock<HashMap<GridAddress, Arc<GridStore>>>,
    available: AtomicBool,
    catalog: Catalog,
}

/// Connection to a grid of partitioned in-memory stores.
///
/// `GridSession` is cheaply clonable (`Arc`-based) and `Send + Sync`.
#[derive(Clone)]
pub struct GridSession {
    inner: Arc<SessionInner>,
}

impl GridSession {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                stores: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                catalog,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Start opening the table `(name, namespace)`.
    pub fn table(&self, name: &str, namespace: &str) -> GridTableBuilder<'_> {
        GridTableBuilder {
            session: self,
            id: TableId::new(name, namespace),
            address: None,
            partitions: None,
            persistent: false,
            register: true,
        }
    }

    /// Whether a store exists at `address`.
    pub fn contains(&self, address: &GridAddress) -> bool {
        self.inner.stores.read().contains_key(address)
    }

    /// Disconnect. Every later data operation through this session or its
    /// tables fails with `BackendUnavailable`.
    pub fn shutdown(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        debug!("grid session shut down");
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.is_available() {
            return Err(TableError::BackendUnavailable("grid session is shut down".to_string()).into());
        }
        Ok(())
    }

    /// Attach to the store at `address`, creating it if needed. An existing
    /// store keeps its partition count; asking for persistence upgrades it.
    fn attach(&self, address: &GridAddress, partitions: usize, persistent: bool) -> Arc<GridStore> {
        let mut stores = self.inner.stores.write();
        let store = stores
            .entry(address.clone())
            .or_insert_with(|| Arc::new(GridStore::new(partitions, persistent)))
            .clone();
        if persistent {
            store.persistent.store(true, Ordering::SeqCst);
        }
        store.handles.fetch_add(1, Ordering::SeqCst);
        store
    }

    /// Create a fresh persistent store at `address` for `save_as`.
    fn attach_new(
        &self,
        dest: &TableId,
        address: &GridAddress,
        partitions: usize,
        overwrite: bool,
    ) -> Result<Arc<GridStore>> {
        let mut stores = self.inner.stores.write();
        if let Some(existing) = stores.get(address) {
            if !overwrite {
                return Err(TableError::NameConflict(dest.clone()).into());
            }
            existing.clear();
        }
        let store = Arc::new(GridStore::new(partitions, true));
        store.handles.fetch_add(1, Ordering::SeqCst);
        stores.insert(address.clone(), store.clone());
        Ok(store)
    }

    /// Give back one handle; drop an ephemeral store once nobody holds it.
    fn release(&self, address: &GridAddress, store: Arc<GridStore>) {
        let mut stores = self.inner.stores.write();
        let remaining = store.handles.fetch_sub(1, Ordering::SeqCst) - 1;
        let is_current = stores
            .get(address)
            .is_some_and(|current| Arc::ptr_eq(current, &store));
        if remaining == 0 && is_current && !store.persistent.load(Ordering::SeqCst) {
            stores.remove(address);
            debug!(address = %StorageAddress::from(address.clone()), "ephemeral grid store dropped");
        }
    }

    /// Remove and empty the store at `address`. Returns whether one existed.
    fn remove(&self, address: &GridAddress) -> bool {
        match self.inner.stores.write().remove(address) {
            Some(store) => {
                store.clear();
                true
            }
            None => false,
        }
    }
}

/// Builder returned by [`GridSession::table`].
pub struct GridTableBuilder<'a> {
    session: &'a GridSession,
    id: TableId,
    address: Option<StorageAddress>,
    partitions: Option<usize>,
    persistent: bool,
    register: bool,
}

impl GridTableBuilder<'_> {
    /// Partition count for a newly created store (default 16). Ignored when
    /// the store already exists.
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Keep the store after the last handle closes.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Read and write data at `address` instead of the table's own id.
    /// Must be a grid address.
    pub fn address(mut self, address: StorageAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Provision the table's catalog entry (default `true`).
    pub fn register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn execute(self) -> Result<GridTable> {
        self.session.ensure_available()?;
        let address = match self.address {
            Some(address) => address.into_grid()?,
            None => GridAddress::from(&self.id),
        };
        let partitions = check_partitions(self.partitions.unwrap_or(DEFAULT_PARTITIONS))?;
        if self.register {
            self.session.catalog().provision(&self.id)?;
        }
        let store = self.session.attach(&address, partitions, self.persistent);
        debug!(
            table = %self.id,
            partitions = store.partition_count(),
            persistent = store.persistent.load(Ordering::SeqCst),
            "grid table opened"
        );
        Ok(GridTable {
            id: self.id,
            address,
            partitions: store.partition_count(),
            session: self.session.clone(),
            store: Mutex::new(Some(store)),
        })
    }
}

/// Handle to a table in a [`GridSession`].
pub struct GridTable {
    id: TableId,
    address: GridAddress,
    partitions: usize,
    session: GridSession,
    store: Mutex<Option<Arc<GridStore>>>,
}

impl GridTable {
    fn store(&self) -> Result<Arc<GridStore>> {
        self.session.ensure_available()?;
        self.store
            .lock()
            .clone()
            .ok_or_else(|| TableError::Closed(self.id.clone()).into())
    }

    /// Whether the underlying store outlives its handles.
    pub fn is_persistent(&self) -> bool {
        self.store
            .lock()
            .as_ref()
            .is_some_and(|s| s.persistent.load(Ordering::SeqCst))
    }
}

impl Table for GridTable {
    fn id(&self) -> &TableId {
        &self.id
    }

    fn get_partitions(&self) -> usize {
        self.partitions
    }

    fn get_storage_engine(&self) -> EngineKind {
        EngineKind::Grid
    }

    fn get_address(&self) -> StorageAddress {
        StorageAddress::Grid(self.address.clone())
    }

    fn catalog(&self) -> &Catalog {
        self.session.catalog()
    }

    fn put_all(
        &self,
        records: &mut dyn Iterator<Item = Record>,
        options: &PutOptions,
    ) -> Result<()> {
        let store = self.store()?;
        let encoder = RecordEncoder::new(self.catalog().codec(), options.use_codec);
        let written = write_chunked(records, encoder, options.chunk_size, |chunk| {
            self.session.ensure_available()?;
            store.put(chunk);
            Ok(())
        })?;
        debug!(table = %self.id, written, "grid put_all");
        Ok(())
    }

    fn collect(&self, options: &CollectOptions) -> Result<RecordBatches<'_>> {
        let store = self.store()?;
        let session = self.session.clone();
        let source = (0..store.partition_count()).flat_map(move |p| {
            match session.ensure_available() {
                Ok(()) => store.snapshot(p).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err::<RawRecord, Error>(e)],
            }
        });
        Ok(RecordBatches::new(
            Box::new(source),
            RecordEncoder::new(self.catalog().codec(), options.use_codec),
            ChunkPolicy::resolve(options.min_chunk_size, self.partitions),
        ))
    }

    fn count(&self) -> Result<u64> {
        Ok(self.store()?.len())
    }

    fn save_as(
        &self,
        name: &str,
        namespace: &str,
        options: &SaveAsOptions,
    ) -> Result<Box<dyn Table>> {
        let dest_id = TableId::new(name, namespace);
        check_destination(&self.id, &dest_id)?;
        let dest_address = GridAddress::from(&dest_id);
        if dest_address == self.address {
            return Err(TableError::NameConflict(dest_id).into());
        }
        let partitions = check_partitions(options.partitions.unwrap_or(self.partitions))?;

        let source = self.store()?;
        let dest =
            self.session
                .attach_new(&dest_id, &dest_address, partitions, options.overwrite)?;
        for p in 0..source.partition_count() {
            dest.put(source.snapshot(p));
        }
        let copied = dest.len();
        self.catalog().seed_copy(&self.id, &dest_id, copied)?;
        debug!(src = %self.id, dst = %dest_id, copied, partitions, "grid save_as");

        Ok(Box::new(GridTable {
            id: dest_id,
            address: dest_address,
            partitions,
            session: self.session.clone(),
            store: Mutex::new(Some(dest)),
        }))
    }

    fn close(&self) -> Result<()> {
        if let Some(store) = self.store.lock().take() {
            self.session.release(&self.address, store);
            debug!(table = %self.id, "grid table closed");
        }
        Ok(())
    }

    fn purge(&self) -> Result<()> {
        self.session.ensure_available()?;
        if self.session.remove(&self.address) {
            debug!(table = %self.id, "grid store purged");
        }
        Ok(())
    }
}

impl Drop for GridTable {
    fn drop(&mut self) {
        if let Some(store) = self.store.get_mut().take() {
            self.session.release(&self.address, store);
        }
    }
}
