//! Metadata catalog: one entry per table holding schema, sample records and a
//! bookkeeping row count, stored apart from the table's data.
//!
//! Every public operation runs inside exactly one short-lived transaction
//! obtained from a [`CatalogStore`]. Dropping a transaction without calling
//! [`CatalogTxn::commit`] discards its changes and releases the store.

pub mod file;
pub mod memory;
pub mod merge;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::codec::{Codec, JsonCodec};
use crate::error::{CatalogError, Error};
use crate::types::{MetaKind, TableId, now_millis};

pub use file::FileCatalogStore;
pub use memory::MemoryCatalogStore;
pub use merge::SchemaUpdate;

/// A catalog row as persisted by a store.
///
/// `schema` and `part_of_data` are opaque codec payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub table_name: String,
    pub namespace: String,
    pub schema: Vec<u8>,
    pub part_of_data: Vec<u8>,
    pub count: u64,
    /// Unix epoch milliseconds of the last metadata write.
    pub updated_at: u64,
}

impl CatalogRow {
    pub fn id(&self) -> TableId {
        TableId::new(self.table_name.clone(), self.namespace.clone())
    }
}

/// Decoded view of a catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: TableId,
    pub schema: Map<String, Value>,
    pub sample_of_data: Vec<Value>,
    pub count: u64,
    pub updated_at: u64,
}

/// Backing store for catalog rows.
pub trait CatalogStore: Send + Sync {
    /// Start a transaction. The store stays locked until the returned guard
    /// is committed or dropped.
    fn begin(&self) -> Result<Box<dyn CatalogTxn + '_>, Error>;
}

/// A scoped catalog transaction.
pub trait CatalogTxn {
    fn get(&self, id: &TableId) -> Result<Option<CatalogRow>, Error>;

    fn list(&self) -> Result<Vec<CatalogRow>, Error>;

    /// Insert a new row. Fails with `EntryExists` if the id is taken.
    fn insert(&mut self, row: CatalogRow) -> Result<(), Error>;

    /// Replace the encoded payloads and timestamp of an existing row.
    fn update_payload(
        &mut self,
        id: &TableId,
        schema: Vec<u8>,
        part_of_data: Vec<u8>,
        updated_at: u64,
    ) -> Result<(), Error>;

    /// Atomically add `delta` to the stored count and return the new value.
    fn add_count(&mut self, id: &TableId, delta: u64) -> Result<u64, Error>;

    /// Delete a row. Returns whether a row was removed.
    fn delete(&mut self, id: &TableId) -> Result<bool, Error>;

    fn commit(self: Box<Self>) -> Result<(), Error>;
}

/// Working set of rows shared by the store implementations.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowSet {
    rows: BTreeMap<TableId, CatalogRow>,
}

impl RowSet {
    pub(crate) fn from_rows(rows: Vec<CatalogRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.id(), r)).collect(),
        }
    }

    pub(crate) fn to_rows(&self) -> Vec<CatalogRow> {
        self.rows.values().cloned().collect()
    }

    pub(crate) fn get(&self, id: &TableId) -> Option<CatalogRow> {
        self.rows.get(id).cloned()
    }

    pub(crate) fn insert(&mut self, row: CatalogRow) -> Result<(), CatalogError> {
        let id = row.id();
        if self.rows.contains_key(&id) {
            return Err(CatalogError::EntryExists(id));
        }
        self.rows.insert(id, row);
        Ok(())
    }

    pub(crate) fn update_payload(
        &mut self,
        id: &TableId,
        schema: Vec<u8>,
        part_of_data: Vec<u8>,
        updated_at: u64,
    ) -> Result<(), CatalogError> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| CatalogError::EntryMissing(id.clone()))?;
        row.schema = schema;
        row.part_of_data = part_of_data;
        row.updated_at = updated_at;
        Ok(())
    }

    pub(crate) fn add_count(&mut self, id: &TableId, delta: u64) -> Result<u64, CatalogError> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| CatalogError::EntryMissing(id.clone()))?;
        row.count = row.count.saturating_add(delta);
        Ok(row.count)
    }

    pub(crate) fn delete(&mut self, id: &TableId) -> bool {
        self.rows.remove(id).is_some()
    }
}

/// Shared handle to a catalog store plus the codec for its payloads.
///
/// `Catalog` is cheaply clonable (`Arc`-based) and `Send + Sync`.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    codec: Arc<dyn Codec>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    pub fn new(store: impl CatalogStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
            codec: Arc::new(JsonCodec),
        }
    }

    /// Replace the payload codec.
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// A catalog that lives only as long as this process.
    pub fn in_memory() -> Self {
        Self::new(MemoryCatalogStore::new())
    }

    /// A catalog persisted in a JSON file, shareable between processes.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(FileCatalogStore::open(path)?))
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Create an empty entry for `id` unless one exists.
    ///
    /// Returns `true` if a new entry was created.
    pub fn provision(&self, id: &TableId) -> Result<bool, Error> {
        let mut txn = self.store.begin()?;
        if txn.get(id)?.is_some() {
            return Ok(false);
        }
        txn.insert(self.empty_row(id)?)?;
        txn.commit()?;
        debug!(table = %id, "catalog entry provisioned");
        Ok(true)
    }

    pub fn contains(&self, id: &TableId) -> Result<bool, Error> {
        let txn = self.store.begin()?;
        Ok(txn.get(id)?.is_some())
    }

    /// Decoded entry for `id`. Undecodable payloads read as empty.
    pub fn entry(&self, id: &TableId) -> Result<Option<CatalogEntry>, Error> {
        let row = {
            let txn = self.store.begin()?;
            txn.get(id)?
        };
        Ok(row.map(|row| CatalogEntry {
            id: id.clone(),
            schema: merge::decode_object(self.codec(), &row.schema),
            sample_of_data: merge::decode_list(self.codec(), &row.part_of_data),
            count: row.count,
            updated_at: row.updated_at,
        }))
    }

    /// Ids of all catalogued tables, optionally restricted to one namespace.
    pub fn list(&self, namespace: Option<&str>) -> Result<Vec<TableId>, Error> {
        let txn = self.store.begin()?;
        Ok(txn
            .list()?
            .into_iter()
            .filter(|row| namespace.is_none_or(|ns| row.namespace == ns))
            .map(|row| row.id())
            .collect())
    }

    /// Read one part of an entry.
    ///
    /// Missing entries, store failures and corrupt payloads all read as an
    /// empty object; the failure is logged and never returned.
    pub fn load(&self, id: &TableId, kind: MetaKind) -> Value {
        match self.try_load(id, kind) {
            Ok(Some(value)) => value,
            Ok(None) => Value::Object(Map::new()),
            Err(e) => {
                warn!(table = %id, ?kind, error = %e, "unreadable catalog metadata");
                Value::Object(Map::new())
            }
        }
    }

    fn try_load(&self, id: &TableId, kind: MetaKind) -> Result<Option<Value>, Error> {
        let row = {
            let txn = self.store.begin()?;
            txn.get(id)?
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let value = match kind {
            MetaKind::Schema => merge::decode_strict(self.codec(), &row.schema, Value::is_object)?,
            MetaKind::Data => {
                merge::decode_strict(self.codec(), &row.part_of_data, Value::is_array)?
            }
            MetaKind::Count => Value::from(row.count),
        };
        Ok(Some(value))
    }

    /// Merge `update` into the existing entry for `id`.
    ///
    /// Schema keys overlay existing ones, samples append up to
    /// [`SAMPLE_CAPACITY`](crate::types::SAMPLE_CAPACITY), counts add.
    /// Fails with [`CatalogError::EntryMissing`] if the entry was never
    /// provisioned.
    pub fn merge(&self, id: &TableId, update: &SchemaUpdate) -> Result<(), Error> {
        let mut txn = self.store.begin()?;
        let row = txn
            .get(id)?
            .ok_or_else(|| CatalogError::EntryMissing(id.clone()))?;

        let schema = merge::merge_schema(self.codec(), &row.schema, &update.schema)?;
        let sample = merge::merge_sample(self.codec(), &row.part_of_data, &update.sample_of_data)?;
        txn.update_payload(id, schema, sample, now_millis())?;

        let count = if update.count > 0 {
            txn.add_count(id, update.count)?
        } else {
            row.count
        };
        txn.commit()?;

        debug!(
            table = %id,
            schema_keys = update.schema.len(),
            samples = update.sample_of_data.len(),
            count,
            "catalog entry merged"
        );
        Ok(())
    }

    /// Delete the entry for `id` if present. Failures are logged, not returned.
    pub fn remove(&self, id: &TableId) {
        let result = self.store.begin().and_then(|mut txn| {
            let removed = txn.delete(id)?;
            txn.commit()?;
            Ok(removed)
        });
        match result {
            Ok(true) => debug!(table = %id, "catalog entry removed"),
            Ok(false) => {}
            Err(e) => error!(table = %id, error = %e, "failed to delete catalog entry"),
        }
    }

    /// Give `dst` a fresh entry carrying the payloads of `src` and `count`.
    ///
    /// Any existing entry for `dst` is replaced.
    pub(crate) fn seed_copy(&self, src: &TableId, dst: &TableId, count: u64) -> Result<(), Error> {
        let mut txn = self.store.begin()?;
        let row = match txn.get(src)? {
            Some(src_row) => CatalogRow {
                table_name: dst.name.clone(),
                namespace: dst.namespace.clone(),
                count,
                updated_at: now_millis(),
                ..src_row
            },
            None => CatalogRow {
                count,
                ..self.empty_row(dst)?
            },
        };
        txn.delete(dst)?;
        txn.insert(row)?;
        txn.commit()?;
        debug!(src = %src, dst = %dst, count, "catalog entry seeded from source");
        Ok(())
    }

    fn empty_row(&self, id: &TableId) -> Result<CatalogRow, Error> {
        Ok(CatalogRow {
            table_name: id.name.clone(),
            namespace: id.namespace.clone(),
            schema: self.codec.encode(&Value::Object(Map::new()))?,
            part_of_data: self.codec.encode(&Value::Array(Vec::new()))?,
            count: 0,
            updated_at: now_millis(),
        })
    }
}
