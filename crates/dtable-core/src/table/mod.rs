//! The table contract shared by every storage engine.

pub mod records;

use serde_json::Value;
use tracing::debug;

use crate::address::StorageAddress;
use crate::catalog::Catalog;
use crate::error::{Result, TableError};
use crate::types::{DEFAULT_PUT_CHUNK_SIZE, EngineKind, MetaKind, Record, TableId};

pub use crate::catalog::SchemaUpdate;
pub use records::{ChunkPolicy, RecordBatches, RecordEncoder};

/// Options for [`Table::put_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    /// Encode keys and values with the table codec. When false both must be
    /// strings and are stored as their UTF-8 bytes.
    pub use_codec: bool,
    /// Records buffered before each backend flush. Does not affect results.
    pub chunk_size: usize,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            use_codec: true,
            chunk_size: DEFAULT_PUT_CHUNK_SIZE,
        }
    }
}

/// Options for [`Table::collect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOptions {
    /// `0`: default batch size, negative: one batch, positive: minimum bytes
    /// per batch.
    pub min_chunk_size: i64,
    pub use_codec: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            min_chunk_size: 0,
            use_codec: true,
        }
    }
}

/// Options for [`Table::save_as`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveAsOptions {
    /// Partition count of the new table; `None` keeps the source's.
    pub partitions: Option<usize>,
    /// Replace an existing destination instead of failing with
    /// `NameConflict`.
    pub overwrite: bool,
}

/// A partitioned key-value table.
///
/// Implementations provide identity, the data path and teardown; metadata
/// reads and writes are provided on top of [`Table::catalog`].
pub trait Table: Send + Sync {
    fn id(&self) -> &TableId;

    fn get_name(&self) -> &str {
        &self.id().name
    }

    fn get_namespace(&self) -> &str {
        &self.id().namespace
    }

    fn get_partitions(&self) -> usize;

    fn get_storage_engine(&self) -> EngineKind;

    fn get_address(&self) -> StorageAddress;

    /// Catalog holding this table's metadata entry.
    fn catalog(&self) -> &Catalog;

    /// Bulk-load key/value pairs. Later writes to a key replace earlier ones.
    fn put_all(&self, records: &mut dyn Iterator<Item = Record>, options: &PutOptions)
    -> Result<()>;

    /// Scan every record in batches. Each call starts a fresh scan.
    fn collect(&self, options: &CollectOptions) -> Result<RecordBatches<'_>>;

    /// Exact number of live records.
    fn count(&self) -> Result<u64>;

    /// Copy every record into a new persistent table at `(name, namespace)`.
    fn save_as(&self, name: &str, namespace: &str, options: &SaveAsOptions)
    -> Result<Box<dyn Table>>;

    /// Release resources held by this handle. Safe to call repeatedly.
    fn close(&self) -> Result<()>;

    /// Remove the stored records. A no-op when nothing is stored.
    fn purge(&self) -> Result<()>;

    /// Remove the records and the catalog entry.
    fn destroy(&self) -> Result<()> {
        self.purge()?;
        self.destroy_schema();
        debug!(table = %self.id(), "table destroyed");
        Ok(())
    }

    /// Read part of the catalog entry. Never fails: missing or unreadable
    /// metadata is `{}`.
    fn get_schema(&self, kind: MetaKind) -> Value {
        self.catalog().load(self.id(), kind)
    }

    /// Merge metadata into the existing catalog entry.
    fn save_schema(&self, update: SchemaUpdate) -> Result<()> {
        self.catalog().merge(self.id(), &update)
    }

    /// Delete the catalog entry; failures are logged only.
    fn destroy_schema(&self) {
        self.catalog().remove(self.id())
    }
}

/// Reject a `save_as` destination that is the source itself.
pub(crate) fn check_destination(source: &TableId, dest: &TableId) -> Result<()> {
    if source == dest {
        return Err(TableError::NameConflict(dest.clone()).into());
    }
    Ok(())
}

/// Reject a partition count of zero.
pub(crate) fn check_partitions(partitions: usize) -> Result<usize> {
    if partitions == 0 {
        return Err(TableError::InvalidPartitions(partitions).into());
    }
    Ok(partitions)
}
