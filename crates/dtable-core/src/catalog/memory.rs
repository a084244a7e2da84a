//! In-process catalog store.

use parking_lot::{Mutex, MutexGuard};

use crate::error::Error;
use crate::types::TableId;

use super::{CatalogRow, CatalogStore, CatalogTxn, RowSet};

/// Catalog rows held in memory. Transactions are serialized by a mutex and
/// work on a private copy that replaces the shared rows on commit.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    rows: Mutex<RowSet>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn begin(&self) -> Result<Box<dyn CatalogTxn + '_>, Error> {
        let guard = self.rows.lock();
        let staged = guard.clone();
        Ok(Box::new(MemoryTxn { guard, staged }))
    }
}

struct MemoryTxn<'a> {
    guard: MutexGuard<'a, RowSet>,
    staged: RowSet,
}

impl CatalogTxn for MemoryTxn<'_> {
    fn get(&self, id: &TableId) -> Result<Option<CatalogRow>, Error> {
        Ok(self.staged.get(id))
    }

    fn list(&self) -> Result<Vec<CatalogRow>, Error> {
        Ok(self.staged.to_rows())
    }

    fn insert(&mut self, row: CatalogRow) -> Result<(), Error> {
        Ok(self.staged.insert(row)?)
    }

    fn update_payload(
        &mut self,
        id: &TableId,
        schema: Vec<u8>,
        part_of_data: Vec<u8>,
        updated_at: u64,
    ) -> Result<(), Error> {
        Ok(self
            .staged
            .update_payload(id, schema, part_of_data, updated_at)?)
    }

    fn add_count(&mut self, id: &TableId, delta: u64) -> Result<u64, Error> {
        Ok(self.staged.add_count(id, delta)?)
    }

    fn delete(&mut self, id: &TableId) -> Result<bool, Error> {
        Ok(self.staged.delete(id))
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        let MemoryTxn { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
