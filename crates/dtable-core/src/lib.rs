//! # dtable
//!
//! Partitioned key-value tables over interchangeable storage engines, with a
//! metadata catalog that lives apart from the data.
//!
//! Every backend implements the [`Table`](table::Table) contract: partitioning,
//! bulk writes, chunked full scans, exact counts, promotion of an ephemeral
//! table into a persistent one, and teardown. Schema, sample records and a
//! bookkeeping row count are merged into a shared [`Catalog`](catalog::Catalog)
//! entry that is keyed by `(name, namespace)`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dtable_core::backend::grid::GridSession;
//! use dtable_core::catalog::Catalog;
//! use dtable_core::table::{CollectOptions, PutOptions, SchemaUpdate, Table};
//! use dtable_core::types::MetaKind;
//! use serde_json::json;
//!
//! let catalog = Catalog::in_memory();
//! let session = GridSession::new(catalog);
//!
//! // Open an ephemeral table with four partitions.
//! let table = session.table("events", "staging").partitions(4).execute().unwrap();
//!
//! let mut records = vec![(json!("k1"), json!({"v": 1})), (json!("k2"), json!({"v": 2}))].into_iter();
//! table.put_all(&mut records, &PutOptions::default()).unwrap();
//! assert_eq!(table.count().unwrap(), 2);
//!
//! // Promote it into a persistent table.
//! let persisted = table.save_as("events", "prod", &Default::default()).unwrap();
//! let rows = persisted.collect(&CollectOptions::default()).unwrap().into_vec().unwrap();
//! assert_eq!(rows.len(), 2);
//!
//! // Record side-channel metadata.
//! persisted
//!     .save_schema(SchemaUpdate::new().field("header", json!("id,v")).count(2))
//!     .unwrap();
//! assert_eq!(persisted.get_schema(MetaKind::Schema)["header"], "id,v");
//! ```

pub mod address;
pub mod backend;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod partition;
pub mod storage;
pub mod table;
pub mod types;
