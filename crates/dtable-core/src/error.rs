//! Error types for all dtable operations.

use std::io;
use thiserror::Error;

use crate::types::{EngineKind, TableId};

/// Top-level error type for dtable operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid magic bytes in {0}")]
    InvalidMagic(String),

    #[error("unsupported segment version: {0}")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(String),

    #[error("corrupted file {path}: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("file is locked: {0}")]
    FileLocked(String),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("raw {0} must be a string when the codec is bypassed")]
    RawNotString(RecordField),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog entry for {0} does not exist; provision the table before saving metadata")]
    EntryMissing(TableId),

    #[error("catalog entry for {0} already exists")]
    EntryExists(TableId),

    #[error("catalog store is corrupted: {0}")]
    Corrupted(String),
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("{field} exceeds maximum size of {limit} bytes (got {actual})")]
    RecordTooLarge {
        field: RecordField,
        limit: usize,
        actual: usize,
    },

    #[error("table already exists: {0}")]
    NameConflict(TableId),

    #[error("table not found: {0}")]
    NotFound(TableId),

    #[error("table handle is closed: {0}")]
    Closed(TableId),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid table {part} {value:?}: {reason}")]
    InvalidName {
        part: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("partition count must be at least 1 (got {0})")]
    InvalidPartitions(usize),

    #[error("address engine mismatch: expected {expected}, got {actual}")]
    EngineMismatch {
        expected: EngineKind,
        actual: EngineKind,
    },
}

/// Which half of a record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Key,
    Value,
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordField::Key => f.write_str("key"),
            RecordField::Value => f.write_str("value"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
