//! Core types: table identity, engine kinds, records, size limits.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encoded keys must be strictly smaller than this many bytes.
pub const KEY_SIZE_LIMIT: usize = 512;

/// Encoded values must be strictly smaller than this many bytes (32 MiB).
pub const VALUE_SIZE_LIMIT: usize = 32 * 1024 * 1024;

/// Maximum number of sample records kept in a catalog entry.
pub const SAMPLE_CAPACITY: usize = 200;

/// Records buffered by `put_all` before a backend flush.
pub const DEFAULT_PUT_CHUNK_SIZE: usize = 100_000;

/// Default `collect` batch size per partition (1.75 MiB).
pub const DEFAULT_CHUNK_BYTES_PER_PARTITION: usize = 1_835_008;

/// Partition count used when a caller does not ask for one.
pub const DEFAULT_PARTITIONS: usize = 16;

/// A key/value pair as seen by callers.
pub type Record = (Value, Value);

/// A key/value pair after encoding, as stored by backends.
pub type RawRecord = (Vec<u8>, Vec<u8>);

/// Unique identity of a table across the whole system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub name: String,
    pub namespace: String,
}

impl TableId {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// The physical storage engine behind a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Distributed in-memory compute grid.
    Grid,
    /// Directory tree on a local or mounted filesystem.
    Filesystem,
    /// Table inside a relational database.
    Relational,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Grid => "grid",
            EngineKind::Filesystem => "filesystem",
            EngineKind::Relational => "relational",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(EngineKind::Grid),
            "filesystem" | "fs" => Ok(EngineKind::Filesystem),
            "relational" => Ok(EngineKind::Relational),
            other => Err(format!("unknown storage engine: {other}")),
        }
    }
}

/// Which part of a catalog entry `get_schema` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetaKind {
    /// The field/column metadata mapping.
    #[default]
    Schema,
    /// The bounded list of sample records.
    Data,
    /// The bookkeeping record count.
    Count,
}

impl FromStr for MetaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "schema" => Ok(MetaKind::Schema),
            "data" => Ok(MetaKind::Data),
            "count" => Ok(MetaKind::Count),
            other => Err(format!("unknown metadata kind: {other}")),
        }
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_id_display() {
        let id = TableId::new("events", "prod");
        assert_eq!(id.to_string(), "prod.events");
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("grid".parse::<EngineKind>().unwrap(), EngineKind::Grid);
        assert_eq!("FS".parse::<EngineKind>().unwrap(), EngineKind::Filesystem);
        assert_eq!(
            "Relational".parse::<EngineKind>().unwrap(),
            EngineKind::Relational
        );
        assert!("hdfs".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_kind_serde() {
        let json = serde_json::to_string(&EngineKind::Filesystem).unwrap();
        assert_eq!(json, "\"filesystem\"");
    }

    #[test]
    fn test_meta_kind_default_is_schema() {
        assert_eq!(MetaKind::default(), MetaKind::Schema);
        assert_eq!("DATA".parse::<MetaKind>().unwrap(), MetaKind::Data);
    }
}
