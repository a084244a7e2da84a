//! Storage addresses: where a table's records physically live.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::types::{EngineKind, TableId};

/// Backend-specific location descriptor.
///
/// The variant always matches the engine of the table that reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum StorageAddress {
    Grid(GridAddress),
    Filesystem(FilesystemAddress),
    Relational(RelationalAddress),
}

impl StorageAddress {
    /// The engine this address belongs to.
    pub fn engine(&self) -> EngineKind {
        match self {
            StorageAddress::Grid(_) => EngineKind::Grid,
            StorageAddress::Filesystem(_) => EngineKind::Filesystem,
            StorageAddress::Relational(_) => EngineKind::Relational,
        }
    }

    /// Unwrap a grid address, or fail with `EngineMismatch`.
    pub fn into_grid(self) -> Result<GridAddress, TableError> {
        match self {
            StorageAddress::Grid(a) => Ok(a),
            other => Err(TableError::EngineMismatch {
                expected: EngineKind::Grid,
                actual: other.engine(),
            }),
        }
    }

    /// Unwrap a filesystem address, or fail with `EngineMismatch`.
    pub fn into_filesystem(self) -> Result<FilesystemAddress, TableError> {
        match self {
            StorageAddress::Filesystem(a) => Ok(a),
            other => Err(TableError::EngineMismatch {
                expected: EngineKind::Filesystem,
                actual: other.engine(),
            }),
        }
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageAddress::Grid(a) => write!(f, "grid://{}/{}", a.namespace, a.name),
            StorageAddress::Filesystem(a) => write!(f, "file://{}", a.path.display()),
            StorageAddress::Relational(a) => write!(
                f,
                "relational://{}@{}:{}/{}.{}",
                a.user, a.host, a.port, a.database, a.table
            ),
        }
    }
}

impl From<GridAddress> for StorageAddress {
    fn from(a: GridAddress) -> Self {
        StorageAddress::Grid(a)
    }
}

impl From<FilesystemAddress> for StorageAddress {
    fn from(a: FilesystemAddress) -> Self {
        StorageAddress::Filesystem(a)
    }
}

impl From<RelationalAddress> for StorageAddress {
    fn from(a: RelationalAddress) -> Self {
        StorageAddress::Relational(a)
    }
}

/// Logical location inside a grid session. May differ from the table id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridAddress {
    pub name: String,
    pub namespace: String,
}

impl GridAddress {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl From<&TableId> for GridAddress {
    fn from(id: &TableId) -> Self {
        Self::new(id.name.clone(), id.namespace.clone())
    }
}

/// Absolute directory holding a filesystem table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemAddress {
    pub path: PathBuf,
}

/// Connection descriptor for a table stored in a relational database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalAddress {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub table: String,
}

impl fmt::Debug for RelationalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalAddress")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relational() -> RelationalAddress {
        RelationalAddress {
            user: "etl".to_string(),
            password: "s3cret".to_string(),
            host: "db.local".to_string(),
            port: 3306,
            database: "warehouse".to_string(),
            table: "events".to_string(),
        }
    }

    #[test]
    fn test_engine_matches_variant() {
        let grid: StorageAddress = GridAddress::new("t", "ns").into();
        assert_eq!(grid.engine(), EngineKind::Grid);

        let fs: StorageAddress = FilesystemAddress {
            path: PathBuf::from("/data/t"),
        }
        .into();
        assert_eq!(fs.engine(), EngineKind::Filesystem);

        let rel: StorageAddress = relational().into();
        assert_eq!(rel.engine(), EngineKind::Relational);
    }

    #[test]
    fn test_into_variant_rejects_other_kind() {
        let grid: StorageAddress = GridAddress::new("t", "ns").into();
        assert_eq!(grid.clone().into_grid().unwrap(), GridAddress::new("t", "ns"));
        match grid.into_filesystem() {
            Err(TableError::EngineMismatch {
                expected: EngineKind::Filesystem,
                actual: EngineKind::Grid,
            }) => {}
            other => panic!("expected EngineMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_password_is_redacted() {
        let addr: StorageAddress = relational().into();
        let debug = format!("{addr:?}");
        let display = addr.to_string();
        assert!(!debug.contains("s3cret"));
        assert!(!display.contains("s3cret"));
        assert_eq!(display, "relational://etl@db.local:3306/warehouse.events");
    }

    #[test]
    fn test_serde_tagged_by_engine() {
        let addr: StorageAddress = GridAddress::new("t", "ns").into();
        let json = serde_json::to_value(&addr).unwrap();
        assert_eq!(json["engine"], "grid");
        let back: StorageAddress = serde_json::from_value(json).unwrap();
        assert_eq!(back, addr);
    }
}
