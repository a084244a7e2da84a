use dtable_core::types::{MetaKind, TableId};
use serde_json::{Map, Value};

/// A parsed console command.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateTable {
        table: TableId,
        partitions: Option<usize>,
    },
    ListTables {
        namespace: Option<String>,
    },
    Describe {
        table: TableId,
    },
    Put {
        table: TableId,
        key: Value,
        value: Value,
    },
    Scan {
        table: TableId,
        limit: Option<usize>,
    },
    Count {
        table: TableId,
    },
    Schema {
        table: TableId,
        kind: MetaKind,
    },
    Annotate {
        table: TableId,
        fields: Map<String, Value>,
    },
    SaveAs {
        source: TableId,
        dest: TableId,
        partitions: Option<usize>,
        overwrite: bool,
    },
    Destroy {
        table: TableId,
    },
    Help(Option<String>),
    Exit,
}
