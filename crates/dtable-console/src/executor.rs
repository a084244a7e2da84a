use std::path::Path;

use dtable_core::backend::filesystem::{FsStore, FsTable, Manifest};
use dtable_core::catalog::{Catalog, CatalogEntry};
use dtable_core::error::{Error, TableError};
use dtable_core::table::{CollectOptions, PutOptions, SaveAsOptions, SchemaUpdate, Table};
use dtable_core::types::{MetaKind, Record, TableId};
use serde_json::{Map, Value};
use tracing::debug;

use crate::commands::Command;

/// Catalog file name inside the console root.
const CATALOG_FILE: &str = "catalog.json";
/// Data directory inside the console root.
const DATA_DIR: &str = "data";

/// Structured result from executing a command.
pub enum CommandResult {
    /// Mutation succeeded (CREATE TABLE, PUT, ANNOTATE, SAVE, DESTROY).
    Ok(String),
    /// Table ids (LIST TABLES).
    TableList(Vec<TableId>),
    /// Table layout and catalog entry (DESCRIBE).
    Description(Box<TableDescription>),
    /// Records read by SCAN; `truncated` if LIMIT cut the scan short.
    Records {
        records: Vec<Record>,
        truncated: bool,
    },
    /// Live record count (COUNT).
    Count(u64),
    /// One part of a catalog entry (SCHEMA).
    Metadata { kind: MetaKind, value: Value },
    /// Help text (optional topic for per-command help).
    Help(Option<String>),
    /// Exit signal.
    Exit,
}

pub struct TableDescription {
    pub manifest: Manifest,
    pub address: String,
    pub count: u64,
    pub entry: Option<CatalogEntry>,
}

/// Filesystem store and file catalog rooted at one directory.
pub struct Workspace {
    store: FsStore,
}

impl Workspace {
    /// Open `<root>/catalog.json` and `<root>/data`, creating both on demand.
    pub fn open(root: &Path) -> Result<Self, Error> {
        let catalog = Catalog::open_file(root.join(CATALOG_FILE))?;
        let store = FsStore::open(root.join(DATA_DIR), catalog)?;
        Ok(Self { store })
    }

    fn catalog(&self) -> &Catalog {
        self.store.catalog()
    }

    /// Open an existing table without provisioning its catalog entry.
    fn open_table(&self, id: &TableId) -> Result<FsTable, Error> {
        if !self.store.exists(id) {
            return Err(TableError::NotFound(id.clone()).into());
        }
        self.store
            .table(&id.name, &id.namespace)
            .register(false)
            .execute()
    }
}

/// Execute a parsed command against the workspace.
pub fn execute(workspace: &Workspace, cmd: Command) -> Result<CommandResult, Error> {
    debug!(?cmd, "executing console command");
    match cmd {
        Command::CreateTable { table, partitions } => {
            exec_create_table(workspace, &table, partitions)
        }
        Command::ListTables { namespace } => {
            let tables = workspace.catalog().list(namespace.as_deref())?;
            Ok(CommandResult::TableList(tables))
        }
        Command::Describe { table } => exec_describe(workspace, &table),
        Command::Put { table, key, value } => exec_put(workspace, &table, key, value),
        Command::Scan { table, limit } => exec_scan(workspace, &table, limit),
        Command::Count { table } => {
            let count = workspace.open_table(&table)?.count()?;
            Ok(CommandResult::Count(count))
        }
        Command::Schema { table, kind } => {
            let value = workspace.open_table(&table)?.get_schema(kind);
            Ok(CommandResult::Metadata { kind, value })
        }
        Command::Annotate { table, fields } => exec_annotate(workspace, &table, fields),
        Command::SaveAs {
            source,
            dest,
            partitions,
            overwrite,
        } => exec_save_as(workspace, &source, &dest, partitions, overwrite),
        Command::Destroy { table } => exec_destroy(workspace, &table),
        Command::Help(topic) => Ok(CommandResult::Help(topic)),
        Command::Exit => Ok(CommandResult::Exit),
    }
}

fn exec_create_table(
    workspace: &Workspace,
    id: &TableId,
    partitions: Option<usize>,
) -> Result<CommandResult, Error> {
    if workspace.store.exists(id) {
        return Err(TableError::NameConflict(id.clone()).into());
    }
    let mut builder = workspace
        .store
        .table(&id.name, &id.namespace)
        .persistent(true);
    if let Some(n) = partitions {
        builder = builder.partitions(n);
    }
    let table = builder.execute()?;
    Ok(CommandResult::Ok(format!(
        "Table '{id}' created with {} partition(s).",
        table.get_partitions()
    )))
}

fn exec_describe(workspace: &Workspace, id: &TableId) -> Result<CommandResult, Error> {
    let table = workspace.open_table(id)?;
    Ok(CommandResult::Description(Box::new(TableDescription {
        manifest: table.manifest()?,
        address: table.get_address().to_string(),
        count: table.count()?,
        entry: workspace.catalog().entry(id)?,
    })))
}

fn exec_put(
    workspace: &Workspace,
    id: &TableId,
    key: Value,
    value: Value,
) -> Result<CommandResult, Error> {
    let table = workspace.open_table(id)?;
    table.put_all(&mut std::iter::once((key, value)), &PutOptions::default())?;
    Ok(CommandResult::Ok("OK".to_string()))
}

fn exec_scan(
    workspace: &Workspace,
    id: &TableId,
    limit: Option<usize>,
) -> Result<CommandResult, Error> {
    let table = workspace.open_table(id)?;
    let mut records = Vec::new();
    let mut truncated = false;
    for record in table.collect(&CollectOptions::default())?.records() {
        if limit.is_some_and(|n| records.len() >= n) {
            truncated = true;
            break;
        }
        records.push(record?);
    }
    Ok(CommandResult::Records { records, truncated })
}

fn exec_annotate(
    workspace: &Workspace,
    id: &TableId,
    fields: Map<String, Value>,
) -> Result<CommandResult, Error> {
    let table = workspace.open_table(id)?;
    let n = fields.len();
    table.save_schema(SchemaUpdate::new().schema(fields))?;
    Ok(CommandResult::Ok(format!("Merged {n} schema field(s) into '{id}'.")))
}

fn exec_save_as(
    workspace: &Workspace,
    source: &TableId,
    dest: &TableId,
    partitions: Option<usize>,
    overwrite: bool,
) -> Result<CommandResult, Error> {
    let table = workspace.open_table(source)?;
    let saved = table.save_as(
        &dest.name,
        &dest.namespace,
        &SaveAsOptions {
            partitions,
            overwrite,
        },
    )?;
    let count = saved.count()?;
    saved.close()?;
    Ok(CommandResult::Ok(format!(
        "Saved '{source}' as '{dest}' ({count} record(s), {} partition(s)).",
        saved.get_partitions()
    )))
}

fn exec_destroy(workspace: &Workspace, id: &TableId) -> Result<CommandResult, Error> {
    if workspace.store.exists(id) {
        workspace.open_table(id)?.destroy()?;
    } else {
        workspace.catalog().remove(id);
    }
    Ok(CommandResult::Ok(format!("Table '{id}' destroyed.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;
    use tempfile::tempdir;

    fn run(workspace: &Workspace, line: &str) -> Result<CommandResult, Error> {
        execute(workspace, parse(line).unwrap())
    }

    fn setup() -> (tempfile::TempDir, Workspace) {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        (dir, workspace)
    }

    #[test]
    fn test_create_and_list() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE staging.events PARTITIONS 4").unwrap();
        run(&ws, "CREATE TABLE prod.events").unwrap();

        match run(&ws, "LIST TABLES").unwrap() {
            CommandResult::TableList(ids) => assert_eq!(ids.len(), 2),
            _ => panic!("Expected TableList"),
        }
        match run(&ws, "LIST TABLES staging").unwrap() {
            CommandResult::TableList(ids) => {
                assert_eq!(ids, vec![TableId::new("events", "staging")])
            }
            _ => panic!("Expected TableList"),
        }
    }

    #[test]
    fn test_create_existing_conflicts() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE ns.t").unwrap();
        assert!(matches!(
            run(&ws, "CREATE TABLE ns.t"),
            Err(Error::Table(TableError::NameConflict(_)))
        ));
    }

    #[test]
    fn test_missing_table_is_not_found() {
        let (_dir, ws) = setup();
        assert!(matches!(
            run(&ws, "COUNT ns.ghost"),
            Err(Error::Table(TableError::NotFound(_)))
        ));
        // Must not leave a directory behind.
        assert!(!ws.store.exists(&TableId::new("ghost", "ns")));
    }

    #[test]
    fn test_destroy_parent_reference_leaves_tables_alone() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE prod.victim").unwrap();
        run(&ws, r#"PUT prod.victim "k" 1"#).unwrap();

        for name in ["..", ".", ""] {
            let table = TableId::new(name, "prod");
            execute(&ws, Command::Destroy { table }).unwrap();
        }
        assert!(matches!(
            execute(
                &ws,
                Command::CreateTable {
                    table: TableId::new("..", "prod"),
                    partitions: None,
                }
            ),
            Err(Error::Table(TableError::InvalidName { .. }))
        ));
        match run(&ws, "COUNT prod.victim").unwrap() {
            CommandResult::Count(n) => assert_eq!(n, 1),
            _ => panic!("Expected Count"),
        }
    }

    #[test]
    fn test_put_scan_count() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE ns.t PARTITIONS 2").unwrap();
        for i in 0..5 {
            run(&ws, &format!(r#"PUT ns.t "k{i}" {{"v": {i}}}"#)).unwrap();
        }
        match run(&ws, "COUNT ns.t").unwrap() {
            CommandResult::Count(n) => assert_eq!(n, 5),
            _ => panic!("Expected Count"),
        }
        match run(&ws, "SCAN ns.t").unwrap() {
            CommandResult::Records { records, truncated } => {
                assert_eq!(records.len(), 5);
                assert!(!truncated);
            }
            _ => panic!("Expected Records"),
        }
        match run(&ws, "SCAN ns.t LIMIT 2").unwrap() {
            CommandResult::Records { records, truncated } => {
                assert_eq!(records.len(), 2);
                assert!(truncated);
            }
            _ => panic!("Expected Records"),
        }
    }

    #[test]
    fn test_annotate_and_schema() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE ns.t").unwrap();
        run(&ws, r#"ANNOTATE ns.t {"header": "id,v"}"#).unwrap();
        run(&ws, r#"ANNOTATE ns.t {"sid": "id"}"#).unwrap();
        match run(&ws, "SCHEMA ns.t").unwrap() {
            CommandResult::Metadata { kind, value } => {
                assert_eq!(kind, MetaKind::Schema);
                assert_eq!(value, json!({"header": "id,v", "sid": "id"}));
            }
            _ => panic!("Expected Metadata"),
        }
    }

    #[test]
    fn test_save_as_and_describe() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE tmp.job PARTITIONS 2").unwrap();
        run(&ws, "PUT tmp.job a 1").unwrap();
        run(&ws, "PUT tmp.job b 2").unwrap();
        run(&ws, "SAVE tmp.job AS prod.job PARTITIONS 3").unwrap();
        assert!(run(&ws, "SAVE tmp.job AS prod.job").is_err());
        run(&ws, "SAVE tmp.job AS prod.job OVERWRITE").unwrap();

        match run(&ws, "DESCRIBE prod.job").unwrap() {
            CommandResult::Description(desc) => {
                assert_eq!(desc.manifest.partitions, 2);
                assert!(desc.manifest.persistent);
                assert_eq!(desc.count, 2);
                assert_eq!(desc.entry.unwrap().count, 2);
                assert!(desc.address.starts_with("file://"));
            }
            _ => panic!("Expected Description"),
        }
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (_dir, ws) = setup();
        run(&ws, "CREATE TABLE ns.t").unwrap();
        run(&ws, "DESTROY ns.t").unwrap();
        run(&ws, "DESTROY ns.t").unwrap();
        match run(&ws, "LIST TABLES").unwrap() {
            CommandResult::TableList(ids) => assert!(ids.is_empty()),
            _ => panic!("Expected TableList"),
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let ws = Workspace::open(dir.path()).unwrap();
            run(&ws, "CREATE TABLE ns.t").unwrap();
            run(&ws, "PUT ns.t k v").unwrap();
        }
        let ws = Workspace::open(dir.path()).unwrap();
        match run(&ws, "COUNT ns.t").unwrap() {
            CommandResult::Count(n) => assert_eq!(n, 1),
            _ => panic!("Expected Count"),
        }
    }
}
