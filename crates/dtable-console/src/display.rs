use dtable_core::types::{MetaKind, Record, TableId};
use serde_json::{Value, json};

use crate::executor::{CommandResult, TableDescription};

/// Output mode for rendering command results.
pub enum OutputMode {
    /// Human-readable pretty-printed output.
    Pretty,
    /// Machine-parseable JSON (one JSON object per result on stdout).
    Json,
}

impl OutputMode {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Pretty
        }
    }
}

/// Render a command result to stdout in the given mode.
///
/// Returns `true` to continue execution, `false` to signal exit.
pub fn render(result: &CommandResult, mode: &OutputMode) -> bool {
    match result {
        CommandResult::Ok(msg) => match mode {
            OutputMode::Pretty => println!("{msg}"),
            OutputMode::Json => println!("{}", json!({"ok": true, "message": msg})),
        },
        CommandResult::TableList(tables) => match mode {
            OutputMode::Pretty => print_table_list(tables),
            OutputMode::Json => {
                let names: Vec<String> = tables.iter().map(ToString::to_string).collect();
                println!("{}", json!({"tables": names}));
            }
        },
        CommandResult::Description(desc) => match mode {
            OutputMode::Pretty => print_description(desc),
            OutputMode::Json => println!("{}", description_json(desc)),
        },
        CommandResult::Records { records, truncated } => match mode {
            OutputMode::Pretty => print_records(records, *truncated),
            OutputMode::Json => {
                let items: Vec<Value> = records
                    .iter()
                    .map(|(k, v)| json!({"key": k, "value": v}))
                    .collect();
                println!(
                    "{}",
                    json!({"records": items, "count": items.len(), "has_more": truncated})
                );
            }
        },
        CommandResult::Count(n) => match mode {
            OutputMode::Pretty => println!("{n}"),
            OutputMode::Json => println!("{}", json!({"count": n})),
        },
        CommandResult::Metadata { kind, value } => match mode {
            OutputMode::Pretty => print_value(value),
            OutputMode::Json => {
                println!("{}", json!({"kind": kind_name(*kind), "value": value}))
            }
        },
        CommandResult::Help(topic) => match mode {
            OutputMode::Pretty => render_help_pretty(topic.as_deref()),
            OutputMode::Json => render_help_json(topic.as_deref()),
        },
        CommandResult::Exit => return false,
    }
    true
}

/// Render an error in the given mode (always to stderr).
pub fn render_error(err: &dyn std::fmt::Display, mode: &OutputMode) {
    match mode {
        OutputMode::Pretty => print_error(err),
        OutputMode::Json => eprintln!("{}", json!({"error": err.to_string()})),
    }
}

/// Print an error message to stderr.
pub fn print_error(err: &dyn std::fmt::Display) {
    eprintln!("Error: {err}");
}

fn kind_name(kind: MetaKind) -> &'static str {
    match kind {
        MetaKind::Schema => "schema",
        MetaKind::Data => "data",
        MetaKind::Count => "count",
    }
}

fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Error formatting value: {e}"),
    }
}

fn print_table_list(tables: &[TableId]) {
    if tables.is_empty() {
        println!("No tables.");
    } else {
        for id in tables {
            println!("{id}");
        }
    }
}

fn print_records(records: &[Record], truncated: bool) {
    for (key, value) in records {
        println!("{key} => {value}");
    }
    println!("Returned {} record(s).", records.len());
    if truncated {
        println!("(more records available)");
    }
}

fn print_description(desc: &TableDescription) {
    let m = &desc.manifest;
    println!("Table: {}.{}", m.namespace, m.name);
    println!("  Engine:     filesystem");
    println!("  Address:    {}", desc.address);
    println!("  Partitions: {}", m.partitions);
    println!("  Persistent: {}", m.persistent);
    println!("  Records:    {}", desc.count);
    match &desc.entry {
        Some(entry) => {
            println!("  Catalog:");
            println!("    Count:   {}", entry.count);
            println!("    Samples: {}", entry.sample_of_data.len());
            if entry.schema.is_empty() {
                println!("    Schema:  (empty)");
            } else {
                println!("    Schema:");
                for (k, v) in &entry.schema {
                    println!("      {k}: {v}");
                }
            }
        }
        None => println!("  Catalog:    (no entry)"),
    }
}

fn description_json(desc: &TableDescription) -> Value {
    let m = &desc.manifest;
    let catalog = desc.entry.as_ref().map(|entry| {
        json!({
            "schema": entry.schema,
            "samples": entry.sample_of_data.len(),
            "count": entry.count,
            "updated_at": entry.updated_at,
        })
    });
    json!({
        "name": m.name,
        "namespace": m.namespace,
        "engine": "filesystem",
        "address": desc.address,
        "partitions": m.partitions,
        "persistent": m.persistent,
        "created_at": m.created_at,
        "records": desc.count,
        "catalog": catalog,
    })
}

// ---------------------------------------------------------------------------
// Structured per-command help
// ---------------------------------------------------------------------------

struct CommandHelp {
    name: &'static str,
    summary: &'static str,
    syntax: &'static str,
    details: &'static str,
    examples: &'static [&'static str],
}

const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        name: "CREATE TABLE",
        summary: "Create a persistent table",
        syntax: "CREATE TABLE <namespace>.<name> [PARTITIONS n]",
        details: "\
Creates the table directory and an empty catalog entry. \
The partition count defaults to 16 and cannot change afterwards; \
use SAVE ... PARTITIONS n to repartition into a new table.",
        examples: &[
            "CREATE TABLE staging.events",
            "CREATE TABLE staging.events PARTITIONS 4",
        ],
    },
    CommandHelp {
        name: "LIST TABLES",
        summary: "Show catalogued tables",
        syntax: "LIST TABLES [namespace]",
        details: "Prints one `namespace.name` per line, or \"No tables.\" if none exist.",
        examples: &["LIST TABLES", "LIST TABLES prod"],
    },
    CommandHelp {
        name: "DESCRIBE",
        summary: "Show a table's layout and catalog entry",
        syntax: "DESCRIBE <namespace>.<name>",
        details: "Displays partitions, address, live record count and the catalog schema.",
        examples: &["DESCRIBE staging.events"],
    },
    CommandHelp {
        name: "PUT",
        summary: "Insert or replace one record",
        syntax: "PUT <namespace>.<name> <key> <value>",
        details: "\
Key and value are JSON. A bare word that is not valid JSON is taken as a string. \
Writing an existing key replaces its value.",
        examples: &[
            "PUT staging.events \"k1\" {\"user\": \"alice\", \"n\": 3}",
            "PUT staging.events k2 42",
        ],
    },
    CommandHelp {
        name: "SCAN",
        summary: "Read records from a table",
        syntax: "SCAN <namespace>.<name> [LIMIT n]",
        details: "Records come back grouped by partition; order across partitions is unspecified.",
        examples: &["SCAN staging.events", "SCAN staging.events LIMIT 10"],
    },
    CommandHelp {
        name: "COUNT",
        summary: "Count live records",
        syntax: "COUNT <namespace>.<name>",
        details: "Reads segment headers only. This is the live count, not the catalog count.",
        examples: &["COUNT staging.events"],
    },
    CommandHelp {
        name: "SCHEMA",
        summary: "Show part of a table's catalog entry",
        syntax: "SCHEMA <namespace>.<name> [SCHEMA|DATA|COUNT]",
        details: "\
SCHEMA (default) shows the metadata mapping, DATA the sample records \
and COUNT the bookkeeping count. A missing entry shows {}.",
        examples: &["SCHEMA staging.events", "SCHEMA staging.events DATA"],
    },
    CommandHelp {
        name: "ANNOTATE",
        summary: "Merge keys into a table's schema metadata",
        syntax: "ANNOTATE <namespace>.<name> <json-object>",
        details: "New keys are added and existing keys are overwritten. Other keys are kept.",
        examples: &["ANNOTATE staging.events {\"header\": \"id,user,n\"}"],
    },
    CommandHelp {
        name: "SAVE",
        summary: "Copy a table into a new persistent table",
        syntax: "SAVE <namespace>.<src> AS <namespace>.<dst> [PARTITIONS n] [OVERWRITE]",
        details: "\
The destination receives every record plus the source's schema and samples. \
Fails if the destination exists unless OVERWRITE is given.",
        examples: &[
            "SAVE staging.events AS prod.events",
            "SAVE staging.events AS prod.events PARTITIONS 32 OVERWRITE",
        ],
    },
    CommandHelp {
        name: "DESTROY",
        summary: "Delete a table and its catalog entry",
        syntax: "DESTROY <namespace>.<name>",
        details: "Destroying a table that does not exist is not an error.",
        examples: &["DESTROY staging.events"],
    },
    CommandHelp {
        name: "HELP",
        summary: "Show the command overview or help for one command",
        syntax: "HELP [command]",
        details: "",
        examples: &["HELP", "HELP SAVE"],
    },
    CommandHelp {
        name: "EXIT",
        summary: "Exit the console",
        syntax: "EXIT | QUIT",
        details: "",
        examples: &[],
    },
];

fn find_command(topic: &str) -> Option<&'static CommandHelp> {
    let topic = topic.trim().to_lowercase();
    COMMANDS.iter().find(|cmd| {
        let name = cmd.name.to_lowercase();
        name == topic || (topic == "quit" && cmd.name == "EXIT")
    })
}

fn render_help_pretty(topic: Option<&str>) {
    match topic {
        None => print_help_overview(),
        Some(t) => match find_command(t) {
            Some(cmd) => print_command_help(cmd),
            None => {
                println!("Unknown help topic '{t}'. Type HELP to see available commands.");
            }
        },
    }
}

fn print_help_overview() {
    println!("dtable console: command reference");
    println!();
    for cmd in COMMANDS {
        println!("  {:<14} {}", cmd.name, cmd.summary);
    }
    println!();
    println!("Type HELP <command> for detailed usage and examples.");
}

fn print_command_help(cmd: &CommandHelp) {
    println!("{}: {}", cmd.name, cmd.summary);
    println!();
    println!("Syntax:");
    println!("  {}", cmd.syntax);
    if !cmd.details.is_empty() {
        println!();
        println!("{}", cmd.details);
    }
    if !cmd.examples.is_empty() {
        println!();
        println!("Examples:");
        for ex in cmd.examples {
            println!("  {ex}");
        }
    }
}

fn render_help_json(topic: Option<&str>) {
    match topic {
        None => {
            let commands: Vec<Value> = COMMANDS
                .iter()
                .map(|cmd| json!({"name": cmd.name, "summary": cmd.summary}))
                .collect();
            println!("{}", json!({ "commands": commands }));
        }
        Some(t) => match find_command(t) {
            Some(cmd) => println!(
                "{}",
                json!({
                    "command": cmd.name,
                    "summary": cmd.summary,
                    "syntax": cmd.syntax,
                    "details": cmd.details,
                    "examples": cmd.examples,
                })
            ),
            None => eprintln!("{}", json!({"error": format!("Unknown help topic '{t}'")})),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtable_core::backend::filesystem::Manifest;

    #[test]
    fn test_find_command_case_insensitive() {
        assert_eq!(find_command("create table").unwrap().name, "CREATE TABLE");
        assert_eq!(find_command("  SAVE ").unwrap().name, "SAVE");
        assert_eq!(find_command("quit").unwrap().name, "EXIT");
        assert!(find_command("drop table").is_none());
    }

    #[test]
    fn test_every_command_has_syntax() {
        for cmd in COMMANDS {
            assert!(!cmd.syntax.is_empty(), "{} has no syntax", cmd.name);
        }
    }

    #[test]
    fn test_exit_stops_rendering() {
        assert!(!render(&CommandResult::Exit, &OutputMode::Json));
        assert!(render(&CommandResult::Count(3), &OutputMode::Json));
    }

    #[test]
    fn test_description_json_shape() {
        let desc = TableDescription {
            manifest: Manifest {
                version: 1,
                name: "t".to_string(),
                namespace: "ns".to_string(),
                partitions: 4,
                persistent: true,
                created_at: 1,
            },
            address: "file:///data/ns/t".to_string(),
            count: 7,
            entry: None,
        };
        let v = description_json(&desc);
        assert_eq!(v["partitions"], 4);
        assert_eq!(v["records"], 7);
        assert_eq!(v["catalog"], Value::Null);
    }
}
