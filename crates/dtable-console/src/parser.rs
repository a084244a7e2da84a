use dtable_core::types::{MetaKind, TableId};
use serde_json::Value;

use crate::commands::Command;

/// Split an input line into tokens.
///
/// Whitespace separates words. A `{...}` or `[...]` body is one token
/// (nesting and string literals inside are tracked), and so is a `"..."`
/// string including its quotes.
fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        match c {
            '{' => i = scan_balanced(&chars, i, '{', '}', "Unterminated JSON object")?,
            '[' => i = scan_balanced(&chars, i, '[', ']', "Unterminated JSON array")?,
            '"' => i = scan_string(&chars, i)?,
            _ => {
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '"' | '{' | '[')
                {
                    i += 1;
                }
            }
        }
        tokens.push(chars[start..i].iter().collect());
    }

    Ok(tokens)
}

/// Index just past the bracket closing the one at `start`.
fn scan_balanced(
    chars: &[char],
    start: usize,
    open: char,
    close: char,
    unterminated: &str,
) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if c == '\\' {
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i + 1);
            }
        }
        i += 1;
    }
    Err(unterminated.to_string())
}

/// Index just past the quote closing the string that opens at `start`.
fn scan_string(chars: &[char], start: usize) -> Result<usize, String> {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err("Unterminated quoted string".to_string())
}

/// Parse a key or value token. Anything that is not valid JSON is taken as a
/// bare string.
fn parse_value(token: &str) -> Value {
    serde_json::from_str(token).unwrap_or_else(|_| Value::String(token.to_string()))
}

/// Empty, `.` or `..`: never a table name.
fn is_dots(name: &str) -> bool {
    name.chars().all(|c| c == '.') && name.len() <= 2
}

/// Parse a `namespace.name` table reference.
fn parse_table_ref(token: &str) -> Result<TableId, String> {
    match token.split_once('.') {
        Some((namespace, name)) if !namespace.is_empty() && !is_dots(name) => {
            Ok(TableId::new(name, namespace))
        }
        _ => Err(format!(
            "Invalid table reference '{token}'. Expected <namespace>.<name>"
        )),
    }
}

fn parse_count_arg(keyword: &str, token: Option<&String>) -> Result<usize, String> {
    let token = token.ok_or_else(|| format!("{keyword} requires a number"))?;
    token
        .parse::<usize>()
        .map_err(|_| format!("Invalid {keyword} value '{token}'"))
}

/// Parse one command line.
pub fn parse(input: &str) -> Result<Command, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty command".to_string());
    }

    match tokens[0].to_uppercase().as_str() {
        "CREATE" => parse_create_table(&tokens),
        "LIST" => parse_list_tables(&tokens),
        "DESCRIBE" => Ok(Command::Describe {
            table: single_table(&tokens, "DESCRIBE <namespace>.<name>")?,
        }),
        "PUT" => parse_put(&tokens),
        "SCAN" => parse_scan(&tokens),
        "COUNT" => Ok(Command::Count {
            table: single_table(&tokens, "COUNT <namespace>.<name>")?,
        }),
        "SCHEMA" => parse_schema(&tokens),
        "ANNOTATE" => parse_annotate(&tokens),
        "SAVE" => parse_save(&tokens),
        "DESTROY" => Ok(Command::Destroy {
            table: single_table(&tokens, "DESTROY <namespace>.<name>")?,
        }),
        "HELP" => {
            let topic = if tokens.len() > 1 {
                Some(tokens[1..].join(" ").to_lowercase())
            } else {
                None
            };
            Ok(Command::Help(topic))
        }
        "EXIT" | "QUIT" => Ok(Command::Exit),
        other => Err(format!(
            "Unknown command '{other}'. Type HELP for available commands."
        )),
    }
}

fn single_table(tokens: &[String], usage: &str) -> Result<TableId, String> {
    if tokens.len() != 2 {
        return Err(format!("Usage: {usage}"));
    }
    parse_table_ref(&tokens[1])
}

fn parse_create_table(tokens: &[String]) -> Result<Command, String> {
    const USAGE: &str = "Usage: CREATE TABLE <namespace>.<name> [PARTITIONS n]";
    if tokens.len() < 3 || tokens[1].to_uppercase() != "TABLE" {
        return Err(USAGE.to_string());
    }
    let table = parse_table_ref(&tokens[2])?;
    let partitions = match tokens.get(3) {
        None => None,
        Some(t) if t.to_uppercase() == "PARTITIONS" => {
            if tokens.len() > 5 {
                return Err(format!("Unexpected token '{}' in CREATE TABLE", tokens[5]));
            }
            Some(parse_count_arg("PARTITIONS", tokens.get(4))?)
        }
        Some(t) => return Err(format!("Unexpected token '{t}' in CREATE TABLE")),
    };
    Ok(Command::CreateTable { table, partitions })
}

fn parse_list_tables(tokens: &[String]) -> Result<Command, String> {
    if tokens.len() < 2 || tokens[1].to_uppercase() != "TABLES" || tokens.len() > 3 {
        return Err("Usage: LIST TABLES [namespace]".to_string());
    }
    Ok(Command::ListTables {
        namespace: tokens.get(2).cloned(),
    })
}

fn parse_put(tokens: &[String]) -> Result<Command, String> {
    if tokens.len() != 4 {
        return Err("Usage: PUT <namespace>.<name> <key-json> <value-json>".to_string());
    }
    Ok(Command::Put {
        table: parse_table_ref(&tokens[1])?,
        key: parse_value(&tokens[2]),
        value: parse_value(&tokens[3]),
    })
}

fn parse_scan(tokens: &[String]) -> Result<Command, String> {
    if tokens.len() < 2 {
        return Err("Usage: SCAN <namespace>.<name> [LIMIT n]".to_string());
    }
    let table = parse_table_ref(&tokens[1])?;
    let limit = match tokens.get(2) {
        None => None,
        Some(t) if t.to_uppercase() == "LIMIT" => {
            if tokens.len() > 4 {
                return Err(format!("Unexpected token '{}' in SCAN", tokens[4]));
            }
            Some(parse_count_arg("LIMIT", tokens.get(3))?)
        }
        Some(t) => return Err(format!("Unexpected token '{t}' in SCAN")),
    };
    Ok(Command::Scan { table, limit })
}

fn parse_schema(tokens: &[String]) -> Result<Command, String> {
    if tokens.len() < 2 || tokens.len() > 3 {
        return Err("Usage: SCHEMA <namespace>.<name> [SCHEMA|DATA|COUNT]".to_string());
    }
    let table = parse_table_ref(&tokens[1])?;
    let kind = match tokens.get(2) {
        Some(t) => t.parse::<MetaKind>()?,
        None => MetaKind::default(),
    };
    Ok(Command::Schema { table, kind })
}

fn parse_annotate(tokens: &[String]) -> Result<Command, String> {
    if tokens.len() != 3 {
        return Err("Usage: ANNOTATE <namespace>.<name> <json-object>".to_string());
    }
    let table = parse_table_ref(&tokens[1])?;
    match serde_json::from_str::<Value>(&tokens[2]) {
        Ok(Value::Object(fields)) => Ok(Command::Annotate { table, fields }),
        Ok(_) => Err("ANNOTATE expects a JSON object".to_string()),
        Err(e) => Err(format!("Invalid JSON: {e}")),
    }
}

fn parse_save(tokens: &[String]) -> Result<Command, String> {
    const USAGE: &str =
        "Usage: SAVE <namespace>.<src> AS <namespace>.<dst> [PARTITIONS n] [OVERWRITE]";
    if tokens.len() < 4 || tokens[2].to_uppercase() != "AS" {
        return Err(USAGE.to_string());
    }
    let source = parse_table_ref(&tokens[1])?;
    let dest = parse_table_ref(&tokens[3])?;

    let mut partitions = None;
    let mut overwrite = false;
    let mut i = 4;
    while i < tokens.len() {
        match tokens[i].to_uppercase().as_str() {
            "PARTITIONS" => {
                partitions = Some(parse_count_arg("PARTITIONS", tokens.get(i + 1))?);
                i += 2;
            }
            "OVERWRITE" => {
                overwrite = true;
                i += 1;
            }
            _ => return Err(format!("Unexpected token '{}' in SAVE", tokens[i])),
        }
    }
    Ok(Command::SaveAs {
        source,
        dest,
        partitions,
        overwrite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(ns: &str, name: &str) -> TableId {
        TableId::new(name, ns)
    }

    #[test]
    fn test_tokenize_json_bodies() {
        let tokens = tokenize(r#"PUT ns.t "a b" {"x": {"y": "}"}} [1, [2]]"#).unwrap();
        assert_eq!(
            tokens,
            vec!["PUT", "ns.t", "\"a b\"", r#"{"x": {"y": "}"}}"#, "[1, [2]]"]
        );
    }

    #[test]
    fn test_tokenize_unterminated() {
        assert!(tokenize(r#"PUT ns.t {"x": 1"#).is_err());
        assert!(tokenize(r#"PUT ns.t "abc"#).is_err());
        assert!(tokenize("PUT ns.t [1, 2").is_err());
    }

    #[test]
    fn test_create_table() {
        assert_eq!(
            parse("CREATE TABLE staging.events").unwrap(),
            Command::CreateTable {
                table: id("staging", "events"),
                partitions: None,
            }
        );
        assert_eq!(
            parse("create table staging.events partitions 8").unwrap(),
            Command::CreateTable {
                table: id("staging", "events"),
                partitions: Some(8),
            }
        );
    }

    #[test]
    fn test_create_table_errors() {
        assert!(parse("CREATE TABLE events").is_err());
        assert!(parse("CREATE TABLE ns.events PARTITIONS").is_err());
        assert!(parse("CREATE TABLE ns.events PARTITIONS x").is_err());
        assert!(parse("CREATE TABLE ns.events SHARDS 3").is_err());
        assert!(parse("CREATE INDEX ns.events").is_err());
    }

    #[test]
    fn test_table_ref_splits_on_first_dot() {
        assert_eq!(parse_table_ref("ns.a.b").unwrap(), id("ns", "a.b"));
        assert!(parse_table_ref(".t").is_err());
        assert!(parse_table_ref("ns.").is_err());
        assert!(parse_table_ref("ns..").is_err());
        assert!(parse_table_ref("a...").is_err());
        assert_eq!(parse_table_ref("ns....").unwrap(), id("ns", "..."));
    }

    #[test]
    fn test_list_tables() {
        assert_eq!(
            parse("LIST TABLES").unwrap(),
            Command::ListTables { namespace: None }
        );
        assert_eq!(
            parse("list tables prod").unwrap(),
            Command::ListTables {
                namespace: Some("prod".to_string()),
            }
        );
        assert!(parse("LIST").is_err());
    }

    #[test]
    fn test_put_values() {
        assert_eq!(
            parse(r#"PUT ns.t "k1" {"v": 1}"#).unwrap(),
            Command::Put {
                table: id("ns", "t"),
                key: json!("k1"),
                value: json!({"v": 1}),
            }
        );
        // Bare words are strings, numbers stay numbers.
        assert_eq!(
            parse("PUT ns.t alice 42").unwrap(),
            Command::Put {
                table: id("ns", "t"),
                key: json!("alice"),
                value: json!(42),
            }
        );
        assert!(parse("PUT ns.t onlykey").is_err());
    }

    #[test]
    fn test_scan() {
        assert_eq!(
            parse("SCAN ns.t").unwrap(),
            Command::Scan {
                table: id("ns", "t"),
                limit: None,
            }
        );
        assert_eq!(
            parse("scan ns.t limit 5").unwrap(),
            Command::Scan {
                table: id("ns", "t"),
                limit: Some(5),
            }
        );
        assert!(parse("SCAN ns.t LIMIT").is_err());
        assert!(parse("SCAN ns.t TOP 5").is_err());
    }

    #[test]
    fn test_schema_kinds() {
        assert_eq!(
            parse("SCHEMA ns.t").unwrap(),
            Command::Schema {
                table: id("ns", "t"),
                kind: MetaKind::Schema,
            }
        );
        assert_eq!(
            parse("SCHEMA ns.t data").unwrap(),
            Command::Schema {
                table: id("ns", "t"),
                kind: MetaKind::Data,
            }
        );
        assert_eq!(
            parse("SCHEMA ns.t COUNT").unwrap(),
            Command::Schema {
                table: id("ns", "t"),
                kind: MetaKind::Count,
            }
        );
        assert!(parse("SCHEMA ns.t rows").is_err());
    }

    #[test]
    fn test_annotate_requires_object() {
        match parse(r#"ANNOTATE ns.t {"header": "id,v"}"#).unwrap() {
            Command::Annotate { table, fields } => {
                assert_eq!(table, id("ns", "t"));
                assert_eq!(fields["header"], json!("id,v"));
            }
            other => panic!("Expected Annotate, got {other:?}"),
        }
        assert!(parse("ANNOTATE ns.t [1]").is_err());
        assert!(parse("ANNOTATE ns.t").is_err());
    }

    #[test]
    fn test_save_as_options() {
        assert_eq!(
            parse("SAVE tmp.job AS prod.job").unwrap(),
            Command::SaveAs {
                source: id("tmp", "job"),
                dest: id("prod", "job"),
                partitions: None,
                overwrite: false,
            }
        );
        assert_eq!(
            parse("save tmp.job as prod.job overwrite partitions 4").unwrap(),
            Command::SaveAs {
                source: id("tmp", "job"),
                dest: id("prod", "job"),
                partitions: Some(4),
                overwrite: true,
            }
        );
        assert!(parse("SAVE tmp.job prod.job").is_err());
        assert!(parse("SAVE tmp.job AS prod.job FORCE").is_err());
    }

    #[test]
    fn test_single_table_commands() {
        assert_eq!(
            parse("DESCRIBE ns.t").unwrap(),
            Command::Describe { table: id("ns", "t") }
        );
        assert_eq!(
            parse("count ns.t").unwrap(),
            Command::Count { table: id("ns", "t") }
        );
        assert_eq!(
            parse("DESTROY ns.t").unwrap(),
            Command::Destroy { table: id("ns", "t") }
        );
        assert!(parse("DESTROY ns.t extra").is_err());
    }

    #[test]
    fn test_help_and_exit() {
        assert_eq!(parse("HELP").unwrap(), Command::Help(None));
        assert_eq!(
            parse("help Create Table").unwrap(),
            Command::Help(Some("create table".to_string()))
        );
        assert_eq!(parse("exit").unwrap(), Command::Exit);
        assert_eq!(parse("QUIT").unwrap(), Command::Exit);
    }

    #[test]
    fn test_unknown_and_empty() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("FROBNICATE ns.t").is_err());
    }
}
