use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod executor;
mod parser;

use display::OutputMode;
use executor::Workspace;

/// dtable console: interactive and scriptable access to a dtable workspace.
#[derive(Parser, Debug)]
#[command(name = "dtable-console", version)]
struct Cli {
    /// Workspace root holding catalog.json and data/ (default: ~/.local/share/dtable).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Execute a command non-interactively (can be repeated).
    #[arg(short, long = "exec")]
    exec: Vec<String>,

    /// Output results as machine-parseable JSON.
    #[arg(short, long)]
    json: bool,
}

fn default_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dtable")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(default_root);

    let workspace = match Workspace::open(&root) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Cannot open workspace at {}: {e}", root.display());
            process::exit(1);
        }
    };

    if !cli.exec.is_empty() {
        let code = run_exec_mode(&workspace, &cli.exec, cli.json);
        process::exit(code);
    } else if !std::io::stdin().is_terminal() {
        let code = run_pipe_mode(&workspace, cli.json);
        process::exit(code);
    } else {
        run_repl(&workspace, &root);
    }
}

/// Parse and execute one line. `Ok(false)` means EXIT.
fn run_line(workspace: &Workspace, line: &str, mode: &OutputMode) -> Result<bool, ()> {
    let cmd = match parser::parse(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            display::render_error(&e, mode);
            return Err(());
        }
    };
    match executor::execute(workspace, cmd) {
        Ok(result) => Ok(display::render(&result, mode)),
        Err(e) => {
            display::render_error(&e, mode);
            Err(())
        }
    }
}

/// Execute one or more commands non-interactively (--exec mode).
///
/// Returns exit code: 0 = all succeeded, 1 = first error stops execution.
fn run_exec_mode(workspace: &Workspace, commands: &[String], json_mode: bool) -> i32 {
    let mode = OutputMode::from_flag(json_mode);
    for cmd_str in commands {
        match run_line(workspace, cmd_str, &mode) {
            Ok(true) => {}
            Ok(false) => return 0,
            Err(()) => return 1,
        }
    }
    0
}

/// Read commands from stdin (pipe mode).
///
/// Returns exit code: 0 = all succeeded, 1 = first error.
fn run_pipe_mode(workspace: &Workspace, json_mode: bool) -> i32 {
    let mode = OutputMode::from_flag(json_mode);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                display::render_error(&e, &mode);
                return 1;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        match run_line(workspace, trimmed, &mode) {
            Ok(true) => {}
            Ok(false) => return 0,
            Err(()) => return 1,
        }
    }
    0
}

/// Interactive REPL mode.
fn run_repl(workspace: &Workspace, root: &std::path::Path) {
    println!("dtable console v{}", env!("CARGO_PKG_VERSION"));
    println!("Workspace: {}", root.display());
    println!("Type HELP for available commands.\n");

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to initialize line editor: {e}");
            return;
        }
    };

    loop {
        match rl.readline("dtable> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                if let Ok(false) = run_line(workspace, trimmed, &OutputMode::Pretty) {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
            }
            Err(ReadlineError::Eof) => {
                println!("Bye!");
                break;
            }
            Err(e) => {
                eprintln!("Readline error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        (dir, workspace)
    }

    fn exec(workspace: &Workspace, commands: &[&str], json: bool) -> i32 {
        let commands: Vec<String> = commands.iter().map(|s| s.to_string()).collect();
        run_exec_mode(workspace, &commands, json)
    }

    // ---- Cli parsing tests ----

    #[test]
    fn test_cli_no_args() {
        let cli = Cli::try_parse_from(["bin"]).unwrap();
        assert!(cli.root.is_none());
        assert!(cli.exec.is_empty());
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_root() {
        let cli = Cli::try_parse_from(["bin", "--root", "/tmp/ws"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn test_cli_exec_multiple() {
        let cli = Cli::try_parse_from(["bin", "-e", "LIST TABLES", "--exec", "COUNT ns.t"]).unwrap();
        assert_eq!(cli.exec, vec!["LIST TABLES", "COUNT ns.t"]);
    }

    #[test]
    fn test_cli_json_short() {
        let cli = Cli::try_parse_from(["bin", "-j"]).unwrap();
        assert!(cli.json);
    }

    #[test]
    fn test_cli_exec_missing_value() {
        assert!(Cli::try_parse_from(["bin", "--exec"]).is_err());
    }

    #[test]
    fn test_cli_unknown_flag() {
        assert!(Cli::try_parse_from(["bin", "--verbose"]).is_err());
    }

    #[test]
    fn test_default_root_ends_with_dtable() {
        assert!(default_root().ends_with("dtable"));
    }

    // ---- exec mode tests ----

    #[test]
    fn test_exec_list_tables_empty() {
        let (_dir, ws) = setup();
        assert_eq!(exec(&ws, &["LIST TABLES"], false), 0);
        assert_eq!(exec(&ws, &["LIST TABLES"], true), 0);
    }

    #[test]
    fn test_exec_full_session() {
        let (_dir, ws) = setup();
        let code = exec(
            &ws,
            &[
                "CREATE TABLE tmp.job PARTITIONS 2",
                r#"PUT tmp.job "k1" {"v": 1}"#,
                r#"ANNOTATE tmp.job {"header": "k,v"}"#,
                "SAVE tmp.job AS prod.job",
                "SCAN prod.job LIMIT 1",
                "SCHEMA prod.job COUNT",
                "DESCRIBE prod.job",
                "DESTROY tmp.job",
            ],
            true,
        );
        assert_eq!(code, 0);
    }

    #[test]
    fn test_exec_error_stops_early() {
        let (_dir, ws) = setup();
        let code = exec(&ws, &["COUNT ns.missing", "CREATE TABLE ns.t"], false);
        assert_eq!(code, 1);
        assert_eq!(exec(&ws, &["COUNT ns.t"], false), 1);
    }

    #[test]
    fn test_exec_parse_error_returns_1() {
        let (_dir, ws) = setup();
        assert_eq!(exec(&ws, &["INVALID GIBBERISH"], false), 1);
    }

    #[test]
    fn test_exec_exit_skips_rest() {
        let (_dir, ws) = setup();
        assert_eq!(exec(&ws, &["EXIT", "COUNT ns.missing"], false), 0);
    }
}
