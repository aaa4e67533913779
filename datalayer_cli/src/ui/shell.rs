use std::io::{stdout, Write};

use datalayer_core::{Conflict, DataLayer, DataLayerError, InsertOptions};
use log::{debug, info};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  dbs                              list databases
  db-create DB | db-drop DB        create / drop a database
  tables DB                        list tables
  table-create DB T | table-drop DB T
  get DB T ID                      read a document (ID is JSON, bare words are strings)
  delete DB T ID                   delete a document
  insert DB T JSON [--conflict error|replace|update]
  help | quit";

/// One parsed shell line.
#[derive(Debug, PartialEq)]
pub enum ShellCommand {
    Dbs,
    DbCreate(String),
    DbDrop(String),
    Tables(String),
    TableCreate(String, String),
    TableDrop(String, String),
    Get(String, String, Value),
    Delete(String, String, Value),
    Insert(String, String, Value, InsertOptions),
    Help,
    Quit,
}

/// Parse one line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match verb {
        "dbs" => ShellCommand::Dbs,
        "db-create" => ShellCommand::DbCreate(one_arg(rest)?),
        "db-drop" => ShellCommand::DbDrop(one_arg(rest)?),
        "tables" => ShellCommand::Tables(one_arg(rest)?),
        "table-create" => {
            let (db, table) = two_args(rest)?;
            ShellCommand::TableCreate(db, table)
        }
        "table-drop" => {
            let (db, table) = two_args(rest)?;
            ShellCommand::TableDrop(db, table)
        }
        "get" | "delete" => {
            let (db, table, id) = three_args(rest)?;
            let id = parse_id(&id);
            if verb == "get" {
                ShellCommand::Get(db, table, id)
            } else {
                ShellCommand::Delete(db, table, id)
            }
        }
        "insert" => parse_insert(rest)?,
        "help" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

fn split_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim_start())),
        None => Some((input, "")),
    }
}

fn one_arg(rest: &str) -> Result<String, String> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [db] => Ok(db.to_string()),
        _ => Err("expected one argument: DB".into()),
    }
}

fn two_args(rest: &str) -> Result<(String, String), String> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [db, table] => Ok((db.to_string(), table.to_string())),
        _ => Err("expected two arguments: DB TABLE".into()),
    }
}

fn three_args(rest: &str) -> Result<(String, String, String), String> {
    match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
        [db, table, id] => Ok((db.to_string(), table.to_string(), id.to_string())),
        _ => Err("expected three arguments: DB TABLE ID".into()),
    }
}

/// `7` is a number, `"7"` and `seven` are strings.
fn parse_id(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(id @ (Value::Number(_) | Value::String(_))) => id,
        _ => Value::String(raw.to_string()),
    }
}

fn parse_insert(rest: &str) -> Result<ShellCommand, String> {
    let usage = || "expected: insert DB TABLE JSON [--conflict error|replace|update]".to_string();
    let (db, rest) = split_word(rest).ok_or_else(usage)?;
    let (table, rest) = split_word(rest).ok_or_else(usage)?;

    if rest.trim().is_empty() {
        return Err(usage());
    }
    // The document comes first; only what follows it may hold the flag.
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    let documents = match stream.next() {
        Some(Ok(documents)) => documents,
        Some(Err(e)) => return Err(format!("invalid JSON document: {e}")),
        None => return Err(usage()),
    };
    let trailing = rest[stream.byte_offset()..].trim();

    let conflict = match split_word(trailing) {
        None => Conflict::Error,
        Some(("--conflict", strategy)) => match strategy.trim() {
            "error" => Conflict::Error,
            "replace" => Conflict::Replace,
            "update" => Conflict::Update,
            other => return Err(format!("unknown conflict strategy '{other}'")),
        },
        Some(_) => return Err(format!("unexpected input after the document: '{trailing}'")),
    };

    Ok(ShellCommand::Insert(
        db.to_string(),
        table.to_string(),
        documents,
        InsertOptions::default().conflict(conflict),
    ))
}

async fn run_command(
    data_layer: &DataLayer,
    command: ShellCommand,
) -> Result<Value, DataLayerError> {
    match command {
        ShellCommand::Dbs => data_layer.db_list().await,
        ShellCommand::DbCreate(db) => data_layer.db_create(&db).await,
        ShellCommand::DbDrop(db) => data_layer.db_drop(&db).await,
        ShellCommand::Tables(db) => data_layer.table_list(&db).await,
        ShellCommand::TableCreate(db, table) => data_layer.table_create(&db, &table).await,
        ShellCommand::TableDrop(db, table) => data_layer.table_drop(&db, &table).await,
        ShellCommand::Get(db, table, id) => data_layer.get(&db, &table, id).await,
        ShellCommand::Delete(db, table, id) => data_layer.delete(&db, &table, id).await,
        ShellCommand::Insert(db, table, documents, options) => {
            data_layer.insert(&db, &table, documents, options).await
        }
        ShellCommand::Help | ShellCommand::Quit => Ok(Value::Null),
    }
}

fn prompt() {
    print!("datalayer> ");
    let _ = stdout().flush();
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(data_layer: &DataLayer) -> anyhow::Result<()> {
    info!("Shell ready. Type 'help' for commands, 'quit' to exit.");
    let mut lines = BufReader::new(io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ShellCommand::Quit)) => break,
            Ok(Some(ShellCommand::Help)) => println!("{HELP}"),
            Ok(Some(command)) => {
                debug!("Shell command: {:?}", command);
                match run_command(data_layer, command).await {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                    Err(e) => println!("error: {e}"),
                }
            }
            Err(message) => println!("error: {message}"),
        }
        prompt();
    }
    info!("Exiting...");
    Ok(())
}
