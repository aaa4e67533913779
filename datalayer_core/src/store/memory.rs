//! An in-process document store implementing the driver seam.
//!
//! Databases hold tables, tables hold JSON documents keyed by their `id`
//! field. Everything lives behind one lock shared by every connection opened
//! from the same [`MemoryStore`], so two sessions over one store see each
//! other's writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::query::{Conflict, InsertOptions, Query};
use super::{ConnectionEvent, Pending, StoreClient, StoreConnection, StoreError};
use crate::core::options::ConnectOptions;

/// The database every new store starts with.
pub const DEFAULT_DB: &str = "test";

type Documents = BTreeMap<String, Value>;
type Tables = BTreeMap<String, Documents>;

struct Catalog {
    dbs: BTreeMap<String, Tables>,
}

impl Catalog {
    fn new() -> Self {
        let mut dbs = BTreeMap::new();
        dbs.insert(DEFAULT_DB.to_string(), Tables::new());
        Self { dbs }
    }

    fn database(&self, db: &str) -> Result<&Tables, StoreError> {
        self.dbs
            .get(db)
            .ok_or_else(|| StoreError::NotFound(format!("Database `{db}`")))
    }

    fn database_mut(&mut self, db: &str) -> Result<&mut Tables, StoreError> {
        self.dbs
            .get_mut(db)
            .ok_or_else(|| StoreError::NotFound(format!("Database `{db}`")))
    }

    fn table(&self, db: &str, table: &str) -> Result<&Documents, StoreError> {
        self.database(db)?
            .get(table)
            .ok_or_else(|| StoreError::NotFound(format!("Table `{db}.{table}`")))
    }

    fn table_mut(&mut self, db: &str, table: &str) -> Result<&mut Documents, StoreError> {
        self.database_mut(db)?
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(format!("Table `{db}.{table}`")))
    }

    fn evaluate(&mut self, query: Query) -> Result<Value, StoreError> {
        match query {
            Query::DbList => Ok(json!(self.dbs.keys().collect::<Vec<_>>())),
            Query::DbCreate { db } => {
                if self.dbs.contains_key(&db) {
                    return Err(StoreError::AlreadyExists(format!("Database `{db}`")));
                }
                self.dbs.insert(db, Tables::new());
                Ok(json!({ "dbs_created": 1 }))
            }
            Query::DbDrop { db } => {
                let tables = self
                    .dbs
                    .remove(&db)
                    .ok_or_else(|| StoreError::NotFound(format!("Database `{db}`")))?;
                Ok(json!({ "dbs_dropped": 1, "tables_dropped": tables.len() }))
            }
            Query::TableList { db } => Ok(json!(self.database(&db)?.keys().collect::<Vec<_>>())),
            Query::TableCreate { db, table } => {
                let tables = self.database_mut(&db)?;
                if tables.contains_key(&table) {
                    return Err(StoreError::AlreadyExists(format!("Table `{db}.{table}`")));
                }
                tables.insert(table, Documents::new());
                Ok(json!({ "tables_created": 1 }))
            }
            Query::TableDrop { db, table } => {
                self.database_mut(&db)?
                    .remove(&table)
                    .ok_or_else(|| StoreError::NotFound(format!("Table `{db}.{table}`")))?;
                Ok(json!({ "tables_dropped": 1 }))
            }
            Query::Get { db, table, id } => {
                let key = primary_key(&id)?;
                Ok(self
                    .table(&db, &table)?
                    .get(&key)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Query::Delete { db, table, id } => {
                let key = primary_key(&id)?;
                let mut summary = WriteSummary::default();
                match self.table_mut(&db, &table)?.remove(&key) {
                    Some(_) => summary.deleted += 1,
                    None => summary.skipped += 1,
                }
                summary.into_value()
            }
            Query::Insert {
                db,
                table,
                documents,
                options,
            } => insert_documents(self.table_mut(&db, &table)?, documents, &options).into_value(),
        }
    }
}

/// The result object of a write.
#[derive(Debug, Default, Serialize)]
struct WriteSummary {
    inserted: u64,
    replaced: u64,
    unchanged: u64,
    errors: u64,
    deleted: u64,
    skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    generated_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<Vec<Value>>,
}

impl WriteSummary {
    fn error(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(message.into());
        }
    }

    fn change(&mut self, old_val: Option<Value>, new_val: Value) {
        if let Some(changes) = self.changes.as_mut() {
            changes.push(json!({ "old_val": old_val, "new_val": new_val }));
        }
    }

    fn into_value(self) -> Result<Value, StoreError> {
        serde_json::to_value(self).map_err(|e| StoreError::Driver(e.to_string()))
    }
}

/// Documents are keyed by the JSON rendering of their `id`, so `1` and `"1"`
/// are different keys.
fn primary_key(id: &Value) -> Result<String, StoreError> {
    match id {
        Value::String(_) | Value::Number(_) => Ok(id.to_string()),
        other => Err(StoreError::InvalidQuery(format!(
            "Primary keys must be strings or numbers, found {other}"
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOL",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}

/// Recursive object merge; `patch` wins on every non-object field.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

fn insert_documents(
    docs: &mut Documents,
    documents: Value,
    options: &InsertOptions,
) -> WriteSummary {
    let mut summary = WriteSummary {
        changes: options.return_changes.then(Vec::new),
        ..WriteSummary::default()
    };
    let batch = match documents {
        Value::Array(items) => items,
        single => vec![single],
    };

    for document in batch {
        let mut fields: Map<String, Value> = match document {
            Value::Object(fields) => fields,
            other => {
                summary.error(format!("Expected type OBJECT but found {}", type_name(&other)));
                continue;
            }
        };
        let id = match fields.get("id") {
            Some(id) => id.clone(),
            None => {
                let generated = Uuid::new_v4().to_string();
                fields.insert("id".to_string(), Value::String(generated.clone()));
                summary.generated_keys.push(generated.clone());
                Value::String(generated)
            }
        };
        let key = match primary_key(&id) {
            Ok(key) => key,
            Err(e) => {
                summary.error(e.to_string());
                continue;
            }
        };
        let new_val = Value::Object(fields);

        let Some(old_val) = docs.get(&key).cloned() else {
            docs.insert(key, new_val.clone());
            summary.inserted += 1;
            summary.change(None, new_val);
            continue;
        };

        let replacement = match options.conflict {
            Conflict::Error => {
                summary.error("Duplicate primary key `id`");
                continue;
            }
            Conflict::Replace => new_val,
            Conflict::Update => {
                let mut merged = old_val.clone();
                merge(&mut merged, new_val);
                merged
            }
        };
        if replacement == old_val {
            summary.unchanged += 1;
        } else {
            docs.insert(key, replacement.clone());
            summary.replaced += 1;
            summary.change(Some(old_val), replacement);
        }
    }
    summary
}

fn check_name(kind: &str, name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!(
            "{kind} name `{name}` invalid (Use A-Z, a-z, 0-9, _ and - only)"
        )))
    }
}

/// A store client backed by process memory.
///
/// Cloning is cheap; clones share the catalog and the set of open connections.
#[derive(Clone)]
pub struct MemoryStore {
    catalog: Arc<Mutex<Catalog>>,
    available: Arc<AtomicBool>,
    connections: Arc<std::sync::Mutex<Vec<Weak<MemoryConnection>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(Mutex::new(Catalog::new())),
            available: Arc::new(AtomicBool::new(true)),
            connections: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Take the store offline (or bring it back).
    ///
    /// Going offline refuses new connections and closes every open one, which
    /// emits [`ConnectionEvent::Close`] to their subscribers.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            return;
        }
        info!("Memory store going offline.");
        let open: Vec<Arc<MemoryConnection>> = {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            connections.drain(..).filter_map(|c| c.upgrade()).collect()
        };
        for connection in open {
            connection.close();
        }
    }

    /// Open a connection, keeping the concrete type.
    pub fn open(&self, options: &ConnectOptions) -> Result<Arc<MemoryConnection>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} refused the connection",
                options.address()
            )));
        }
        if options.host.is_empty() {
            return Err(StoreError::Unavailable("no host given".into()));
        }

        let (events, _) = broadcast::channel(16);
        let connection = Arc::new(MemoryConnection {
            id: Uuid::new_v4().to_string(),
            catalog: self.catalog.clone(),
            closed: AtomicBool::new(false),
            events,
        });
        {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            connections.retain(|c| c.strong_count() > 0);
            connections.push(Arc::downgrade(&connection));
        }
        info!(
            "Memory connection '{}' opened for {}.",
            connection.id,
            options.address()
        );
        Ok(connection)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn StoreConnection>, StoreError> {
        let connection: Arc<dyn StoreConnection> = self.open(options)?;
        Ok(connection)
    }
}

pub struct MemoryConnection {
    id: String,
    catalog: Arc<Mutex<Catalog>>,
    closed: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MemoryConnection {
    /// Close the connection. Only the first call emits
    /// [`ConnectionEvent::Close`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Memory connection '{}' closed.", self.id);
            let _ = self.events.send(ConnectionEvent::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish `event` to subscribers; returns how many received it.
    pub fn emit(&self, event: ConnectionEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}

impl StoreConnection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch(&self, query: Query) -> Result<Pending, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        if let Some(db) = query.db() {
            check_name("Database", db)?;
        }
        if let Some(table) = query.table() {
            check_name("Table", table)?;
        }

        debug!("Memory connection '{}' running {}", self.id, query);
        let catalog = self.catalog.clone();
        Ok(Box::pin(async move {
            let mut catalog = catalog.lock().await;
            catalog.evaluate(query)
        }))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        Some(self.events.subscribe())
    }
}
