//! Query objects and the fluent builder that produces them.
//!
//! A [`Query`] is an inert description of one database operation. Nothing
//! touches the store until the query is handed to a connection with
//! [`Query::run`] (or, more commonly, `DataLayer::execute`).
//!
//! ```
//! use datalayer_core::{InsertOptions, QueryBuilder};
//! use serde_json::json;
//!
//! let r = QueryBuilder;
//! let query = r.db("blog").table("posts").insert(json!({"title": "hi"}), InsertOptions::default());
//! assert_eq!(query.to_string(), r#"r.db("blog").table("posts").insert({"title":"hi"})"#);
//! ```

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Pending, StoreConnection, StoreError};

/// How `insert` treats a document whose primary key already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conflict {
    #[default]
    Error,
    Replace,
    Update,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertOptions {
    pub conflict: Conflict,
    pub return_changes: bool,
}

impl InsertOptions {
    pub fn conflict(mut self, conflict: Conflict) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn return_changes(mut self, return_changes: bool) -> Self {
        self.return_changes = return_changes;
        self
    }
}

/// One database operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    DbList,
    DbCreate {
        db: String,
    },
    DbDrop {
        db: String,
    },
    TableList {
        db: String,
    },
    TableCreate {
        db: String,
        table: String,
    },
    TableDrop {
        db: String,
        table: String,
    },
    Get {
        db: String,
        table: String,
        id: Value,
    },
    Delete {
        db: String,
        table: String,
        id: Value,
    },
    Insert {
        db: String,
        table: String,
        documents: Value,
        options: InsertOptions,
    },
}

impl Query {
    /// Hand the query to `conn`.
    ///
    /// The outer `Result` carries failures detected while dispatching, before
    /// any work is done; the returned future carries everything else.
    pub fn run(self, conn: &dyn StoreConnection) -> Result<Pending, StoreError> {
        conn.dispatch(self)
    }

    /// The database this query addresses, if any.
    pub fn db(&self) -> Option<&str> {
        match self {
            Query::DbList => None,
            Query::DbCreate { db }
            | Query::DbDrop { db }
            | Query::TableList { db }
            | Query::TableCreate { db, .. }
            | Query::TableDrop { db, .. }
            | Query::Get { db, .. }
            | Query::Delete { db, .. }
            | Query::Insert { db, .. } => Some(db),
        }
    }

    /// The table this query addresses, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Query::TableCreate { table, .. }
            | Query::TableDrop { table, .. }
            | Query::Get { table, .. }
            | Query::Delete { table, .. }
            | Query::Insert { table, .. } => Some(table),
            _ => None,
        }
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::DbList => write!(f, "r.dbList()"),
            Query::DbCreate { db } => write!(f, "r.dbCreate({db:?})"),
            Query::DbDrop { db } => write!(f, "r.dbDrop({db:?})"),
            Query::TableList { db } => write!(f, "r.db({db:?}).tableList()"),
            Query::TableCreate { db, table } => write!(f, "r.db({db:?}).tableCreate({table:?})"),
            Query::TableDrop { db, table } => write!(f, "r.db({db:?}).tableDrop({table:?})"),
            Query::Get { db, table, id } => write!(f, "r.db({db:?}).table({table:?}).get({id})"),
            Query::Delete { db, table, id } => {
                write!(f, "r.db({db:?}).table({table:?}).get({id}).delete()")
            }
            Query::Insert {
                db,
                table,
                documents,
                options,
            } => {
                write!(f, "r.db({db:?}).table({table:?}).insert({documents}")?;
                if *options != InsertOptions::default() {
                    let options = serde_json::to_string(options).map_err(|_| fmt::Error)?;
                    write!(f, ", {options}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Entry point of the fluent query builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn db_list(&self) -> Query {
        Query::DbList
    }

    pub fn db_create(&self, db: impl Into<String>) -> Query {
        Query::DbCreate { db: db.into() }
    }

    pub fn db_drop(&self, db: impl Into<String>) -> Query {
        Query::DbDrop { db: db.into() }
    }

    pub fn db(&self, db: impl Into<String>) -> Db {
        Db { name: db.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Db {
    name: String,
}

impl Db {
    pub fn table_list(&self) -> Query {
        Query::TableList {
            db: self.name.clone(),
        }
    }

    pub fn table_create(&self, table: impl Into<String>) -> Query {
        Query::TableCreate {
            db: self.name.clone(),
            table: table.into(),
        }
    }

    pub fn table_drop(&self, table: impl Into<String>) -> Query {
        Query::TableDrop {
            db: self.name.clone(),
            table: table.into(),
        }
    }

    pub fn table(&self, table: impl Into<String>) -> Table {
        Table {
            db: self.name.clone(),
            name: table.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    db: String,
    name: String,
}

impl Table {
    pub fn get(&self, id: impl Into<Value>) -> Selection {
        Selection {
            db: self.db.clone(),
            table: self.name.clone(),
            id: id.into(),
        }
    }

    /// `documents` is either a single object or an array of objects.
    pub fn insert(&self, documents: impl Into<Value>, options: InsertOptions) -> Query {
        Query::Insert {
            db: self.db.clone(),
            table: self.name.clone(),
            documents: documents.into(),
            options,
        }
    }
}

/// A single document addressed by primary key.
///
/// Running a selection reads the document; [`Selection::delete`] turns it into
/// a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    db: String,
    table: String,
    id: Value,
}

impl Selection {
    pub fn delete(self) -> Query {
        Query::Delete {
            db: self.db,
            table: self.table,
            id: self.id,
        }
    }
}

impl From<Selection> for Query {
    fn from(selection: Selection) -> Self {
        Query::Get {
            db: selection.db,
            table: selection.table,
            id: selection.id,
        }
    }
}
