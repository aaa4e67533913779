//! The seam between the data layer and a concrete database driver.
//!
//! A driver provides a [`StoreClient`] that opens connections, and the
//! [`StoreConnection`]s it hands out run [`Query`] objects. Connections that can
//! report faults after they are established expose them through
//! [`StoreConnection::subscribe`].

pub mod errors;
#[cfg(feature = "memory")]
pub mod memory;
pub mod query;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::options::ConnectOptions;

pub use errors::StoreError;
pub use query::{Query, QueryBuilder};

/// The in-flight half of a dispatched query.
pub type Pending = Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send>>;

/// Faults an established connection can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Close,
    Timeout,
}

/// A driver capability that knows how to open connections.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn StoreConnection>, StoreError>;

    /// The builder used to construct queries for this driver.
    fn query(&self) -> QueryBuilder {
        QueryBuilder
    }
}

/// An open connection produced by a [`StoreClient`].
pub trait StoreConnection: Send + Sync {
    /// A stable identifier for this connection, used in logs.
    fn id(&self) -> &str;

    /// Start running `query`.
    ///
    /// Errors detected before any work starts (closed connection, malformed
    /// query) are returned directly; everything else is reported by the future.
    fn dispatch(&self, query: Query) -> Result<Pending, StoreError>;

    /// Subscribe to fault notifications. `None` if the connection does not
    /// report any.
    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        None
    }
}
