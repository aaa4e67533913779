use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};

use super::errors::{DataLayerError, ErrorKind};
use super::failure::{FailFast, FailurePolicy};
use super::options::ConnectOptions;
use crate::store::query::{InsertOptions, Query, QueryBuilder};
use crate::store::{ConnectionEvent, StoreClient, StoreConnection, StoreError};

/// Outcome of a connect attempt, `None` while it is still in flight.
type Outcome = Option<Result<(), DataLayerError>>;

enum ConnectionState {
    Unconnected,
    /// A connect attempt is running; every waiter holds a clone of this
    /// receiver and is released once the attempt publishes its outcome.
    Connecting(watch::Receiver<Outcome>),
    Connected(Arc<dyn StoreConnection>),
}

struct Inner {
    options: ConnectOptions,
    client: Arc<dyn StoreClient>,
    failure_policy: RwLock<Arc<dyn FailurePolicy>>,
    state: Mutex<ConnectionState>,
}

/// A session over one store connection.
///
/// The session owns at most one connection. [`DataLayer::acquire`] opens it on
/// first use; concurrent callers share a single connect attempt. Cloning is
/// cheap and every clone refers to the same session, so `acquire` hands back a
/// clone of the session itself.
#[derive(Clone)]
pub struct DataLayer {
    inner: Arc<Inner>,
}

impl DataLayer {
    /// Create an unconnected session. Connection faults observed after
    /// connecting terminate the process unless another policy is set.
    pub fn new(options: ConnectOptions, client: Arc<dyn StoreClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                client,
                failure_policy: RwLock::new(Arc::new(FailFast)),
                state: Mutex::new(ConnectionState::Unconnected),
            }),
        }
    }

    /// Create an unconnected session over a fresh in-memory store.
    #[cfg(feature = "memory")]
    pub fn in_memory(options: ConnectOptions) -> Self {
        Self::new(options, Arc::new(crate::store::memory::MemoryStore::new()))
    }

    /// Use `policy` instead of [`FailFast`]. Only connections monitored after
    /// this call report to it, so set it before [`DataLayer::acquire`].
    pub fn with_failure_policy(self, policy: impl FailurePolicy + 'static) -> Self {
        self.set_failure_policy(Arc::new(policy));
        self
    }

    /// Replace the policy used for connections monitored from now on.
    pub fn set_failure_policy(&self, policy: Arc<dyn FailurePolicy>) {
        *self
            .inner
            .failure_policy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = policy;
    }

    fn failure_policy(&self) -> Arc<dyn FailurePolicy> {
        self.inner
            .failure_policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make sure the session is connected and return it.
    ///
    /// - Unconnected: starts the one connect attempt and waits for it.
    /// - Connecting: waits for the attempt already in flight.
    /// - Connected: returns immediately.
    ///
    /// Every caller waiting on the same attempt gets the same outcome. A failed
    /// attempt leaves the session unconnected, so calling `acquire` again
    /// starts a new one.
    pub async fn acquire(&self) -> Result<DataLayer, DataLayerError> {
        let mut outcome = {
            let mut state = self.inner.state.lock().await;
            match &*state {
                ConnectionState::Connected(_) => return Ok(self.clone()),
                // A closed sender without a published outcome means the attempt
                // died; fall through and start over.
                ConnectionState::Connecting(outcome) if outcome.has_changed().is_ok() => {
                    debug!(
                        "Connect to {} already in flight; waiting for it.",
                        self.inner.options.address()
                    );
                    outcome.clone()
                }
                _ => {
                    let (outcome_tx, outcome_rx) = watch::channel(None);
                    *state = ConnectionState::Connecting(outcome_rx.clone());
                    // The attempt runs on its own task so a caller that stops
                    // waiting does not strand the others.
                    tokio::spawn(self.clone().connect(outcome_tx));
                    outcome_rx
                }
            }
        };

        let resolved = match outcome.wait_for(Option::is_some).await {
            Ok(resolved) => (*resolved).clone(),
            Err(_) => None,
        };
        match resolved {
            Some(Ok(())) => Ok(self.clone()),
            Some(Err(e)) => Err(e),
            None => Err(DataLayerError::Connection {
                source: StoreError::Driver("connect attempt was abandoned".into()),
            }),
        }
    }

    async fn connect(self, outcome: watch::Sender<Outcome>) {
        let address = self.inner.options.address();
        info!("Connecting to store at {}.", address);
        let result = self.inner.client.connect(&self.inner.options).await;

        let resolved = {
            let mut state = self.inner.state.lock().await;
            match result {
                Ok(connection) => {
                    info!(
                        "Connected to store at {} (connection '{}').",
                        address,
                        connection.id()
                    );
                    self.watch_connection(&connection, self.failure_policy());
                    *state = ConnectionState::Connected(connection);
                    Ok(())
                }
                Err(source) => {
                    error!("Unable to connect to store at {}: {}", address, source);
                    *state = ConnectionState::Unconnected;
                    Err(DataLayerError::Connection { source })
                }
            }
        };
        outcome.send_replace(Some(resolved));
    }

    /// Report faults of the held connection to `handler`, or to the session's
    /// failure policy when `handler` is `None`.
    ///
    /// Does nothing when the session is not connected or the connection does
    /// not report faults.
    pub async fn monitor_connection(&self, handler: Option<Arc<dyn FailurePolicy>>) {
        match self.get_connection().await {
            Some(connection) => {
                let policy = handler.unwrap_or_else(|| self.failure_policy());
                self.watch_connection(&connection, policy);
            }
            None => debug!("No connection to monitor."),
        }
    }

    fn watch_connection(
        &self,
        connection: &Arc<dyn StoreConnection>,
        policy: Arc<dyn FailurePolicy>,
    ) {
        let id = connection.id().to_string();
        let Some(mut events) = connection.subscribe() else {
            debug!("Connection '{}' does not report faults; not monitoring.", id);
            return;
        };

        tokio::spawn(async move {
            debug!("Monitoring connection '{}'.", id);
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let (kind, reason) = match event {
                            ConnectionEvent::Error(reason) => (ErrorKind::ConnectionError, reason),
                            ConnectionEvent::Close => {
                                (ErrorKind::ConnectionDrop, "connection closed".to_string())
                            }
                            ConnectionEvent::Timeout => {
                                (ErrorKind::ConnectionTimeout, "connection timed out".to_string())
                            }
                        };
                        warn!("Connection '{}' reported {}: {}", id, kind, reason);
                        policy.on_failure(DataLayerError::ConnectionFailure { kind, reason });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Connection '{}': {} fault events were missed.", id, missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Stopped monitoring connection '{}'.", id);
        });
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// The held connection, `None` until `acquire` succeeds.
    pub async fn get_connection(&self) -> Option<Arc<dyn StoreConnection>> {
        match &*self.inner.state.lock().await {
            ConnectionState::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    pub fn query(&self) -> QueryBuilder {
        self.inner.client.query()
    }

    /// Run `query` on the held connection.
    ///
    /// Failures while dispatching (no connection yet, query rejected by the
    /// driver) and failures while running come back the same way, as `Err`.
    pub async fn execute(&self, query: impl Into<Query>) -> Result<Value, DataLayerError> {
        let query = query.into();
        let connection = self
            .get_connection()
            .await
            .ok_or(DataLayerError::NotConnected)?;

        debug!("Executing {} on '{}'", query, connection.id());
        let result = match query.run(connection.as_ref()) {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("Query on '{}' failed: {}", connection.id(), e);
        }
        Ok(result?)
    }

    // shorthand helpers

    pub async fn db_list(&self) -> Result<Value, DataLayerError> {
        self.execute(self.query().db_list()).await
    }

    pub async fn db_create(&self, db: &str) -> Result<Value, DataLayerError> {
        self.execute(self.query().db_create(db)).await
    }

    pub async fn db_drop(&self, db: &str) -> Result<Value, DataLayerError> {
        self.execute(self.query().db_drop(db)).await
    }

    pub async fn table_list(&self, db: &str) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table_list()).await
    }

    pub async fn table_create(&self, db: &str, table: &str) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table_create(table)).await
    }

    pub async fn table_drop(&self, db: &str, table: &str) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table_drop(table)).await
    }

    pub async fn get(
        &self,
        db: &str,
        table: &str,
        id: impl Into<Value>,
    ) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table(table).get(id)).await
    }

    pub async fn delete(
        &self,
        db: &str,
        table: &str,
        id: impl Into<Value>,
    ) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table(table).get(id).delete())
            .await
    }

    pub async fn insert(
        &self,
        db: &str,
        table: &str,
        document: impl Into<Value>,
        options: InsertOptions,
    ) -> Result<Value, DataLayerError> {
        self.execute(self.query().db(db).table(table).insert(document, options))
            .await
    }
}
