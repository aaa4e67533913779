//! A deterministic **in‑process stand‑in** for a database driver.
//!
//! *  **From the test’s perspective**
//!    * Count physical connect attempts with `FakeStore::connect_calls`.
//!    * Hold connect attempts open with `gated()` and let them finish with
//!      `release()`, to line up concurrent `acquire` calls.
//!    * Inspect every query the data layer dispatched via
//!      `FakeConnection::dispatched`.
//!    * Push fault notifications with `FakeConnection::emit`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datalayer_core::store::Pending;
use datalayer_core::{
    ConnectOptions, ConnectionEvent, Query, StoreClient, StoreConnection, StoreError,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

pub struct FakeStore {
    connection: Arc<FakeConnection>,
    connect_calls: AtomicUsize,
    /// Popped front to back, one per connect attempt, before connects succeed.
    failures: Mutex<VecDeque<StoreError>>,
    gate: Option<Notify>,
    /// Options seen by the last connect attempt.
    last_options: Mutex<Option<ConnectOptions>>,
}

impl FakeStore {
    /// Every connect immediately succeeds with a connection named `id`.
    pub fn new(id: &str) -> Self {
        Self {
            connection: Arc::new(FakeConnection::new(id)),
            connect_calls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
            last_options: Mutex::new(None),
        }
    }

    /// The next `times` connect attempts fail with `error`.
    pub fn failing(self, times: usize, error: StoreError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Connect attempts block until `release()` is called, once per attempt.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    /// The connection is able to report fault events.
    pub fn with_events(mut self) -> Self {
        let id = self.connection.id.clone();
        self.connection = Arc::new(FakeConnection::new(&id).with_events());
        self
    }

    pub fn release(&self) {
        self.gate
            .as_ref()
            .expect("release() needs a gated store")
            .notify_one();
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.connection.clone()
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreClient for FakeStore {
    async fn connect(
        &self,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn StoreConnection>, StoreError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(self.connection.clone()),
        }
    }
}

pub struct FakeConnection {
    id: String,
    dispatched: Mutex<Vec<Query>>,
    /// What the returned future resolves to.
    reply: Mutex<Result<Value, StoreError>>,
    /// When set, dispatch fails before returning a future.
    reject: Mutex<Option<StoreError>>,
    events: Option<broadcast::Sender<ConnectionEvent>>,
}

impl FakeConnection {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            dispatched: Mutex::new(Vec::new()),
            reply: Mutex::new(Ok(json!({ "ok": true }))),
            reject: Mutex::new(None),
            events: None,
        }
    }

    fn with_events(mut self) -> Self {
        let (events, _) = broadcast::channel(16);
        self.events = Some(events);
        self
    }

    pub fn dispatched(&self) -> Vec<Query> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn reply_with(&self, reply: Result<Value, StoreError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn reject_with(&self, error: StoreError) {
        *self.reject.lock().unwrap() = Some(error);
    }

    /// Returns how many subscribers received the event.
    pub fn emit(&self, event: ConnectionEvent) -> usize {
        self.events
            .as_ref()
            .expect("emit() needs a store built with_events()")
            .send(event)
            .unwrap_or(0)
    }
}

impl StoreConnection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch(&self, query: Query) -> Result<Pending, StoreError> {
        if let Some(error) = self.reject.lock().unwrap().clone() {
            return Err(error);
        }
        self.dispatched.lock().unwrap().push(query);
        let reply = self.reply.lock().unwrap().clone();
        Ok(Box::pin(async move {
            tokio::task::yield_now().await;
            reply
        }))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        self.events.as_ref().map(|events| events.subscribe())
    }
}
