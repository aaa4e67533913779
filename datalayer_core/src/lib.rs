pub mod core;
pub mod storage;
pub mod store;
pub mod utils;

// re‑export ergonomic entry points
pub use crate::core::data_layer::DataLayer;
pub use crate::core::errors::{DataLayerError, ErrorKind};
pub use crate::core::failure::{FailFast, FailurePolicy};
pub use crate::core::options::ConnectOptions;
pub use storage::{profile::Profile, store::ProfileStore};
#[cfg(feature = "memory")]
pub use store::memory::{MemoryConnection, MemoryStore};
pub use store::query::{Conflict, InsertOptions, Query, QueryBuilder};
pub use store::{ConnectionEvent, StoreClient, StoreConnection, StoreError};
