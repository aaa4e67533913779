use serde::{Deserialize, Serialize};

use crate::core::options::ConnectOptions;

/// A user-named set of connection options.
///
/// The options are flattened, so the JSON on disk looks like:
/// `{ "name":"local", "host":"localhost", "port":28015, "db":"blog" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(flatten)]
    pub options: ConnectOptions,
}

impl Profile {
    pub fn new(name: impl Into<String>, options: ConnectOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// Returns the unique, human-readable identifier.
    pub fn name(&self) -> &str {
        &self.name
    }
}
