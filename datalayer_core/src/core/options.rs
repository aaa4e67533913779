use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connection options handed to the store client when connecting.
///
/// Every field has a default, so `{}` is a valid options blob. Keys the data
/// layer does not know about are kept in `extra` and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    pub user: String,
    pub password: String,
    /// Connect timeout in seconds.
    pub timeout: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 28015,
            db: None,
            user: "admin".to_string(),
            password: String::new(),
            timeout: 20,
            extra: Map::new(),
        }
    }
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    /// `host:port`, as used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
