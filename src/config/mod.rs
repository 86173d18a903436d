use serde::{Deserialize, Serialize};

/// Which `PersistentStore` implementation the facade constructs at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    Memory,
    Sqlite,
}

/// Configuration for a standalone datastore process.
///
/// Carries the four configuration options. Loaded from `config.json` if present,
/// with environment variables taking precedence over file contents —
/// the same precedence this lineage's `ServerConfig` used, adapted to
/// the datastore's own option set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Opaque URI interpreted by the backend (a filesystem path for the
    /// SQLite variant, ignored for the in-memory variant).
    pub persistent_uri: String,

    /// Reserved for a future transient (non-durable, shared) cache
    /// backend; currently unused by either `PersistentStore` variant
    /// but carried through as part of the configuration surface.
    pub transient_uri: String,

    /// Directory of workload template files consumed at startup.
    pub init_workloads_path: String,

    pub db_backend: DbBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigError {
    FailedToWrite,
    ParseError,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            persistent_uri: "datastore.db".to_string(),
            transient_uri: String::new(),
            init_workloads_path: "workloads".to_string(),
            db_backend: DbBackend::Sqlite,
        }
    }
}

const CONFIG_PATH: &str = "config.json";

impl DatastoreConfig {
    /// Reads from `config.json`, applying `DATASTORE_*` env overrides.
    /// Writes and returns a default configuration if no file exists yet.
    pub fn read() -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(CONFIG_PATH) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|_| ConfigError::ParseError)?
            }
            Err(_) => {
                Self::write_default()?;
                Self::default()
            }
        };

        if let Ok(v) = std::env::var("DATASTORE_PERSISTENT_URI") {
            config.persistent_uri = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_TRANSIENT_URI") {
            config.transient_uri = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_INIT_WORKLOADS_PATH") {
            config.init_workloads_path = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_DB_BACKEND") {
            config.db_backend = match v.to_lowercase().as_str() {
                "memory" => DbBackend::Memory,
                _ => DbBackend::Sqlite,
            };
        }

        Ok(config)
    }

    pub fn write(&self) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|_| ConfigError::ParseError)?;
        std::fs::write(CONFIG_PATH, content).map_err(|_| ConfigError::FailedToWrite)
    }

    pub fn write_default() -> Result<(), ConfigError> {
        Self::default().write()
    }
}
