//! Adapter configuration.
use serde::Deserialize;

pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

// Postgres connection settings. `url` may carry credentials; never log it.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_PG_MAX_CONNECTIONS,
            acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
        }
    }
}

fn default_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_PG_ACQUIRE_TIMEOUT_MS
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdapterConfig {
    // Serve full loads from memory until the next mutation.
    #[serde(default)]
    pub cache_rules: bool,
}
