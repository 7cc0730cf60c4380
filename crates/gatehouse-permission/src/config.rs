use anyhow::{Context, Result, bail};
use gatehouse_adapter::config::{DEFAULT_PG_ACQUIRE_TIMEOUT_MS, DEFAULT_PG_MAX_CONNECTIONS};
use gatehouse_adapter::{AdapterConfig, PostgresConfig};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

/// Where the casbin model text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Embedded,
    File(PathBuf),
    Text(String),
}

// Permission service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct PermissionConfig {
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub model: ModelSource,
    pub adapter: AdapterConfig,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            postgres: None,
            model: ModelSource::Embedded,
            adapter: AdapterConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PermissionConfigOverride {
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    model_path: Option<PathBuf>,
    model_text: Option<String>,
    cache_rules: Option<bool>,
}

impl PermissionConfig {
    pub fn from_env() -> Result<Self> {
        let storage = match std::env::var("GATEHOUSE_STORAGE") {
            Ok(value) => value
                .parse::<StorageBackend>()
                .with_context(|| "parse GATEHOUSE_STORAGE")?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = match std::env::var("GATEHOUSE_DATABASE_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_or(
                    "GATEHOUSE_PG_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                acquire_timeout_ms: env_or(
                    "GATEHOUSE_PG_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        let model = match std::env::var("GATEHOUSE_MODEL_PATH") {
            Ok(path) => ModelSource::File(PathBuf::from(path)),
            Err(_) => ModelSource::Embedded,
        };
        let cache_rules = match std::env::var("GATEHOUSE_CACHE_RULES") {
            Ok(value) => parse_bool(&value).with_context(|| "parse GATEHOUSE_CACHE_RULES")?,
            Err(_) => false,
        };
        Ok(Self {
            storage,
            postgres,
            model,
            adapter: AdapterConfig { cache_rules },
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("GATEHOUSE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read GATEHOUSE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: PermissionConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse permission config yaml")?;
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        match (override_cfg.model_path, override_cfg.model_text) {
            (Some(_), Some(_)) => bail!("model_path and model_text are mutually exclusive"),
            (Some(path), None) => self.model = ModelSource::File(path),
            (None, Some(text)) => self.model = ModelSource::Text(text),
            (None, None) => {}
        }
        if let Some(value) = override_cfg.cache_rules {
            self.adapter.cache_rules = value;
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean: {other}"),
    }
}
