//! Process settings.
//!
//! Loading flow:
//! 1. Start with compiled [`SparkSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides
//!
//! CLI flags are applied last by the caller.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use spark_server::ServerConfig;
use tracing::{debug, warn};

/// Signing secret used when none is configured.
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-in-production";
pub const DEFAULT_DATABASE_PATH: &str = "data/spark.db";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkSettings {
    pub server: ServerConfig,
    pub auth: AuthSettings,
    pub kimi: KimiSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    #[serde(skip_serializing, deserialize_with = "secret_from_string")]
    pub jwt_secret: SecretString,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KimiSettings {
    /// Empty selects the demo completion source.
    #[serde(skip_serializing, deserialize_with = "secret_from_string")]
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::from(DEFAULT_JWT_SECRET),
        }
    }
}

impl Default for KimiSettings {
    fn default() -> Self {
        Self {
            api_key: SecretString::from(""),
            base_url: spark_llm::kimi::DEFAULT_BASE_URL.into(),
            model: spark_llm::kimi::DEFAULT_MODEL.into(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

fn secret_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

impl SparkSettings {
    /// Defaults, merged with `path` when given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Defaults deep-merged with a JSON file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = if path.exists() {
            debug!(?path, "Loading settings file");
            let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            deep_merge(defaults, serde_json::from_str(&content)?)
        } else {
            debug!(?path, "Settings file not found, using defaults");
            defaults
        };
        Ok(serde_json::from_value(merged)?)
    }

    /// Apply overrides from `lookup`. Empty and unparsable values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = read("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(raw) = read("SERVER_PORT") {
            match raw.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(key = "SERVER_PORT", value = %raw, "Invalid port, ignoring"),
            }
        }
        if let Some(secret) = read("JWT_SECRET") {
            self.auth.jwt_secret = SecretString::from(secret);
        }
        if let Some(key) = read("KIMI_API_KEY") {
            self.kimi.api_key = SecretString::from(key);
        }
        if let Some(url) = read("KIMI_BASE_URL") {
            self.kimi.base_url = url;
        }
        if let Some(model) = read("KIMI_MODEL") {
            self.kimi.model = model;
        }
        if let Some(path) = read("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = read("LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn uses_default_jwt_secret(&self) -> bool {
        self.auth.jwt_secret.expose_secret() == DEFAULT_JWT_SECRET
    }
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and scalars are replaced, nulls in `source`
/// are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}
