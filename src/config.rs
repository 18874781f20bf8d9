//! Server configuration.
//!
//! Precedence: explicit path > `DOCBRIDGE_CONFIG` > `./docbridge.toml` > defaults, then the
//! `DOCBRIDGE_URI`, `DOCBRIDGE_DATABASE` and `DOCBRIDGE_SLOW_QUERY_MS` variables override
//! whatever was loaded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collection::{CollectionSettings, SaveStrategy};
use crate::errors::{DbError, Result};
use crate::telemetry::SlowQueryMonitor;

const LOC_PARSE: &str = "docbridge::ServerConfig::from_toml_str";
const LOC_FILE: &str = "docbridge::ServerConfig::from_file";
const LOC_ENV: &str = "docbridge::ServerConfig::apply_env";

pub const CONFIG_ENV: &str = "DOCBRIDGE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "docbridge.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub uri: String,
    pub database: String,
    /// Threshold for slow-operation diagnostics; `0` turns them off.
    pub slow_query_ms: u64,
    pub save_strategy: SaveStrategy,
    /// Upper bound for committing a transaction; `0` leaves it to the server.
    pub max_commit_time_secs: u64,
    /// Extra client options, passed to the driver verbatim (for MongoDB, as URI options).
    pub client_options: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "docbridge".to_string(),
            slow_query_ms: 0,
            save_strategy: SaveStrategy::Replace,
            max_commit_time_secs: 60,
            client_options: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// # Errors
    /// `BadRequest` when the text is not a valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| DbError::bad_request(LOC_PARSE, "invalid configuration").with_source(e))
    }

    /// # Errors
    /// `Internal` when the file cannot be read, `BadRequest` when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::internal(LOC_FILE, "unable to read configuration file")
                .with_detail(path.display())
                .with_source(e)
        })?;
        Self::from_toml_str(&text).map_err(|e| DbError::wrap(e, LOC_FILE, format!("in {}", path.display())))
    }

    /// Loads the configuration using the process environment.
    ///
    /// # Errors
    /// See [`load_with`](Self::load_with).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Loads the configuration, reading variables through `env`.
    ///
    /// An explicitly named file (argument or `DOCBRIDGE_CONFIG`) must exist; the default
    /// `./docbridge.toml` is only used when present.
    ///
    /// # Errors
    /// Any error from [`from_file`](Self::from_file) or [`apply_env`](Self::apply_env).
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let explicit = path.map(Path::to_path_buf).or_else(|| env(CONFIG_ENV).map(PathBuf::from));
        let mut config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if fallback.exists() { Self::from_file(&fallback)? } else { Self::default() }
            }
        };
        config.apply_env(env)?;
        log::debug!("configuration loaded for database {}", config.database);
        Ok(config)
    }

    /// # Errors
    /// `BadRequest` when `DOCBRIDGE_SLOW_QUERY_MS` is not a number.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(uri) = env("DOCBRIDGE_URI") {
            self.uri = uri;
        }
        if let Some(database) = env("DOCBRIDGE_DATABASE") {
            self.database = database;
        }
        if let Some(ms) = env("DOCBRIDGE_SLOW_QUERY_MS") {
            self.slow_query_ms = ms.trim().parse().map_err(|e| {
                DbError::bad_request(LOC_ENV, "DOCBRIDGE_SLOW_QUERY_MS must be a number of milliseconds")
                    .with_detail(format!("value: {ms}"))
                    .with_source(e)
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn max_commit_time(&self) -> Option<Duration> {
        if self.max_commit_time_secs == 0 { None } else { Some(Duration::from_secs(self.max_commit_time_secs)) }
    }

    #[must_use]
    pub fn monitor(&self) -> SlowQueryMonitor {
        SlowQueryMonitor::from_millis(self.slow_query_ms)
    }

    #[must_use]
    pub fn collection_settings(&self) -> CollectionSettings {
        CollectionSettings { monitor: self.monitor(), save_strategy: self.save_strategy }
    }

    /// `uri` with `client_options` appended as query parameters.
    #[must_use]
    pub fn uri_with_options(&self) -> String {
        if self.client_options.is_empty() {
            return self.uri.clone();
        }
        let query: Vec<String> = self.client_options.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let sep = if self.uri.contains('?') { '&' } else { '?' };
        format!("{}{sep}{}", self.uri, query.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ServerConfig::from_toml_str("database = \"app\"\nsave_strategy = \"guarded_update\"").unwrap();
        assert_eq!(cfg.database, "app");
        assert_eq!(cfg.save_strategy, SaveStrategy::GuardedUpdate);
        assert_eq!(cfg.max_commit_time(), Some(Duration::from_secs(60)));
        assert!(!cfg.monitor().is_enabled());
    }

    #[test]
    fn bad_toml_is_bad_request() {
        let err = ServerConfig::from_toml_str("slow_query_ms = \"soon\"").unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn client_options_become_uri_parameters() {
        let mut cfg = ServerConfig::default();
        cfg.client_options.insert("appName".into(), "svc".into());
        cfg.client_options.insert("retryWrites".into(), "true".into());
        assert_eq!(cfg.uri_with_options(), "mongodb://localhost:27017?appName=svc&retryWrites=true");
    }
}
