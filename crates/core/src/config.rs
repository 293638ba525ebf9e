//! Configuration model and loader.
//!
//! Layers, lowest precedence first:
//! - built-in defaults
//! - `docindex.toml` (or the file named by `DOCINDEX_CONFIG`)
//! - `DOCINDEX_*` environment variables, `__` separating nested keys
//!   (e.g. `DOCINDEX_SCHEDULER__BACKEND=memory`)
//!
//! `REDIS_URL` is accepted as a fallback broker URL when none is configured.

use core::fmt;
use core::str::FromStr;
use std::env;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Embedding model used when a caller does not name one.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Environment variable holding the default embedding credential.
pub const DEFAULT_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "docindex.toml";

const ENV_PREFIX: &str = "DOCINDEX_";
const CONFIG_PATH_ENV: &str = "DOCINDEX_CONFIG";
const BROKER_URL_FALLBACK_ENV: &str = "REDIS_URL";

/// Configuration loading/validation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resource pool settings. Immutable once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of cached embedding handles.
    pub max_embedding_handles: usize,
    /// Maximum number of cached vector-index clients.
    pub max_index_clients: usize,
    /// Model used when `get_embeddings` is called without a model id.
    pub default_embedding_model: String,
    /// Environment variable consulted for the default credential.
    pub credential_env: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_embedding_handles: 5,
            max_index_clients: 10,
            default_embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_max_embedding_handles(mut self, max: usize) -> Self {
        self.max_embedding_handles = max;
        self
    }

    pub fn with_max_index_clients(mut self, max: usize) -> Self {
        self.max_index_clients = max;
        self
    }

    pub fn with_default_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.default_embedding_model = model.into();
        self
    }
}

/// Task registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Maximum number of tasks kept in memory.
    pub max_tasks: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { max_tasks: 100 }
    }
}

/// Which job backend to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Distributed if a broker URL is configured and reachable, else in-process.
    #[default]
    Auto,
    /// In-process worker threads.
    Memory,
    /// Broker-backed queue; construction failures are returned to the caller.
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Auto => "auto",
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(ConfigError::Invalid(format!(
                "unknown scheduler backend: {other}"
            ))),
        }
    }
}

/// Job scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub backend: BackendKind,
    /// Broker connection string, required by the redis backend.
    pub broker_url: Option<String>,
    /// Worker threads of the in-process backend, or local consumers of the
    /// broker queue on the redis backend.
    pub worker_threads: usize,
    /// Namespace for broker keys.
    pub queue_name: String,
    /// How long an idle worker blocks on the queue before re-checking shutdown.
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for workers to join at shutdown.
    pub shutdown_timeout_ms: u64,
    /// Job records kept by the in-process backend; the oldest finished ones
    /// are dropped beyond this.
    pub max_job_records: usize,
    /// How long a broker job may sit claimed without finishing before another
    /// worker puts it back on the queue.
    pub pending_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            broker_url: None,
            worker_threads: 2,
            queue_name: "docindex".to_string(),
            poll_interval_ms: 1_000,
            shutdown_timeout_ms: 2_000,
            max_job_records: 1_000,
            pending_timeout_ms: 600_000,
        }
    }
}

impl SchedulerConfig {
    /// In-process backend with defaults.
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_job_records(mut self, max: usize) -> Self {
        self.max_job_records = max;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    /// Broker URL, ignoring blank values.
    pub fn broker_url(&self) -> Option<&str> {
        self.broker_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub pool: PoolConfig,
    pub tasks: TaskConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Load from `DOCINDEX_CONFIG` (or `docindex.toml`) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load using an explicit config file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config: CoreConfig = Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        if config.scheduler.broker_url().is_none() {
            if let Ok(url) = env::var(BROKER_URL_FALLBACK_ENV) {
                if !url.trim().is_empty() {
                    debug!(env = BROKER_URL_FALLBACK_ENV, "using fallback broker url");
                    config.scheduler.broker_url = Some(url);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// The layered provider chain, exposed for callers that add their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(CoreConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.pool.max_embedding_handles, "pool.max_embedding_handles"),
            (self.pool.max_index_clients, "pool.max_index_clients"),
            (self.tasks.max_tasks, "tasks.max_tasks"),
            (self.scheduler.worker_threads, "scheduler.worker_threads"),
            (self.scheduler.max_job_records, "scheduler.max_job_records"),
        ];
        for (value, key) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }
        if self.pool.default_embedding_model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pool.default_embedding_model must not be empty".to_string(),
            ));
        }
        if self.scheduler.queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.queue_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.pool.max_embedding_handles, 5);
        assert_eq!(config.pool.max_index_clients, 10);
        assert_eq!(config.pool.default_embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.tasks.max_tasks, 100);
        assert_eq!(config.scheduler.worker_threads, 2);
        assert_eq!(config.scheduler.max_job_records, 1_000);
        assert_eq!(config.scheduler.pending_timeout(), Duration::from_secs(600));
        assert_eq!(config.scheduler.backend, BackendKind::Auto);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert_eq!(" memory ".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!(matches!(
            "kafka".parse::<BackendKind>(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn blank_broker_url_is_treated_as_absent() {
        let config = SchedulerConfig::default().with_broker_url("   ");
        assert!(config.broker_url().is_none());
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "docindex.toml",
                r#"
                [pool]
                max_embedding_handles = 3
                default_embedding_model = "text-embedding-3-large"

                [scheduler]
                worker_threads = 8
                "#,
            )?;
            jail.set_env("DOCINDEX_SCHEDULER__WORKER_THREADS", "4");
            jail.set_env("DOCINDEX_SCHEDULER__BACKEND", "memory");
            jail.set_env("DOCINDEX_TASKS__MAX_TASKS", "7");

            let config =
                CoreConfig::load_from(Path::new("docindex.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.pool.max_embedding_handles, 3);
            assert_eq!(config.pool.max_index_clients, 10);
            assert_eq!(config.pool.default_embedding_model, "text-embedding-3-large");
            assert_eq!(config.scheduler.worker_threads, 4);
            assert_eq!(config.scheduler.backend, BackendKind::Memory);
            assert_eq!(config.tasks.max_tasks, 7);
            Ok(())
        });
    }

    #[test]
    fn redis_url_is_used_as_fallback_broker() {
        Jail::expect_with(|jail| {
            jail.set_env("REDIS_URL", "redis://cache.internal:6379");
            let config =
                CoreConfig::load_from(Path::new("missing.toml")).map_err(|e| e.to_string())?;
            assert_eq!(
                config.scheduler.broker_url(),
                Some("redis://cache.internal:6379")
            );
            Ok(())
        });
    }

    #[test]
    fn zero_capacity_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DOCINDEX_POOL__MAX_INDEX_CLIENTS", "0");
            let err = CoreConfig::load_from(Path::new("missing.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_index_clients")));
            Ok(())
        });
    }

    #[test]
    fn unknown_backend_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("DOCINDEX_SCHEDULER__BACKEND", "kafka");
            assert!(matches!(
                CoreConfig::load_from(Path::new("missing.toml")),
                Err(ConfigError::Load(_))
            ));
            Ok(())
        });
    }
}
