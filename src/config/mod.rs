//! Environment-backed configuration.
//!
//! Every setting has a default. Override with `TMSYNC_*` environment variables.
//! Unlike optional paths, malformed numbers are rejected rather than silently
//! replaced by the default, so a typo in a deployment fails at startup.

pub mod error;


pub use error::ConfigError;

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DB_FILENAME, DEFAULT_BATCH_SIZE, DEFAULT_DEBOUNCE_MS, DEFAULT_EMBEDDER_MODEL,
    DEFAULT_EMBEDDING_DIM, DEFAULT_LOCK_TTL_SECS, DEFAULT_MAX_BUILD_RETRIES,
    DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS, DEFAULT_SWEEP_INTERVAL_SECS, MAX_BATCH_SIZE,
    SNAPSHOT_DIR,
};
use crate::suggest::StalePolicy;
use crate::sync::SyncConfig;

/// Engine configuration loaded from environment variables.
///
/// Use [`Config::from_env`] to read `TMSYNC_*` overrides on top of defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port. Default: `8080`.
    pub port: u16,

    /// IP address to bind to. Default: `127.0.0.1`.
    pub bind_addr: IpAddr,

    /// Directory holding the SQLite database and persisted snapshots. Default: `./.data`.
    pub data_dir: PathBuf,

    /// Endpoint of the external inference service. `None` selects the hashing provider.
    pub embedder_url: Option<String>,

    /// Model identifier passed to the embedding provider.
    pub embedder_model: String,

    /// Embedding dimension. Default: `384`.
    pub embedding_dim: usize,

    /// Entries per embedding call. Default: `128`.
    pub batch_size: usize,

    /// Quiet period before an edited TM is re-indexed.
    pub debounce: Duration,

    /// Age after which a build lock may be reclaimed.
    pub lock_ttl: Duration,

    /// Reconciliation sweep interval.
    pub sweep_interval: Duration,

    /// First backoff delay for contended/failed builds.
    pub retry_base: Duration,

    /// Backoff ceiling.
    pub retry_max: Duration,

    /// Automatic retries of a failing build.
    pub max_build_retries: u32,

    /// Whether non-ready TMs keep answering from their last good snapshot.
    pub stale_policy: StalePolicy,

    /// Lock holder identity. Generated when unset.
    pub worker_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            data_dir: PathBuf::from("./.data"),
            embedder_url: None,
            embedder_model: DEFAULT_EMBEDDER_MODEL.to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            batch_size: DEFAULT_BATCH_SIZE,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            max_build_retries: DEFAULT_MAX_BUILD_RETRIES,
            stale_policy: StalePolicy::default(),
            worker_id: None,
        }
    }
}

impl Config {
    const ENV_PORT: &'static str = "TMSYNC_PORT";
    const ENV_BIND_ADDR: &'static str = "TMSYNC_BIND_ADDR";
    const ENV_DATA_DIR: &'static str = "TMSYNC_DATA_DIR";
    const ENV_EMBEDDER_URL: &'static str = "TMSYNC_EMBEDDER_URL";
    const ENV_EMBEDDER_MODEL: &'static str = "TMSYNC_EMBEDDER_MODEL";
    const ENV_EMBEDDING_DIM: &'static str = "TMSYNC_EMBEDDING_DIM";
    const ENV_BATCH_SIZE: &'static str = "TMSYNC_BATCH_SIZE";
    const ENV_DEBOUNCE_MS: &'static str = "TMSYNC_DEBOUNCE_MS";
    const ENV_LOCK_TTL_SECS: &'static str = "TMSYNC_LOCK_TTL_SECS";
    const ENV_SWEEP_INTERVAL_SECS: &'static str = "TMSYNC_SWEEP_INTERVAL_SECS";
    const ENV_RETRY_BASE_MS: &'static str = "TMSYNC_RETRY_BASE_MS";
    const ENV_RETRY_MAX_MS: &'static str = "TMSYNC_RETRY_MAX_MS";
    const ENV_MAX_BUILD_RETRIES: &'static str = "TMSYNC_MAX_BUILD_RETRIES";
    const ENV_STALE_POLICY: &'static str = "TMSYNC_STALE_POLICY";
    const ENV_WORKER_ID: &'static str = "TMSYNC_WORKER_ID";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = Self::parse_port_from_env(defaults.port)?;
        let bind_addr = Self::parse_bind_addr_from_env(defaults.bind_addr)?;
        let data_dir = env::var(Self::ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let embedder_url = Self::parse_optional_string_from_env(Self::ENV_EMBEDDER_URL);
        let embedder_model =
            env::var(Self::ENV_EMBEDDER_MODEL).unwrap_or(defaults.embedder_model);
        let embedding_dim =
            Self::parse_u64_from_env(Self::ENV_EMBEDDING_DIM, defaults.embedding_dim as u64)?
                as usize;
        let batch_size =
            Self::parse_u64_from_env(Self::ENV_BATCH_SIZE, defaults.batch_size as u64)? as usize;
        let debounce = Duration::from_millis(Self::parse_u64_from_env(
            Self::ENV_DEBOUNCE_MS,
            defaults.debounce.as_millis() as u64,
        )?);
        let lock_ttl = Duration::from_secs(Self::parse_u64_from_env(
            Self::ENV_LOCK_TTL_SECS,
            defaults.lock_ttl.as_secs(),
        )?);
        let sweep_interval = Duration::from_secs(Self::parse_u64_from_env(
            Self::ENV_SWEEP_INTERVAL_SECS,
            defaults.sweep_interval.as_secs(),
        )?);
        let retry_base = Duration::from_millis(Self::parse_u64_from_env(
            Self::ENV_RETRY_BASE_MS,
            defaults.retry_base.as_millis() as u64,
        )?);
        let retry_max = Duration::from_millis(Self::parse_u64_from_env(
            Self::ENV_RETRY_MAX_MS,
            defaults.retry_max.as_millis() as u64,
        )?);
        let max_build_retries = Self::parse_u64_from_env(
            Self::ENV_MAX_BUILD_RETRIES,
            u64::from(defaults.max_build_retries),
        )?;
        let max_build_retries =
            u32::try_from(max_build_retries).map_err(|_| ConfigError::OutOfRange {
                name: Self::ENV_MAX_BUILD_RETRIES,
                value: max_build_retries.to_string(),
                reason: "must fit in 32 bits",
            })?;
        let stale_policy = match env::var(Self::ENV_STALE_POLICY) {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidStalePolicy { value })?,
            Err(_) => defaults.stale_policy,
        };
        let worker_id = Self::parse_optional_string_from_env(Self::ENV_WORKER_ID);

        Ok(Self {
            port,
            bind_addr,
            data_dir,
            embedder_url,
            embedder_model,
            embedding_dim,
            batch_size,
            debounce,
            lock_ttl,
            sweep_interval,
            retry_base,
            retry_max,
            max_build_retries,
            stale_policy,
            worker_id,
        })
    }

    /// Validates basic invariants (does not create directories).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.exists() && !self.data_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.data_dir.clone(),
            });
        }

        if self.embedder_model.trim().is_empty() {
            return Err(ConfigError::EmptyValue {
                name: Self::ENV_EMBEDDER_MODEL,
            });
        }

        if self.embedding_dim == 0 {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_EMBEDDING_DIM,
                value: self.embedding_dim.to_string(),
                reason: "must be greater than zero",
            });
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_BATCH_SIZE,
                value: self.batch_size.to_string(),
                reason: "must be between 1 and 1024",
            });
        }

        if self.lock_ttl.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_LOCK_TTL_SECS,
                value: "0".to_string(),
                reason: "must be greater than zero",
            });
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_SWEEP_INTERVAL_SECS,
                value: "0".to_string(),
                reason: "must be greater than zero",
            });
        }

        if self.retry_base.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_RETRY_BASE_MS,
                value: "0".to_string(),
                reason: "must be greater than zero",
            });
        }

        if self.retry_max < self.retry_base {
            return Err(ConfigError::OutOfRange {
                name: Self::ENV_RETRY_MAX_MS,
                value: self.retry_max.as_millis().to_string(),
                reason: "must not be smaller than TMSYNC_RETRY_BASE_MS",
            });
        }

        Ok(())
    }

    /// Returns `"{bind_addr}:{port}"` (useful for logging/binding).
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILENAME)
    }

    /// Directory of persisted index snapshots.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_DIR)
    }

    /// Lock holder identity for this process.
    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Auto-sync settings derived from this config.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce: self.debounce,
            retry_base: self.retry_base,
            retry_max: self.retry_max,
            max_build_retries: self.max_build_retries,
            sweep_interval: self.sweep_interval,
            ..SyncConfig::default()
        }
    }

    fn parse_port_from_env(default: u16) -> Result<u16, ConfigError> {
        match env::var(Self::ENV_PORT) {
            Ok(value) => {
                let port: u16 = value.parse().map_err(|e| ConfigError::PortParseError {
                    value: value.clone(),
                    source: e,
                })?;

                if port == 0 {
                    return Err(ConfigError::InvalidPort { value });
                }

                Ok(port)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bind_addr_from_env(default: IpAddr) -> Result<IpAddr, ConfigError> {
        match env::var(Self::ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidBindAddr { value, source: e }),
            Err(_) => Ok(default),
        }
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_u64_from_env(var_name: &'static str, default: u64) -> Result<u64, ConfigError> {
        match env::var(var_name) {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidNumber {
                    name: var_name,
                    value,
                    source: e,
                }),
            Err(_) => Ok(default),
        }
    }
}
