//! Server configuration.
//!
//! Loads configuration from `PORTAL_*` environment variables with sensible
//! defaults. Malformed values are reported instead of silently replaced, so
//! a typo in a deployment never starts a server with the wrong storage.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use portal_core::gate::ThrottlePolicy;

/// Default listen address when neither `PORTAL_BIND_ADDR` nor `PORT` is set.
const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    8300,
);

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} must be set when {because}")]
    Missing {
        var: &'static str,
        because: &'static str,
    },
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Path of the 32-byte key file.
    pub key_file: PathBuf,
    /// Path of the 16-byte IV file.
    pub iv_file: PathBuf,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Unlock password to configure on first start, if none is stored yet.
    pub bootstrap_password: Option<String>,
    /// Throttling for failed unlock attempts.
    pub throttle: ThrottlePolicy,
    /// Require the gate to be unlocked for every document and tag mutation,
    /// not only those touching restricted documents.
    pub require_unlock_for_writes: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("storage_backend", &self.storage_backend)
            .field("key_file", &self.key_file)
            .field("iv_file", &self.iv_file)
            .field("log_level", &self.log_level)
            .field(
                "bootstrap_password",
                &self.bootstrap_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("throttle", &self.throttle)
            .field("require_unlock_for_writes", &self.require_unlock_for_writes)
            .finish()
    }
}

/// Supported storage backend types.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// One file per key under a data directory.
    File { path: PathBuf },
    /// PostgreSQL single-table storage.
    Postgres { url: String },
}

impl std::fmt::Debug for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::File { path } => f.debug_struct("File").field("path", path).finish(),
            // Connection strings carry credentials.
            Self::Postgres { .. } => f.debug_struct("Postgres").finish_non_exhaustive(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PORTAL_BIND_ADDR`: full bind address (default: `127.0.0.1:8300`)
    /// - `PORT`: port to bind on `0.0.0.0` when `PORTAL_BIND_ADDR` is unset
    /// - `PORTAL_STORAGE`: `file`, `memory`, or `postgres` (default: `file`)
    /// - `PORTAL_DATA_DIR`: data directory for the file backend (default: `./data`)
    /// - `PORTAL_KEY_FILE` / `PORTAL_IV_FILE`: key material paths
    ///   (default: `{data}/keys/portal.key` and `{data}/keys/portal.iv`)
    /// - `DATABASE_URL`: PostgreSQL connection string (required for `postgres`)
    /// - `PORTAL_LOG_LEVEL`: log filter (default: `info`)
    /// - `PORTAL_UNLOCK_PASSWORD`: bootstrap unlock password (optional)
    /// - `PORTAL_UNLOCK_MAX_ATTEMPTS`: failures before lockout, `0` disables (default: `5`)
    /// - `PORTAL_UNLOCK_LOCKOUT_SECS`: lockout length (default: `60`)
    /// - `PORTAL_REQUIRE_UNLOCK_FOR_WRITES`: default `true`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed values or a missing `DATABASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Priority: PORTAL_BIND_ADDR > PORT > default.
        let bind_addr = if let Some(addr) = lookup("PORTAL_BIND_ADDR") {
            parse("PORTAL_BIND_ADDR", &addr)?
        } else if let Some(port) = lookup("PORT") {
            SocketAddr::from(([0, 0, 0, 0], parse::<u16>("PORT", &port)?))
        } else {
            DEFAULT_BIND_ADDR
        };

        let data_dir =
            PathBuf::from(lookup("PORTAL_DATA_DIR").unwrap_or_else(|| "./data".to_owned()));

        let storage = lookup("PORTAL_STORAGE").unwrap_or_else(|| "file".to_owned());
        let storage_backend = match storage.to_lowercase().as_str() {
            "file" => StorageBackendType::File {
                path: data_dir.clone(),
            },
            "memory" => StorageBackendType::Memory,
            "postgres" | "postgresql" => StorageBackendType::Postgres {
                url: lookup("DATABASE_URL").ok_or(ConfigError::Missing {
                    var: "DATABASE_URL",
                    because: "PORTAL_STORAGE=postgres",
                })?,
            },
            _ => {
                return Err(ConfigError::Invalid {
                    var: "PORTAL_STORAGE",
                    value: storage,
                    reason: "expected file, memory, or postgres".to_owned(),
                });
            }
        };

        let keys_dir = data_dir.join("keys");
        let key_file =
            lookup("PORTAL_KEY_FILE").map_or_else(|| keys_dir.join("portal.key"), PathBuf::from);
        let iv_file =
            lookup("PORTAL_IV_FILE").map_or_else(|| keys_dir.join("portal.iv"), PathBuf::from);

        let log_level = lookup("PORTAL_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let bootstrap_password = lookup("PORTAL_UNLOCK_PASSWORD").filter(|p| !p.is_empty());

        let defaults = ThrottlePolicy::default();
        let max_attempts = match lookup("PORTAL_UNLOCK_MAX_ATTEMPTS") {
            Some(v) => parse("PORTAL_UNLOCK_MAX_ATTEMPTS", &v)?,
            None => defaults.max_attempts,
        };
        let lockout = match lookup("PORTAL_UNLOCK_LOCKOUT_SECS") {
            Some(v) => Duration::from_secs(parse("PORTAL_UNLOCK_LOCKOUT_SECS", &v)?),
            None => defaults.lockout,
        };

        let require_unlock_for_writes = match lookup("PORTAL_REQUIRE_UNLOCK_FOR_WRITES") {
            Some(v) => parse_bool("PORTAL_REQUIRE_UNLOCK_FOR_WRITES", &v)?,
            None => true,
        };

        Ok(Self {
            bind_addr,
            storage_backend,
            key_file,
            iv_file,
            log_level,
            bootstrap_password,
            throttle: ThrottlePolicy {
                max_attempts,
                lockout,
            },
            require_unlock_for_writes,
        })
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_owned(),
            reason: "expected true or false".to_owned(),
        }),
    }
}
