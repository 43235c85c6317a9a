// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::install::AppOfferingMode;

/// Marina configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Root of the per-app gitops clone directories
    pub git_working_dir: PathBuf,
    /// Hard timeout around register + create + sync in the ACD phase
    pub acd_timeout: Duration,
    /// Full mode or agent-only (hyperion) mode
    pub app_offering_mode: AppOfferingMode,
    /// Internal-use mode: caller-selected deployment types are ignored
    pub internal_use: bool,
    /// Bulk install stream settings
    pub bulk: BulkStreamConfig,
    /// Database pool size
    pub max_connections: u32,
}

/// Where bulk install messages are published and consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkStreamConfig {
    /// Durable stream name
    pub stream: String,
    /// Subject bulk install messages are published on
    pub subject: String,
    /// Durable consumer name, also used as the queue group
    pub durable: String,
}

impl Default for BulkStreamConfig {
    fn default() -> Self {
        Self {
            stream: "ORCHESTRATOR".to_string(),
            subject: "CHART-GROUP-INSTALL".to_string(),
            durable: "CHART-GROUP-INSTALL-DURABLE".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `MARINA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `MARINA_GIT_WORKING_DIR`: clone root (default: /tmp/gitops/)
    /// - `MARINA_ACD_TIMEOUT_SECS`: ACD phase timeout (default: 60)
    /// - `MARINA_APP_OFFERING_MODE`: `FULL` or `EA_ONLY` (default: FULL)
    /// - `MARINA_INTERNAL_USE`: `true`/`false` (default: false)
    /// - `MARINA_BULK_STREAM`, `MARINA_BULK_SUBJECT`, `MARINA_BULK_DURABLE`
    /// - `MARINA_MAX_CONNECTIONS`: pool size (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("MARINA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("MARINA_DATABASE_URL"))?;

        let git_working_dir = PathBuf::from(
            std::env::var("MARINA_GIT_WORKING_DIR").unwrap_or_else(|_| "/tmp/gitops/".to_string()),
        );

        let acd_timeout_secs: u64 = std::env::var("MARINA_ACD_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MARINA_ACD_TIMEOUT_SECS", "must be a positive integer")
            })?;
        if acd_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "MARINA_ACD_TIMEOUT_SECS",
                "must be a positive integer",
            ));
        }

        let app_offering_mode = match std::env::var("MARINA_APP_OFFERING_MODE")
            .unwrap_or_else(|_| "FULL".to_string())
            .as_str()
        {
            "FULL" => AppOfferingMode::Full,
            "EA_ONLY" => AppOfferingMode::Hyperion,
            _ => {
                return Err(ConfigError::Invalid(
                    "MARINA_APP_OFFERING_MODE",
                    "must be FULL or EA_ONLY",
                ));
            }
        };

        let internal_use: bool = std::env::var("MARINA_INTERNAL_USE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("MARINA_INTERNAL_USE", "must be true or false"))?;

        let defaults = BulkStreamConfig::default();
        let bulk = BulkStreamConfig {
            stream: std::env::var("MARINA_BULK_STREAM").unwrap_or(defaults.stream),
            subject: std::env::var("MARINA_BULK_SUBJECT").unwrap_or(defaults.subject),
            durable: std::env::var("MARINA_BULK_DURABLE").unwrap_or(defaults.durable),
        };

        let max_connections: u32 = std::env::var("MARINA_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MARINA_MAX_CONNECTIONS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            git_working_dir,
            acd_timeout: Duration::from_secs(acd_timeout_secs),
            app_offering_mode,
            internal_use,
            bulk,
            max_connections,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL: [&str; 8] = [
        "MARINA_GIT_WORKING_DIR",
        "MARINA_ACD_TIMEOUT_SECS",
        "MARINA_APP_OFFERING_MODE",
        "MARINA_INTERNAL_USE",
        "MARINA_BULK_STREAM",
        "MARINA_BULK_SUBJECT",
        "MARINA_BULK_DURABLE",
        "MARINA_MAX_CONNECTIONS",
    ];

    /// Sets env vars for a test and restores them on drop
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for key in OPTIONAL {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("MARINA_DATABASE_URL", "postgres://localhost/marina");
        guard.clear_optional();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/marina");
        assert_eq!(config.git_working_dir, PathBuf::from("/tmp/gitops/"));
        assert_eq!(config.acd_timeout, Duration::from_secs(60));
        assert_eq!(config.app_offering_mode, AppOfferingMode::Full);
        assert!(!config.internal_use);
        assert_eq!(config.bulk, BulkStreamConfig::default());
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("MARINA_DATABASE_URL", "sqlite:marina.db");
        guard.set("MARINA_GIT_WORKING_DIR", "/var/lib/marina/git");
        guard.set("MARINA_ACD_TIMEOUT_SECS", "5");
        guard.set("MARINA_APP_OFFERING_MODE", "EA_ONLY");
        guard.set("MARINA_INTERNAL_USE", "true");
        guard.set("MARINA_BULK_STREAM", "S");
        guard.set("MARINA_BULK_SUBJECT", "S.install");
        guard.set("MARINA_BULK_DURABLE", "S-durable");
        guard.set("MARINA_MAX_CONNECTIONS", "3");

        let config = Config::from_env().unwrap();

        assert_eq!(config.git_working_dir, PathBuf::from("/var/lib/marina/git"));
        assert_eq!(config.acd_timeout, Duration::from_secs(5));
        assert_eq!(config.app_offering_mode, AppOfferingMode::Hyperion);
        assert!(config.internal_use);
        assert_eq!(config.bulk.stream, "S");
        assert_eq!(config.bulk.subject, "S.install");
        assert_eq!(config.bulk.durable, "S-durable");
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("MARINA_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MARINA_DATABASE_URL")));
        assert!(err.to_string().contains("MARINA_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("MARINA_DATABASE_URL", "postgres://localhost/marina");
        guard.clear_optional();
        guard.set("MARINA_ACD_TIMEOUT_SECS", "soon");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("MARINA_ACD_TIMEOUT_SECS", _)
        ));

        guard.set("MARINA_ACD_TIMEOUT_SECS", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("MARINA_ACD_TIMEOUT_SECS", _)
        ));
    }

    #[test]
    fn test_config_invalid_offering_mode() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("MARINA_DATABASE_URL", "postgres://localhost/marina");
        guard.clear_optional();
        guard.set("MARINA_APP_OFFERING_MODE", "LITE");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("MARINA_APP_OFFERING_MODE", _)
        ));
    }

    #[test]
    fn test_config_invalid_internal_use() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("MARINA_DATABASE_URL", "postgres://localhost/marina");
        guard.clear_optional();
        guard.set("MARINA_INTERNAL_USE", "yes");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("MARINA_INTERNAL_USE", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
