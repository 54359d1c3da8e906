/// Configuration management for the taskjoin server
///
/// Handles server binding, storage locations, scheduling parameters and the
/// source of the workflow/dataset config document. Every value can be set
/// through a `TASKJOIN_*` environment variable.

use crate::{catalog::ConfigSource, runtime::SchedulerSettings};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Task queue configuration
    pub scheduler: SchedulerConfig,
    /// Dataset refresh configuration
    pub refresh: RefreshConfig,
    /// Config document source
    pub source: SourceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory (default: "data")
    /// Holds: taskjoin.db, datasets/{dataset_id}.db
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(with = "humantime_serde")]
    pub lease: Duration,
    pub max_attempts: i64,
    #[serde(with = "humantime_serde")]
    pub idle_delay: Duration,
    pub claim_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// How often the refresh job checks for due datasets
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Github,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// File path or contents API URL; no initial load when unset
    pub location: Option<String>,
}

impl SourceConfig {
    pub fn config_source(&self) -> Option<ConfigSource> {
        let location = self.location.as_ref().filter(|l| !l.is_empty())?;
        Some(match self.kind {
            SourceKind::File => ConfigSource::File(PathBuf::from(location)),
            SourceKind::Github => ConfigSource::GitHub(location.clone()),
        })
    }
}

impl SchedulerConfig {
    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            lease: self.lease,
            max_attempts: self.max_attempts,
            idle_delay: self.idle_delay,
            claim_retries: self.claim_retries,
            retry_backoff: self.retry_backoff,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let defaults = SchedulerSettings::default();
        Self {
            server: ServerConfig {
                host: std::env::var("TASKJOIN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("TASKJOIN_PORT", 8000),
            },
            database: DatabaseConfig {
                data_dir: PathBuf::from(
                    std::env::var("TASKJOIN_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                ),
            },
            scheduler: SchedulerConfig {
                lease: Duration::from_secs(env_or(
                    "TASKJOIN_LEASE_SECS",
                    defaults.lease.as_secs(),
                )),
                max_attempts: env_or("TASKJOIN_MAX_ATTEMPTS", defaults.max_attempts),
                idle_delay: defaults.idle_delay,
                claim_retries: defaults.claim_retries,
                retry_backoff: defaults.retry_backoff,
            },
            refresh: RefreshConfig {
                tick: Duration::from_secs(env_or("TASKJOIN_REFRESH_TICK_SECS", 5)),
            },
            source: SourceConfig {
                kind: match std::env::var("TASKJOIN_CONFIG_SOURCE").as_deref() {
                    Ok("github") => SourceKind::Github,
                    _ => SourceKind::File,
                },
                location: std::env::var("TASKJOIN_CONFIG").ok(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_selection() {
        let file = SourceConfig {
            kind: SourceKind::File,
            location: Some("conf/taskjoin.yaml".into()),
        };
        assert_eq!(
            file.config_source(),
            Some(ConfigSource::File(PathBuf::from("conf/taskjoin.yaml")))
        );

        let github = SourceConfig {
            kind: SourceKind::Github,
            location: Some("https://api.github.com/repos/o/r/contents/c.yaml".into()),
        };
        assert!(matches!(github.config_source(), Some(ConfigSource::GitHub(_))));

        let unset = SourceConfig {
            kind: SourceKind::File,
            location: None,
        };
        assert_eq!(unset.config_source(), None);
    }

    #[test]
    fn test_scheduler_settings_carry_over() {
        let config = SchedulerConfig {
            lease: Duration::from_secs(60),
            max_attempts: 7,
            idle_delay: Duration::ZERO,
            claim_retries: 2,
            retry_backoff: Duration::from_millis(1),
        };
        let settings = config.settings();
        assert_eq!(settings.lease, Duration::from_secs(60));
        assert_eq!(settings.max_attempts, 7);
    }
}
