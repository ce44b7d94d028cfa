//! TOML configuration for the clinicflow service.
//!
//! Sections default individually, so a file only needs the keys it changes.
//! The file is looked up from an explicit path, then the `CLINICFLOW_CONFIG`
//! environment variable, then the system location.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CLINICFLOW_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/clinicflow/clinicflow.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit path must load. Otherwise try `CLINICFLOW_CONFIG`, then
    /// [`SYSTEM_CONFIG_PATH`], then fall back to compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "CLINICFLOW_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Parent directories are created on open.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/clinicflow.db".to_string(),
        }
    }
}

/// Recovery, sweep and lease timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between lease renewals / reconciliation sweeps.
    pub sweep_interval_secs: u64,
    /// How long a held lease stays valid without renewal.
    pub lease_ttl_secs: u64,
    /// Stable name for this instance. Defaults to `clinicflow@<host>:<database path>`,
    /// so a restarted process takes back its own lease without waiting for it to expire.
    pub instance_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            lease_ttl_secs: 90,
            instance_id: None,
        }
    }
}

impl SchedulerConfig {
    /// Lease owner name for this process.
    pub fn owner(&self, database: &DatabaseConfig) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".into());
            format!("clinicflow@{host}:{}", database.path)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.database.path, "data/clinicflow.db");
        assert_eq!(cfg.scheduler.sweep_interval_secs, 30);
        assert!(cfg.scheduler.lease_ttl_secs > cfg.scheduler.sweep_interval_secs);
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [scheduler]
            sweep_interval_secs = 5
            instance_id = "clinic-eu-1"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.scheduler.sweep_interval_secs, 5);
        assert_eq!(cfg.scheduler.lease_ttl_secs, 90);
        assert_eq!(cfg.scheduler.owner(&cfg.database), "clinic-eu-1");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.server, ServerConfig::default());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\npath = \"/tmp/cf.db\"").unwrap();

        let cfg = AppConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(cfg.database.path, "/tmp/cf.db");
    }

    #[test]
    fn test_explicit_path_must_exist() {
        assert!(AppConfig::resolve(Some(Path::new("/nonexistent/clinicflow.toml"))).is_err());
    }

    #[test]
    fn test_default_owner_is_stable_per_database() {
        let cfg = SchedulerConfig::default();
        let db = DatabaseConfig::default();
        let other = DatabaseConfig {
            path: "/var/lib/clinicflow/other.db".to_string(),
        };

        assert_eq!(cfg.owner(&db), cfg.owner(&db));
        assert!(cfg.owner(&db).ends_with(":data/clinicflow.db"));
        assert_ne!(cfg.owner(&db), cfg.owner(&other));
    }
}
