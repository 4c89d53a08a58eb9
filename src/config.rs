//! Configuration loading
//!
//! Applications load settings from `config/config.toml` or environment variables
//! using [`TidemarkConfig::load()`]. Environment keys use the `TIDEMARK` prefix and
//! `__` as the section separator, e.g. `TIDEMARK__DATABASE__URL` or
//! `TIDEMARK__MIGRATION__LOCK_TTL_SECONDS`.

use crate::migration::lock::DEFAULT_LOCK_NAME;
use crate::migration::migrator::{default_holder_id, MigratorConfig, MIN_LOCK_TTL};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "TIDEMARK";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TidemarkConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_url")]
    pub url: String,
    #[serde(default = "default_db_name")]
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            name: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
    /// Lease length; renewed before every step
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,
    /// Overall deadline for one `up`/`down` run
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_verify_history")]
    pub verify_history: bool,
    #[serde(default = "default_records_collection")]
    pub records_collection: String,
    #[serde(default = "default_locks_collection")]
    pub locks_collection: String,
    /// Overrides the generated `{pid}-{uuid}` holder id
    #[serde(default)]
    pub holder_id: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            lock_name: default_lock_name(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            timeout_seconds: default_timeout_seconds(),
            verify_history: default_verify_history(),
            records_collection: default_records_collection(),
            locks_collection: default_locks_collection(),
            holder_id: None,
        }
    }
}

fn default_db_url() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_db_name() -> String {
    "tidemark_dev".to_string()
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}

fn default_lock_ttl_seconds() -> u64 {
    15 * 60
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_verify_history() -> bool {
    true
}

fn default_records_collection() -> String {
    "schema_migrations".to_string()
}

fn default_locks_collection() -> String {
    "migration_locks".to_string()
}

impl MigrationSettings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Reject settings that cannot give mutual exclusion
    ///
    /// A lease shorter than one second expires before the first step can renew it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_ttl() < MIN_LOCK_TTL {
            return Err(ConfigError::Message(format!(
                "migration.lock_ttl_seconds must be at least {}, got {}",
                MIN_LOCK_TTL.as_secs(),
                self.lock_ttl_seconds
            )));
        }
        if self.lock_name.trim().is_empty() {
            return Err(ConfigError::Message("migration.lock_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Runtime options for a [`Migrator`](crate::migration::Migrator)
    pub fn migrator_config(&self) -> MigratorConfig {
        MigratorConfig {
            lock_name: self.lock_name.clone(),
            holder_id: self.holder_id.clone().unwrap_or_else(default_holder_id),
            lock_ttl: self.lock_ttl(),
            verify_history: self.verify_history,
        }
    }
}

impl TidemarkConfig {
    /// Load the configuration from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`load`](Self::load) with an explicit file path (extension optional)
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // An unreadable or malformed file is not fatal; retry with env only
                if std::path::Path::new(path).exists() {
                    log::warn!("failed to load config file '{}', falling back to env: {}", path, err);
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let explicit_url = settings.get_string("database.url").is_ok();
        let mut config: TidemarkConfig = settings.try_deserialize().map_err(|e| {
            ConfigError::Message(format!(
                "Tidemark configuration could not be loaded from file or environment: {}",
                e
            ))
        })?;

        // Conventional fallbacks when neither the file nor TIDEMARK__DATABASE__URL set one
        if !explicit_url {
            if let Some(url) = ["TIDEMARK_DATABASE_URL", "DATABASE_URL"]
                .iter()
                .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
            {
                config.database.url = url;
            }
        }

        config.migration.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TidemarkConfig::default();
        assert_eq!(config.database.url, "mongodb://localhost:27017");
        assert_eq!(config.migration.lock_name, "migration_lock");
        assert_eq!(config.migration.lock_ttl(), Duration::from_secs(900));
        assert_eq!(config.migration.records_collection, "schema_migrations");
        assert!(config.migration.verify_history);
    }

    #[test]
    #[serial]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tidemark.toml");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(
            file,
            "[database]\nurl = \"mongodb://db.internal:27017\"\nname = \"platform\"\n\n\
             [migration]\nlock_ttl_seconds = 60\nholder_id = \"deploy-7\""
        )
        .expect("write config");

        let config = TidemarkConfig::load_from(path.to_str().expect("utf-8 path")).expect("load");
        assert_eq!(config.database.url, "mongodb://db.internal:27017");
        assert_eq!(config.database.name, "platform");
        assert_eq!(config.migration.lock_ttl_seconds, 60);
        assert_eq!(config.migration.timeout_seconds, 300);

        let migrator = config.migration.migrator_config();
        assert_eq!(migrator.holder_id, "deploy-7");
        assert_eq!(migrator.lock_ttl, Duration::from_secs(60));
    }

    #[test]
    #[serial]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_database_url_fallback() {
        std::env::set_var("DATABASE_URL", "mongodb://fallback:27017");
        let config = TidemarkConfig::load_from("does/not/exist").expect("load");
        std::env::remove_var("DATABASE_URL");
        assert_eq!(config.database.url, "mongodb://fallback:27017");
    }

    #[test]
    #[serial]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_explicit_url_wins_over_fallback() {
        std::env::set_var("DATABASE_URL", "mongodb://fallback:27017");

        std::env::set_var("TIDEMARK__DATABASE__URL", "mongodb://explicit:27017");
        let from_env = TidemarkConfig::load_from("does/not/exist");
        std::env::remove_var("TIDEMARK__DATABASE__URL");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tidemark.toml");
        std::fs::write(&path, "[database]\nurl = \"mongodb://from-file:27017\"\n").expect("write config");
        let from_file = TidemarkConfig::load_from(path.to_str().expect("utf-8 path"));
        std::env::remove_var("DATABASE_URL");

        assert_eq!(from_env.expect("load").database.url, "mongodb://explicit:27017");
        assert_eq!(from_file.expect("load").database.url, "mongodb://from-file:27017");
    }

    #[test]
    #[serial]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_zero_lock_ttl_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tidemark.toml");
        std::fs::write(&path, "[migration]\nlock_ttl_seconds = 0\n").expect("write config");

        let err = TidemarkConfig::load_from(path.to_str().expect("utf-8 path")).expect_err("zero TTL");
        assert!(err.to_string().contains("lock_ttl_seconds"));

        let settings = MigrationSettings {
            lock_ttl_seconds: 1,
            ..MigrationSettings::default()
        };
        settings.validate().expect("one second is the minimum");
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let settings = MigrationSettings {
            timeout_seconds: u64::MAX,
            ..MigrationSettings::default()
        };
        let ctx = crate::migration::MigrationContext::with_timeout(settings.timeout());
        assert!(!ctx.is_done());
    }
}
