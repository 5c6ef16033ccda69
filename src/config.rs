use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::SqlDropError;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variables recognized in addition to the generic
/// `SQLDROP_<SECTION>__<KEY>` form, and the config key each one sets.
const ENV_ALIASES: [(&str, &str); 3] = [
    ("DATABASE_URL", "database.uri"),
    ("SQLDROP_INTAKE_DIR", "paths.intake_dir"),
    ("SQLDROP_ARCHIVE_DIR", "paths.archive_dir"),
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub sqldrop: String,
    pub notify: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const SQLDROP_LEVEL: &str = "info";
    const NOTIFY_LEVEL: &str = "warn";

    fn default() -> Self {
        LoggingConfig {
            sqldrop: Self::SQLDROP_LEVEL.to_string(),
            notify: Self::NOTIFY_LEVEL.to_string(),
        }
    }

    /// The flexi_logger spec string for these levels
    pub fn log_spec(&self) -> String {
        format!("sqldrop={},notify={}", self.sqldrop, self.notify)
    }

    fn ensure_valid(&mut self) {
        Self::ensure_level(&mut self.sqldrop, "sqldrop", Self::SQLDROP_LEVEL);
        Self::ensure_level(&mut self.notify, "notify", Self::NOTIFY_LEVEL);
    }

    fn ensure_level(level: &mut String, name: &str, default: &str) {
        let str_original = level.clone();
        *level = level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&level.as_str()) {
            eprintln!(
                "Config error: {} log level of '{}' is invalid - using default of '{}'",
                name, str_original, default
            );
            *level = default.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub intake_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl PathsConfig {
    fn default() -> Self {
        PathsConfig {
            intake_dir: PathBuf::from("/app/sfdaily_update"),
            archive_dir: PathBuf::from("/app/sfdaily_processed"),
        }
    }

    fn ensure_valid(&self) -> Result<(), SqlDropError> {
        if self.intake_dir == self.archive_dir {
            return Err(SqlDropError::Error(format!(
                "Intake and archive directories must differ (both are '{}')",
                self.intake_dir.display()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub uri: String,
    pub busy_timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
}

impl DatabaseConfig {
    const DEFAULT_URI: &str = "file:sqldrop.db?mode=rwc";
    const DEFAULT_CONNECT_ATTEMPTS: u32 = 30;

    fn default() -> Self {
        DatabaseConfig {
            uri: Self::DEFAULT_URI.to_owned(),
            busy_timeout_ms: 5000,
            connect_attempts: Self::DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff_secs: 2,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_secs(self.connect_backoff_secs)
    }

    fn ensure_valid(&mut self) {
        if self.uri.trim().is_empty() {
            eprintln!(
                "Config error: database uri is empty - using default of '{}'",
                Self::DEFAULT_URI
            );
            self.uri = Self::DEFAULT_URI.to_owned();
        }

        if self.connect_attempts == 0 {
            eprintln!(
                "Config error: connect_attempts must be at least 1 - using default of {}",
                Self::DEFAULT_CONNECT_ATTEMPTS
            );
            self.connect_attempts = Self::DEFAULT_CONNECT_ATTEMPTS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub watch: bool,
}

impl SchedulerConfig {
    const DEFAULT_POLL_INTERVAL_SECS: u64 = 30 * 60;

    fn default() -> Self {
        SchedulerConfig {
            poll_interval_secs: Self::DEFAULT_POLL_INTERVAL_SECS,
            watch: false,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn ensure_valid(&mut self) {
        if self.poll_interval_secs == 0 {
            eprintln!(
                "Config error: poll_interval_secs must be at least 1 - using default of {}",
                Self::DEFAULT_POLL_INTERVAL_SECS
            );
            self.poll_interval_secs = Self::DEFAULT_POLL_INTERVAL_SECS;
        }
    }
}

/// Process-wide configuration. Loaded once at startup and handed to each
/// component; nothing reads it from ambient state afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn get_config_path(project_dirs: &ProjectDirs) -> PathBuf {
    project_dirs.data_local_dir().join(CONFIG_FILE_NAME)
}

impl Config {
    /// Loads the configuration from config.toml in the app's data directory.
    /// Writes the default config to disk if no file exists yet.
    pub fn load(project_dirs: &ProjectDirs) -> Result<Self, SqlDropError> {
        let config_path = get_config_path(project_dirs);

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::load_from(&config_path)
    }

    /// Loads defaults, merged with the TOML file at `config_path` (if it exists),
    /// merged with environment overrides.
    pub fn load_from(config_path: &Path) -> Result<Self, SqlDropError> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SQLDROP_").split("__"))
            .merge(
                Env::raw()
                    .only(&ENV_ALIASES.map(|(name, _)| name))
                    .map(|key| Self::env_alias(key.as_str()).into()),
            );

        let mut config: Config = figment.extract()?;
        config.ensure_valid()?;

        Ok(config)
    }

    fn env_alias(name: &str) -> String {
        ENV_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, key)| (*key).to_owned())
            .unwrap_or_else(|| name.to_ascii_lowercase())
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) -> Result<(), SqlDropError> {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.scheduler.ensure_valid();
        self.paths.ensure_valid()
    }
}
