use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default glob used to discover migration artifacts
pub const DEFAULT_MIGRATIONS_GLOB: &str = "db/migrations/*.yaml";

/// Default name of the ledger table
pub const DEFAULT_MIGRATION_TABLE: &str = "strata_migration_meta";

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
    Nested,
}

/// Environment enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue {
                field: "environment".to_string(),
                value: s.to_string(),
                expected: "development, testing, or production".to_string(),
            }),
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub migrations: MigrationSettings,
    pub logging: LoggingConfig,
}

/// Where migrations live and how they are tracked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Glob pattern matching migration artifacts
    pub path_glob: String,
    /// Ledger table name
    pub table: String,
    /// Take an advisory lock for the duration of each batch
    pub lock: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            path_glob: DEFAULT_MIGRATIONS_GLOB.to_string(),
            table: DEFAULT_MIGRATION_TABLE.to_string(),
            lock: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from the environment, letting an explicit database URL win over `DATABASE_URL`
    pub fn from_env_with_database_url(database_url: Option<String>) -> Result<Self, ConfigError> {
        let environment = get_env_or_default("APP_ENV", "development")?;
        let environment = Environment::from_str(&environment)?;

        let database_url = match database_url {
            Some(url) => url,
            None => get_env_required("DATABASE_URL")?,
        };

        let migrations = MigrationSettings::from_env()?;
        let logging = LoggingConfig::from_env()?;

        Ok(AppConfig {
            environment,
            database_url,
            migrations,
            logging,
        })
    }
}

impl AppConfigTrait for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_database_url(None)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "database_url".to_string(),
                reason: "Database URL cannot be empty".to_string(),
            });
        }

        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.database_url.clone(),
                expected: "a postgres:// or postgresql:// URL".to_string(),
            });
        }

        self.migrations.validate()?;
        self.logging.validate()?;

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "environment".to_string(),
            ConfigSource::EnvVar("APP_ENV".to_string()),
        );
        sources.insert(
            "database_url".to_string(),
            ConfigSource::EnvVar("DATABASE_URL".to_string()),
        );
        sources.insert("migrations".to_string(), ConfigSource::Nested);
        sources.insert("logging".to_string(), ConfigSource::Nested);
        sources
    }
}

impl AppConfigTrait for MigrationSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let path_glob = get_env_or_default("STRATA_MIGRATIONS", DEFAULT_MIGRATIONS_GLOB)?;
        let table = get_env_or_default("STRATA_MIGRATION_TABLE", DEFAULT_MIGRATION_TABLE)?;
        let lock = get_env_or_default("STRATA_MIGRATION_LOCK", "true")?;
        let lock = parse_bool("lock", &lock)?;

        Ok(MigrationSettings {
            path_glob,
            table,
            lock,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.path_glob.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "path_glob".to_string(),
                reason: "Migration path glob cannot be empty".to_string(),
            });
        }

        // The table name is interpolated into SQL, so it must be a plain identifier.
        let valid_table = !self.table.is_empty()
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !self.table.starts_with(|c: char| c.is_ascii_digit());
        if !valid_table {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: self.table.clone(),
                expected: "an identifier made of letters, digits and underscores".to_string(),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "path_glob".to_string(),
            ConfigSource::EnvVar("STRATA_MIGRATIONS".to_string()),
        );
        sources.insert(
            "table".to_string(),
            ConfigSource::EnvVar("STRATA_MIGRATION_TABLE".to_string()),
        );
        sources.insert(
            "lock".to_string(),
            ConfigSource::EnvVar("STRATA_MIGRATION_LOCK".to_string()),
        );
        sources
    }
}

impl AppConfigTrait for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let level = get_env_or_default("LOG_LEVEL", "info")?;
        let format = get_env_or_default("LOG_FORMAT", "compact")?;

        Ok(LoggingConfig { level, format })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "level".to_string(),
                value: self.level.clone(),
                expected: "trace, debug, info, warn, or error".to_string(),
            });
        }

        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "format".to_string(),
                value: self.format.clone(),
                expected: "compact, pretty, or json".to_string(),
            });
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "level".to_string(),
            ConfigSource::EnvVar("LOG_LEVEL".to_string()),
        );
        sources.insert(
            "format".to_string(),
            ConfigSource::EnvVar("LOG_FORMAT".to_string()),
        );
        sources
    }
}

// Helper functions for environment variable handling
fn get_env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar {
        var: key.to_string(),
    })
}

fn get_env_or_default(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true or false".to_string(),
        }),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}
