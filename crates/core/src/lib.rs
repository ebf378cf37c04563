pub mod app_config;
pub mod logging;

pub use app_config::{
    AppConfig, AppConfigTrait, ConfigError, ConfigSource, Environment, LoggingConfig,
    MigrationSettings,
};
pub use logging::{init_logging, LogFormat};
