use strata_core::ConfigError;
use strata_migrate::MigrationError;
use thiserror::Error;

/// Exit code for bad verbs, arguments or configuration values
pub const EXIT_USAGE: u8 = 2;

/// Exit code for everything that failed while doing the work
pub const EXIT_FAILURE: u8 = 1;

/// Exit code after a second interrupt aborts the process
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => EXIT_USAGE,
            CliError::Migration(e) if e.is_usage() => EXIT_USAGE,
            CliError::Migration(_) => EXIT_FAILURE,
        }
    }
}
