mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use strata_core::{init_logging, AppConfig, AppConfigTrait, LoggingConfig, MigrationSettings};
use strata_migrate::{ExecOutcome, MigrationError, Verb};

use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Versioned, transactional schema migrations for PostgreSQL")]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Glob matching migration files (overrides STRATA_MIGRATIONS)
    #[arg(long, global = true)]
    migrations: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Create the target database if it does not exist
    Create,

    /// Drop the target database
    Drop,

    /// Apply pending migrations
    Up {
        /// Apply at most this many migrations (0 or negative: all)
        #[arg(allow_hyphen_values = true)]
        limit: Option<String>,
    },

    /// Revert applied migrations
    Down {
        /// Revert at most this many migrations (0 or negative: all)
        #[arg(allow_hyphen_values = true)]
        limit: Option<String>,
    },

    /// Create an empty migration file
    #[command(alias = "g")]
    Generate {
        /// Migration name, e.g. `add_users.up` or `initial`
        name: String,
    },
}

impl Commands {
    /// Verb and arguments in the form the migration command validates
    fn into_exec(self) -> (&'static str, Vec<String>) {
        match self {
            Commands::Create => ("create", Vec::new()),
            Commands::Drop => ("drop", Vec::new()),
            Commands::Up { limit } => ("up", limit.into_iter().collect()),
            Commands::Down { limit } => ("down", limit.into_iter().collect()),
            Commands::Generate { name } => ("generate", vec![name]),
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    init_logging(&LoggingConfig::from_env()?)?;

    let (verb, args) = cli.command.into_exec();
    let verb = Verb::parse(verb, &args).map_err(MigrationError::from)?;

    // Generating a file only needs the migration settings
    if let Verb::Generate { name } = verb {
        let mut settings = MigrationSettings::from_env()?;
        if let Some(glob) = cli.migrations {
            settings.path_glob = glob;
        }
        settings.validate()?;

        let path = commands::migrate::generate(&settings, &name)?;
        println!("{}", ExecOutcome::Generated { path });
        return Ok(());
    }

    let mut config = AppConfig::from_env_with_database_url(cli.database_url)?;
    if let Some(glob) = cli.migrations {
        config.migrations.path_glob = glob;
    }
    tracing::debug!(
        "Running in {} environment with migrations from {}",
        config.environment.as_str(),
        config.migrations.path_glob
    );

    commands::migrate::run(&config, verb).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
