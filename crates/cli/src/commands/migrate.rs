use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{AppConfig, AppConfigTrait, MigrationSettings};
use strata_migrate::{
    CancellationToken, MigrationCommand, MigrationConfig, MigrationManager, MigrationResult,
    PostgresConnector, Verb,
};
use tracing::{error, warn};

use crate::error::{CliError, EXIT_INTERRUPTED};

/// Write a new migration file; needs no database
pub fn generate(settings: &MigrationSettings, name: &str) -> MigrationResult<PathBuf> {
    MigrationManager::with_config(MigrationConfig::from(settings)).generate(name, Utc::now())
}

/// Run a database verb against the configured database and print what happened
pub async fn run(config: &AppConfig, verb: Verb) -> Result<(), CliError> {
    config.validate()?;

    let connector = PostgresConnector::new(&config.database_url)?;
    let command = MigrationCommand::new(Arc::new(connector), MigrationConfig::from(&config.migrations));

    let token = command.cancellation().clone();
    tokio::spawn(async move {
        let mut interrupts = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupts += 1;
            if on_interrupt(&token, interrupts) {
                error!("Interrupted again, aborting; the open transaction is discarded by the server");
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
    });

    let outcome = command.run(verb).await?;
    println!("{}", outcome);
    Ok(())
}

/// First interrupt cancels before the next migration; returns true when the
/// process should abort instead
fn on_interrupt(token: &CancellationToken, interrupts: usize) -> bool {
    if interrupts > 1 {
        return true;
    }
    warn!("Interrupt received, cancelling after the current migration (press Ctrl-C again to abort)");
    token.cancel();
    false
}
