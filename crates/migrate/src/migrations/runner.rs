//! Migration Runner - Executes migrations against the database
//!
//! Walks the sorted artifact list forwards for `up` and backwards for `down`.
//! The runner never commits: the caller owns the transaction and decides what
//! happens to it when an error comes back.

use std::time::Instant;
use tracing::info;

use super::artifact::MigrationArtifact;
use super::definitions::{Direction, MigrationKind, MigrationRunResult, RollbackResult};
use super::ledger::Ledger;
use crate::backends::DatabaseTransaction;
use crate::cancel::CancellationToken;
use crate::error::{MigrationError, MigrationResult};

/// Migration runner that executes migrations inside one transaction
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations: Vec<MigrationArtifact>,
    ledger: Ledger,
    cancellation: CancellationToken,
}

impl MigrationRunner {
    /// Create a runner; artifacts are stable-sorted ascending by version
    pub fn new(mut migrations: Vec<MigrationArtifact>, ledger: Ledger) -> Self {
        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Self {
            migrations,
            ledger,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Version recorded last, or `None` when nothing has been recorded
    async fn recorded_version(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<Option<String>> {
        match self.ledger.current_version(tx).await {
            Ok(version) => Ok(Some(version)),
            Err(MigrationError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn check_cancelled(&self) -> MigrationResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        Ok(())
    }

    async fn execute(
        &self,
        tx: &mut dyn DatabaseTransaction,
        migration: &MigrationArtifact,
        direction: Direction,
    ) -> MigrationResult<()> {
        info!(
            "Applying migration: [{}]: {}",
            direction.label(),
            migration.path.display()
        );

        for statement in migration.statements() {
            if statement.trim().is_empty() {
                continue;
            }
            tx.execute(&statement, &[]).await?;
        }
        Ok(())
    }

    /// Apply pending artifacts in ascending order.
    ///
    /// `limit` caps the number of artifacts applied; skipped ones do not count.
    pub async fn up(
        &self,
        tx: &mut dyn DatabaseTransaction,
        limit: Option<usize>,
    ) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let current = self.recorded_version(&mut *tx).await?;

        let mut result = MigrationRunResult::default();
        for migration in &self.migrations {
            if limit.map_or(false, |limit| result.applied_migrations.len() >= limit) {
                break;
            }
            if migration.kind() == MigrationKind::Down {
                continue;
            }
            if current.as_deref().map_or(false, |current| migration.version.as_str() <= current) {
                result.skipped_count += 1;
                continue;
            }

            self.check_cancelled()?;
            self.execute(&mut *tx, migration, Direction::Up).await?;
            self.ledger
                .save(&mut *tx, &migration.version, migration.kind())
                .await?;
            result.applied_migrations.push(migration.version.clone());
        }

        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }

    /// Revert recorded artifacts in descending order.
    ///
    /// Only down artifacts run, so the baseline is never reverted: once a
    /// baseline was applied, its ledger row survives a full `down` and the
    /// ledger does not end up empty. Reverting it means dropping the database.
    /// An empty ledger means there is nothing to revert.
    pub async fn down(
        &self,
        tx: &mut dyn DatabaseTransaction,
        limit: Option<usize>,
    ) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();
        let mut result = RollbackResult::default();

        let current = match self.recorded_version(&mut *tx).await? {
            Some(current) => current,
            None => {
                info!("Nothing to roll back");
                return Ok(result);
            }
        };

        for migration in self.migrations.iter().rev() {
            if limit.map_or(false, |limit| result.rolled_back_migrations.len() >= limit) {
                break;
            }
            if migration.kind() != MigrationKind::Down {
                continue;
            }
            if migration.version > current {
                continue;
            }

            self.check_cancelled()?;
            self.execute(&mut *tx, migration, Direction::Down).await?;
            self.ledger.delete(&mut *tx, &migration.version).await?;
            result.rolled_back_migrations.push(migration.version.clone());
        }

        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }
}
