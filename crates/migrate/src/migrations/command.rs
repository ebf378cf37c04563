//! Migration command façade
//!
//! Validates a verb and its arguments, then either manages the database
//! itself (`create`, `drop`), runs one transactional batch (`up`, `down`), or
//! writes a new migration file (`generate`).

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument, Span};

use super::definitions::{Direction, MigrationConfig, MigrationRunResult, RollbackResult};
use super::ledger::Ledger;
use super::manager::MigrationManager;
use super::runner::MigrationRunner;
use crate::backends::{Connector, DatabaseConnection, DatabaseTransaction};
use crate::cancel::CancellationToken;
use crate::error::{MigrationError, MigrationResult, UsageError};
use crate::lock;
use crate::transaction::TransactionGuard;

/// Verbs accepted by [`MigrationCommand::exec`]
pub const VALID_VERBS: &str = "create|drop|up|down|g|generate";

/// A validated command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Create,
    Drop,
    Up { limit: Option<usize> },
    Down { limit: Option<usize> },
    Generate { name: String },
}

impl Verb {
    /// Validate a verb and its arguments without touching the database
    pub fn parse(verb: &str, args: &[String]) -> Result<Self, UsageError> {
        match verb {
            "create" => Ok(Verb::Create),
            "drop" => Ok(Verb::Drop),
            "up" => Ok(Verb::Up {
                limit: parse_limit(args.first())?,
            }),
            "down" => Ok(Verb::Down {
                limit: parse_limit(args.first())?,
            }),
            "g" | "generate" => match args.first().map(|name| name.trim()) {
                Some(name) if !name.is_empty() => Ok(Verb::Generate {
                    name: name.to_string(),
                }),
                _ => Err(UsageError::MissingName),
            },
            other => Err(UsageError::InvalidCommand {
                command: other.to_string(),
                expected: VALID_VERBS.to_string(),
            }),
        }
    }
}

/// A missing limit or one that is zero or negative means "no limit"
fn parse_limit(arg: Option<&String>) -> Result<Option<usize>, UsageError> {
    let Some(raw) = arg else {
        return Ok(None);
    };

    let value: i64 = raw.trim().parse().map_err(|_| UsageError::InvalidLimit {
        value: raw.clone(),
    })?;

    if value <= 0 {
        Ok(None)
    } else {
        usize::try_from(value)
            .map(Some)
            .map_err(|_| UsageError::InvalidLimit { value: raw.clone() })
    }
}

/// What a successful command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Created { database: String },
    Dropped { database: String },
    Applied(MigrationRunResult),
    RolledBack(RollbackResult),
    Generated { path: PathBuf },
}

impl fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecOutcome::Created { database } => write!(f, "Database {} is ready", database),
            ExecOutcome::Dropped { database } => write!(f, "Database {} dropped", database),
            ExecOutcome::Applied(result) if result.applied_migrations.is_empty() => {
                write!(f, "No pending migrations")
            }
            ExecOutcome::Applied(result) => write!(
                f,
                "Applied {} migration(s): {} ({}ms)",
                result.applied_migrations.len(),
                result.applied_migrations.join(", "),
                result.execution_time_ms
            ),
            ExecOutcome::RolledBack(result) if result.rolled_back_migrations.is_empty() => {
                write!(f, "Nothing to roll back")
            }
            ExecOutcome::RolledBack(result) => write!(
                f,
                "Rolled back {} migration(s): {} ({}ms)",
                result.rolled_back_migrations.len(),
                result.rolled_back_migrations.join(", "),
                result.execution_time_ms
            ),
            ExecOutcome::Generated { path } => write!(f, "Created {}", path.display()),
        }
    }
}

/// Top-level entry point for migration verbs
pub struct MigrationCommand {
    connector: Arc<dyn Connector>,
    manager: MigrationManager,
    cancellation: CancellationToken,
    span: Span,
}

impl MigrationCommand {
    pub fn new(connector: Arc<dyn Connector>, config: MigrationConfig) -> Self {
        let database = connector.database_name().unwrap_or_default();
        let span = tracing::info_span!("migration", database = %database, table = %config.table);

        Self {
            connector,
            manager: MigrationManager::with_config(config),
            cancellation: CancellationToken::new(),
            span,
        }
    }

    /// Attach every event of this command to `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        self.manager.config()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Validate and run one verb
    pub async fn exec(&self, verb: &str, args: &[String]) -> MigrationResult<ExecOutcome> {
        let verb = Verb::parse(verb, args)?;
        self.run(verb).await
    }

    pub async fn run(&self, verb: Verb) -> MigrationResult<ExecOutcome> {
        match verb {
            Verb::Create => self.create().await,
            Verb::Drop => self.drop_database().await,
            Verb::Up { limit } => self.up(limit).await,
            Verb::Down { limit } => self.down(limit).await,
            Verb::Generate { name } => self.generate(&name),
        }
    }

    pub async fn create(&self) -> MigrationResult<ExecOutcome> {
        let database = self.connector.database_name()?;
        self.span.in_scope(|| info!("Creating database: {}", database));

        self.connector
            .create_database()
            .instrument(self.span.clone())
            .await?;
        Ok(ExecOutcome::Created { database })
    }

    pub async fn drop_database(&self) -> MigrationResult<ExecOutcome> {
        let database = self.connector.database_name()?;
        self.span.in_scope(|| info!("Dropping database: {}", database));

        self.connector
            .drop_database()
            .instrument(self.span.clone())
            .await?;
        Ok(ExecOutcome::Dropped { database })
    }

    pub async fn up(&self, limit: Option<usize>) -> MigrationResult<ExecOutcome> {
        self.span.in_scope(|| match limit {
            Some(limit) => info!("Starting migration up. limit: {}", limit),
            None => info!("Starting migration up"),
        });
        self.batch(Direction::Up, limit).await
    }

    pub async fn down(&self, limit: Option<usize>) -> MigrationResult<ExecOutcome> {
        self.span.in_scope(|| match limit {
            Some(limit) => info!("Starting migration down. limit: {}", limit),
            None => info!("Starting migration down"),
        });
        self.batch(Direction::Down, limit).await
    }

    /// Filesystem only; never opens a connection
    pub fn generate(&self, name: &str) -> MigrationResult<ExecOutcome> {
        if name.trim().is_empty() {
            return Err(UsageError::MissingName.into());
        }
        let path = self.span.in_scope(|| self.manager.generate(name, Utc::now()))?;
        Ok(ExecOutcome::Generated { path })
    }

    async fn batch(&self, direction: Direction, limit: Option<usize>) -> MigrationResult<ExecOutcome> {
        // Format errors surface before any connection is opened
        let migrations = self.manager.load_migrations()?;
        let runner = MigrationRunner::new(migrations, Ledger::new(self.config().table.clone()))
            .with_cancellation(self.cancellation.clone());

        let mut conn = self.connector.connect().instrument(self.span.clone()).await?;
        let result = self
            .transactional(&mut *conn, &runner, direction, limit)
            .instrument(self.span.clone())
            .await;

        if let Err(e) = conn.close().await {
            self.span.in_scope(|| warn!("Failed to close connection: {}", e));
        }
        result
    }

    /// One transaction for the whole batch: commit on success, roll back on
    /// error or panic.
    async fn transactional(
        &self,
        conn: &mut dyn DatabaseConnection,
        runner: &MigrationRunner,
        direction: Direction,
        limit: Option<usize>,
    ) -> MigrationResult<ExecOutcome> {
        let mut guard = TransactionGuard::new(conn.begin().await?);

        let outcome = AssertUnwindSafe(self.apply(guard.transaction()?, runner, direction, limit))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(outcome)) => {
                guard.commit().await?;
                Ok(outcome)
            }
            Ok(Err(e)) => {
                error!("Migration {} failed: {}", direction.label(), e);
                rollback(guard).await;
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Recovered from panic during migration: {}", message);
                rollback(guard).await;
                Err(MigrationError::Panicked { message })
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn DatabaseTransaction,
        runner: &MigrationRunner,
        direction: Direction,
        limit: Option<usize>,
    ) -> MigrationResult<ExecOutcome> {
        if self.config().lock {
            let key = lock::lock_key(&self.connector.database_name()?);
            lock::acquire(&mut *tx, key).await?;
        }

        runner.ledger().ensure_table(&mut *tx).await?;

        match direction {
            Direction::Up => runner.up(tx, limit).await.map(ExecOutcome::Applied),
            Direction::Down => runner.down(tx, limit).await.map(ExecOutcome::RolledBack),
        }
    }
}

async fn rollback(guard: TransactionGuard) {
    if let Err(e) = guard.rollback().await {
        error!("Rollback failed: {}", e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
