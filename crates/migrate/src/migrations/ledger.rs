//! Version ledger
//!
//! One row per applied version. Every write re-introspects the catalog and
//! stores the whole snapshot, so the latest row always describes the database
//! as it was after that step, whatever happened to it before.

use super::definitions::{LedgerRecord, MigrationKind, SchemaSnapshot, BASELINE_VERSION};
use super::introspect::CatalogIntrospector;
use crate::backends::{DatabaseRow, DatabaseTransaction, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};

const RECORD_COLUMNS: &str = "version, kind, cache, rollback_query, created_at, updated_at";

/// Reads and writes the ledger table inside the caller's transaction
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    introspector: CatalogIntrospector,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            introspector: CatalogIntrospector::new(table.clone()),
            table,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table when it is missing
    pub async fn ensure_table(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             version VARCHAR(14) PRIMARY KEY, \
             cache JSONB, \
             kind VARCHAR NOT NULL, \
             rollback_query TEXT, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            self.table
        );
        tx.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Highest recorded version, or [`MigrationError::NotFound`] when the ledger is empty
    pub async fn current_version(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<String> {
        let sql = format!("SELECT version FROM {} ORDER BY version DESC LIMIT 1", self.table);
        match tx.fetch_optional(&sql, &[]).await? {
            Some(row) => row.get_string("version"),
            None => Err(MigrationError::NotFound),
        }
    }

    pub async fn find(
        &self,
        tx: &mut dyn DatabaseTransaction,
        version: &str,
    ) -> MigrationResult<Option<LedgerRecord>> {
        let sql = format!("SELECT {} FROM {} WHERE version = $1", RECORD_COLUMNS, self.table);
        tx.fetch_optional(&sql, &[DatabaseValue::from(version)])
            .await?
            .map(|row| decode_record(&row))
            .transpose()
    }

    pub async fn latest(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<Option<LedgerRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY version DESC LIMIT 1",
            RECORD_COLUMNS, self.table
        );
        tx.fetch_optional(&sql, &[])
            .await?
            .map(|row| decode_record(&row))
            .transpose()
    }

    /// Record `version` with a freshly introspected snapshot, inserting or updating
    pub async fn save(
        &self,
        tx: &mut dyn DatabaseTransaction,
        version: &str,
        kind: MigrationKind,
    ) -> MigrationResult<()> {
        let snapshot = self.introspector.read(tx).await?;
        let cache = serde_json::to_value(&snapshot)?;
        let params = [
            DatabaseValue::from(version),
            DatabaseValue::from(kind.as_str()),
            DatabaseValue::Json(cache),
        ];

        if self.find(tx, version).await?.is_some() {
            let sql = format!(
                "UPDATE {} SET kind = $2, cache = $3, updated_at = now() WHERE version = $1",
                self.table
            );
            tx.execute(&sql, &params).await?;
        } else {
            let sql = format!(
                "INSERT INTO {} (version, kind, cache) VALUES ($1, $2, $3)",
                self.table
            );
            tx.execute(&sql, &params).await?;
        }

        tracing::debug!("Recorded version {} ({})", version, kind);
        Ok(())
    }

    pub async fn delete(&self, tx: &mut dyn DatabaseTransaction, version: &str) -> MigrationResult<()> {
        let sql = format!("DELETE FROM {} WHERE version = $1", self.table);
        tx.execute(&sql, &[DatabaseValue::from(version)]).await?;
        Ok(())
    }

    /// Cached schema of the latest version.
    ///
    /// An empty ledger is seeded with a baseline row built from the live catalog.
    pub async fn schema(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<SchemaSnapshot> {
        match self.latest(tx).await? {
            Some(LedgerRecord {
                cache: Some(snapshot),
                ..
            }) => Ok(snapshot),
            Some(_) => self.introspector.read(tx).await,
            None => {
                tracing::info!("Ledger is empty, seeding baseline from the live catalog");
                self.save(tx, BASELINE_VERSION, MigrationKind::Schema).await?;
                self.introspector.read(tx).await
            }
        }
    }
}

fn decode_record(row: &DatabaseRow) -> MigrationResult<LedgerRecord> {
    let kind = row.get_string("kind")?;
    let cache = match row.get_json("cache")? {
        serde_json::Value::Null => None,
        value => Some(serde_json::from_value(value)?),
    };

    Ok(LedgerRecord {
        version: row.get_string("version")?,
        kind: kind.parse().map_err(MigrationError::database)?,
        cache,
        rollback_query: row.get_optional_string("rollback_query")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
    })
}
