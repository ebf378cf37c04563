//! Catalog introspection
//!
//! Rebuilds the shape of the live database from the PostgreSQL catalog. The
//! queries are read-only and run on the caller's transaction, so they see DDL
//! the batch has already executed.

use super::definitions::{ColumnSnapshot, IndexSnapshot, SchemaSnapshot, TableSnapshot};
use crate::backends::{DatabaseTransaction, DatabaseValue};
use crate::error::MigrationResult;

/// User tables, minus system schemas and the ledger table (`$1`)
pub const LIST_TABLES_SQL: &str = "SELECT schemaname::text AS schema, tablename::text AS name \
     FROM pg_catalog.pg_tables \
     WHERE schemaname NOT IN ('pg_catalog', 'information_schema') AND tablename <> $1 \
     ORDER BY schemaname, tablename";

pub const LIST_COLUMNS_SQL: &str = "SELECT column_name::text AS name, udt_name::text AS data_type, \
     (is_nullable = 'YES') AS nullable \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

pub const LIST_INDEXES_SQL: &str = "SELECT i.indexname::text AS name, i.indexdef AS definition, \
     x.indisprimary AS is_primary, x.indisunique AS is_unique \
     FROM pg_catalog.pg_indexes i \
     JOIN pg_catalog.pg_namespace n ON n.nspname = i.schemaname \
     JOIN pg_catalog.pg_class c ON c.relname = i.indexname AND c.relnamespace = n.oid \
     JOIN pg_catalog.pg_index x ON x.indexrelid = c.oid \
     WHERE i.schemaname = $1 AND i.tablename = $2 \
     ORDER BY i.indexname";

/// Reads a [`SchemaSnapshot`] from the catalog
#[derive(Debug, Clone)]
pub struct CatalogIntrospector {
    ledger_table: String,
}

impl CatalogIntrospector {
    pub fn new(ledger_table: impl Into<String>) -> Self {
        Self {
            ledger_table: ledger_table.into(),
        }
    }

    pub async fn read(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<SchemaSnapshot> {
        let rows = tx
            .fetch_all(LIST_TABLES_SQL, &[DatabaseValue::from(self.ledger_table.as_str())])
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let schema = row.get_string("schema")?;
            let name = row.get_string("name")?;
            let params = [
                DatabaseValue::from(schema.as_str()),
                DatabaseValue::from(name.as_str()),
            ];

            let columns = tx
                .fetch_all(LIST_COLUMNS_SQL, &params)
                .await?
                .iter()
                .map(|row| {
                    Ok(ColumnSnapshot {
                        name: row.get_string("name")?,
                        data_type: row.get_string("data_type")?,
                        nullable: row.get_bool("nullable")?,
                    })
                })
                .collect::<MigrationResult<Vec<_>>>()?;

            let indexes = tx
                .fetch_all(LIST_INDEXES_SQL, &params)
                .await?
                .iter()
                .map(|row| {
                    Ok(IndexSnapshot {
                        name: row.get_string("name")?,
                        definition: row.get_string("definition")?,
                        primary: row.get_bool("is_primary")?,
                        unique: row.get_bool("is_unique")?,
                    })
                })
                .collect::<MigrationResult<Vec<_>>>()?;

            tables.push(TableSnapshot {
                schema,
                name,
                columns,
                indexes,
            });
        }

        tracing::debug!("Introspected {} table(s)", tables.len());
        Ok(SchemaSnapshot { tables })
    }
}
