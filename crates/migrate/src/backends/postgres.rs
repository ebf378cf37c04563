//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the backend
//! traits using sqlx as the underlying database driver.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Pool, Postgres, Row, TypeInfo};
use url::Url;

use super::core::*;
use crate::error::{MigrationError, MigrationResult};

/// Database used for `CREATE DATABASE` / `DROP DATABASE`
const MAINTENANCE_DATABASE: &str = "postgres";

/// PostgreSQL connector built from a `postgres://` URL
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    url: Url,
}

impl PostgresConnector {
    pub fn new(database_url: &str) -> MigrationResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(MigrationError::connection("Invalid PostgreSQL URL scheme"));
        }

        let url = Url::parse(database_url)
            .map_err(|e| MigrationError::connection(format!("Invalid database URL: {}", e)))?;

        let connector = Self { url };
        connector.database_name()?;
        Ok(connector)
    }

    fn maintenance_url(&self) -> String {
        let mut url = self.url.clone();
        url.set_path(&format!("/{}", MAINTENANCE_DATABASE));
        url.to_string()
    }

    async fn open_pool(url: &str) -> MigrationResult<Pool<Postgres>> {
        // One connection: every statement of a batch must see the same session.
        PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| MigrationError::connection(format!("Failed to connect to PostgreSQL: {}", e)))
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn database_name(&self) -> MigrationResult<String> {
        let name = self.url.path().trim_start_matches('/');
        if name.is_empty() {
            return Err(MigrationError::connection("Missing database name in URL"));
        }
        Ok(name.to_string())
    }

    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let pool = Self::open_pool(self.url.as_str()).await?;
        Ok(Box::new(PostgresConnection::new(pool)))
    }

    async fn create_database(&self) -> MigrationResult<()> {
        let name = self.database_name()?;
        let pool = Self::open_pool(&self.maintenance_url()).await?;

        let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(&name)
            .fetch_optional(&pool)
            .await?
            .is_some();

        if exists {
            tracing::info!("Database {} already exists", name);
        } else {
            pool.execute(format!("CREATE DATABASE {}", quote_identifier(&name)).as_str())
                .await?;
        }

        pool.close().await;
        Ok(())
    }

    async fn drop_database(&self) -> MigrationResult<()> {
        let name = self.database_name()?;
        let pool = Self::open_pool(&self.maintenance_url()).await?;

        pool.execute(format!("DROP DATABASE IF EXISTS {}", quote_identifier(&name)).as_str())
            .await?;

        pool.close().await;
        Ok(())
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn begin(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn close(&mut self) -> MigrationResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| MigrationError::transaction("Transaction already completed"))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let tx = self.active()?;

        // Parameterless statements go through the simple query protocol so DDL
        // that cannot be prepared still runs.
        let result = if params.is_empty() {
            (&mut **tx).execute(sql).await
        } else {
            bind_all(sqlx::query(sql), params).execute(&mut **tx).await
        }
        .map_err(|e| MigrationError::database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>> {
        let tx = self.active()?;

        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| MigrationError::database(format!("Query fetch failed: {}", e)))?;

        rows.iter().map(decode_row).collect()
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<DatabaseRow>> {
        let tx = self.active()?;

        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| MigrationError::database(format!("Query fetch failed: {}", e)))?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::transaction("Transaction already completed"))?;

        tx.commit()
            .await
            .map_err(|e| MigrationError::transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::transaction("Transaction already completed"))?;

        tx.rollback()
            .await
            .map_err(|e| MigrationError::transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// Quote an identifier for interpolation into DDL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn decode_row(row: &PgRow) -> MigrationResult<DatabaseRow> {
    let mut decoded = DatabaseRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        decoded.push(column.name(), decode_value(row, index)?);
    }
    Ok(decoded)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn decode_value(row: &PgRow, index: usize) -> MigrationResult<DatabaseValue> {
    let type_name = row.columns()[index].type_info().name().to_string();

    let failed = |e: sqlx::Error| {
        MigrationError::database(format!("Failed to decode {} column {}: {}", type_name, index, e))
    };

    let value = match type_name.as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map_err(failed)?
            .map(|v| DatabaseValue::Int32(v as i32)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::Int32),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::Int64),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::Float64),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::DateTime),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::Json),
        _ => row
            .try_get::<Option<String>, _>(index)
            .map_err(failed)?
            .map(DatabaseValue::String),
    };

    Ok(value.unwrap_or(DatabaseValue::Null))
}
