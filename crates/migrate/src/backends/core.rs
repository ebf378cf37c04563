//! Core Database Backend Traits
//!
//! The migration engine talks to the database only through these traits, so
//! the runner, ledger and introspector stay independent of the driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{MigrationError, MigrationResult};

/// Database value enumeration for parameter binding and row decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<Option<String>> for DatabaseValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(DatabaseValue::Null, DatabaseValue::String)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

/// A decoded result row: column names paired with their values, in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get_by_name(&self, name: &str) -> MigrationResult<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
            .ok_or_else(|| MigrationError::database(format!("Column '{}' not found", name)))
    }

    pub fn get_string(&self, name: &str) -> MigrationResult<String> {
        match self.get_by_name(name)? {
            DatabaseValue::String(s) => Ok(s.clone()),
            other => Err(unexpected(name, "string", other)),
        }
    }

    pub fn get_optional_string(&self, name: &str) -> MigrationResult<Option<String>> {
        match self.get_by_name(name)? {
            DatabaseValue::Null => Ok(None),
            DatabaseValue::String(s) => Ok(Some(s.clone())),
            other => Err(unexpected(name, "string", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> MigrationResult<bool> {
        match self.get_by_name(name)? {
            DatabaseValue::Bool(b) => Ok(*b),
            other => Err(unexpected(name, "bool", other)),
        }
    }

    pub fn get_datetime(&self, name: &str) -> MigrationResult<DateTime<Utc>> {
        match self.get_by_name(name)? {
            DatabaseValue::DateTime(dt) => Ok(*dt),
            other => Err(unexpected(name, "timestamp", other)),
        }
    }

    /// JSON columns, accepting text-encoded JSON as well
    pub fn get_json(&self, name: &str) -> MigrationResult<JsonValue> {
        match self.get_by_name(name)? {
            DatabaseValue::Null => Ok(JsonValue::Null),
            DatabaseValue::Json(j) => Ok(j.clone()),
            DatabaseValue::String(s) => Ok(serde_json::from_str(s)?),
            other => Err(unexpected(name, "json", other)),
        }
    }
}

fn unexpected(column: &str, expected: &str, found: &DatabaseValue) -> MigrationError {
    MigrationError::database(format!(
        "Column '{}' expected {} but found {:?}",
        column, expected, found
    ))
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return all rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>>;

    /// Execute a query and return the first row, if any
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<DatabaseRow>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Abstract database connection
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Begin a transaction
    async fn begin(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// Close the connection
    async fn close(&mut self) -> MigrationResult<()>;
}

/// Opens connections and manages the target database itself
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name of the target database
    fn database_name(&self) -> MigrationResult<String>;

    /// Connect to the target database
    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>>;

    /// Create the target database unless it already exists
    async fn create_database(&self) -> MigrationResult<()>;

    /// Drop the target database if it exists
    async fn drop_database(&self) -> MigrationResult<()>;
}
