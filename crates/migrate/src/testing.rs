//! In-memory backend for engine tests
//!
//! Transactions work on a private copy of the committed catalog which is
//! published on commit and discarded on rollback or drop. Statements are
//! parsed with sqlparser and the DDL subset the tests and the baseline
//! generator emit is applied to the catalog, along with the ledger,
//! introspection and lock queries the engine issues. Anything else is an
//! error, which is how tests make a migration fail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CommentObject, CreateIndex, CreateTable,
    DataType, FromTable, Ident, ObjectName, ObjectType, SetExpr, Statement, TableConstraint,
    TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backends::{
    Connector, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue,
};
use crate::error::{MigrationError, MigrationResult};
use crate::lock::ADVISORY_LOCK_SQL;
use crate::migrations::definitions::{ColumnSnapshot, IndexSnapshot, DEFAULT_MIGRATION_TABLE};
use crate::migrations::introspect::{LIST_COLUMNS_SQL, LIST_INDEXES_SQL, LIST_TABLES_SQL};

const SCHEMA: &str = "public";

#[derive(Debug, Clone, Default)]
struct FakeTable {
    columns: Vec<ColumnSnapshot>,
    indexes: BTreeMap<String, IndexSnapshot>,
}

#[derive(Debug, Clone)]
struct FakeRecord {
    kind: String,
    cache: JsonValue,
    rollback_query: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: BTreeMap<String, FakeTable>,
    ledger: Option<BTreeMap<String, FakeRecord>>,
}

#[derive(Debug, Default)]
struct Shared {
    name: String,
    ledger_table: String,
    exists: bool,
    committed: Catalog,
    executed: Vec<String>,
    lock_keys: Vec<i64>,
    panic_on: Option<String>,
    commits: usize,
    rollbacks: usize,
}

/// Shared handle to one in-memory database
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new("strata_test")
    }
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self::with_ledger_table(name, DEFAULT_MIGRATION_TABLE)
    }

    pub fn with_ledger_table(name: &str, ledger_table: &str) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                name: name.to_string(),
                ledger_table: ledger_table.to_string(),
                exists: true,
                ..Shared::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Panic inside any statement containing `fragment`
    pub fn panic_on(&self, fragment: &str) {
        self.lock().panic_on = Some(fragment.to_string());
    }

    pub fn exists(&self) -> bool {
        self.lock().exists
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().committed.tables.keys().cloned().collect()
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.lock()
            .committed
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn ledger_versions(&self) -> Vec<String> {
        self.lock()
            .committed
            .ledger
            .as_ref()
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Kind and cache of a committed ledger row
    pub fn ledger_row(&self, version: &str) -> Option<(String, JsonValue)> {
        self.lock()
            .committed
            .ledger
            .as_ref()
            .and_then(|rows| rows.get(version))
            .map(|record| (record.kind.clone(), record.cache.clone()))
    }

    /// Every statement ever executed, committed or not
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn lock_keys(&self) -> Vec<i64> {
        self.lock().lock_keys.clone()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    /// Run one statement in its own committed transaction
    pub fn run_committed(&self, sql: &str) -> MigrationResult<()> {
        let mut shared = self.lock();
        let mut catalog = shared.committed.clone();
        let ledger_table = shared.ledger_table.clone();
        evaluate(&mut catalog, &ledger_table, sql, &[])?;
        shared.committed = catalog;
        Ok(())
    }

    fn begin_transaction(&self) -> MemoryTransaction {
        let working = self.lock().committed.clone();
        MemoryTransaction {
            db: self.clone(),
            working,
        }
    }

    /// Record and screen a statement before evaluating it.
    ///
    /// The mutex is released before panicking so the shared state is never poisoned.
    fn screen(&self, sql: &str) -> String {
        let (panic, ledger_table) = {
            let mut shared = self.lock();
            shared.executed.push(sql.to_string());
            (
                shared.panic_on.clone().filter(|f| sql.contains(f.as_str())),
                shared.ledger_table.clone(),
            )
        };

        if let Some(fragment) = panic {
            panic!("injected panic at {}", fragment);
        }
        ledger_table
    }
}

#[async_trait]
impl Connector for MemoryDatabase {
    fn database_name(&self) -> MigrationResult<String> {
        Ok(self.lock().name.clone())
    }

    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        if !self.exists() {
            return Err(MigrationError::connection("database does not exist"));
        }
        Ok(Box::new(MemoryConnection { db: self.clone() }))
    }

    async fn create_database(&self) -> MigrationResult<()> {
        self.lock().exists = true;
        Ok(())
    }

    async fn drop_database(&self) -> MigrationResult<()> {
        let mut shared = self.lock();
        shared.exists = false;
        shared.committed = Catalog::default();
        Ok(())
    }
}

pub struct MemoryConnection {
    db: MemoryDatabase,
}

#[async_trait]
impl DatabaseConnection for MemoryConnection {
    async fn begin(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        Ok(Box::new(self.db.begin_transaction()))
    }

    async fn close(&mut self) -> MigrationResult<()> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    db: MemoryDatabase,
    working: Catalog,
}

impl MemoryTransaction {
    fn run(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
        let ledger_table = self.db.screen(sql);
        if sql == ADVISORY_LOCK_SQL {
            if let Some(DatabaseValue::Int64(key)) = params.first() {
                self.db.lock().lock_keys.push(*key);
            }
            return Ok((1, Vec::new()));
        }
        evaluate(&mut self.working, &ledger_table, sql, params)
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.run(sql, params).map(|(affected, _)| affected)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>> {
        self.run(sql, params).map(|(_, rows)| rows)
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Option<DatabaseRow>> {
        self.run(sql, params).map(|(_, rows)| rows.into_iter().next())
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        let MemoryTransaction { db, working } = *self;
        let mut shared = db.lock();
        shared.committed = working;
        shared.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        self.db.lock().rollbacks += 1;
        Ok(())
    }
}

fn text_param(params: &[DatabaseValue], index: usize) -> MigrationResult<String> {
    match params.get(index) {
        Some(DatabaseValue::String(s)) => Ok(s.clone()),
        other => Err(MigrationError::database(format!(
            "expected text parameter ${}, got {:?}",
            index + 1,
            other
        ))),
    }
}

fn json_param(params: &[DatabaseValue], index: usize) -> MigrationResult<JsonValue> {
    params
        .get(index)
        .map(DatabaseValue::to_json)
        .ok_or_else(|| MigrationError::database(format!("missing parameter ${}", index + 1)))
}

fn undefined_table(name: &str) -> MigrationError {
    MigrationError::database(format!("relation \"{}\" does not exist", name))
}

/// Evaluate a query string against a catalog, returning affected rows and the
/// result rows of its last statement
fn evaluate(
    catalog: &mut Catalog,
    ledger_table: &str,
    sql: &str,
    params: &[DatabaseValue],
) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    if sql == LIST_TABLES_SQL {
        let excluded = text_param(params, 0)?;
        let rows: Vec<DatabaseRow> = catalog
            .tables
            .keys()
            .filter(|name| **name != excluded)
            .map(|name| DatabaseRow::new().with("schema", SCHEMA).with("name", name.as_str()))
            .collect();
        return Ok((rows.len() as u64, rows));
    }

    if sql == LIST_COLUMNS_SQL || sql == LIST_INDEXES_SQL {
        let table_name = text_param(params, 1)?;
        let table = catalog
            .tables
            .get(&table_name)
            .ok_or_else(|| undefined_table(&table_name))?;

        let rows: Vec<DatabaseRow> = if sql == LIST_COLUMNS_SQL {
            table
                .columns
                .iter()
                .map(|c| {
                    DatabaseRow::new()
                        .with("name", c.name.as_str())
                        .with("data_type", c.data_type.as_str())
                        .with("nullable", DatabaseValue::Bool(c.nullable))
                })
                .collect()
        } else {
            table
                .indexes
                .values()
                .map(|i| {
                    DatabaseRow::new()
                        .with("name", i.name.as_str())
                        .with("definition", i.definition.as_str())
                        .with("is_primary", DatabaseValue::Bool(i.primary))
                        .with("is_unique", DatabaseValue::Bool(i.unique))
                })
                .collect()
        };
        return Ok((rows.len() as u64, rows));
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| MigrationError::database(format!("syntax error: {}", e)))?;

    let mut result = (0, Vec::new());
    for statement in statements {
        result = if target_table(&statement).as_deref() == Some(ledger_table) {
            evaluate_ledger(catalog, ledger_table, &statement, params)?
        } else {
            evaluate_ddl(catalog, statement)?
        };
    }
    Ok(result)
}

fn unsupported(statement: &impl ToString) -> MigrationError {
    MigrationError::database(format!("unsupported statement: {}", statement.to_string()))
}

/// Unqualified name: `public.users` is `users`
fn last_ident(name: &ObjectName) -> String {
    name.0.last().map(|ident| ident.value.clone()).unwrap_or_default()
}

fn ident_values(idents: &[Ident]) -> Vec<String> {
    idents.iter().map(|ident| ident.value.clone()).collect()
}

fn relation_name(table: &TableWithJoins) -> Option<String> {
    match &table.relation {
        TableFactor::Table { name, .. } => Some(last_ident(name)),
        _ => None,
    }
}

/// The one table a statement creates, reads or writes
fn target_table(statement: &Statement) -> Option<String> {
    match statement {
        Statement::CreateTable(create) => Some(last_ident(&create.name)),
        Statement::Insert(insert) => Some(last_ident(&insert.table_name)),
        Statement::Update { table, .. } => relation_name(table),
        Statement::Delete(delete) => match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => {
                tables.first().and_then(relation_name)
            }
        },
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => select.from.first().and_then(relation_name),
            _ => None,
        },
        _ => None,
    }
}

fn evaluate_ledger(
    catalog: &mut Catalog,
    ledger_table: &str,
    statement: &Statement,
    params: &[DatabaseValue],
) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    if let Statement::CreateTable(_) = statement {
        catalog.ledger.get_or_insert_with(BTreeMap::new);
        return Ok((0, Vec::new()));
    }

    let rows = catalog
        .ledger
        .as_mut()
        .ok_or_else(|| undefined_table(ledger_table))?;

    match statement {
        Statement::Query(query) => {
            let filtered = matches!(query.body.as_ref(), SetExpr::Select(select) if select.selection.is_some());
            let selected = if filtered {
                let version = text_param(params, 0)?;
                rows.get_key_value(&version)
            } else {
                rows.iter().next_back()
            };

            let result: Vec<DatabaseRow> = selected
                .map(|(version, record)| {
                    DatabaseRow::new()
                        .with("version", version.as_str())
                        .with("kind", record.kind.as_str())
                        .with("cache", record.cache.clone())
                        .with("rollback_query", record.rollback_query.clone())
                        .with("created_at", DatabaseValue::DateTime(record.created_at))
                        .with("updated_at", DatabaseValue::DateTime(record.updated_at))
                })
                .into_iter()
                .collect();
            Ok((result.len() as u64, result))
        }
        Statement::Insert(_) => {
            let version = text_param(params, 0)?;
            if rows.contains_key(&version) {
                return Err(MigrationError::database(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    ledger_table
                )));
            }
            let now = Utc::now();
            rows.insert(
                version,
                FakeRecord {
                    kind: text_param(params, 1)?,
                    cache: json_param(params, 2)?,
                    rollback_query: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            Ok((1, Vec::new()))
        }
        Statement::Update { .. } => {
            let version = text_param(params, 0)?;
            let kind = text_param(params, 1)?;
            let cache = json_param(params, 2)?;
            match rows.get_mut(&version) {
                Some(record) => {
                    record.kind = kind;
                    record.cache = cache;
                    record.updated_at = Utc::now();
                    Ok((1, Vec::new()))
                }
                None => Ok((0, Vec::new())),
            }
        }
        Statement::Delete(_) => {
            let version = text_param(params, 0)?;
            Ok((rows.remove(&version).map_or(0, |_| 1), Vec::new()))
        }
        other => Err(unsupported(other)),
    }
}

/// Catalog type name: lowercase and without modifiers, like `udt_name`
fn udt_name(data_type: &DataType) -> String {
    let rendered = data_type.to_string().to_ascii_lowercase();
    rendered.split('(').next().unwrap_or_default().trim().to_string()
}

fn index_snapshot(name: &str, table: &str, columns: &[String], primary: bool, unique: bool) -> IndexSnapshot {
    IndexSnapshot {
        name: name.to_string(),
        definition: format!(
            "CREATE {}INDEX {} ON {}.{} USING btree ({})",
            if unique { "UNIQUE " } else { "" },
            name,
            SCHEMA,
            table,
            columns.join(", ")
        ),
        primary,
        unique,
    }
}

fn add_primary_key(table: &mut FakeTable, table_name: &str, columns: &[String]) {
    for column in table.columns.iter_mut().filter(|c| columns.contains(&c.name)) {
        column.nullable = false;
    }
    let pkey = format!("{}_pkey", table_name);
    let index = index_snapshot(&pkey, table_name, columns, true, true);
    table.indexes.insert(pkey, index);
}

fn add_unique_key(table: &mut FakeTable, table_name: &str, columns: &[String]) {
    let key = format!("{}_{}_key", table_name, columns.join("_"));
    let index = index_snapshot(&key, table_name, columns, false, true);
    table.indexes.insert(key, index);
}

fn add_column(table: &mut FakeTable, table_name: &str, column: &ColumnDef) {
    let name = column.name.value.clone();
    let nullable = !column
        .options
        .iter()
        .any(|def| matches!(def.option, ColumnOption::NotNull));

    table.columns.push(ColumnSnapshot {
        name: name.clone(),
        data_type: udt_name(&column.data_type),
        nullable,
    });

    for def in &column.options {
        match def.option {
            ColumnOption::Unique { is_primary: true, .. } => {
                add_primary_key(table, table_name, &[name.clone()])
            }
            ColumnOption::Unique { is_primary: false, .. } => {
                add_unique_key(table, table_name, &[name.clone()])
            }
            _ => {}
        }
    }
}

fn index_exists(catalog: &Catalog, name: &str) -> bool {
    catalog.tables.values().any(|t| t.indexes.contains_key(name))
}

fn create_table(catalog: &mut Catalog, create: &CreateTable) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    let name = last_ident(&create.name);
    if catalog.tables.contains_key(&name) {
        if create.if_not_exists {
            return Ok((0, Vec::new()));
        }
        return Err(MigrationError::database(format!("relation \"{}\" already exists", name)));
    }

    let mut table = FakeTable::default();
    for column in &create.columns {
        add_column(&mut table, &name, column);
    }
    for constraint in &create.constraints {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                add_primary_key(&mut table, &name, &ident_values(columns))
            }
            TableConstraint::Unique { columns, .. } => {
                add_unique_key(&mut table, &name, &ident_values(columns))
            }
            // Foreign keys and checks leave no trace in the snapshot
            _ => {}
        }
    }

    catalog.tables.insert(name, table);
    Ok((0, Vec::new()))
}

fn alter_table(
    catalog: &mut Catalog,
    table_name: &str,
    operations: &[AlterTableOperation],
) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    let table = catalog
        .tables
        .get_mut(table_name)
        .ok_or_else(|| undefined_table(table_name))?;

    for operation in operations {
        match operation {
            AlterTableOperation::AddConstraint(_) => {}
            AlterTableOperation::AddColumn {
                if_not_exists,
                column_def,
                ..
            } => {
                if table.columns.iter().any(|c| c.name == column_def.name.value) {
                    if *if_not_exists {
                        continue;
                    }
                    return Err(MigrationError::database(format!(
                        "column \"{}\" of relation \"{}\" already exists",
                        column_def.name.value, table_name
                    )));
                }
                add_column(table, table_name, column_def);
            }
            AlterTableOperation::DropColumn {
                column_name,
                if_exists,
                ..
            } => {
                let before = table.columns.len();
                table.columns.retain(|c| c.name != column_name.value);
                if table.columns.len() == before && !*if_exists {
                    return Err(MigrationError::database(format!(
                        "column \"{}\" of relation \"{}\" does not exist",
                        column_name.value, table_name
                    )));
                }
            }
            other => return Err(unsupported(other)),
        }
    }
    Ok((0, Vec::new()))
}

fn create_index(catalog: &mut Catalog, index: &CreateIndex) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    let name = match &index.name {
        Some(name) => last_ident(name),
        None => return Err(unsupported(index)),
    };
    let table_name = last_ident(&index.table_name);
    let columns: Vec<String> = index.columns.iter().map(|c| c.expr.to_string()).collect();

    if index_exists(catalog, &name) {
        if index.if_not_exists {
            return Ok((0, Vec::new()));
        }
        return Err(MigrationError::database(format!("relation \"{}\" already exists", name)));
    }

    let table = catalog
        .tables
        .get_mut(&table_name)
        .ok_or_else(|| undefined_table(&table_name))?;
    table
        .indexes
        .insert(name.clone(), index_snapshot(&name, &table_name, &columns, false, index.unique));
    Ok((0, Vec::new()))
}

fn evaluate_ddl(catalog: &mut Catalog, statement: Statement) -> MigrationResult<(u64, Vec<DatabaseRow>)> {
    match &statement {
        Statement::Query(_) => Ok((0, Vec::new())),
        Statement::CreateTable(create) => create_table(catalog, create),
        Statement::AlterTable { name, operations, .. } => alter_table(catalog, &last_ident(name), operations),
        Statement::CreateIndex(index) => create_index(catalog, index),
        Statement::Drop {
            object_type: ObjectType::Table,
            if_exists,
            names,
            ..
        } => {
            for name in names.iter().map(last_ident) {
                if catalog.tables.remove(&name).is_none() && !*if_exists {
                    return Err(undefined_table(&name));
                }
            }
            Ok((0, Vec::new()))
        }
        Statement::Drop {
            object_type: ObjectType::Index,
            if_exists,
            names,
            ..
        } => {
            for name in names.iter().map(last_ident) {
                let removed = catalog
                    .tables
                    .values_mut()
                    .any(|table| table.indexes.remove(&name).is_some());
                if !removed && !*if_exists {
                    return Err(undefined_table(&name));
                }
            }
            Ok((0, Vec::new()))
        }
        Statement::Comment {
            object_type: CommentObject::Table,
            object_name,
            ..
        } => {
            let name = last_ident(object_name);
            if !catalog.tables.contains_key(&name) {
                return Err(undefined_table(&name));
            }
            Ok((0, Vec::new()))
        }
        _ => Err(unsupported(&statement)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_round_trip() {
        let db = MemoryDatabase::default();
        db.run_committed("CREATE TABLE users (id SERIAL PRIMARY KEY, email VARCHAR(255) NOT NULL, bio TEXT)")
            .unwrap();
        db.run_committed("ALTER TABLE users ADD COLUMN age INT").unwrap();
        db.run_committed("CREATE UNIQUE INDEX users_email ON users(email)").unwrap();

        assert_eq!(db.column_names("users"), vec!["id", "email", "bio", "age"]);
        assert!(db.run_committed("CREATE TABLE users (id INT)").is_err());

        db.run_committed("DROP INDEX users_email").unwrap();
        db.run_committed("ALTER TABLE users DROP COLUMN age").unwrap();
        db.run_committed("DROP TABLE users").unwrap();
        assert!(db.table_names().is_empty());
        assert!(db.run_committed("DROP TABLE users").is_err());
        assert!(db.run_committed("DROP TABLE IF EXISTS users").is_ok());
    }

    #[test]
    fn test_multi_statement_bodies_apply_in_order() {
        let db = MemoryDatabase::default();
        db.run_committed(
            "CREATE TABLE notes (id INT PRIMARY KEY, body TEXT);\n\
             COMMENT ON TABLE notes IS 'scratch; keep short';\n\
             CREATE INDEX notes_body_idx ON notes (body);",
        )
        .unwrap();

        assert_eq!(db.table_names(), vec!["notes"]);
        assert_eq!(db.column_names("notes"), vec!["id", "body"]);

        // A failing statement discards the statements before it
        assert!(db
            .run_committed("CREATE TABLE tags (id INT); COMMENT ON TABLE missing IS 'x'")
            .is_err());
        assert_eq!(db.table_names(), vec!["notes"]);
    }

    #[test]
    fn test_unknown_statements_fail() {
        let db = MemoryDatabase::default();
        assert!(db.run_committed("THIS IS NOT SQL").is_err());
        assert!(db.run_committed("ALTER TABLE missing ADD COLUMN x INT").is_err());
        assert!(db.run_committed("CREATE VIEW v AS SELECT 1").is_err());
    }
}
