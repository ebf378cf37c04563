//! Migration artifacts
//!
//! A loaded migration file. The baseline carries a full schema definition;
//! every other file carries opaque SQL for one direction.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::definitions::{Direction, MigrationKind, SchemaDefinition, TableDefinition};
use super::filename::{parse_kind, parse_version};
use crate::error::{MigrationError, MigrationResult};

/// Body of an artifact, selected by its parsed kind
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactBody {
    Schema(SchemaDefinition),
    Statement { direction: Direction, sql: String },
}

/// Up/down files in YAML form
#[derive(Debug, Deserialize)]
struct QueryFile {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationArtifact {
    pub path: PathBuf,
    pub version: String,
    pub body: ArtifactBody,
}

impl MigrationArtifact {
    /// Read and parse a migration file
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        Self::from_source(path, &contents)
    }

    /// Parse an artifact from its path and contents
    pub fn from_source(path: &Path, contents: &str) -> MigrationResult<Self> {
        let version = parse_version(path)?;
        let kind = parse_kind(path)?;

        let body = match kind {
            MigrationKind::Schema => ArtifactBody::Schema(parse_schema(path, contents)?),
            MigrationKind::Up => ArtifactBody::Statement {
                direction: Direction::Up,
                sql: parse_query(path, contents)?,
            },
            MigrationKind::Down => ArtifactBody::Statement {
                direction: Direction::Down,
                sql: parse_query(path, contents)?,
            },
        };

        Ok(Self {
            path: path.to_path_buf(),
            version,
            body,
        })
    }

    pub fn kind(&self) -> MigrationKind {
        match &self.body {
            ArtifactBody::Schema(_) => MigrationKind::Schema,
            ArtifactBody::Statement { direction, .. } => direction.kind(),
        }
    }

    /// Statements to execute, in order.
    ///
    /// An up/down body is handed to the server verbatim as one call, so
    /// dollar-quoted blocks and literals containing `;` reach it intact.
    pub fn statements(&self) -> Vec<String> {
        match &self.body {
            ArtifactBody::Schema(schema) => schema_statements(schema),
            ArtifactBody::Statement { sql, .. } if sql.trim().is_empty() => Vec::new(),
            ArtifactBody::Statement { sql, .. } => vec![sql.clone()],
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_schema(path: &Path, contents: &str) -> MigrationResult<SchemaDefinition> {
    if contents.trim().is_empty() {
        return Ok(SchemaDefinition::default());
    }

    serde_yaml::from_str(contents).map_err(|source| MigrationError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_query(path: &Path, contents: &str) -> MigrationResult<String> {
    if contents.trim().is_empty() {
        return Ok(String::new());
    }

    if !is_yaml(path) {
        return Ok(contents.to_string());
    }

    let file: QueryFile = serde_yaml::from_str(contents).map_err(|source| MigrationError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.query)
}

/// DDL for a baseline definition: each table, then its indexes and foreign keys
pub fn schema_statements(schema: &SchemaDefinition) -> Vec<String> {
    let mut statements = Vec::new();
    for table in &schema.tables {
        statements.push(create_table_statement(table));
        statements.extend(index_statements(table));
    }
    statements
}

fn create_table_statement(table: &TableDefinition) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut sql = format!("{} {}", column.name, column.data_type);
            if let Some(default) = column.default_expression() {
                sql.push_str(&format!(" DEFAULT {}", default));
            }
            if !column.null {
                sql.push_str(" NOT NULL");
            }
            if column.primary_key {
                sql.push_str(" PRIMARY KEY");
            }
            sql
        })
        .collect();

    format!("CREATE TABLE {} ({})", table.name, columns.join(", "))
}

fn index_statements(table: &TableDefinition) -> Vec<String> {
    table
        .indexes
        .iter()
        .map(|index| {
            let columns = index.columns.join(", ");
            match &index.foreign_key {
                Some(fk) => format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    table.name, index.name, columns, fk.table, fk.column
                ),
                None => format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    table.name,
                    columns
                ),
            }
        })
        .collect()
}
