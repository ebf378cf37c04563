//! Migration Manager - File system operations for migrations
//!
//! Discovers migration files through the configured glob and generates new,
//! empty ones next to them.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::artifact::MigrationArtifact;
use super::definitions::{MigrationConfig, BASELINE_VERSION, VERSION_FORMAT};
use crate::error::{MigrationError, MigrationResult};

/// Extension used by `generate` when the glob does not name one
const DEFAULT_EXTENSION: &str = "yaml";

/// Migration manager for creating and loading migrations
#[derive(Debug, Clone)]
pub struct MigrationManager {
    config: MigrationConfig,
}

impl MigrationManager {
    /// Create a new migration manager with default configuration
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::default())
    }

    /// Create a new migration manager with custom configuration
    pub fn with_config(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load every file matched by the glob, sorted ascending by version.
    ///
    /// One malformed name fails the whole load.
    pub fn load_migrations(&self) -> MigrationResult<Vec<MigrationArtifact>> {
        let mut migrations = Vec::new();

        for entry in glob::glob(&self.config.path_glob)? {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                MigrationError::io(path, e.into())
            })?;

            if !path.is_file() {
                continue;
            }
            migrations.push(MigrationArtifact::load(&path)?);
        }

        // Stable: files sharing a version keep their listing order
        migrations.sort_by(|a, b| a.version.cmp(&b.version));

        tracing::debug!(
            "Loaded {} migration(s) from {}",
            migrations.len(),
            self.config.path_glob
        );
        Ok(migrations)
    }

    /// Directory new migrations are written to
    pub fn migrations_dir(&self) -> PathBuf {
        match Path::new(&self.config.path_glob).parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Extension of generated files, taken from the glob
    pub fn extension(&self) -> String {
        Path::new(&self.config.path_glob)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.contains(|c: char| matches!(c, '*' | '?' | '[' | ']')))
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string()
    }

    /// File name for a new migration; `initial` maps to the baseline version
    pub fn migration_file_name(&self, name: &str, now: DateTime<Utc>) -> String {
        let version = if name == "initial" {
            BASELINE_VERSION.to_string()
        } else {
            now.format(VERSION_FORMAT).to_string()
        };
        format!("{}_{}.{}", version, name, self.extension())
    }

    /// Create an empty migration file, refusing to overwrite an existing one
    pub fn generate(&self, name: &str, now: DateTime<Utc>) -> MigrationResult<PathBuf> {
        let dir = self.migrations_dir();
        fs::create_dir_all(&dir).map_err(|e| MigrationError::io(&dir, e))?;

        let path = dir.join(self.migration_file_name(name, now));
        tracing::info!("Generating migration path {}", path.display());

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(MigrationError::AlreadyExists { path })
            }
            Err(e) => Err(MigrationError::io(path, e)),
        }
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}
