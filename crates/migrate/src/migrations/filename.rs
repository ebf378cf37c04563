//! Filename codec
//!
//! `<version>_<name>.<ext>` names the baseline, `<version>_<name>.<up|down>.<ext>`
//! names a forward or reverse step. The version orders artifacts; the middle
//! dotted segment gives the direction.

use std::path::Path;

use super::definitions::{MigrationKind, BASELINE_VERSION};
use crate::error::FormatError;

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extract the version token from a migration path.
pub fn parse_version(path: &Path) -> Result<String, FormatError> {
    let name = base_name(path);
    let parts: Vec<&str> = name.split('_').collect();

    if parts.len() < 2 && parts[0] != BASELINE_VERSION {
        return Err(FormatError::InvalidVersion {
            path: path.display().to_string(),
        });
    }

    Ok(parts[0].to_string())
}

/// Determine whether a migration path is the baseline, an up or a down step.
pub fn parse_kind(path: &Path) -> Result<MigrationKind, FormatError> {
    let name = base_name(path);
    let parts: Vec<&str> = name.split('.').collect();

    if parts.len() >= 3 {
        return match parts[1] {
            "up" => Ok(MigrationKind::Up),
            "down" => Ok(MigrationKind::Down),
            other => Err(FormatError::InvalidKind {
                path: path.display().to_string(),
                segment: other.to_string(),
            }),
        };
    }

    if parse_version(path)? == BASELINE_VERSION {
        Ok(MigrationKind::Schema)
    } else {
        Err(FormatError::InvalidKind {
            path: path.display().to_string(),
            segment: String::new(),
        })
    }
}
