//! Advisory locking around a migration batch
//!
//! The lock is transaction scoped, so PostgreSQL releases it at commit or
//! rollback and no explicit unlock path exists.

use crate::backends::{DatabaseTransaction, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};

pub const STRATA_LOCK_KEY_NAMESPACE: u64 = 0x5354_5241_5441_4d47;

pub const ADVISORY_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock($1)";

/// Lock key for a database: FNV-1a of its name, mixed with the namespace
pub fn lock_key(database_name: &str) -> i64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in database_name.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }

    let mixed = hash ^ STRATA_LOCK_KEY_NAMESPACE;
    mixed as i64
}

/// Block until the batch lock for `key` is held by this transaction
pub async fn acquire(tx: &mut dyn DatabaseTransaction, key: i64) -> MigrationResult<()> {
    tracing::debug!("Acquiring migration lock {}", key);
    tx.execute(ADVISORY_LOCK_SQL, &[DatabaseValue::Int64(key)])
        .await
        .map_err(|e| MigrationError::transaction(format!("pg_advisory_xact_lock failed: {}", e)))?;
    Ok(())
}
