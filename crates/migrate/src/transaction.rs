//! Transaction Management
//!
//! Scoped ownership of the batch transaction: it is committed only when
//! [`TransactionGuard::commit`] is reached and rolled back in every other case.

use tracing::{debug, warn};

use crate::backends::DatabaseTransaction;
use crate::error::{MigrationError, MigrationResult};

/// Owns a backend transaction until it is explicitly finished
pub struct TransactionGuard {
    inner: Option<Box<dyn DatabaseTransaction>>,
}

impl TransactionGuard {
    pub fn new(tx: Box<dyn DatabaseTransaction>) -> Self {
        debug!("Beginning migration transaction");
        Self { inner: Some(tx) }
    }

    /// Borrow the open transaction
    pub fn transaction(&mut self) -> MigrationResult<&mut dyn DatabaseTransaction> {
        match self.inner.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(MigrationError::transaction("Transaction already completed")),
        }
    }

    pub async fn commit(mut self) -> MigrationResult<()> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| MigrationError::transaction("Transaction already completed"))?;
        tx.commit().await?;
        debug!("Migration transaction committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> MigrationResult<()> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| MigrationError::transaction("Transaction already completed"))?;
        tx.rollback().await?;
        debug!("Migration transaction rolled back");
        Ok(())
    }
}

impl Drop for TransactionGuard {
    /// Automatic cleanup: the backend rolls back a transaction dropped while open
    fn drop(&mut self) {
        if let Some(tx) = self.inner.take() {
            warn!("Transaction dropped without explicit commit or rollback - this will cause an automatic rollback");
            drop(tx);
        }
    }
}
