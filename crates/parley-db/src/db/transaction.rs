//! Database transaction utilities
//!
//! The pipeline keeps transactions short: they are opened only around the
//! commit and removal steps and never span an object-store round trip.

use futures::future::BoxFuture;
use parley_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::ops::{Deref, DerefMut};

/// A transaction wrapper that rolls back unless [`TransactionGuard::commit`] is called.
///
/// Dereferences to the underlying connection, so queries take `&mut *tx`.
///
/// # Example
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&pool).await?;
/// sqlx::query("DELETE FROM avatar_uploads WHERE id = $1")
///     .bind(upload_id)
///     .execute(&mut *tx)
///     .await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard<'a> {
    transaction: Option<Transaction<'a, Postgres>>,
}

impl<'a> TransactionGuard<'a> {
    pub async fn begin(pool: &'a PgPool) -> Result<Self, AppError> {
        let transaction = pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin database transaction");
            AppError::Database(e)
        })?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    pub async fn commit(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

impl Deref for TransactionGuard<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.transaction
            .as_deref()
            .expect("Transaction was already committed or rolled back")
    }
}

impl DerefMut for TransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transaction
            .as_deref_mut()
            .expect("Transaction was already committed or rolled back")
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            // sqlx queues the rollback when the inner transaction drops
            tracing::warn!("Transaction dropped without commit - rolling back");
        }
    }
}

/// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
///
/// ```ignore
/// with_transaction(&pool, |conn| Box::pin(async move {
///     sqlx::query("UPDATE members SET avatar_url = NULL WHERE id = $1")
///         .bind(member_id)
///         .execute(&mut *conn)
///         .await?;
///     Ok(())
/// }))
/// .await
/// ```
pub async fn with_transaction<F, R>(pool: &PgPool, f: F) -> Result<R, AppError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<R, AppError>>,
{
    let mut tx = pool.begin().await?;

    match f(&mut *tx).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            tx.rollback().await.ok();
            Err(e)
        }
    }
}
