use std::hash::{Hash, Hasher};

use chainidx_common::error::IndexerError;
use sqlx::{PgPool, Postgres, Transaction};

use crate::Schema;

/// Deterministic 64-bit advisory-lock id derived from `(schema, chain, salt)`.
///
/// `salt` separates two independent key spaces: one family for the
/// per-transaction fetch/recover lock, another for the process-scoped
/// coordinator lock. Using distinct salts rather than distinct bit ranges
/// keeps both ids full-width and collision-resistant without needing a
/// registry of reserved bits.
fn lock_id(schema: &Schema, chain_id: i64, salt: u64) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    schema.as_str().hash(&mut hasher);
    chain_id.hash(&mut hasher);
    salt.hash(&mut hasher);
    hasher.finish() as i64
}

const FETCH_RECOVER_SALT: u64 = 0x4645_5443_4845_5200; // "FETCHER\0"
const COORDINATOR_SALT: u64 = 0x434F_4F52_4449_4E00; // "COORDIN\0"

/// The per-(schema, chain) transaction-scoped advisory lock used by fetch
/// (blocking) and recover (`try`) to exclude each other, distinct from the
/// process lock below.
pub struct TxAdvisoryLock;

impl TxAdvisoryLock {
    /// Blocking acquire, released automatically at transaction end.
    pub async fn acquire_blocking(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<(), IndexerError> {
        let id = lock_id(schema, chain_id, FETCH_RECOVER_SALT);
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Non-blocking acquire; returns `Ok(false)` if the lock is held by
    /// another transaction rather than waiting.
    pub async fn try_acquire(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<bool, IndexerError> {
        let id = lock_id(schema, chain_id, FETCH_RECOVER_SALT);
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(acquired)
    }
}

/// Process-scoped exclusive lock keyed on `(schema, chain)`, held for the
/// coordinator's lifetime via a dedicated pooled connection. Release is
/// guaranteed on `Drop` as well as on explicit [`Self::release`].
pub struct ProcessLock {
    conn: Option<sqlx::pool::PoolConnection<Postgres>>,
    id: i64,
}

impl ProcessLock {
    /// Blocks until the lock is acquired. Fails the coordinator's startup if
    /// the pool itself cannot hand out a connection.
    pub async fn acquire(
        pool: &PgPool,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<Self, IndexerError> {
        let mut conn = pool.acquire().await?;
        let id = lock_id(schema, chain_id, COORDINATOR_SALT);
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(Self {
            conn: Some(conn),
            id,
        })
    }

    /// Explicit release; idempotent with `Drop`.
    pub async fn release(mut self) -> Result<(), IndexerError> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let id = self.id;
            tokio::spawn(async move {
                if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                {
                    tracing::warn!(error = %e, "failed to release process advisory lock on drop");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_ids_differ_by_salt_family() {
        let schema = Schema::try_new("drips").unwrap();
        let fetch_id = lock_id(&schema, 1, FETCH_RECOVER_SALT);
        let coordinator_id = lock_id(&schema, 1, COORDINATOR_SALT);
        assert_ne!(fetch_id, coordinator_id);
    }

    #[test]
    fn lock_ids_are_deterministic() {
        let schema = Schema::try_new("drips").unwrap();
        let a = lock_id(&schema, 42, FETCH_RECOVER_SALT);
        let b = lock_id(&schema, 42, FETCH_RECOVER_SALT);
        assert_eq!(a, b);
    }

    #[test]
    fn lock_ids_differ_by_chain() {
        let schema = Schema::try_new("drips").unwrap();
        let a = lock_id(&schema, 1, FETCH_RECOVER_SALT);
        let b = lock_id(&schema, 2, FETCH_RECOVER_SALT);
        assert_ne!(a, b);
    }
}
