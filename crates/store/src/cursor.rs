use chainidx_common::error::IndexerError;
use chainidx_common::types::Cursor;
use sqlx::{Postgres, Transaction};

use crate::Schema;

const TABLE: &str = "_cursor";

/// Durable "fetched-to" high-water mark per chain, keyed by `chain_id`.
/// Exactly one row per chain.
pub struct CursorStore;

impl CursorStore {
    /// Idempotent: does nothing if a cursor row already exists for this chain.
    pub async fn initialize(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        fetched_to_block: i64,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "INSERT INTO {table} (chain_id, fetched_to_block, updated_at) \
             VALUES ($1, $2, NOW()) ON CONFLICT (chain_id) DO NOTHING"
        ))
        .bind(chain_id)
        .bind(fetched_to_block)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<Option<Cursor>, IndexerError> {
        let table = schema.qualify(TABLE);
        let row: Option<(i64, i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(&format!(
            "SELECT chain_id, fetched_to_block, updated_at FROM {table} WHERE chain_id = $1"
        ))
        .bind(chain_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|(chain_id, fetched_to_block, updated_at)| Cursor {
            chain_id: chain_id as u64,
            fetched_to_block: fetched_to_block as u64,
            updated_at,
        }))
    }

    /// Like [`Self::get`] but acquires a row-level lock for the transaction,
    /// taken at the start of every fetch transaction.
    pub async fn get_for_update(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<Option<Cursor>, IndexerError> {
        let table = schema.qualify(TABLE);
        let row: Option<(i64, i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(&format!(
            "SELECT chain_id, fetched_to_block, updated_at FROM {table} \
             WHERE chain_id = $1 FOR UPDATE"
        ))
        .bind(chain_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|(chain_id, fetched_to_block, updated_at)| Cursor {
            chain_id: chain_id as u64,
            fetched_to_block: fetched_to_block as u64,
            updated_at,
        }))
    }

    pub async fn advance_to(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        block: i64,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "UPDATE {table} SET fetched_to_block = $2, updated_at = NOW() WHERE chain_id = $1"
        ))
        .bind(chain_id)
        .bind(block)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Used exclusively by reorg recovery, which may decrease the cursor.
    pub async fn reset_to(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        block: i64,
    ) -> Result<(), IndexerError> {
        Self::advance_to(tx, schema, chain_id, block).await
    }
}
