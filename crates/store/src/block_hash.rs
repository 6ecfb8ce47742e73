use std::collections::{HashMap, HashSet};

use chainidx_common::error::IndexerError;
use chainidx_common::types::BlockSummary;
use sqlx::{Postgres, Transaction};

use crate::{chunk_size, Schema};

const TABLE: &str = "_block_hashes";
const COLUMNS_PER_ROW: usize = 3;

/// Sliding window of `(block_number -> block_hash)` per chain.
///
/// Every operation takes an explicit transaction handle; this store never
/// opens its own transaction.
pub struct BlockHashStore;

impl BlockHashStore {
    /// Upserts `(chain_id, block_number) -> block_hash`. Chunks at a
    /// bind-parameter-safe size so a large reorg-window refresh can't exceed
    /// Postgres's parameter limit in one statement.
    pub async fn put_many(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        rows: &[BlockSummary],
    ) -> Result<(), IndexerError> {
        if rows.is_empty() {
            return Ok(());
        }

        let table = schema.qualify(TABLE);
        for chunk in rows.chunks(chunk_size(COLUMNS_PER_ROW)) {
            let mut qb = sqlx::QueryBuilder::new(format!(
                "INSERT INTO {table} (chain_id, block_number, block_hash) "
            ));
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(chain_id)
                    .push_bind(row.number as i64)
                    .push_bind(&row.hash);
            });
            qb.push(
                " ON CONFLICT (chain_id, block_number) DO UPDATE SET block_hash = EXCLUDED.block_hash",
            );
            qb.build().execute(&mut **tx).await?;
        }

        Ok(())
    }

    pub async fn get_range(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        from: u64,
        to: u64,
    ) -> Result<HashMap<u64, String>, IndexerError> {
        let table = schema.qualify(TABLE);
        let rows: Vec<(i64, String)> = sqlx::query_as(&format!(
            "SELECT block_number, block_hash FROM {table} \
             WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3"
        ))
        .bind(chain_id)
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(|(n, h)| (n as u64, h)).collect())
    }

    /// Deletes rows with `block_number >= from` (inclusive).
    pub async fn delete_from(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        from: u64,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE chain_id = $1 AND block_number >= $2"
        ))
        .bind(chain_id)
        .bind(from as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Deletes rows with `block_number < before` (exclusive), used for
    /// pruning the sliding window after each fetch step.
    pub async fn delete_before(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        before: u64,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE chain_id = $1 AND block_number < $2"
        ))
        .bind(chain_id)
        .bind(before as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn contained_numbers(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        from: u64,
        to: u64,
    ) -> Result<HashSet<u64>, IndexerError> {
        let table = schema.qualify(TABLE);
        let rows: Vec<(i64,)> = sqlx::query_as(&format!(
            "SELECT block_number FROM {table} \
             WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3"
        ))
        .bind(chain_id)
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(|(n,)| n as u64).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_respects_bind_parameter_limit() {
        let size = chunk_size(COLUMNS_PER_ROW);
        assert!(size * COLUMNS_PER_ROW <= crate::MAX_BIND_PARAMS);
        assert!(size > 1000);
    }
}
