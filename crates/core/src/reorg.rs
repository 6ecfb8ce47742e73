use std::sync::Arc;

use chainidx_common::error::IndexerError;
use chainidx_common::types::{ChainId, OrphanRow};
use chainidx_rpc::ChainRpc;
use chainidx_store::block_hash::BlockHashStore;
use chainidx_store::cursor::CursorStore;
use chainidx_store::events::EventStore;
use chainidx_store::lock::TxAdvisoryLock;
use chainidx_store::Schema;
use sqlx::PgPool;

/// Depth cap shared by detect and recover: a mismatch deeper than this many
/// blocks behind `tail` is treated as unrecoverable.
const MAX_REORG_DEPTH: u64 = 100;

/// Backwards hash comparison and atomic rollback, backed by the durable
/// block-hash table so detection survives restarts.
pub struct ReorgDetector {
    pool: PgPool,
    schema: Schema,
    chain_id: ChainId,
    rpc: Arc<dyn ChainRpc>,
    start_block: u64,
}

impl ReorgDetector {
    pub fn new(pool: PgPool, schema: Schema, chain_id: ChainId, rpc: Arc<dyn ChainRpc>, start_block: u64) -> Self {
        Self {
            pool,
            schema,
            chain_id,
            rpc,
            start_block,
        }
    }

    /// Read-only backward walk. Returns the earliest mismatched block number,
    /// or `None` if the stored window still matches the canonical chain.
    pub async fn detect(&self) -> Result<Option<u64>, IndexerError> {
        let mut conn = self.pool.acquire().await?;
        let chain_id_db = self.chain_id as i64;

        let cursor: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT fetched_to_block FROM {} WHERE chain_id = $1",
            self.schema.qualify("_cursor")
        ))
        .bind(chain_id_db)
        .fetch_optional(&mut *conn)
        .await?;

        let Some((tail,)) = cursor else {
            return Ok(None);
        };
        let tail = tail as u64;

        let scan_from = tail.saturating_sub(MAX_REORG_DEPTH - 1).max(self.start_block);
        if scan_from > tail {
            return Ok(None);
        }

        let stored: std::collections::HashMap<u64, String> = {
            let rows: Vec<(i64, String)> = sqlx::query_as(&format!(
                "SELECT block_number, block_hash FROM {} \
                 WHERE chain_id = $1 AND block_number BETWEEN $2 AND $3",
                self.schema.qualify("_block_hashes")
            ))
            .bind(chain_id_db)
            .bind(scan_from as i64)
            .bind(tail as i64)
            .fetch_all(&mut *conn)
            .await?;
            rows.into_iter().map(|(n, h)| (n as u64, h)).collect()
        };

        if stored.is_empty() {
            return Ok(None);
        }

        let mut earliest_reorg: Option<u64> = None;
        let mut n = tail;
        loop {
            let Some(stored_hash) = stored.get(&n) else {
                if n == scan_from {
                    break;
                }
                n -= 1;
                continue;
            };

            let Some(current) = self.rpc.get_block(n).await? else {
                if n == scan_from {
                    break;
                }
                n -= 1;
                continue;
            };

            if &current.hash != stored_hash {
                earliest_reorg = Some(n);
            } else if earliest_reorg.is_some() {
                break;
            } else {
                break;
            }

            if n == scan_from {
                break;
            }
            n -= 1;
        }

        match earliest_reorg {
            Some(mismatch) if tail - mismatch > MAX_REORG_DEPTH => Err(IndexerError::ReorgDepthExceeded {
                depth: tail - mismatch,
                cap: MAX_REORG_DEPTH,
            }),
            other => Ok(other),
        }
    }

    /// Transactional rollback across `RawEvent`, discovered `*_events`
    /// tables, `BlockHash`, and `Cursor`.
    pub async fn handle(&self, reorg_block: u64) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await?;
        let chain_id_db = self.chain_id as i64;

        let acquired = TxAdvisoryLock::try_acquire(&mut tx, &self.schema, chain_id_db).await?;
        if !acquired {
            return Err(IndexerError::LockUnavailable(format!(
                "fetch in progress for chain {}",
                self.chain_id
            )));
        }

        let target_cursor = reorg_block
            .checked_sub(1)
            .ok_or_else(|| IndexerError::Integrity("reorg at block 0".to_string()))?;
        if target_cursor + 1 < self.start_block {
            return Err(IndexerError::Integrity(format!(
                "reorg target cursor {target_cursor} below start_block - 1"
            )));
        }

        if EventStore::has_events_from(&mut tx, &self.schema, chain_id_db, reorg_block).await? {
            EventStore::delete_from(&mut tx, &self.schema, chain_id_db, reorg_block).await?;
        }

        let projection_tables = EventStore::discover_event_log_tables(&mut tx, &self.schema).await?;
        for table in &projection_tables {
            let qualified = self.schema.qualify(table);
            sqlx::query(&format!("DELETE FROM {qualified} WHERE block_number >= $1"))
                .bind(reorg_block as i64)
                .execute(&mut *tx)
                .await?;
        }

        BlockHashStore::delete_from(&mut tx, &self.schema, chain_id_db, reorg_block).await?;
        CursorStore::reset_to(&mut tx, &self.schema, chain_id_db, target_cursor as i64).await?;

        tx.commit().await?;

        tracing::warn!(
            reorg_block,
            target_cursor,
            tables_cleaned = projection_tables.len(),
            "reorg recovered"
        );

        Ok(())
    }
}

/// Domain tables (having `created_at` and `last_event_block` columns) whose
/// event pointer has no matching `RawEvent`. Advisory only — nothing here
/// deletes anything.
pub async fn find_orphans(
    pool: &PgPool,
    schema: &Schema,
    chain_id: i64,
) -> Result<Vec<OrphanRow>, IndexerError> {
    let mut conn = pool.acquire().await?;

    let candidate_tables: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT t.table_name \
         FROM information_schema.tables t \
         JOIN information_schema.columns c1 \
           ON c1.table_schema = t.table_schema AND c1.table_name = t.table_name AND c1.column_name = 'created_at' \
         JOIN information_schema.columns c2 \
           ON c2.table_schema = t.table_schema AND c2.table_name = t.table_name AND c2.column_name = 'last_event_block' \
         WHERE t.table_schema = $1",
    )
    .bind(schema.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut orphans = Vec::new();
    for (table_name,) in candidate_tables {
        if !chainidx_store::identifier::is_valid_identifier(&table_name) {
            return Err(IndexerError::Integrity(format!(
                "information_schema returned a malformed table name: {table_name}"
            )));
        }

        let qualified = schema.qualify(&table_name);
        let events_table = schema.qualify("_events");
        let rows: Vec<(String, i64, i32, i32)> = sqlx::query_as(&format!(
            "SELECT d.account_id, d.last_event_block, d.last_event_tx_index, d.last_event_log_index \
             FROM {qualified} d \
             LEFT JOIN {events_table} e \
               ON e.chain_id = $1 \
              AND e.block_number = d.last_event_block \
              AND e.tx_index = d.last_event_tx_index \
              AND e.log_index = d.last_event_log_index \
             WHERE e.id IS NULL"
        ))
        .bind(chain_id)
        .fetch_all(&mut *conn)
        .await?;

        for (account_id, block, tx_index, log_index) in rows {
            orphans.push(OrphanRow {
                table_name: table_name.clone(),
                account_id,
                last_event_block: block as u64,
                last_event_tx_index: tx_index as u32,
                last_event_log_index: log_index as u32,
            });
        }
    }

    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::MAX_REORG_DEPTH;

    #[test]
    fn depth_cap_is_spec_value() {
        assert_eq!(MAX_REORG_DEPTH, 100);
    }
}
