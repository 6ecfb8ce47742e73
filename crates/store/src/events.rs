use chainidx_common::error::IndexerError;
use chainidx_common::types::{EventPointer, EventStatus, NewRawEvent, RawEvent};
use sqlx::{Postgres, Transaction};

use crate::{chunk_size, identifier, Schema};

const TABLE: &str = "_events";
const COLUMNS_PER_ROW: usize = 14;

/// Append-only raw events with a status lifecycle, ordered drain, and
/// discovery of derived `*_events` log tables.
pub struct EventStore;

impl EventStore {
    /// Unique by `(chain, block, tx_index, log_index)`; conflicting rows are
    /// no-ops, which is what makes a retried fetch step idempotent.
    pub async fn insert_batch(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        events: &[NewRawEvent],
        insert_chunk_size: usize,
    ) -> Result<(), IndexerError> {
        if events.is_empty() {
            return Ok(());
        }

        let table = schema.qualify(TABLE);
        let chunk_len = insert_chunk_size.min(chunk_size(COLUMNS_PER_ROW)).max(1);

        for chunk in events.chunks(chunk_len) {
            let mut qb = sqlx::QueryBuilder::new(format!(
                "INSERT INTO {table} (chain_id, block_number, tx_index, log_index, block_hash, \
                 block_timestamp, transaction_hash, contract_address, event_name, event_signature, \
                 args, status, created_at, updated_at) "
            ));
            qb.push_values(chunk, |mut b, event| {
                b.push_bind(chain_id)
                    .push_bind(event.pointer.block_number as i64)
                    .push_bind(event.pointer.tx_index as i32)
                    .push_bind(event.pointer.log_index as i32)
                    .push_bind(&event.block_hash)
                    .push_bind(event.block_timestamp)
                    .push_bind(&event.transaction_hash)
                    .push_bind(&event.contract_address)
                    .push_bind(&event.event_name)
                    .push_bind(&event.event_signature)
                    .push_bind(&event.args)
                    .push_bind(EventStatus::Pending)
                    .push("NOW()")
                    .push("NOW()");
            });
            qb.push(
                " ON CONFLICT (chain_id, block_number, tx_index, log_index) DO NOTHING",
            );
            qb.build().execute(&mut **tx).await?;
        }

        Ok(())
    }

    pub async fn next_pending(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
    ) -> Result<Option<RawEvent>, IndexerError> {
        Ok(Self::next_pending_batch(tx, schema, chain_id, 1)
            .await?
            .into_iter()
            .next())
    }

    /// Strictly ordered by `(block_number, tx_index, log_index)` ascending,
    /// filtered to `status = pending`, and locked against concurrent
    /// drainers via `FOR UPDATE SKIP LOCKED`.
    pub async fn next_pending_batch(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        n: u32,
    ) -> Result<Vec<RawEvent>, IndexerError> {
        let table = schema.qualify(TABLE);
        let rows: Vec<RawEvent> = sqlx::query_as(&format!(
            "SELECT id, chain_id, block_number, tx_index, log_index, block_hash, block_timestamp, \
             transaction_hash, contract_address, event_name, event_signature, args, status, \
             error_message, created_at, updated_at, processed_at \
             FROM {table} \
             WHERE chain_id = $1 AND status = 'pending' \
             ORDER BY block_number ASC, tx_index ASC, log_index ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(chain_id)
        .bind(n as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    pub async fn mark_processed(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        pointer: EventPointer,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'processed', processed_at = NOW(), updated_at = NOW() \
             WHERE chain_id = $1 AND block_number = $2 AND tx_index = $3 AND log_index = $4"
        ))
        .bind(chain_id)
        .bind(pointer.block_number as i64)
        .bind(pointer.tx_index as i32)
        .bind(pointer.log_index as i32)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        pointer: EventPointer,
        error_message: &str,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "UPDATE {table} SET status = 'failed', error_message = $5, updated_at = NOW() \
             WHERE chain_id = $1 AND block_number = $2 AND tx_index = $3 AND log_index = $4"
        ))
        .bind(chain_id)
        .bind(pointer.block_number as i64)
        .bind(pointer.tx_index as i32)
        .bind(pointer.log_index as i32)
        .bind(error_message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn has_events_from(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        block: u64,
    ) -> Result<bool, IndexerError> {
        let table = schema.qualify(TABLE);
        let row: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM {table} WHERE chain_id = $1 AND block_number >= $2 LIMIT 1"
        ))
        .bind(chain_id)
        .bind(block as i64)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }

    /// Deletes rows with `block_number >= block` (inclusive), used by reorg
    /// recovery.
    pub async fn delete_from(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
        chain_id: i64,
        block: u64,
    ) -> Result<(), IndexerError> {
        let table = schema.qualify(TABLE);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE chain_id = $1 AND block_number >= $2"
        ))
        .bind(chain_id)
        .bind(block as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Finds schema tables whose name ends in `_events` (other than the raw
    /// `_events` table itself) and whose column set includes
    /// `block_number` — the set reorg recovery must clean. Every name is
    /// re-validated against the identifier grammar before being handed back,
    /// even though it came from `information_schema` rather than user input:
    /// this is the one function downstream code is allowed to trust without
    /// re-checking.
    pub async fn discover_event_log_tables(
        tx: &mut Transaction<'_, Postgres>,
        schema: &Schema,
    ) -> Result<Vec<String>, IndexerError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT t.table_name \
             FROM information_schema.tables t \
             JOIN information_schema.columns c \
               ON c.table_schema = t.table_schema AND c.table_name = t.table_name \
             WHERE t.table_schema = $1 \
               AND t.table_name LIKE '%\\_events' ESCAPE '\\' \
               AND t.table_name <> '_events' \
               AND c.column_name = 'block_number'",
        )
        .bind(schema.as_str())
        .fetch_all(&mut **tx)
        .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for (name,) in rows {
            if !identifier::is_valid_identifier(&name) {
                return Err(IndexerError::Integrity(format!(
                    "information_schema returned a malformed table name: {name}"
                )));
            }
            tables.push(name);
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_chunk_never_exceeds_bind_parameter_limit() {
        let chunk_len = 1000usize.min(chunk_size(COLUMNS_PER_ROW)).max(1);
        assert!(chunk_len * COLUMNS_PER_ROW <= crate::MAX_BIND_PARAMS);
    }
}
