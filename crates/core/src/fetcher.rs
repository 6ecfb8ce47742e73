use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::Address;
use chainidx_common::error::IndexerError;
use chainidx_common::types::{ChainId, NewRawEvent};
use chainidx_decode::{DecodeOutcome, DecoderRegistry};
use chainidx_rpc::ChainRpc;
use chainidx_store::block_hash::BlockHashStore;
use chainidx_store::cursor::CursorStore;
use chainidx_store::events::EventStore;
use chainidx_store::lock::TxAdvisoryLock;
use chainidx_store::Schema;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Minimum reorg-window size and pruning depth.
const MIN_WINDOW: u64 = 100;

pub struct FetchResult {
    pub from: u64,
    pub to: u64,
    pub events_inserted: usize,
}

/// The full transactional fetch step. Every call opens its
/// own transaction; nothing here is retried internally — the coordinator's
/// outer loop re-enters on a fresh transaction after a transient error.
pub struct BlockFetcher {
    pool: PgPool,
    schema: Schema,
    chain_id: ChainId,
    rpc: Arc<dyn ChainRpc>,
    decoders: Arc<DecoderRegistry>,
    confirmations: u64,
    fetch_batch_size: u64,
    insert_chunk_size: usize,
    rpc_concurrency: usize,
}

impl BlockFetcher {
    pub fn new(
        pool: PgPool,
        schema: Schema,
        chain_id: ChainId,
        rpc: Arc<dyn ChainRpc>,
        decoders: Arc<DecoderRegistry>,
        confirmations: u64,
        fetch_batch_size: u64,
        insert_chunk_size: usize,
        rpc_concurrency: usize,
    ) -> Self {
        Self {
            pool,
            schema,
            chain_id,
            rpc,
            decoders,
            confirmations,
            fetch_batch_size,
            insert_chunk_size,
            rpc_concurrency,
        }
    }

    pub async fn fetch(&self) -> Result<Option<FetchResult>, IndexerError> {
        let mut tx = self.pool.begin().await?;
        let chain_id_db = self.chain_id as i64;

        // Step 1: cursor under lock.
        let cursor = CursorStore::get_for_update(&mut tx, &self.schema, chain_id_db)
            .await?
            .ok_or(IndexerError::CursorNotInitialized(self.chain_id))?;

        // Step 2: safe head.
        let safe_head = self.rpc.safe_block(self.confirmations).await?;
        if cursor.fetched_to_block >= safe_head {
            tx.commit().await?;
            return Ok(None);
        }

        // Step 3: window.
        let from = cursor.fetched_to_block + 1;
        let to = (from + self.fetch_batch_size - 1).min(safe_head);
        if to < from {
            tx.commit().await?;
            return Ok(None);
        }

        // Step 4: logs.
        let addresses: Vec<Address> = self.decoders.contract_addresses();
        let logs = self.rpc.get_logs(&addresses, from, to).await?;

        // Step 5: required block summaries.
        let window_size = MIN_WINDOW.max(self.confirmations);
        let reorg_window_start = from.max(safe_head.saturating_sub(window_size));

        let mut summaries: BTreeMap<u64, chainidx_common::types::BlockSummary> = self
            .rpc
            .get_blocks_in_range(reorg_window_start, to, self.rpc_concurrency)
            .await?
            .into_iter()
            .map(|s| (s.number, s))
            .collect();

        let sparse_blocks: Vec<u64> = logs
            .iter()
            .filter_map(|log| log.block_number)
            .filter(|&n| n < reorg_window_start)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        if !sparse_blocks.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.rpc_concurrency.max(1)));
            let mut tasks = JoinSet::new();
            for number in sparse_blocks {
                let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                    IndexerError::Rpc(format!("semaphore closed during sparse lookup: {e}"))
                })?;
                let rpc = self.rpc.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    (number, rpc.get_block(number).await)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                let (number, result) = joined
                    .map_err(|e| IndexerError::Rpc(format!("sparse block task panicked: {e}")))?;
                if let Some(summary) = result? {
                    summaries.insert(number, summary);
                }
            }
        }

        // Step 6: exclude concurrent recovery.
        TxAdvisoryLock::acquire_blocking(&mut tx, &self.schema, chain_id_db).await?;

        // Step 7: upsert hashes.
        let summary_rows: Vec<_> = summaries.values().cloned().collect();
        BlockHashStore::put_many(&mut tx, &self.schema, chain_id_db, &summary_rows).await?;

        // Step 8: prune.
        let prune_before = to.saturating_sub(MIN_WINDOW.max(3 * self.confirmations));
        BlockHashStore::delete_before(&mut tx, &self.schema, chain_id_db, prune_before).await?;

        // Step 9: timestamp lookup.
        let timestamp_by_block: HashMap<u64, chrono::DateTime<chrono::Utc>> = summaries
            .iter()
            .map(|(n, s)| (*n, s.timestamp))
            .collect();

        // Step 10: decode.
        let mut new_events = Vec::with_capacity(logs.len());
        for log in &logs {
            let Some(block_number) = log.block_number else {
                return Err(IndexerError::Integrity(
                    "log missing block_number".to_string(),
                ));
            };
            let Some(tx_index) = log.transaction_index else {
                return Err(IndexerError::Integrity(
                    "log missing transaction_index".to_string(),
                ));
            };
            let Some(log_index) = log.log_index else {
                return Err(IndexerError::Integrity("log missing log_index".to_string()));
            };
            let Some(tx_hash) = log.transaction_hash else {
                return Err(IndexerError::Integrity(
                    "log missing transaction_hash".to_string(),
                ));
            };

            let outcome = self.decoders.decode(&log.inner);
            let event = match outcome {
                DecodeOutcome::Decoded(event) => event,
                DecodeOutcome::MissingHandler { event_name } => {
                    tracing::debug!(event_name, "no handler registered, skipping");
                    continue;
                }
                DecodeOutcome::DecodeError { reason } => {
                    tracing::warn!(reason, "malformed log, skipping");
                    continue;
                }
                DecodeOutcome::MissingFields => {
                    tracing::warn!("log lacked required fields, skipping");
                    continue;
                }
            };

            let block_timestamp = *timestamp_by_block.get(&block_number).ok_or_else(|| {
                IndexerError::Integrity(format!(
                    "decoded event at block {block_number} has no block timestamp"
                ))
            })?;

            let (event_name, event_signature) = (
                event.name().to_string(),
                log.inner
                    .topics()
                    .first()
                    .map(|t| format!("{:#x}", t))
                    .unwrap_or_default(),
            );

            new_events.push(NewRawEvent {
                chain_id: self.chain_id,
                pointer: chainidx_common::types::EventPointer::new(
                    block_number,
                    tx_index as u32,
                    log_index as u32,
                ),
                block_hash: log
                    .block_hash
                    .map(|h| format!("{:#x}", h))
                    .unwrap_or_default(),
                block_timestamp,
                transaction_hash: format!("{:#x}", tx_hash),
                contract_address: format!("{:#x}", log.inner.address),
                event_name,
                event_signature,
                args: serde_json::to_value(&event).map_err(|e| {
                    IndexerError::Integrity(format!("decoded event did not serialize: {e}"))
                })?,
            });
        }

        // Step 11: sort and insert.
        new_events.sort_by_key(|e| e.pointer);
        let events_inserted = new_events.len();
        EventStore::insert_batch(
            &mut tx,
            &self.schema,
            chain_id_db,
            &new_events,
            self.insert_chunk_size,
        )
        .await?;

        // Step 12: advance cursor, commit.
        CursorStore::advance_to(&mut tx, &self.schema, chain_id_db, to as i64).await?;
        tx.commit().await?;

        Ok(Some(FetchResult {
            from,
            to,
            events_inserted,
        }))
    }
}

