//! Integration tests for the fetch / reorg-detect / process pipeline.
//!
//! These tests require a running PostgreSQL database. Run with:
//!
//! ```bash
//! DATABASE_URL="postgresql://..." cargo test -p chainidx-core --test integration -- --ignored --nocapture
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{address, Address, B256};
use async_trait::async_trait;
use chainidx_common::error::IndexerError;
use chainidx_common::types::BlockSummary;
use chainidx_core::fetcher::BlockFetcher;
use chainidx_core::processor::EventProcessor;
use chainidx_core::reorg::ReorgDetector;
use chainidx_decode::account_metadata::AccountMetadataDecoder;
use chainidx_decode::{DecoderRegistry, EventDecoder};
use chainidx_domain::context::{PgAccountsRepo, PgGenericEventsRepo};
use chainidx_domain::handlers::HandlerRegistry;
use chainidx_rpc::ChainRpc;
use chainidx_store::cursor::CursorStore;
use chainidx_store::Schema;
use sqlx::PgPool;

const CHAIN_ID: i64 = 1;
const TEST_ADDRESS: Address = address!("0000000000000000000000000000000000000001");

/// In-memory `ChainRpc` double: a fixed block/log universe with a mutable
/// "canonical hash" override per block number, so tests can simulate a
/// reorg by rewriting one entry after the fetcher has already indexed it.
struct MockRpc {
    blocks: tokio::sync::Mutex<HashMap<u64, BlockSummary>>,
    logs_by_block: HashMap<u64, Vec<alloy::rpc::types::Log>>,
    head: u64,
}

impl MockRpc {
    fn new(head: u64) -> Self {
        Self {
            blocks: tokio::sync::Mutex::new(HashMap::new()),
            logs_by_block: HashMap::new(),
            head,
        }
    }

    fn with_block(mut self, number: u64, hash_byte: u8) -> Self {
        self.blocks.get_mut().insert(
            number,
            BlockSummary {
                number,
                hash: format!("{:#x}", B256::repeat_byte(hash_byte)),
                timestamp: chrono::Utc::now(),
            },
        );
        self
    }

    fn with_account_metadata_log(mut self, block_number: u64, tx_index: u64, log_index: u64, account_id: u128) -> Self {
        let signature = AccountMetadataDecoder::new().event_signature();
        let account_topic = B256::from(alloy::primitives::U256::from(account_id));
        let inner = alloy::primitives::Log::new_unchecked(
            TEST_ADDRESS,
            vec![signature, account_topic],
            vec![0u8; 64].into(),
        );
        let mut log = alloy::rpc::types::Log {
            inner,
            block_hash: None,
            block_number: Some(block_number),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(tx_index as u8)),
            transaction_index: Some(tx_index),
            log_index: Some(log_index),
            removed: false,
        };
        log.block_hash = self
            .blocks
            .get_mut()
            .get(&block_number)
            .map(|b| b.hash.parse().unwrap());
        self.logs_by_block.entry(block_number).or_default().push(log);
        self
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn latest_block(&self) -> Result<u64, IndexerError> {
        Ok(self.head)
    }

    async fn safe_block(&self, confirmations: u64) -> Result<u64, IndexerError> {
        Ok(self.head.saturating_sub(confirmations))
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        Ok(self.blocks.lock().await.get(&number).cloned())
    }

    async fn get_blocks_in_range(
        &self,
        from: u64,
        to: u64,
        _concurrency: usize,
    ) -> Result<Vec<BlockSummary>, IndexerError> {
        let blocks = self.blocks.lock().await;
        Ok((from..=to).filter_map(|n| blocks.get(&n).cloned()).collect())
    }

    async fn get_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> Result<Vec<alloy::rpc::types::Log>, IndexerError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for n in from..=to {
            if let Some(logs) = self.logs_by_block.get(&n) {
                out.extend(logs.iter().cloned());
            }
        }
        Ok(out)
    }
}

fn account_decoders() -> Arc<DecoderRegistry> {
    let mut registry = DecoderRegistry::new();
    registry.register(TEST_ADDRESS, Box::new(AccountMetadataDecoder::new()));
    Arc::new(registry)
}

/// `sqlx::test` hands each test a fresh, already-empty database on the
/// default `public` schema, so migrations run unqualified exactly as
/// `main.rs` runs them in production via `search_path`.
async fn setup(pool: &PgPool) -> Schema {
    sqlx::migrate!("../../migrations").run(pool).await.unwrap();
    Schema::try_new("public").unwrap()
}

#[sqlx::test]
#[ignore]
async fn fetch_inserts_decoded_events_and_advances_cursor(pool: PgPool) {
    let schema = setup(&pool).await;
    let mut tx = pool.begin().await.unwrap();
    CursorStore::initialize(&mut tx, &schema, CHAIN_ID, 99).await.unwrap();
    tx.commit().await.unwrap();

    let rpc: Arc<dyn ChainRpc> = Arc::new(
        MockRpc::new(150)
            .with_block(100, 1)
            .with_account_metadata_log(100, 0, 0, 42),
    );

    let fetcher = BlockFetcher::new(
        pool.clone(),
        schema.clone(),
        CHAIN_ID as u64,
        rpc,
        account_decoders(),
        1,
        500,
        1000,
        4,
    );

    let result = fetcher.fetch().await.unwrap().expect("expected a fetch result");
    assert_eq!(result.events_inserted, 1);

    let mut tx = pool.begin().await.unwrap();
    let cursor = CursorStore::get(&mut tx, &schema, CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(cursor.fetched_to_block, result.to);
}

#[sqlx::test]
#[ignore]
async fn process_batch_drains_pending_events_through_handler(pool: PgPool) {
    let schema = setup(&pool).await;
    let mut tx = pool.begin().await.unwrap();
    CursorStore::initialize(&mut tx, &schema, CHAIN_ID, 99).await.unwrap();
    tx.commit().await.unwrap();

    let rpc: Arc<dyn ChainRpc> = Arc::new(
        MockRpc::new(150)
            .with_block(100, 1)
            .with_account_metadata_log(100, 0, 0, 7),
    );
    let decoders = account_decoders();

    let fetcher = BlockFetcher::new(
        pool.clone(),
        schema.clone(),
        CHAIN_ID as u64,
        rpc,
        decoders.clone(),
        1,
        500,
        1000,
        4,
    );
    fetcher.fetch().await.unwrap();

    let handlers = HandlerRegistry::with_defaults();
    let accounts = PgAccountsRepo::new(schema.clone());
    let generic_events = PgGenericEventsRepo::new(schema.clone());

    let processor = EventProcessor::new(
        pool.clone(),
        schema.clone(),
        CHAIN_ID as u64,
        &decoders,
        &handlers,
        &accounts,
        &generic_events,
        0,
        100,
    );

    let processed = processor.process_batch().await.unwrap();
    assert_eq!(processed.len(), 1);

    let row: (String,) = sqlx::query_as("SELECT account_id FROM accounts WHERE account_id = '7'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, "7");
}

#[sqlx::test]
#[ignore]
async fn reorg_detect_and_handle_rolls_back_events_and_cursor(pool: PgPool) {
    let schema = setup(&pool).await;
    let mut tx = pool.begin().await.unwrap();
    CursorStore::initialize(&mut tx, &schema, CHAIN_ID, 99).await.unwrap();
    tx.commit().await.unwrap();

    let rpc: Arc<dyn ChainRpc> = Arc::new(
        MockRpc::new(150)
            .with_block(100, 1)
            .with_account_metadata_log(100, 0, 0, 1),
    );
    let fetcher = BlockFetcher::new(
        pool.clone(),
        schema.clone(),
        CHAIN_ID as u64,
        rpc,
        account_decoders(),
        1,
        500,
        1000,
        4,
    );
    fetcher.fetch().await.unwrap();

    // Simulate the canonical chain rewriting block 100 with a different hash.
    let rewritten_rpc: Arc<dyn ChainRpc> = Arc::new(MockRpc::new(150).with_block(100, 2));
    let detector = ReorgDetector::new(pool.clone(), schema.clone(), CHAIN_ID as u64, rewritten_rpc, 1);

    let mismatch = detector.detect().await.unwrap();
    assert_eq!(mismatch, Some(100));

    detector.handle(100).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let cursor = CursorStore::get(&mut tx, &schema, CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(cursor.fetched_to_block, 99);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _events WHERE block_number >= 100")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}
