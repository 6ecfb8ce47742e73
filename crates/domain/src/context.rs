use async_trait::async_trait;
use chainidx_common::error::IndexerError;
use chainidx_common::types::EventPointer;
use chainidx_store::Schema;
use serde_json::Value;
use sqlx::{Postgres, Transaction};

/// Capability trait for the `accounts` domain table, one of the two
/// illustrative domain tables the sample handlers exercise.
///
/// Parameterized by the active transaction handle per call — no ambient
/// transaction state.
#[async_trait]
pub trait AccountsRepo: Send + Sync {
    async fn upsert_metadata(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: &str,
        metadata: Value,
        pointer: EventPointer,
    ) -> Result<(), IndexerError>;
}

/// Capability trait for the `generic_events` projection table — a
/// `*_events`-suffixed table, in scope for reorg cleanup and table
/// discovery.
#[async_trait]
pub trait GenericEventsRepo: Send + Sync {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction_hash: &str,
        log_index: i32,
        event_name: &str,
        payload: Value,
        block_number: u64,
    ) -> Result<(), IndexerError>;
}

pub struct PgAccountsRepo {
    schema: Schema,
}

impl PgAccountsRepo {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl AccountsRepo for PgAccountsRepo {
    async fn upsert_metadata(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: &str,
        metadata: Value,
        pointer: EventPointer,
    ) -> Result<(), IndexerError> {
        let table = self.schema.qualify("accounts");
        sqlx::query(&format!(
            "INSERT INTO {table} \
               (account_id, metadata, created_at, last_event_block, last_event_tx_index, last_event_log_index) \
             VALUES ($1, $2, NOW(), $3, $4, $5) \
             ON CONFLICT (account_id) DO UPDATE SET \
               metadata = EXCLUDED.metadata, \
               last_event_block = EXCLUDED.last_event_block, \
               last_event_tx_index = EXCLUDED.last_event_tx_index, \
               last_event_log_index = EXCLUDED.last_event_log_index"
        ))
        .bind(account_id)
        .bind(metadata)
        .bind(pointer.block_number as i64)
        .bind(pointer.tx_index as i32)
        .bind(pointer.log_index as i32)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

pub struct PgGenericEventsRepo {
    schema: Schema,
}

impl PgGenericEventsRepo {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl GenericEventsRepo for PgGenericEventsRepo {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        transaction_hash: &str,
        log_index: i32,
        event_name: &str,
        payload: Value,
        block_number: u64,
    ) -> Result<(), IndexerError> {
        let table = self.schema.qualify("generic_events");
        sqlx::query(&format!(
            "INSERT INTO {table} (transaction_hash, log_index, event_name, payload, block_number) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (transaction_hash, log_index) DO NOTHING"
        ))
        .bind(transaction_hash)
        .bind(log_index)
        .bind(event_name)
        .bind(payload)
        .bind(block_number as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Bundle of capability traits handed to every handler invocation, bound to
/// the processor's current transaction. Handlers reach the chain's
/// configured `visibility_threshold_block_number` here without depending
/// on the core crate.
pub struct HandlerContext<'a> {
    pub accounts: &'a dyn AccountsRepo,
    pub generic_events: &'a dyn GenericEventsRepo,
    pub visibility_threshold_block_number: u64,
}
