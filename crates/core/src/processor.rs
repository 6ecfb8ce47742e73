use chainidx_common::error::IndexerError;
use chainidx_common::types::{ChainId, EventPointer, EventStatus, RawEvent};
use chainidx_decode::DecoderRegistry;
use chainidx_domain::{HandlerContext, HandlerRegistry};
use chainidx_store::events::EventStore;
use chainidx_store::Schema;
use sqlx::PgPool;

pub struct ProcessedPointer {
    pub pointer: EventPointer,
    pub status: EventStatus,
}

/// Batch drain of pending events under a transaction, with per-event
/// fallback isolation on batch failure.
pub struct EventProcessor<'a> {
    pool: PgPool,
    schema: Schema,
    chain_id: ChainId,
    decoders: &'a DecoderRegistry,
    handlers: &'a HandlerRegistry,
    accounts: &'a dyn chainidx_domain::AccountsRepo,
    generic_events: &'a dyn chainidx_domain::GenericEventsRepo,
    visibility_threshold_block_number: u64,
    batch_size: u32,
}

impl<'a> EventProcessor<'a> {
    pub fn new(
        pool: PgPool,
        schema: Schema,
        chain_id: ChainId,
        decoders: &'a DecoderRegistry,
        handlers: &'a HandlerRegistry,
        accounts: &'a dyn chainidx_domain::AccountsRepo,
        generic_events: &'a dyn chainidx_domain::GenericEventsRepo,
        visibility_threshold_block_number: u64,
        batch_size: u32,
    ) -> Self {
        Self {
            pool,
            schema,
            chain_id,
            decoders,
            handlers,
            accounts,
            generic_events,
            visibility_threshold_block_number,
            batch_size,
        }
    }

    fn ctx(&self) -> HandlerContext<'_> {
        HandlerContext {
            accounts: self.accounts,
            generic_events: self.generic_events,
            visibility_threshold_block_number: self.visibility_threshold_block_number,
        }
    }

    pub async fn process_batch(&self) -> Result<Vec<ProcessedPointer>, IndexerError> {
        let chain_id_db = self.chain_id as i64;

        let batch_result = self.try_batch(chain_id_db).await;
        match batch_result {
            Ok(pointers) => Ok(pointers),
            Err(_batch_err) => {
                tracing::warn!("batch transaction aborted, falling back to per-event isolation");
                self.process_fallback(chain_id_db).await
            }
        }
    }

    async fn try_batch(&self, chain_id_db: i64) -> Result<Vec<ProcessedPointer>, IndexerError> {
        let mut tx = self.pool.begin().await?;
        let events = EventStore::next_pending_batch(&mut tx, &self.schema, chain_id_db, self.batch_size).await?;

        let mut processed = Vec::with_capacity(events.len());
        let ctx = self.ctx();
        for event in &events {
            self.dispatch(&mut tx, &ctx, event).await?;
            EventStore::mark_processed(&mut tx, &self.schema, chain_id_db, event.pointer()).await?;
            processed.push(ProcessedPointer {
                pointer: event.pointer(),
                status: EventStatus::Processed,
            });
        }

        tx.commit().await?;
        Ok(processed)
    }

    /// Re-drains the same events one-by-one, each in its own transaction.
    /// Transient errors bubble up for the outer retry boundary to restart;
    /// non-transient errors mark just that event `failed` in a *separate*
    /// transaction so the failure record survives the rollback.
    async fn process_fallback(&self, chain_id_db: i64) -> Result<Vec<ProcessedPointer>, IndexerError> {
        let mut tx = self.pool.begin().await?;
        let events = EventStore::next_pending_batch(&mut tx, &self.schema, chain_id_db, self.batch_size).await?;
        tx.commit().await?;

        let mut results = Vec::with_capacity(events.len());
        let ctx = self.ctx();

        for event in events {
            let mut event_tx = self.pool.begin().await?;
            let outcome = self.dispatch(&mut event_tx, &ctx, &event).await;

            match outcome {
                Ok(()) => {
                    EventStore::mark_processed(&mut event_tx, &self.schema, chain_id_db, event.pointer()).await?;
                    event_tx.commit().await?;
                    results.push(ProcessedPointer {
                        pointer: event.pointer(),
                        status: EventStatus::Processed,
                    });
                }
                Err(err) if err.is_transient() => {
                    event_tx.rollback().await.ok();
                    return Err(err);
                }
                Err(err) => {
                    event_tx.rollback().await.ok();
                    let mut failure_tx = self.pool.begin().await?;
                    EventStore::mark_failed(
                        &mut failure_tx,
                        &self.schema,
                        chain_id_db,
                        event.pointer(),
                        &err.to_string(),
                    )
                    .await?;
                    failure_tx.commit().await?;
                    results.push(ProcessedPointer {
                        pointer: event.pointer(),
                        status: EventStatus::Failed,
                    });
                }
            }
        }

        Ok(results)
    }

    async fn dispatch(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ctx: &HandlerContext<'_>,
        event: &RawEvent,
    ) -> Result<(), IndexerError> {
        let address: alloy::primitives::Address = event
            .contract_address
            .parse()
            .map_err(|e| IndexerError::Integrity(format!("stored contract_address malformed: {e}")))?;
        let topic0: alloy::primitives::B256 = event
            .event_signature
            .parse()
            .map_err(|e| IndexerError::Integrity(format!("stored event_signature malformed: {e}")))?;

        // Confirms a decoder is still registered for this (address, topic)
        // pair — if the decoder set changed since this event was fetched,
        // that is an integrity concern, not a decode step: the event was
        // already decoded once, at fetch time, and `args` holds the result.
        if self.decoders.resolve_handler(address, topic0).is_none() {
            return Err(IndexerError::Integrity(format!(
                "no decoder registered for persisted event {}",
                event.event_name
            )));
        }

        let domain_event: chainidx_decode::DomainEvent = serde_json::from_value(event.args.clone())
            .map_err(|e| IndexerError::Integrity(format!("stored args did not deserialize: {e}")))?;

        let Some(handler) = self.handlers.resolve(&event.event_name) else {
            tracing::debug!(event_name = %event.event_name, "no handler registered, skipping");
            return Ok(());
        };

        handler
            .handle(tx, ctx, &domain_event, event.pointer(), &event.transaction_hash)
            .await
    }
}
